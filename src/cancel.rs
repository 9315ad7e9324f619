//! Cancellation support for calls.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation token shared by every clone of a [`CallContext`](crate::CallContext)
/// and by the response bodies produced under it.
///
/// Cancelling is permanent and visible to all clones.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut watcher = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = watcher.wait_for(|cancelled| *cancelled).await;
    }
}
