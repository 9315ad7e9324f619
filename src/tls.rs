use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Client TLS material loaded from PEM files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Nothing is loaded unless this is set.
    pub enabled: bool,
    /// Client certificate, used together with `key_file`.
    pub cert_file: Option<PathBuf>,
    /// Client private key, used together with `cert_file`.
    pub key_file: Option<PathBuf>,
    /// Extra root CA added on top of the built-in roots.
    pub ca_file: Option<PathBuf>,
}

impl TlsOptions {
    pub(crate) fn apply(&self, mut builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        if !self.enabled {
            return Ok(builder);
        }

        if let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) {
            let mut pem = read(cert)?;
            pem.push(b'\n');
            pem.extend(read(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|err| Error::Tls(format!("invalid client key pair: {err}")))?;
            builder = builder.identity(identity);
        }

        if let Some(ca) = &self.ca_file {
            let certificate = reqwest::Certificate::from_pem(&read(ca)?)
                .map_err(|err| Error::Tls(format!("invalid CA certificate {}: {err}", ca.display())))?;
            builder = builder.add_root_certificate(certificate);
        }

        Ok(builder)
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| Error::Tls(format!("cannot read {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::TlsOptions;
    use crate::Error;

    #[test]
    fn disabled_options_load_nothing() {
        let options = TlsOptions {
            ca_file: Some("/definitely/missing.pem".into()),
            ..TlsOptions::default()
        };
        assert!(options.apply(reqwest::Client::builder()).is_ok());
    }

    #[test]
    fn missing_file_is_reported() {
        let options = TlsOptions {
            enabled: true,
            ca_file: Some("/definitely/missing.pem".into()),
            ..TlsOptions::default()
        };
        let err = options
            .apply(reqwest::Client::builder())
            .expect_err("missing CA must fail");
        assert!(matches!(err, Error::Tls(message) if message.contains("missing.pem")));
    }
}
