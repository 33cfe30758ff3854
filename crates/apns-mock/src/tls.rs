//! TLS bootstrap for both listeners.
//!
//! The mock either loads a PEM certificate chain and key from disk or mints a
//! self-signed certificate at startup. Either way the identity is turned into
//! a [`TlsAcceptor`] backed by the `ring` crypto provider.

use crate::config::ServerConfig;
use crate::error::MockError;
use rcgen::CertifiedKey;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Certificate chain and private key presented to clients.
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Generates a self-signed certificate valid for `hostnames`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Certificate`] if generation fails, e.g. for an
    /// unusable host name.
    pub fn self_signed(hostnames: &[String]) -> Result<Self, MockError> {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(hostnames.to_vec())?;
        Ok(Self {
            certs: vec![cert.der().clone()],
            key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
        })
    }

    /// Loads a PEM certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Pem`] if either file cannot be read or parsed and
    /// [`MockError::NoCertificates`] if the chain is empty.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, MockError> {
        let certs = CertificateDer::pem_file_iter(cert_path)?.collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(MockError::NoCertificates(cert_path.to_path_buf()));
        }
        let key = PrivateKeyDer::from_pem_file(key_path)?;
        Ok(Self { certs, key })
    }

    /// Loads the configured PEM files, or generates a certificate when none
    /// are configured.
    ///
    /// # Errors
    ///
    /// See [`from_pem_files`](Self::from_pem_files) and
    /// [`self_signed`](Self::self_signed).
    pub fn from_config(config: &ServerConfig) -> Result<Self, MockError> {
        match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => {
                let identity = Self::from_pem_files(cert, key)?;
                info!("loaded certificate from {}", cert.display());
                Ok(identity)
            }
            (None, None) => {
                let identity = Self::self_signed(&config.hostnames)?;
                warn!(
                    hostnames = ?config.hostnames,
                    "using ephemeral self-signed certificate (not persisted)"
                );
                Ok(identity)
            }
            _ => Err(MockError::Config(
                "cert and key must be provided together".to_string(),
            )),
        }
    }

    /// The certificate chain, leaf first.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// Builds a TLS acceptor presenting this identity.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Tls`] if rustls rejects the certificate or key.
    pub fn acceptor(&self) -> Result<TlsAcceptor, MockError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
