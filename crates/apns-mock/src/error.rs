use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while serving gateway and feedback connections.
#[derive(Error, Debug)]
pub enum MockError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A push frame header could not be decoded.
    #[error("frame error: {0}")]
    Frame(#[from] apns_common::FrameError),
    /// TLS configuration error.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// Self-signed certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    /// A PEM file could not be read or parsed.
    #[error("pem error: {0}")]
    Pem(#[from] rustls::pki_types::pem::Error),
    /// The certificate file contained no certificates.
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
