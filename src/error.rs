//! Error taxonomy for [`crate::ClusterTls`].

use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by cluster_tls functions
#[derive(Debug, Error)]
pub enum ClusterTlsError {
    /// A required setting is missing, names a file that cannot be used,
    /// or asks for an engine on a boundary that has no material for it.
    #[error("{0}")]
    Configuration(String),
    /// A keystore or truststore could not be opened or exported. Bad
    /// passwords, missing aliases and corrupt containers all end up here.
    #[error("Cannot load TLS material from {}: {message}", path.display())]
    Container {
        /// The container that failed to load.
        path: PathBuf,
        /// What went wrong, for humans.
        message: String,
    },
    /// Wrapper for std::io::Error
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    /// Wrapper for rustls::Error
    #[error("{0}")]
    TLSError(#[from] rustls::Error),
    /// The verifier for client certificates could not be built.
    #[error("{0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),
}

impl ClusterTlsError {
    pub(crate) fn container(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Container {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
