use std::path::PathBuf;

use thiserror::Error;

use crate::security::revocation::RejectReason;

pub type Result<T> = std::result::Result<T, TlsError>;

/// Errors produced while configuring trust material or establishing a session
#[derive(Error, Debug)]
pub enum TlsError {
    /// Required configuration is missing or an argument is unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Path storage could not be allocated; the configuration is unchanged
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Loading the client certificate from '{path}' failed: {reason}")]
    CertificateLoadFailed { path: PathBuf, reason: String },

    #[error("Loading the client private key from '{path}' failed: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("Failed to load the locations of trusted CA certificates: {0}")]
    TrustAnchorLoadFailed(String),

    #[error("Failed to build the revocation store: {0}")]
    RevocationStoreBuildFailed(String),

    #[error("CRL signature verification failed for '{subject}'")]
    CrlSignatureInvalid { subject: String },

    #[error("CRL next update field missing for '{subject}'")]
    CrlFieldMissing { subject: String },

    #[error("CRL has expired for '{subject}'")]
    CrlExpired { subject: String },

    #[error("Certificate revoked: '{subject}'")]
    CertificateRevoked { subject: String },

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Connecting over TLS failed: {0}")]
    HandshakeFailed(String),

    /// The protocol layer rejected the session after the secure channel came up
    #[error("Protocol handshake failed: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

impl From<toml::de::Error> for TlsError {
    fn from(err: toml::de::Error) -> Self {
        TlsError::Config(err.to_string())
    }
}

impl TlsError {
    /// Map a revocation reject onto its session-level error
    pub fn rejected(reason: RejectReason, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        match reason {
            RejectReason::CrlSignatureInvalid => TlsError::CrlSignatureInvalid { subject },
            RejectReason::CrlFieldMissing => TlsError::CrlFieldMissing { subject },
            RejectReason::CrlExpired => TlsError::CrlExpired { subject },
            RejectReason::CertificateRevoked => TlsError::CertificateRevoked { subject },
        }
    }

    /// The revocation reason behind this error, if it is a peer reject
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            TlsError::CrlSignatureInvalid { .. } => Some(RejectReason::CrlSignatureInvalid),
            TlsError::CrlFieldMissing { .. } => Some(RejectReason::CrlFieldMissing),
            TlsError::CrlExpired { .. } => Some(RejectReason::CrlExpired),
            TlsError::CertificateRevoked { .. } => Some(RejectReason::CertificateRevoked),
            _ => None,
        }
    }

    /// Get the error category for logging and diagnostics
    pub fn category(&self) -> &'static str {
        match self {
            TlsError::InvalidArgument(_) => "argument",
            TlsError::OutOfMemory => "memory",
            TlsError::CertificateLoadFailed { .. }
            | TlsError::KeyLoadFailed { .. }
            | TlsError::TrustAnchorLoadFailed(_)
            | TlsError::RevocationStoreBuildFailed(_) => "build",
            TlsError::CrlSignatureInvalid { .. }
            | TlsError::CrlFieldMissing { .. }
            | TlsError::CrlExpired { .. }
            | TlsError::CertificateRevoked { .. } => "revocation",
            TlsError::SocketError(_) | TlsError::Io(_) => "transport",
            TlsError::HandshakeFailed(_) | TlsError::Tls(_) => "handshake",
            TlsError::Protocol(_) => "protocol",
            TlsError::Config(_) => "configuration",
        }
    }

    /// Check whether a later attempt may succeed without configuration changes.
    ///
    /// Build failures keep the configuration dirty, so they are only worth
    /// retrying once the offending files have been fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TlsError::SocketError(_) | TlsError::Io(_) | TlsError::OutOfMemory
        )
    }
}
