//! Peer certificate verification with revocation checking
//!
//! [`RevocationVerifier`] wraps the webpki server verifier. When webpki
//! accepts the presented chain, every certificate of the chain (end-entity,
//! presented intermediates, then the issuing trust anchor) is run through the
//! role's [`RevocationStore`]. The outcome of each handshake is recorded in a
//! [`HandshakeReport`] so the session layer can tell a revocation reject apart
//! from other handshake failures.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertRevocationListError, CertificateError, DigitallySignedStruct, Error, OtherError,
    SignatureScheme,
};
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use crate::security::revocation::name_hash::names_match;
use crate::security::revocation::{RejectReason, RevocationStore, RevocationVerdict};
use crate::security::trust::{RevocationSlot, Role};

/// X.509 verification result codes, numbered as in OpenSSL
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyCode {
    #[error("unspecified certificate verification error")]
    Unspecified = 1,
    #[error("certificate signature failure")]
    CertSignatureFailure = 7,
    #[error("CRL signature failure")]
    CrlSignatureFailure = 8,
    #[error("certificate is not yet valid")]
    CertNotYetValid = 9,
    #[error("certificate has expired")]
    CertHasExpired = 10,
    #[error("CRL has expired")]
    CrlHasExpired = 12,
    #[error("format error in CRL's nextUpdate field")]
    ErrorInCrlNextUpdateField = 16,
    #[error("unable to get local issuer certificate")]
    UnableToGetIssuerCertLocally = 20,
    #[error("certificate revoked")]
    CertRevoked = 23,
    #[error("unsupported certificate purpose")]
    InvalidPurpose = 26,
    #[error("hostname mismatch")]
    HostnameMismatch = 62,
}

impl VerifyCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_reject(reason: RejectReason) -> Self {
        match reason {
            RejectReason::CrlSignatureInvalid => VerifyCode::CrlSignatureFailure,
            RejectReason::CrlFieldMissing => VerifyCode::ErrorInCrlNextUpdateField,
            RejectReason::CrlExpired => VerifyCode::CrlHasExpired,
            RejectReason::CertificateRevoked => VerifyCode::CertRevoked,
        }
    }

    pub fn reject_reason(self) -> Option<RejectReason> {
        match self {
            VerifyCode::CrlSignatureFailure => Some(RejectReason::CrlSignatureInvalid),
            VerifyCode::ErrorInCrlNextUpdateField => Some(RejectReason::CrlFieldMissing),
            VerifyCode::CrlHasExpired => Some(RejectReason::CrlExpired),
            VerifyCode::CertRevoked => Some(RejectReason::CertificateRevoked),
            _ => None,
        }
    }

    /// Classify a pre-verification failure reported by webpki
    pub fn from_rustls(err: &Error) -> Self {
        match err {
            Error::InvalidCertificate(cert_err) => match cert_err {
                CertificateError::BadSignature => VerifyCode::CertSignatureFailure,
                CertificateError::Expired => VerifyCode::CertHasExpired,
                CertificateError::NotValidYet => VerifyCode::CertNotYetValid,
                CertificateError::UnknownIssuer => VerifyCode::UnableToGetIssuerCertLocally,
                CertificateError::Revoked => VerifyCode::CertRevoked,
                CertificateError::NotValidForName => VerifyCode::HostnameMismatch,
                CertificateError::InvalidPurpose => VerifyCode::InvalidPurpose,
                _ => VerifyCode::Unspecified,
            },
            _ => VerifyCode::Unspecified,
        }
    }

    /// The error handed back to rustls to abort the handshake
    pub fn to_rustls_error(self) -> Error {
        match self {
            VerifyCode::CertRevoked => Error::InvalidCertificate(CertificateError::Revoked),
            VerifyCode::CrlSignatureFailure => {
                Error::InvalidCertRevocationList(CertRevocationListError::BadSignature)
            }
            code => Error::InvalidCertificate(CertificateError::Other(OtherError(Arc::new(code)))),
        }
    }
}

/// Outcome of peer certificate verification for one handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerdict {
    /// The verifier never ran, e.g. on session resumption
    NotChecked,
    Verified,
    Failed(VerifyCode),
}

#[derive(Debug)]
struct ReportState {
    verdict: PeerVerdict,
    subject: Option<String>,
}

/// Per-handshake record written by the verifier
#[derive(Debug, Clone)]
pub struct HandshakeReport {
    state: Arc<Mutex<ReportState>>,
}

impl HandshakeReport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ReportState {
                verdict: PeerVerdict::NotChecked,
                subject: None,
            })),
        }
    }

    pub fn verdict(&self) -> PeerVerdict {
        self.state.lock().verdict
    }

    /// Subject of the certificate that failed verification
    pub fn failed_subject(&self) -> Option<String> {
        self.state.lock().subject.clone()
    }

    fn record(&self, verdict: PeerVerdict, subject: Option<String>) {
        let mut state = self.state.lock();
        state.verdict = verdict;
        state.subject = subject;
    }
}

impl Default for HandshakeReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Server certificate verifier bound to one role's revocation store
#[derive(Debug)]
pub struct RevocationVerifier {
    role: Role,
    inner: Arc<WebPkiServerVerifier>,
    revocation: RevocationSlot,
    anchors: Arc<Vec<CertificateDer<'static>>>,
    report: Option<HandshakeReport>,
}

impl RevocationVerifier {
    pub fn new(
        role: Role,
        inner: Arc<WebPkiServerVerifier>,
        revocation: RevocationSlot,
        anchors: Arc<Vec<CertificateDer<'static>>>,
    ) -> Self {
        Self {
            role,
            inner,
            revocation,
            anchors,
            report: None,
        }
    }

    /// A copy of this verifier that records its outcome into `report`
    pub fn with_report(&self, report: HandshakeReport) -> Self {
        Self {
            role: self.role,
            inner: self.inner.clone(),
            revocation: self.revocation.clone(),
            anchors: self.anchors.clone(),
            report: Some(report),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn record(&self, verdict: PeerVerdict, subject: Option<String>) {
        if let Some(report) = &self.report {
            report.record(verdict, subject);
        }
    }

    /// Run every certificate of the chain through the revocation store
    fn check_chain(
        &self,
        store: &RevocationStore,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: SystemTime,
    ) -> Result<(), Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 2);
        for der in std::iter::once(end_entity).chain(intermediates) {
            let (_, cert) = parse_x509_certificate(der.as_ref())
                .map_err(|_| Error::InvalidCertificate(CertificateError::BadEncoding))?;
            chain.push(cert);
        }

        if let Some(anchor) = self.find_anchor(chain.last()) {
            chain.push(anchor);
        }

        for (depth, cert) in chain.iter().enumerate() {
            if let RevocationVerdict::Reject(reason) = store.check_revocation(cert, now) {
                let code = VerifyCode::from_reject(reason);
                let subject = cert.subject().to_string();
                warn!(
                    role = %self.role,
                    depth,
                    subject = %subject,
                    code = code.code(),
                    "Peer certificate rejected: {}",
                    code
                );
                self.record(PeerVerdict::Failed(code), Some(subject));
                return Err(code.to_rustls_error());
            }
        }
        Ok(())
    }

    /// The loaded trust anchor that signed `last`, unless `last` is itself self-issued.
    ///
    /// Anchors may share a subject across a key rollover, so the name match
    /// alone is not enough: the anchor key must verify `last`'s signature.
    fn find_anchor(&self, last: Option<&X509Certificate<'_>>) -> Option<X509Certificate<'_>> {
        let last = last?;
        if names_match(last.subject(), last.issuer()) {
            return None;
        }
        self.anchors.iter().find_map(|der| {
            let (_, anchor) = parse_x509_certificate(der.as_ref()).ok()?;
            let issued = names_match(anchor.subject(), last.issuer())
                && last.verify_signature(Some(anchor.public_key())).is_ok();
            issued.then_some(anchor)
        })
    }
}

impl ServerCertVerifier for RevocationVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if let Err(e) = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            let code = VerifyCode::from_rustls(&e);
            debug!(role = %self.role, error = %e, code = code.code(), "Peer pre-verification failed");
            self.record(PeerVerdict::Failed(code), None);
            return Err(e);
        }

        let store = self.revocation.read().clone();
        if let Some(store) = store {
            let now = UNIX_EPOCH + Duration::from_secs(now.as_secs());
            self.check_chain(&store, end_entity, intermediates, now)?;
        }

        self.record(PeerVerdict::Verified, None);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
