//! CRL-based revocation checking
//!
//! A [`RevocationStore`] answers, for one certificate at a time, whether the
//! peer must be rejected for revocation reasons. Revocation is strictly
//! opt-in: with no CRL sources, or with no CRL matching a certificate, the
//! certificate is accepted. Only a present-but-invalid CRL, a present-but-expired
//! CRL or a matching revocation entry rejects.

pub mod crl;
pub mod name_hash;

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, error, warn};
use x509_parser::prelude::*;

use crate::error::{Result, TlsError};

pub use crl::RevocationList;
pub use name_hash::{hashed_crl_file_name, subject_name_hash};

/// Why a certificate was rejected by the revocation store
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("CRL signature failure")]
    CrlSignatureInvalid,
    #[error("CRL nextUpdate field missing")]
    CrlFieldMissing,
    #[error("CRL has expired")]
    CrlExpired,
    #[error("certificate revoked")]
    CertificateRevoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationVerdict {
    Accept,
    Reject(RejectReason),
}

impl RevocationVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, RevocationVerdict::Accept)
    }
}

/// A place CRLs are looked up in
#[derive(Debug)]
pub enum CrlSource {
    /// CRLs read once from a single PEM or DER file
    File {
        path: PathBuf,
        lists: Vec<RevocationList>,
    },
    /// An OpenSSL-style hashed directory, read on every lookup
    HashedDir { path: PathBuf },
}

impl CrlSource {
    pub fn file(path: &Path) -> Result<Self> {
        let lists = RevocationList::load_file(path).map_err(|e| {
            TlsError::RevocationStoreBuildFailed(format!("failed to add CRL file lookup: {}", e))
        })?;
        debug!(path = %path.display(), count = lists.len(), "Loaded CRL file");
        Ok(CrlSource::File {
            path: path.to_path_buf(),
            lists,
        })
    }

    pub fn hashed_dir(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(TlsError::RevocationStoreBuildFailed(format!(
                "failed to add CRL directory lookup: '{}' is not a directory",
                path.display()
            )));
        }
        Ok(CrlSource::HashedDir {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            CrlSource::File { path, .. } | CrlSource::HashedDir { path } => path,
        }
    }

    /// First CRL in this source issued by `name`
    fn lookup(&self, name: &X509Name<'_>) -> Option<Cow<'_, RevocationList>> {
        match self {
            CrlSource::File { lists, .. } => lists
                .iter()
                .find(|list| list.is_issued_by(name))
                .map(Cow::Borrowed),
            CrlSource::HashedDir { path } => {
                lookup_hashed_dir(path, name).map(Cow::Owned)
            }
        }
    }
}

fn lookup_hashed_dir(dir: &Path, name: &X509Name<'_>) -> Option<RevocationList> {
    let hash = subject_name_hash(name);
    for index in 0..u32::MAX {
        let candidate = dir.join(hashed_crl_file_name(hash, index));
        if !candidate.is_file() {
            break;
        }
        match RevocationList::load_file(&candidate) {
            Ok(lists) => {
                if let Some(list) = lists.into_iter().find(|list| list.is_issued_by(name)) {
                    return Some(list);
                }
            }
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "Skipping unreadable CRL");
            }
        }
    }
    None
}

/// Revocation lookup structure built from the configured CRL paths
#[derive(Debug, Default)]
pub struct RevocationStore {
    sources: Vec<CrlSource>,
}

impl RevocationStore {
    /// Build a store with a file lookup and/or a hashed directory lookup.
    ///
    /// The file source is consulted before the directory source.
    pub fn build(crl_file: Option<&Path>, crl_dir: Option<&Path>) -> Result<Self> {
        let mut sources = Vec::with_capacity(2);
        if let Some(file) = crl_file {
            sources.push(CrlSource::file(file)?);
        }
        if let Some(dir) = crl_dir {
            sources.push(CrlSource::hashed_dir(dir)?);
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[CrlSource] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn find_crl(&self, name: &X509Name<'_>) -> Option<Cow<'_, RevocationList>> {
        self.sources.iter().find_map(|source| source.lookup(name))
    }

    /// Decide whether `cert` must be rejected at time `now`.
    ///
    /// A CRL issued by the certificate's own subject is validated with the
    /// certificate's key; a CRL issued by its issuer is scanned for its serial.
    pub fn check_revocation(&self, cert: &X509Certificate<'_>, now: SystemTime) -> RevocationVerdict {
        if self.sources.is_empty() {
            return RevocationVerdict::Accept;
        }

        if let Some(crl) = self.find_crl(cert.subject()) {
            if !crl.verify_signature(cert.public_key()) {
                warn!(issuer = %crl.issuer(), "Invalid signature on CRL");
                return RevocationVerdict::Reject(RejectReason::CrlSignatureInvalid);
            }

            let Some(next_update) = crl.next_update() else {
                warn!(issuer = %crl.issuer(), "CRL is missing the nextUpdate field");
                return RevocationVerdict::Reject(RejectReason::CrlFieldMissing);
            };

            if next_update < now {
                warn!(issuer = %crl.issuer(), "CRL has expired");
                return RevocationVerdict::Reject(RejectReason::CrlExpired);
            }
        }

        if let Some(crl) = self.find_crl(cert.issuer()) {
            let tbs = &cert.tbs_certificate;
            if crl.is_revoked(&tbs.serial.to_bytes_be()) {
                error!(
                    target: "security",
                    serial = %tbs.raw_serial_as_string(),
                    subject = %cert.subject(),
                    issuer = %cert.issuer(),
                    "Certificate revoked"
                );
                return RevocationVerdict::Reject(RejectReason::CertificateRevoked);
            }
        }

        RevocationVerdict::Accept
    }
}
