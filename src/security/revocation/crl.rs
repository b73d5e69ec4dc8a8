//! Parsed certificate revocation lists
//!
//! CRLs are parsed once with `x509-parser` into an owned form that keeps only
//! what revocation checking needs: the canonical issuer name, the update
//! window and the revoked serial numbers. The DER encoding is kept so the
//! signature can be checked later against whichever key claims to own the CRL.

use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use x509_parser::prelude::*;

use super::name_hash::canonical_name;

/// An owned, parsed certificate revocation list
#[derive(Debug, Clone)]
pub struct RevocationList {
    pub(crate) issuer: String,
    pub(crate) issuer_canonical: Vec<u8>,
    pub(crate) this_update: SystemTime,
    pub(crate) next_update: Option<SystemTime>,
    pub(crate) revoked_serials: Vec<Vec<u8>>,
    der: Vec<u8>,
}

impl RevocationList {
    /// Parse a single DER-encoded CRL
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        let (_, crl) =
            parse_x509_crl(der).map_err(|e| format!("CRL parsing failed: {}", e))?;

        let revoked_serials = crl
            .iter_revoked_certificates()
            .map(|revoked| revoked.user_certificate.to_bytes_be())
            .collect();

        Ok(Self {
            issuer: crl.issuer().to_string(),
            issuer_canonical: canonical_name(crl.issuer()),
            this_update: asn1_to_system_time(&crl.last_update()),
            next_update: crl.next_update().map(|t| asn1_to_system_time(&t)),
            revoked_serials,
            der: der.to_vec(),
        })
    }

    /// Parse every CRL contained in PEM text, falling back to a single DER CRL
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<Self>, String> {
        if !bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            return Ok(vec![Self::from_der(bytes)?]);
        }

        let mut reader = BufReader::new(bytes);
        let mut lists = Vec::new();
        for der in rustls_pemfile::crls(&mut reader) {
            let der = der.map_err(|e| format!("invalid PEM: {}", e))?;
            lists.push(Self::from_der(der.as_ref())?);
        }

        if lists.is_empty() {
            return Err("no CRL data found in PEM".to_string());
        }
        Ok(lists)
    }

    /// Read and parse a CRL file
    pub fn load_file(path: &Path) -> Result<Vec<Self>, String> {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        Self::parse_all(&bytes).map_err(|e| format!("'{}': {}", path.display(), e))
    }

    /// Issuer name in display form
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Whether this CRL was issued by `name`
    pub fn is_issued_by(&self, name: &X509Name<'_>) -> bool {
        self.issuer_canonical == canonical_name(name)
    }

    pub fn this_update(&self) -> SystemTime {
        self.this_update
    }

    pub fn next_update(&self) -> Option<SystemTime> {
        self.next_update
    }

    /// Whether the CRL lists `serial` (big-endian magnitude) as revoked
    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        let serial = strip_leading_zeros(serial);
        self.revoked_serials
            .iter()
            .any(|revoked| strip_leading_zeros(revoked) == serial)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }

    /// Verify the CRL signature against the given public key.
    ///
    /// Unsupported algorithms and unusable keys fail verification.
    pub fn verify_signature(&self, key: &SubjectPublicKeyInfo<'_>) -> bool {
        let result = parse_x509_crl(&self.der)
            .map_err(X509Error::from)
            .and_then(|(_, crl)| crl.verify_signature(key));

        match result {
            Ok(()) => true,
            Err(X509Error::SignatureUnsupportedAlgorithm) => {
                tracing::warn!(issuer = %self.issuer, "Unsupported CRL signature algorithm");
                false
            }
            Err(_) => false,
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn asn1_to_system_time(time: &ASN1Time) -> SystemTime {
    let secs = time.timestamp();
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
