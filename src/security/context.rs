//! Context builder
//!
//! A [`TlsContext`] is the reusable client-side TLS material of one role: the
//! client certificate chain and key, the trust anchors and the installed
//! [`RevocationVerifier`]. It is rebuilt only when the role's paths changed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};

use crate::error::{Result, TlsError};
use crate::security::revocation::RevocationStore;
use crate::security::trust::{RevocationSlot, Role, TrustConfiguration, TrustPaths};
use crate::security::verifier::{HandshakeReport, RevocationVerifier};

/// Built TLS client context of one role
#[derive(Debug)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    verifier: Arc<RevocationVerifier>,
    anchor_count: usize,
}

impl TlsContext {
    /// Build a TLS 1.2 client context from the role's paths
    pub fn build(paths: &TrustPaths, role: Role, revocation: RevocationSlot) -> Result<Self> {
        let cert_path = paths.cert_path.as_deref().ok_or_else(|| {
            TlsError::InvalidArgument(format!("{} certificate not set", role))
        })?;
        let chain = load_cert_chain(cert_path)?;

        let key_path = paths.key_path.as_deref().unwrap_or(cert_path);
        let key = load_private_key(key_path)?;

        let anchors = load_trust_anchors(paths.ca_file.as_deref(), paths.ca_dir.as_deref())?;
        let mut roots = RootCertStore::empty();
        for anchor in &anchors {
            roots.add(anchor.clone()).map_err(|e| {
                TlsError::TrustAnchorLoadFailed(format!("unusable CA certificate: {}", e))
            })?;
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| TlsError::TrustAnchorLoadFailed(e.to_string()))?;

        let anchor_count = anchors.len();
        let verifier = Arc::new(RevocationVerifier::new(
            role,
            webpki,
            revocation,
            Arc::new(anchors),
        ));

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS12])?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_client_auth_cert(chain, key)
            .map_err(|e| TlsError::KeyLoadFailed {
                path: key_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        // Resumed sessions skip peer verification and with it the CRL checks
        config.resumption = Resumption::disabled();

        Ok(Self {
            config: Arc::new(config),
            verifier,
            anchor_count,
        })
    }

    pub fn role(&self) -> Role {
        self.verifier.role()
    }

    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    /// The shared client configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    /// A configuration for a single connection whose verifier records into a fresh report
    pub fn connection_config(&self) -> (Arc<ClientConfig>, HandshakeReport) {
        let report = HandshakeReport::new();
        let mut config = (*self.config).clone();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(self.verifier.with_report(report.clone())));
        (Arc::new(config), report)
    }
}

impl TrustConfiguration {
    /// Bring the context and revocation store up to date with the current paths.
    ///
    /// Artifacts are rebuilt only when stale. A failed build leaves the
    /// corresponding dirty flag set, so the next call retries.
    pub fn ensure_context(&mut self) -> Result<&TlsContext> {
        if self.needs_context_rebuild() {
            self.context = None;
            let context = TlsContext::build(&self.paths, self.role, self.revocation.clone())?;
            info!(
                role = %self.role,
                anchors = context.anchor_count(),
                "TLS context built"
            );
            self.context = Some(context);
            self.context_dirty = false;
            self.counts.context += 1;
        }

        if self.needs_revocation_rebuild() {
            self.revocation.write().take();
            let store = RevocationStore::build(
                self.paths.crl_file.as_deref(),
                self.paths.crl_dir.as_deref(),
            )?;
            info!(
                role = %self.role,
                sources = store.sources().len(),
                "Revocation store built"
            );
            *self.revocation.write() = Some(Arc::new(store));
            self.revocation_dirty = false;
            self.counts.revocation += 1;
        }

        self.context.as_ref().ok_or_else(|| {
            TlsError::InvalidArgument(format!("{} TLS context unavailable", self.role))
        })
    }
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let load_failed = |reason: String| TlsError::CertificateLoadFailed {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| load_failed(e.to_string()))?;
    let mut reader = BufReader::new(file);
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| load_failed(e.to_string()))?;

    if chain.is_empty() {
        return Err(load_failed("no certificates found".to_string()));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let load_failed = |reason: String| TlsError::KeyLoadFailed {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| load_failed(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| load_failed(e.to_string()))?
        .ok_or_else(|| load_failed("no private key found".to_string()))
}

fn read_pem_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

/// Load CA certificates from a PEM bundle and every PEM file of a directory
fn load_trust_anchors(
    ca_file: Option<&Path>,
    ca_dir: Option<&Path>,
) -> Result<Vec<CertificateDer<'static>>> {
    let mut anchors = Vec::new();

    if let Some(file) = ca_file {
        let certs = read_pem_certs(file).map_err(|e| {
            TlsError::TrustAnchorLoadFailed(format!("'{}': {}", file.display(), e))
        })?;
        if certs.is_empty() {
            return Err(TlsError::TrustAnchorLoadFailed(format!(
                "'{}': no certificates found",
                file.display()
            )));
        }
        anchors.extend(certs);
    }

    if let Some(dir) = ca_dir {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            TlsError::TrustAnchorLoadFailed(format!("'{}': {}", dir.display(), e))
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| TlsError::TrustAnchorLoadFailed(format!("'{}': {}", dir.display(), e)))?
                .path();
            if !path.is_file() {
                continue;
            }
            match read_pem_certs(&path) {
                Ok(certs) => anchors.extend(certs),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping CA file"),
            }
        }
    }

    if anchors.is_empty() {
        return Err(TlsError::TrustAnchorLoadFailed(
            "no trusted CA certificates found".to_string(),
        ));
    }
    debug!(count = anchors.len(), "Loaded trust anchors");
    Ok(anchors)
}
