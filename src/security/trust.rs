//! Trust configuration per client role
//!
//! Each [`Role`] owns one [`TrustConfiguration`]: the credential paths, the
//! context built from them and the revocation store built from the CRL paths.
//! Path changes are turned into a [`RebuildPlan`] that marks the derived
//! artifacts stale; rebuilding happens lazily in
//! [`TrustConfiguration::ensure_context`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TlsError};
use crate::security::context::TlsContext;
use crate::security::revocation::RevocationStore;

/// Shared cell holding a role's current revocation store.
///
/// The verifier installed in the role's context reads it on every handshake,
/// so the store can be replaced without rebuilding the context.
pub type RevocationSlot = Arc<RwLock<Option<Arc<RevocationStore>>>>;

/// Which side initiated the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Outbound connection to a server
    Client,
    /// Connection initiated by the server (call-home)
    CallHome,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::CallHome => write!(f, "call-home"),
        }
    }
}

/// Credential paths of one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPaths {
    pub cert_path: Option<PathBuf>,
    /// When absent the key is read from `cert_path`
    pub key_path: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub ca_dir: Option<PathBuf>,
    pub crl_file: Option<PathBuf>,
    pub crl_dir: Option<PathBuf>,
}

impl TrustPaths {
    pub fn has_crl_paths(&self) -> bool {
        self.crl_file.is_some() || self.crl_dir.is_some()
    }

    pub fn has_ca_paths(&self) -> bool {
        self.ca_file.is_some() || self.ca_dir.is_some()
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            cert_path: copy_opt(self.cert_path.as_deref())?,
            key_path: copy_opt(self.key_path.as_deref())?,
            ca_file: copy_opt(self.ca_file.as_deref())?,
            ca_dir: copy_opt(self.ca_dir.as_deref())?,
            crl_file: copy_opt(self.crl_file.as_deref())?,
            crl_dir: copy_opt(self.crl_dir.as_deref())?,
        })
    }
}

/// Which derived artifacts a path change invalidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    pub context: bool,
    pub revocation: bool,
}

impl RebuildPlan {
    pub fn between(old: &TrustPaths, new: &TrustPaths) -> Self {
        Self {
            context: old.cert_path != new.cert_path
                || old.key_path != new.key_path
                || old.ca_file != new.ca_file
                || old.ca_dir != new.ca_dir,
            revocation: old.crl_file != new.crl_file || old.crl_dir != new.crl_dir,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.context && !self.revocation
    }
}

/// How many times each artifact has been rebuilt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildCounts {
    pub context: u64,
    pub revocation: u64,
}

/// Trust material of one role and the artifacts derived from it
#[derive(Debug)]
pub struct TrustConfiguration {
    pub(super) role: Role,
    pub(super) paths: TrustPaths,
    pub(super) context: Option<TlsContext>,
    pub(super) context_dirty: bool,
    pub(super) revocation: RevocationSlot,
    pub(super) revocation_dirty: bool,
    pub(super) counts: RebuildCounts,
}

impl TrustConfiguration {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            paths: TrustPaths::default(),
            context: None,
            context_dirty: false,
            revocation: Arc::new(RwLock::new(None)),
            revocation_dirty: false,
            counts: RebuildCounts::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn paths(&self) -> &TrustPaths {
        &self.paths
    }

    /// Set the client certificate and, optionally, a separate private key
    pub fn set_cert_key_paths(&mut self, cert: Option<&Path>, key: Option<&Path>) -> Result<()> {
        let cert = cert.ok_or_else(|| {
            TlsError::InvalidArgument("client certificate path is required".to_string())
        })?;

        let next = TrustPaths {
            cert_path: Some(copy_path(cert)?),
            key_path: copy_opt(key)?,
            ..self.paths.try_clone()?
        };
        self.commit(next);
        Ok(())
    }

    pub fn cert_key_paths(&self) -> (Option<&Path>, Option<&Path>) {
        (self.paths.cert_path.as_deref(), self.paths.key_path.as_deref())
    }

    /// Set the trusted CA bundle file and/or CA directory
    pub fn set_trusted_ca_paths(&mut self, ca_file: Option<&Path>, ca_dir: Option<&Path>) -> Result<()> {
        if ca_file.is_none() && ca_dir.is_none() {
            return Err(TlsError::InvalidArgument(
                "a CA file or a CA directory is required".to_string(),
            ));
        }

        let next = TrustPaths {
            ca_file: copy_opt(ca_file)?,
            ca_dir: copy_opt(ca_dir)?,
            ..self.paths.try_clone()?
        };
        self.commit(next);
        Ok(())
    }

    pub fn trusted_ca_paths(&self) -> (Option<&Path>, Option<&Path>) {
        (self.paths.ca_file.as_deref(), self.paths.ca_dir.as_deref())
    }

    /// Set the CRL file and/or hashed CRL directory
    pub fn set_crl_paths(&mut self, crl_file: Option<&Path>, crl_dir: Option<&Path>) -> Result<()> {
        if crl_file.is_none() && crl_dir.is_none() {
            return Err(TlsError::InvalidArgument(
                "a CRL file or a CRL directory is required".to_string(),
            ));
        }

        let next = TrustPaths {
            crl_file: copy_opt(crl_file)?,
            crl_dir: copy_opt(crl_dir)?,
            ..self.paths.try_clone()?
        };
        self.commit(next);
        Ok(())
    }

    pub fn crl_paths(&self) -> (Option<&Path>, Option<&Path>) {
        (self.paths.crl_file.as_deref(), self.paths.crl_dir.as_deref())
    }

    fn commit(&mut self, next: TrustPaths) {
        let plan = RebuildPlan::between(&self.paths, &next);
        self.paths = next;
        self.context_dirty |= plan.context;
        self.revocation_dirty |= plan.revocation;
        debug!(role = %self.role, ?plan, "Trust paths updated");
    }

    pub fn is_context_dirty(&self) -> bool {
        self.context_dirty
    }

    pub fn is_revocation_dirty(&self) -> bool {
        self.revocation_dirty
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn rebuild_counts(&self) -> RebuildCounts {
        self.counts
    }

    /// The context must be rebuilt before the next handshake
    pub fn needs_context_rebuild(&self) -> bool {
        self.context.is_none() || self.context_dirty
    }

    /// The store must be rebuilt, either because CRL paths changed or
    /// because CRL paths are set but no store exists yet
    pub fn needs_revocation_rebuild(&self) -> bool {
        self.revocation_dirty
            || (self.revocation.read().is_none() && self.paths.has_crl_paths())
    }

    /// Current revocation store, absent when revocation checking is off
    pub fn revocation_store(&self) -> Option<Arc<RevocationStore>> {
        self.revocation.read().clone()
    }

    /// Fail with `InvalidArgument` unless a certificate and a CA location are configured
    pub fn require_credentials(&self) -> Result<()> {
        if self.paths.cert_path.is_none() {
            return Err(TlsError::InvalidArgument(format!(
                "{} certificate not set",
                self.role
            )));
        }
        if !self.paths.has_ca_paths() {
            return Err(TlsError::InvalidArgument(format!(
                "{} CA certificate locations not set",
                self.role
            )));
        }
        Ok(())
    }

    /// Drop all paths and derived artifacts
    pub fn reset(&mut self) {
        self.revocation.write().take();
        *self = Self::new(self.role);
    }
}

/// One trust configuration per role
#[derive(Debug)]
pub struct TrustRegistry {
    client: TrustConfiguration,
    call_home: TrustConfiguration,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self {
            client: TrustConfiguration::new(Role::Client),
            call_home: TrustConfiguration::new(Role::CallHome),
        }
    }

    pub fn get(&self, role: Role) -> &TrustConfiguration {
        match role {
            Role::Client => &self.client,
            Role::CallHome => &self.call_home,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut TrustConfiguration {
        match role {
            Role::Client => &mut self.client,
            Role::CallHome => &mut self.call_home,
        }
    }

    /// Release every context and store of both roles
    pub fn destroy(&mut self) {
        self.client.reset();
        self.call_home.reset();
        debug!("Trust configuration destroyed");
    }
}

impl Default for TrustRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_path(path: &Path) -> Result<PathBuf> {
    let mut owned = OsString::new();
    owned
        .try_reserve_exact(path.as_os_str().len())
        .map_err(|_| TlsError::OutOfMemory)?;
    owned.push(path.as_os_str());
    Ok(PathBuf::from(owned))
}

fn copy_opt(path: Option<&Path>) -> Result<Option<PathBuf>> {
    path.map(copy_path).transpose()
}
