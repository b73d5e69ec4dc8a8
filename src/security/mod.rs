//! Trust engine
//!
//! This module owns the certificate material used to authenticate NETCONF
//! servers: per-role trust configuration, the TLS contexts built from it, CRL
//! based revocation checking and the verifier that ties revocation into the
//! TLS handshake.
//!
//! ## Key Components
//!
//! - **Trust configuration**: credential paths per role with dirty tracking
//! - **Context builder**: lazily rebuilt TLS 1.2 client contexts
//! - **Revocation store**: CRL file and hashed directory lookups
//! - **Verifier**: per-certificate revocation checks during the handshake

pub mod context;
pub mod revocation;
pub mod trust;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::TlsContext;
pub use revocation::{
    CrlSource, RejectReason, RevocationList, RevocationStore, RevocationVerdict,
};
pub use trust::{
    RebuildCounts, RebuildPlan, RevocationSlot, Role, TrustConfiguration, TrustPaths,
    TrustRegistry,
};
pub use verifier::{HandshakeReport, PeerVerdict, RevocationVerifier, VerifyCode};
