//! NETCONF over TLS session establishment with CRL-based revocation checking

pub mod config;
pub mod error;
pub mod network;
pub mod security;

pub use config::Config;
pub use error::{Result, TlsError};
pub use network::{
    ChannelOnlyProtocol, EstablishStage, ProtocolLayer, SchemaContext, Session, SessionStatus,
    TcpTransport, TlsChannel, TlsClient, Transport,
};
pub use security::{
    PeerVerdict, RebuildPlan, RejectReason, RevocationStore, RevocationVerdict, Role,
    TrustConfiguration, TrustPaths, TrustRegistry, VerifyCode,
};
