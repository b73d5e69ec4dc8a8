//! Established NETCONF sessions over TLS

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::error::Result;
use crate::security::PeerVerdict;

/// Client side of an established TLS connection
pub type TlsChannel = TlsStream<TcpStream>;

pub const CERTIFICATE_USERNAME: &str = "certificate-based";

/// Schema dictionary shared by the protocol layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    search_dir: Option<PathBuf>,
}

impl SchemaContext {
    pub fn new(search_dir: Option<PathBuf>) -> Self {
        Self { search_dir }
    }

    pub fn search_dir(&self) -> Option<&Path> {
        self.search_dir.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running,
    Closing,
}

/// Progress of a single connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishStage {
    Idle,
    BuildingContext,
    Connecting,
    Handshaking,
    VerifyingResult,
    Established,
    Failed,
}

impl fmt::Display for EstablishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstablishStage::Idle => "idle",
            EstablishStage::BuildingContext => "building-context",
            EstablishStage::Connecting => "connecting",
            EstablishStage::Handshaking => "handshaking",
            EstablishStage::VerifyingResult => "verifying-result",
            EstablishStage::Established => "established",
            EstablishStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A NETCONF session bound to a secure channel
pub struct Session {
    channel: TlsChannel,
    status: SessionStatus,
    schema: Arc<SchemaContext>,
    shared_schema: bool,
    peer_verdict: PeerVerdict,
    host: Option<String>,
    port: u16,
    username: Option<String>,
}

impl Session {
    pub(crate) fn new(
        channel: TlsChannel,
        schema: Arc<SchemaContext>,
        shared_schema: bool,
        peer_verdict: PeerVerdict,
    ) -> Self {
        Self {
            channel,
            status: SessionStatus::Starting,
            schema,
            shared_schema,
            peer_verdict,
            host: None,
            port: 0,
            username: None,
        }
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub(crate) fn set_peer(&mut self, host: String, port: u16) {
        self.host = Some(host);
        self.port = port;
        self.username = Some(CERTIFICATE_USERNAME.to_string());
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.schema
    }

    /// Whether the schema context was supplied by the caller
    pub fn is_schema_shared(&self) -> bool {
        self.shared_schema
    }

    /// Peer certificate verification outcome recorded during the handshake
    pub fn peer_verdict(&self) -> PeerVerdict {
        self.peer_verdict
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn channel(&self) -> &TlsChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut TlsChannel {
        &mut self.channel
    }

    pub fn into_channel(self) -> TlsChannel {
        self.channel
    }

    /// Send close_notify and shut the socket down
    pub async fn close(mut self) -> Result<()> {
        self.status = SessionStatus::Closing;
        self.channel.shutdown().await?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("shared_schema", &self.shared_schema)
            .field("peer_verdict", &self.peer_verdict)
            .finish_non_exhaustive()
    }
}
