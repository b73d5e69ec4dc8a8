use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TlsError};
use crate::network::session::{SchemaContext, Session};

/// Transport layer supplying connected sockets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a TCP connection to `host:port`
    async fn open_socket(&self, host: &str, port: u16) -> Result<TcpStream>;
}

/// NETCONF protocol layer run once the secure channel is up
#[async_trait]
pub trait ProtocolLayer: Send + Sync {
    /// Create a schema context for a session whose caller did not supply one
    fn create_context(&self) -> Result<Arc<SchemaContext>>;

    /// Run the protocol handshake over an established session
    async fn perform_handshake(&self, session: &mut Session) -> Result<()>;
}

/// Plain TCP transport with an optional connect timeout
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open_socket(&self, host: &str, port: u16) -> Result<TcpStream> {
        let connect = TcpStream::connect((host, port));
        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                TlsError::SocketError(format!(
                    "connecting to {}:{} timed out after {:?}",
                    host, port, timeout
                ))
            })?,
            None => connect.await,
        };

        let stream = result.map_err(|e| {
            TlsError::SocketError(format!("failed to connect to {}:{}: {}", host, port, e))
        })?;
        debug!(host, port, "Socket connected");
        Ok(stream)
    }
}

/// Protocol layer that only provides schema contexts and exchanges no messages.
///
/// Useful for probing the secure channel itself.
#[derive(Debug, Clone, Default)]
pub struct ChannelOnlyProtocol {
    schema_dir: Option<std::path::PathBuf>,
}

impl ChannelOnlyProtocol {
    pub fn new(schema_dir: Option<std::path::PathBuf>) -> Self {
        Self { schema_dir }
    }
}

#[async_trait]
impl ProtocolLayer for ChannelOnlyProtocol {
    fn create_context(&self) -> Result<Arc<SchemaContext>> {
        Ok(Arc::new(SchemaContext::new(self.schema_dir.clone())))
    }

    async fn perform_handshake(&self, _session: &mut Session) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpTransport::with_connect_timeout(Duration::from_secs(5));
        let stream = transport.open_socket("127.0.0.1", port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_tcp_transport_reports_socket_errors() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpTransport::new().open_socket("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TlsError::SocketError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_channel_only_protocol_creates_context() {
        let protocol = ChannelOnlyProtocol::new(Some("/usr/share/yang".into()));
        let schema = protocol.create_context().unwrap();
        assert_eq!(
            schema.search_dir(),
            Some(std::path::Path::new("/usr/share/yang"))
        );
    }
}
