//! Secure session establishment
//!
//! [`TlsClient`] owns the trust configuration of both roles and turns sockets
//! into running NETCONF sessions: build or reuse the role's TLS context, run
//! the TLS 1.2 handshake with revocation-aware peer verification, log the
//! peer verdict and hand the channel to the protocol layer.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{Result, TlsError};
use crate::network::session::{EstablishStage, SchemaContext, Session, SessionStatus, TlsChannel};
use crate::network::traits::{ProtocolLayer, TcpTransport, Transport};
use crate::security::{HandshakeReport, PeerVerdict, Role, TrustConfiguration, TrustRegistry};

/// Stage tracking for one connection attempt
struct Attempt {
    role: Option<Role>,
    stage: EstablishStage,
}

impl Attempt {
    fn new(role: Option<Role>) -> Self {
        Self {
            role,
            stage: EstablishStage::Idle,
        }
    }

    fn enter(&mut self, stage: EstablishStage) {
        trace!(role = ?self.role, from = %self.stage, to = %stage, "Session establishment stage");
        self.stage = stage;
    }

    fn finish(mut self, result: Result<Session>) -> Result<Session> {
        match result {
            Ok(session) => {
                self.enter(EstablishStage::Established);
                Ok(session)
            }
            Err(e) => {
                debug!(role = ?self.role, stage = %self.stage, error = %e, "Session establishment failed");
                self.enter(EstablishStage::Failed);
                Err(e)
            }
        }
    }
}

/// NETCONF over TLS client
pub struct TlsClient {
    trust: TrustRegistry,
    transport: Arc<dyn Transport>,
    protocol: Arc<dyn ProtocolLayer>,
}

impl TlsClient {
    pub fn new(transport: Arc<dyn Transport>, protocol: Arc<dyn ProtocolLayer>) -> Self {
        Self {
            trust: TrustRegistry::new(),
            transport,
            protocol,
        }
    }

    /// Create a client from a validated configuration
    pub fn from_config(config: &Config, protocol: Arc<dyn ProtocolLayer>) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::with_connect_timeout(config.connection.connect_timeout());
        let mut client = Self::new(Arc::new(transport), protocol);
        for role in [Role::Client, Role::CallHome] {
            config.role(role).apply(client.trust.get_mut(role))?;
        }
        Ok(client)
    }

    pub fn trust(&self, role: Role) -> &TrustConfiguration {
        self.trust.get(role)
    }

    pub fn trust_mut(&mut self, role: Role) -> &mut TrustConfiguration {
        self.trust.get_mut(role)
    }

    pub fn set_cert_key_paths(&mut self, role: Role, cert: Option<&Path>, key: Option<&Path>) -> Result<()> {
        self.trust.get_mut(role).set_cert_key_paths(cert, key)
    }

    pub fn cert_key_paths(&self, role: Role) -> (Option<&Path>, Option<&Path>) {
        self.trust.get(role).cert_key_paths()
    }

    pub fn set_trusted_ca_paths(&mut self, role: Role, ca_file: Option<&Path>, ca_dir: Option<&Path>) -> Result<()> {
        self.trust.get_mut(role).set_trusted_ca_paths(ca_file, ca_dir)
    }

    pub fn trusted_ca_paths(&self, role: Role) -> (Option<&Path>, Option<&Path>) {
        self.trust.get(role).trusted_ca_paths()
    }

    pub fn set_crl_paths(&mut self, role: Role, crl_file: Option<&Path>, crl_dir: Option<&Path>) -> Result<()> {
        self.trust.get_mut(role).set_crl_paths(crl_file, crl_dir)
    }

    pub fn crl_paths(&self, role: Role) -> (Option<&Path>, Option<&Path>) {
        self.trust.get(role).crl_paths()
    }

    /// Release all trust configuration, contexts and revocation stores
    pub fn destroy(&mut self) {
        self.trust.destroy();
    }

    /// Connect to a NETCONF server at `host:port`.
    ///
    /// A missing or blank host means `localhost`; port 0 means 6513.
    pub async fn connect_tls(
        &mut self,
        host: Option<&str>,
        port: u16,
        schema: Option<Arc<SchemaContext>>,
    ) -> Result<Session> {
        let mut attempt = Attempt::new(Some(Role::Client));
        let result = self.connect_tls_inner(&mut attempt, host, port, schema).await;
        attempt.finish(result)
    }

    async fn connect_tls_inner(
        &mut self,
        attempt: &mut Attempt,
        host: Option<&str>,
        port: u16,
        schema: Option<Arc<SchemaContext>>,
    ) -> Result<Session> {
        let host = resolve_host(host);
        let port = if port == 0 { DEFAULT_PORT } else { port };

        attempt.enter(EstablishStage::BuildingContext);
        let (config, report, server_name) = self.prepare(Role::Client, &host)?;

        attempt.enter(EstablishStage::Connecting);
        let socket = self.transport.open_socket(&host, port).await?;

        attempt.enter(EstablishStage::Handshaking);
        let channel = handshake(config, server_name, socket, &report).await?;

        attempt.enter(EstablishStage::VerifyingResult);
        log_peer_verdict(Role::Client, report.verdict());

        let mut session = self.establish(channel, schema, report.verdict()).await?;
        session.set_peer(host, port);
        Ok(session)
    }

    /// Wrap an already established TLS channel into a session
    pub async fn connect_with_channel(
        &self,
        channel: TlsChannel,
        schema: Option<Arc<SchemaContext>>,
    ) -> Result<Session> {
        let mut attempt = Attempt::new(None);
        attempt.enter(EstablishStage::VerifyingResult);
        let result = if channel.get_ref().1.is_handshaking() {
            Err(TlsError::InvalidArgument(
                "supplied TLS session is not fully connected".to_string(),
            ))
        } else {
            self.establish(channel, schema, PeerVerdict::NotChecked).await
        };
        attempt.finish(result)
    }

    /// Run the client handshake over a socket accepted from a calling-home server
    pub async fn accept_callhome(
        &mut self,
        socket: TcpStream,
        host: &str,
        port: u16,
        schema: Option<Arc<SchemaContext>>,
    ) -> Result<Session> {
        let mut attempt = Attempt::new(Some(Role::CallHome));
        let result = self
            .accept_callhome_inner(&mut attempt, socket, host, port, schema)
            .await;
        attempt.finish(result)
    }

    async fn accept_callhome_inner(
        &mut self,
        attempt: &mut Attempt,
        socket: TcpStream,
        host: &str,
        port: u16,
        schema: Option<Arc<SchemaContext>>,
    ) -> Result<Session> {
        attempt.enter(EstablishStage::BuildingContext);
        let (config, report, server_name) = self.prepare(Role::CallHome, host)?;

        attempt.enter(EstablishStage::Handshaking);
        let channel = handshake(config, server_name, socket, &report).await?;

        attempt.enter(EstablishStage::VerifyingResult);
        log_peer_verdict(Role::CallHome, report.verdict());

        let mut session = self.establish(channel, schema, report.verdict()).await?;
        session.set_peer(host.to_string(), port);
        Ok(session)
    }

    /// Validate the role's credentials and produce a per-connection configuration
    fn prepare(
        &mut self,
        role: Role,
        host: &str,
    ) -> Result<(Arc<ClientConfig>, HandshakeReport, ServerName<'static>)> {
        let trust = self.trust.get_mut(role);
        trust.require_credentials()?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TlsError::InvalidArgument(format!("invalid host '{}': {}", host, e)))?;

        let (config, report) = trust.ensure_context()?.connection_config();
        Ok((config, report, server_name))
    }

    /// Attach the schema context and run the protocol handshake
    async fn establish(
        &self,
        channel: TlsChannel,
        schema: Option<Arc<SchemaContext>>,
        verdict: PeerVerdict,
    ) -> Result<Session> {
        let (schema, shared) = match schema {
            Some(schema) => (schema, true),
            None => (self.protocol.create_context()?, false),
        };

        let mut session = Session::new(channel, schema, shared, verdict);
        self.protocol.perform_handshake(&mut session).await?;
        session.set_status(SessionStatus::Running);
        info!(shared_schema = shared, "NETCONF session established");
        Ok(session)
    }
}

fn resolve_host(host: Option<&str>) -> String {
    match host.map(str::trim) {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => DEFAULT_HOST.to_string(),
    }
}

async fn handshake(
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    socket: TcpStream,
    report: &HandshakeReport,
) -> Result<TlsChannel> {
    let connector = TlsConnector::from(config);
    match connector.connect(server_name, socket).await {
        Ok(channel) => {
            debug!("TLS channel established, post-handshake messages handled by rustls");
            Ok(channel)
        }
        Err(e) => {
            error!(error = %e, "Connecting over TLS failed");
            if let PeerVerdict::Failed(code) = report.verdict() {
                if let Some(reason) = code.reject_reason() {
                    let subject = report.failed_subject().unwrap_or_default();
                    return Err(TlsError::rejected(reason, subject));
                }
            }
            Err(TlsError::HandshakeFailed(e.to_string()))
        }
    }
}

/// The aggregate verdict is advisory; a completed handshake is never aborted here
fn log_peer_verdict(role: Role, verdict: PeerVerdict) {
    match verdict {
        PeerVerdict::Verified => debug!(role = %role, "Server certificate successfully verified"),
        PeerVerdict::NotChecked => {
            debug!(role = %role, "Server certificate not re-verified for this handshake")
        }
        PeerVerdict::Failed(code) => warn!(
            role = %role,
            code = code.code(),
            "Server certificate verification problem ({})",
            code
        ),
    }
}
