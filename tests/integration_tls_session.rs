//! End-to-end session establishment over real TLS 1.2 handshakes
//!
//! Covers:
//! - connecting without revocation checking
//! - revocation rejects from hashed CRL directories and CRL files
//! - servers presenting an intermediate CA
//! - lazy context and revocation store rebuilds between attempts
//! - call-home acceptance with the call-home trust configuration
//! - wrapping externally established channels


use std::sync::Arc;

use netconf_tls::security::{PeerVerdict, RebuildCounts, RejectReason, Role};
use netconf_tls::{
    Config, SchemaContext, SessionStatus, TcpTransport, TlsClient, TlsError,
};
use pretty_assertions::assert_eq;
use rustls::pki_types::ServerName;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

use tls_test_utils::*;

struct Harness {
    pki: TestPki,
    files: ClientFiles,
    addr: std::net::SocketAddr,
}

/// A server with serial 0x05 and client credentials issued by the same CA
async fn harness() -> Harness {
    let pki = TestPki::new("NETCONF Test CA");
    let server = pki.issue("netconf-server", 0x05);
    let client = pki.issue("netconf-client", 0x10);
    let files = ClientFiles::new(&pki, &client);
    let addr = spawn_server(pki.acceptor(&server)).await;
    Harness { pki, files, addr }
}

fn tls_client(h: &Harness, protocol: Arc<CountingProtocol>) -> TlsClient {
    let mut client = TlsClient::new(Arc::new(TcpTransport::new()), protocol);
    client
        .set_cert_key_paths(Role::Client, Some(&h.files.cert), Some(&h.files.key))
        .unwrap();
    client
        .set_trusted_ca_paths(Role::Client, Some(&h.files.ca), None)
        .unwrap();
    client
}

#[tokio::test]
async fn test_connect_without_crl() {
    let h = harness().await;
    let protocol = Arc::new(CountingProtocol::default());
    let mut client = tls_client(&h, protocol.clone());

    let session = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap();

    assert_eq!(session.status(), SessionStatus::Running);
    assert_eq!(session.host(), Some("127.0.0.1"));
    assert_eq!(session.port(), h.addr.port());
    assert_eq!(session.username(), Some("certificate-based"));
    assert_eq!(session.peer_verdict(), PeerVerdict::Verified);
    assert!(!session.is_schema_shared());
    assert_eq!(protocol.handshakes(), 1);
    assert_eq!(protocol.contexts_created(), 1);

    let trust = client.trust(Role::Client);
    assert!(trust.revocation_store().is_none());
    assert_eq!(
        trust.rebuild_counts(),
        RebuildCounts { context: 1, revocation: 0 }
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_hashed_crl_dir_revokes_server() {
    let h = harness().await;
    let crl_dir = h.files.crl_dir();
    write_file(&crl_dir, &h.pki.hashed_crl_name(0), h.pki.crl_pem(&[0x05], FUTURE));

    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client
        .set_crl_paths(Role::Client, None, Some(&crl_dir))
        .unwrap();

    let err = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, TlsError::CertificateRevoked { .. }), "{err}");
    assert_eq!(err.reject_reason(), Some(RejectReason::CertificateRevoked));
    assert!(err.to_string().contains("netconf-server"));
}

#[tokio::test]
async fn test_expired_crl_file_rejects_handshake() {
    let h = harness().await;
    let crl = write_file(h.files.path(), "crl.pem", h.pki.crl_pem(&[], PAST));

    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client.set_crl_paths(Role::Client, Some(&crl), None).unwrap();

    let err = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TlsError::CrlExpired { .. }), "{err}");
}

/// A server presenting `leaf -> intermediate`, both below the harness root
async fn spawn_chained_server(h: &Harness, intermediate: &TestPki) -> std::net::SocketAddr {
    let (cert, key) = intermediate.issue_leaf("chained-server", 0x05);
    let server = Identity { cert, key };
    spawn_server(h.pki.acceptor_with_chain(&server, &[intermediate])).await
}

#[tokio::test]
async fn test_server_with_intermediate_is_verified() {
    let h = harness().await;
    let intermediate = h.pki.issue_intermediate("NETCONF Intermediate CA", 0x03);
    let addr = spawn_chained_server(&h, &intermediate).await;

    let bundle = format!(
        "{}{}",
        intermediate.crl_pem(&[], FUTURE),
        h.pki.crl_pem(&[], FUTURE)
    );
    let crl = write_file(h.files.path(), "chain.pem", bundle);
    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client.set_crl_paths(Role::Client, Some(&crl), None).unwrap();

    let session = client
        .connect_tls(Some("127.0.0.1"), addr.port(), None)
        .await
        .unwrap();
    assert_eq!(session.peer_verdict(), PeerVerdict::Verified);
}

#[tokio::test]
async fn test_revoked_intermediate_fails_handshake() {
    let h = harness().await;
    let intermediate = h.pki.issue_intermediate("NETCONF Intermediate CA", 0x03);
    let addr = spawn_chained_server(&h, &intermediate).await;

    // The intermediate's own CRL is valid; the root's CRL revokes the intermediate
    let bundle = format!(
        "{}{}",
        intermediate.crl_pem(&[], FUTURE),
        h.pki.crl_pem(&[0x03], FUTURE)
    );
    let crl = write_file(h.files.path(), "chain.pem", bundle);
    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client.set_crl_paths(Role::Client, Some(&crl), None).unwrap();

    let err = client
        .connect_tls(Some("127.0.0.1"), addr.port(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TlsError::CertificateRevoked { .. }), "{err}");
    assert!(err.to_string().contains("NETCONF Intermediate CA"));
}

#[tokio::test]
async fn test_crl_update_applies_without_context_rebuild() {
    let h = harness().await;
    let protocol = Arc::new(CountingProtocol::default());
    let mut client = tls_client(&h, protocol.clone());

    let clean = write_file(h.files.path(), "clean.pem", h.pki.crl_pem(&[0x42], FUTURE));
    client.set_crl_paths(Role::Client, Some(&clean), None).unwrap();
    client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap();

    // Same paths again: nothing is rebuilt
    client.set_crl_paths(Role::Client, Some(&clean), None).unwrap();
    client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap();
    assert_eq!(
        client.trust(Role::Client).rebuild_counts(),
        RebuildCounts { context: 1, revocation: 1 }
    );

    let revoking = write_file(h.files.path(), "revoking.pem", h.pki.crl_pem(&[0x05], FUTURE));
    client.set_crl_paths(Role::Client, Some(&revoking), None).unwrap();
    let err = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap_err();

    assert_eq!(err.reject_reason(), Some(RejectReason::CertificateRevoked));
    assert_eq!(
        client.trust(Role::Client).rebuild_counts(),
        RebuildCounts { context: 1, revocation: 2 }
    );
    assert_eq!(protocol.handshakes(), 2);
}

#[tokio::test]
async fn test_ca_change_rebuilds_context() {
    let h = harness().await;
    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap();

    let ca_dir = h.files.path().join("cas");
    std::fs::create_dir(&ca_dir).unwrap();
    write_file(&ca_dir, "ca.pem", h.pki.ca.pem());
    client
        .set_trusted_ca_paths(Role::Client, None, Some(&ca_dir))
        .unwrap();
    assert!(client.trust(Role::Client).is_context_dirty());
    assert!(!client.trust(Role::Client).is_revocation_dirty());

    client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap();
    assert_eq!(client.trust(Role::Client).rebuild_counts().context, 2);
}

#[tokio::test]
async fn test_untrusted_server_fails_handshake() {
    let h = harness().await;
    let stranger = TestPki::new("Stranger CA");
    let ca = write_file(h.files.path(), "stranger.pem", stranger.ca.pem());

    let mut client = tls_client(&h, Arc::new(CountingProtocol::default()));
    client
        .set_trusted_ca_paths(Role::Client, Some(&ca), None)
        .unwrap();

    let err = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TlsError::HandshakeFailed(_)), "{err}");
    assert_eq!(err.reject_reason(), None);
}

#[tokio::test]
async fn test_protocol_failure_fails_session() {
    let h = harness().await;
    let protocol = Arc::new(CountingProtocol::failing());
    let mut client = tls_client(&h, protocol.clone());

    let err = client
        .connect_tls(Some("127.0.0.1"), h.addr.port(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TlsError::Protocol(_)));
    assert_eq!(protocol.handshakes(), 1);
}

#[tokio::test]
async fn test_accept_callhome_uses_call_home_trust() {
    let h = harness().await;
    let server = h.pki.issue("calling-server", 0x07);
    let acceptor = h.pki.acceptor(&server);

    // Client role trusts a different CA; only the call-home role can succeed
    let stranger = TestPki::new("Stranger CA");
    let stranger_ca = write_file(h.files.path(), "stranger.pem", stranger.ca.pem());

    let protocol = Arc::new(CountingProtocol::default());
    let mut client = TlsClient::new(Arc::new(TcpTransport::new()), protocol.clone());
    for role in [Role::Client, Role::CallHome] {
        client
            .set_cert_key_paths(role, Some(&h.files.cert), Some(&h.files.key))
            .unwrap();
    }
    client
        .set_trusted_ca_paths(Role::Client, Some(&stranger_ca), None)
        .unwrap();
    client
        .set_trusted_ca_paths(Role::CallHome, Some(&h.files.ca), None)
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        serve(acceptor, stream).await;
    });
    let (socket, peer) = listener.accept().await.unwrap();

    let schema = Arc::new(SchemaContext::new(None));
    let session = client
        .accept_callhome(socket, "127.0.0.1", peer.port(), Some(schema.clone()))
        .await
        .unwrap();

    assert_eq!(session.status(), SessionStatus::Running);
    assert_eq!(session.host(), Some("127.0.0.1"));
    assert_eq!(session.username(), Some("certificate-based"));
    assert!(session.is_schema_shared());
    assert!(Arc::ptr_eq(session.schema(), &schema));
    assert_eq!(protocol.contexts_created(), 0);

    assert!(client.trust(Role::CallHome).has_context());
    assert!(!client.trust(Role::Client).has_context());
}

#[tokio::test]
async fn test_connect_with_channel_runs_protocol_once() {
    let h = harness().await;
    let protocol = Arc::new(CountingProtocol::default());
    let mut client = tls_client(&h, protocol.clone());

    let config = client
        .trust_mut(Role::Client)
        .ensure_context()
        .unwrap()
        .client_config();
    let socket = TcpStream::connect(h.addr).await.unwrap();
    let channel = TlsConnector::from(config)
        .connect(ServerName::try_from("127.0.0.1").unwrap(), socket)
        .await
        .unwrap();

    let schema = Arc::new(SchemaContext::new(None));
    let session = client
        .connect_with_channel(channel, Some(schema.clone()))
        .await
        .unwrap();

    assert_eq!(protocol.handshakes(), 1);
    assert_eq!(session.status(), SessionStatus::Running);
    assert_eq!(session.peer_verdict(), PeerVerdict::NotChecked);
    assert_eq!(session.host(), None);
    assert!(session.is_schema_shared());
}

#[tokio::test]
async fn test_missing_credentials_fail_before_io() {
    let protocol = Arc::new(CountingProtocol::default());
    let mut client = TlsClient::new(Arc::new(TcpTransport::new()), protocol.clone());

    let err = client.connect_tls(None, 0, None).await.unwrap_err();
    assert!(matches!(err, TlsError::InvalidArgument(_)));
    assert_eq!(
        client.set_cert_key_paths(Role::Client, None, None).unwrap_err().category(),
        "argument"
    );
    assert_eq!(client.cert_key_paths(Role::Client), (None, None));
    assert_eq!(protocol.handshakes(), 0);
}

#[tokio::test]
async fn test_client_from_config_file() {
    let h = harness().await;
    let crl_dir = h.files.crl_dir();
    let toml = format!(
        r#"
[client]
cert_path = "{}"
key_path = "{}"
ca_file = "{}"
crl_dir = "{}"

[connection]
host = "127.0.0.1"
port = {}
"#,
        h.files.cert.display(),
        h.files.key.display(),
        h.files.ca.display(),
        crl_dir.display(),
        h.addr.port()
    );
    let path = write_file(h.files.path(), "netconf-tls.toml", toml);

    let config = Config::from_file(&path).unwrap();
    let mut client =
        TlsClient::from_config(&config, Arc::new(CountingProtocol::default())).unwrap();

    let session = client
        .connect_tls(
            Some(&config.connection.host),
            config.connection.port,
            None,
        )
        .await
        .unwrap();
    assert_eq!(session.peer_verdict(), PeerVerdict::Verified);
    assert!(client.trust(Role::Client).revocation_store().is_some());

    client.destroy();
    assert!(!client.trust(Role::Client).has_context());
    assert_eq!(client.crl_paths(Role::Client), (None, None));
}
