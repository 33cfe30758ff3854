#![allow(dead_code)]

use apns_common::frame::{FeedbackRecord, PushFrame, ERROR_RESPONSE_SIZE, FEEDBACK_RECORD_SIZE};
use apns_common::{ErrorCode, Token};
use apns_mock::config::ServerConfig;
use apns_mock::error::MockError;
use apns_mock::policy::DecisionPolicy;
use apns_mock::server::ServerState;
use apns_mock::tls::TlsIdentity;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Always makes the same decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPolicy {
    pub error: Option<ErrorCode>,
    pub feedback: bool,
}

impl DecisionPolicy for FixedPolicy {
    fn next_error(&self) -> Option<ErrorCode> {
        self.error
    }

    fn should_feedback(&self) -> bool {
        self.feedback
    }
}

pub fn test_config(gateway_addr: SocketAddr, feedback_addr: SocketAddr) -> ServerConfig {
    ServerConfig {
        gateway_addr,
        feedback_addr,
        random_errors: false,
        random_feedback: false,
        cert: None,
        key: None,
        hostnames: vec!["localhost".to_string()],
        metrics_addr: None,
        max_conns: 100,
        drain_timeout: 5,
    }
}

pub fn token(n: u8) -> Token {
    Token::new([n; 32])
}

/// The frame used throughout the scenarios: identifier 42, payload "abc".
pub fn abc_frame(token: Token) -> PushFrame {
    PushFrame::new(42, 0, token, b"abc")
}

pub struct TestServer {
    pub gateway_addr: SocketAddr,
    pub feedback_addr: SocketAddr,
    pub state: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<(), MockError>>,
    connector: TlsConnector,
}

pub async fn start_server(policy: FixedPolicy) -> TestServer {
    start_server_with(policy, |_| {}).await
}

pub async fn start_server_with(
    policy: FixedPolicy,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestServer {
    let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let feedback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = gateway.local_addr().unwrap();
    let feedback_addr = feedback.local_addr().unwrap();

    let mut config = test_config(gateway_addr, feedback_addr);
    configure(&mut config);
    let identity = TlsIdentity::self_signed(&config.hostnames).unwrap();
    let acceptor = identity.acceptor().unwrap();
    let state = Arc::new(ServerState::new(config, acceptor, Arc::new(policy)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(apns_mock::run_with_shutdown(
        gateway,
        feedback,
        state.clone(),
        shutdown_rx,
    ));

    TestServer {
        gateway_addr,
        feedback_addr,
        state,
        shutdown_tx,
        handle,
        connector: connector_for(&identity),
    }
}

fn connector_for(identity: &TlsIdentity) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    for cert in identity.certificates() {
        roots.add(cert.clone()).unwrap();
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

impl TestServer {
    pub async fn try_connect(&self, addr: SocketAddr) -> std::io::Result<TlsStream<TcpStream>> {
        let tcp = TcpStream::connect(addr).await?;
        let name = ServerName::try_from("localhost").unwrap();
        self.connector.connect(name, tcp).await
    }

    pub async fn connect_gateway(&self) -> GatewayClient {
        GatewayClient {
            stream: self.try_connect(self.gateway_addr).await.unwrap(),
        }
    }

    pub async fn connect_feedback(&self) -> FeedbackClient {
        FeedbackClient {
            stream: self.try_connect(self.feedback_addr).await.unwrap(),
        }
    }

    /// Waits until `n` connections are open on the gateway listener.
    pub async fn wait_for_gateway_connections(&self, n: usize) {
        self.wait_for(|state| {
            state
                .gateway_connections
                .load(std::sync::atomic::Ordering::Relaxed)
                == n
        })
        .await;
    }

    /// Waits until `n` connections are open on the feedback listener.
    pub async fn wait_for_feedback_connections(&self, n: usize) {
        self.wait_for(|state| {
            state
                .feedback_connections
                .load(std::sync::atomic::Ordering::Relaxed)
                == n
        })
        .await;
    }

    /// Waits until the feedback queue holds `n` tokens.
    pub async fn wait_for_queue_len(&self, n: usize) {
        self.wait_for(|state| state.queue.len() == n).await;
    }

    async fn wait_for(&self, condition: impl Fn(&ServerState) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition(&self.state) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timeout waiting for server state");
    }

    pub async fn shutdown(self) {
        self.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server should shut down")
            .unwrap()
            .unwrap();
    }
}

pub struct GatewayClient {
    pub stream: TlsStream<TcpStream>,
}

impl GatewayClient {
    pub async fn send_frame(&mut self, frame: &PushFrame) {
        self.send_bytes(&frame.serialize().unwrap()).await;
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Reads the error response, then expects the server to close.
    pub async fn recv_response_and_close(&mut self) -> [u8; ERROR_RESPONSE_SIZE] {
        let mut buf = [0u8; ERROR_RESPONSE_SIZE];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .expect("timeout waiting for error response")
            .unwrap();
        self.expect_closed().await;
        buf
    }

    pub async fn expect_closed(&mut self) {
        let mut rest = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut rest))
            .await
            .expect("timeout waiting for close")
            .unwrap_or(0);
        assert_eq!(n, 0, "expected the server to close the connection");
    }

    /// Returns `true` if nothing arrives within `timeout`.
    pub async fn is_silent_for(&mut self, timeout: Duration) -> bool {
        let mut buf = [0u8; 1];
        tokio::time::timeout(timeout, self.stream.read(&mut buf))
            .await
            .is_err()
    }
}

pub struct FeedbackClient {
    pub stream: TlsStream<TcpStream>,
}

impl FeedbackClient {
    pub async fn recv_record(&mut self) -> FeedbackRecord {
        let mut buf = [0u8; FEEDBACK_RECORD_SIZE];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .expect("timeout waiting for feedback record")
            .unwrap();
        FeedbackRecord::parse(&buf).unwrap()
    }

    pub async fn recv_record_timeout(&mut self, timeout: Duration) -> Option<FeedbackRecord> {
        tokio::time::timeout(timeout, self.recv_record()).await.ok()
    }

    /// Reads records until the server closes the connection.
    pub async fn recv_until_closed(&mut self) -> Vec<FeedbackRecord> {
        let mut bytes = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_to_end(&mut bytes))
            .await
            .expect("timeout waiting for feedback close")
            .unwrap();
        bytes
            .chunks(FEEDBACK_RECORD_SIZE)
            .map(|chunk| FeedbackRecord::parse(chunk).unwrap())
            .collect()
    }
}
