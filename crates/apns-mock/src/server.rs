use crate::config::ServerConfig;
use crate::error::MockError;
use crate::feedback::FeedbackSession;
use crate::gateway::GatewaySession;
use crate::metrics::{counters, gauges};
use crate::policy::DecisionPolicy;
use crate::queue::FeedbackQueue;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// The two listeners of the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Accepts push frames.
    Gateway,
    /// Streams feedback records.
    Feedback,
}

impl Service {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state for both listeners.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Tokens waiting for feedback clients.
    pub queue: Arc<FeedbackQueue>,
    /// Failure and feedback injection.
    pub policy: Arc<dyn DecisionPolicy>,
    /// TLS acceptor shared by both listeners.
    pub acceptor: TlsAcceptor,
    /// Open gateway connections.
    pub gateway_connections: AtomicUsize,
    /// Open feedback connections.
    pub feedback_connections: AtomicUsize,
}

impl ServerState {
    /// Creates state with an empty feedback queue.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        acceptor: TlsAcceptor,
        policy: Arc<dyn DecisionPolicy>,
    ) -> Self {
        Self {
            config,
            queue: Arc::new(FeedbackQueue::new()),
            policy,
            acceptor,
            gateway_connections: AtomicUsize::new(0),
            feedback_connections: AtomicUsize::new(0),
        }
    }

    /// Open connection counter of a listener.
    #[must_use]
    pub fn connections(&self, service: Service) -> &AtomicUsize {
        match service {
            Service::Gateway => &self.gateway_connections,
            Service::Feedback => &self.feedback_connections,
        }
    }
}

/// Counts an open connection for as long as it lives.
struct ConnectionGuard {
    state: Arc<ServerState>,
    service: Service,
}

impl ConnectionGuard {
    fn new(state: Arc<ServerState>, service: Service) -> Self {
        state.connections(service).fetch_add(1, Ordering::Relaxed);
        gauges::inc_connections_active(service.as_str());
        Self { state, service }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state
            .connections(self.service)
            .fetch_sub(1, Ordering::Relaxed);
        gauges::dec_connections_active(self.service.as_str());
    }
}

/// Run both accept loops until the process exits.
///
/// # Errors
///
/// Returns an error if a listener's local address cannot be read.
pub async fn run(
    gateway: TcpListener,
    feedback: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), MockError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_with_shutdown(gateway, feedback, state, shutdown_rx).await
}

/// Run both accept loops until `shutdown` turns `true` (or its sender is
/// dropped).
///
/// On shutdown the listeners are closed, the feedback queue is closed, open
/// sessions are cancelled, and the call waits up to the configured drain
/// timeout for their tasks to finish. Tasks still running at the deadline
/// are aborted.
///
/// # Errors
///
/// Returns an error if a listener's local address cannot be read.
pub async fn run_with_shutdown(
    gateway: TcpListener,
    feedback: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), MockError> {
    info!(
        "gateway listening on {}, feedback listening on {}",
        gateway.local_addr()?,
        feedback.local_addr()?
    );
    let mut sessions = JoinSet::new();

    loop {
        let (service, result) = tokio::select! {
            result = gateway.accept() => (Service::Gateway, result),
            result = feedback.accept() => (Service::Feedback, result),
            Some(joined) = sessions.join_next() => {
                reap(joined);
                continue;
            }
            () = shutdown_signal(&mut shutdown) => {
                info!("shutdown signal received, draining {} connections", sessions.len());
                break;
            }
        };

        match result {
            Ok((stream, addr)) => {
                if state.connections(service).load(Ordering::Relaxed) >= state.config.max_conns {
                    warn!("max {} connections reached, rejecting {}", service, addr);
                    counters::connections_total(service.as_str(), "rejected");
                    drop(stream);
                    continue;
                }
                counters::connections_total(service.as_str(), "accepted");
                let guard = ConnectionGuard::new(Arc::clone(&state), service);
                let state = Arc::clone(&state);
                let shutdown = shutdown.clone();
                sessions.spawn(async move {
                    let _guard = guard;
                    let result = handle_connection(service, stream, addr, state, shutdown).await;
                    if let Err(e) = result {
                        debug!("{} connection from {} closed: {}", service, addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept {} connection: {}", service, e);
            }
        }
    }

    drop(gateway);
    drop(feedback);
    state.queue.close();

    let drain_timeout = std::time::Duration::from_secs(state.config.drain_timeout);
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while !sessions.is_empty() {
        match tokio::time::timeout_at(deadline, sessions.join_next()).await {
            Ok(Some(joined)) => reap(joined),
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "drain timeout reached with {} connections still active",
                    sessions.len()
                );
                sessions.abort_all();
                break;
            }
        }
    }

    info!("server shut down gracefully");
    Ok(())
}

/// Logs a session task that panicked.
fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("connection task panicked: {}", e);
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// TLS handshake followed by the listener's session, both cancelled by
/// shutdown.
async fn handle_connection(
    service: Service,
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), MockError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let tls_stream = tokio::select! {
        result = state.acceptor.accept(stream) => result.map_err(|e| {
            debug!("TLS handshake with {} failed: {}", peer_addr, e);
            MockError::Io(e)
        })?,
        () = shutdown_signal(&mut shutdown) => return Ok(()),
    };
    debug!("{} session started for {}", service, peer_addr);

    match service {
        Service::Gateway => {
            let session =
                GatewaySession::new(Arc::clone(&state.queue), Arc::clone(&state.policy));
            tokio::select! {
                end = session.run(tls_stream) => {
                    debug!("gateway session for {} ended: {:?}", peer_addr, end?);
                }
                () = shutdown_signal(&mut shutdown) => {
                    debug!("gateway session for {} cancelled by shutdown", peer_addr);
                }
            }
        }
        Service::Feedback => {
            let session = FeedbackSession::new(Arc::clone(&state.queue));
            let end = session.run(tls_stream).await?;
            debug!("feedback session for {} ended: {:?}", peer_addr, end);
        }
    }
    Ok(())
}
