use apns_common::types::{DEFAULT_FEEDBACK_PORT, DEFAULT_GATEWAY_PORT};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// All interfaces on `port`.
const fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// CLI arguments for the mock gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "apns-mock")]
#[command(about = "Mock push gateway and feedback service for client testing")]
#[command(version)]
pub struct Args {
    /// Socket address of the gateway listener.
    #[arg(long, default_value_t = any_addr(DEFAULT_GATEWAY_PORT), env = "APNS_MOCK_GATEWAY")]
    pub gateway_addr: SocketAddr,
    /// Socket address of the feedback listener.
    #[arg(long, default_value_t = any_addr(DEFAULT_FEEDBACK_PORT), env = "APNS_MOCK_FEEDBACK")]
    pub feedback_addr: SocketAddr,
    /// Randomly answer frames with an error response and close.
    #[arg(long, env = "APNS_MOCK_RANDOM_ERRORS")]
    pub random_errors: bool,
    /// Randomly report frame tokens on the feedback service.
    #[arg(long, env = "APNS_MOCK_RANDOM_FEEDBACK")]
    pub random_feedback: bool,
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// PEM certificate chain. Generated on the fly when omitted.
    #[arg(long, env = "APNS_MOCK_CERT", requires = "key")]
    pub cert: Option<PathBuf>,
    /// PEM private key matching `--cert`.
    #[arg(long, env = "APNS_MOCK_KEY", requires = "cert")]
    pub key: Option<PathBuf>,
    /// Host names for the generated certificate.
    #[arg(
        long = "hostname",
        default_value = "localhost",
        env = "APNS_MOCK_HOSTNAME",
        value_delimiter = ','
    )]
    pub hostnames: Vec<String>,
    /// Socket address for the metrics and health endpoint. Disabled when omitted.
    #[arg(long, env = "APNS_MOCK_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum concurrent connections per listener.
    #[arg(long, default_value = "10000", env = "APNS_MOCK_MAX_CONNS")]
    pub max_conns: usize,
    /// Seconds to wait for open sessions at shutdown.
    #[arg(long, default_value = "30", env = "APNS_MOCK_DRAIN_TIMEOUT")]
    pub drain_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address of the gateway listener.
    pub gateway_addr: SocketAddr,
    /// Socket address of the feedback listener.
    pub feedback_addr: SocketAddr,
    /// Randomized error injection.
    pub random_errors: bool,
    /// Randomized feedback injection.
    pub random_feedback: bool,
    /// PEM certificate chain.
    pub cert: Option<PathBuf>,
    /// PEM private key.
    pub key: Option<PathBuf>,
    /// Host names for the generated certificate.
    pub hostnames: Vec<String>,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum concurrent connections per listener.
    pub max_conns: usize,
    /// Seconds to wait for open sessions at shutdown.
    pub drain_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.gateway_addr == self.feedback_addr {
            return Err("gateway_addr and feedback_addr must differ".to_string());
        }
        if let Some(metrics) = self.metrics_addr {
            if metrics == self.gateway_addr || metrics == self.feedback_addr {
                return Err("metrics_addr must differ from the service listeners".to_string());
            }
        }

        match (&self.cert, &self.key) {
            (Some(_), None) | (None, Some(_)) => {
                return Err("cert and key must be provided together".to_string());
            }
            (None, None) => {
                if self.hostnames.iter().all(|h| h.trim().is_empty()) {
                    return Err("hostname is required to generate a certificate".to_string());
                }
            }
            (Some(_), Some(_)) => {}
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.drain_timeout == 0 {
            return Err("drain_timeout must be greater than 0".to_string());
        }
        if self.drain_timeout > 3600 {
            return Err("drain_timeout exceeds reasonable limit (3600 seconds)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            gateway_addr: args.gateway_addr,
            feedback_addr: args.feedback_addr,
            random_errors: args.random_errors,
            random_feedback: args.random_feedback,
            cert: args.cert,
            key: args.key,
            hostnames: args.hostnames,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            drain_timeout: args.drain_timeout,
        }
    }
}
