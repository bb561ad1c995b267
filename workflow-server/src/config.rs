use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// How the gateway reaches the template service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum GatewayMode {
    /// In-process calls. `ListTemplates` is not available.
    Local,
    /// Calls over a connection to the RPC listener.
    #[default]
    Connected,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "workflow-server")]
#[command(about = "Workflow template RPC service with an HTTP/JSON gateway")]
pub struct Config {
    /// Address of the RPC listener
    #[arg(long, env = "WORKFLOW_RPC_ADDR", default_value = "0.0.0.0:42113")]
    pub rpc_addr: SocketAddr,

    /// Address of the HTTP/JSON gateway listener
    #[arg(long, env = "WORKFLOW_HTTP_ADDR", default_value = "0.0.0.0:42114")]
    pub http_addr: SocketAddr,

    /// RPC server the gateway connects to in connected mode [default: the local RPC listener]
    #[arg(long, env = "WORKFLOW_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Speak HTTP/2 without upgrade (h2c) to the RPC server in connected mode
    #[arg(long, env = "WORKFLOW_RPC_HTTP2")]
    pub rpc_http2: bool,

    /// Connect timeout of the gateway's RPC client in milliseconds
    #[arg(long, env = "WORKFLOW_RPC_CONNECT_TIMEOUT_MS")]
    pub rpc_connect_timeout_ms: Option<u64>,

    #[arg(long, env = "WORKFLOW_GATEWAY_MODE", value_enum, default_value_t = GatewayMode::Connected)]
    pub gateway_mode: GatewayMode,

    /// Upper bound on every call in milliseconds
    #[arg(long, env = "WORKFLOW_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "WORKFLOW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    pub fn rpc_connect_timeout(&self) -> Option<Duration> {
        self.rpc_connect_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// URL the connected gateway dials.
    ///
    /// Defaults to the bound RPC address, with an unspecified IP replaced by
    /// loopback.
    pub fn rpc_target(&self, bound: SocketAddr) -> String {
        if let Some(url) = &self.rpc_url {
            return url.clone();
        }
        let mut addr = bound;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        format!("http://{addr}")
    }
}
