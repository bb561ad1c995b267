//! Runs the template RPC service and the HTTP/JSON gateway side by side.
//!
//! The RPC listener serves `workflow.template.v1.TemplateService`. The gateway
//! listener translates REST routes onto it, either in-process
//! ([`GatewayMode::Local`]) or through a client connection to the RPC listener
//! ([`GatewayMode::Connected`]).

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workflow_gateway::{
    GatewayOptions, ServeMux, register_client_handlers, register_local_handlers,
};
use workflow_template::{
    MemoryStore, NameFilter, ReadinessFlag, RpcOptions, TemplateClient, TemplateRpc,
    TemplateService, TemplateStore, describe_metrics, rpc_router,
};

pub use config::{Config, GatewayMode};

/// Delay between store probes while the store is unreachable.
pub const STORE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Install the global `fmt` subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Probe `store` until it answers, then mark `readiness`.
pub async fn bootstrap_store<S: TemplateStore>(
    store: Arc<S>,
    readiness: Arc<ReadinessFlag>,
    retry: Duration,
) {
    loop {
        match store.list_templates(NameFilter::all()).await {
            Ok(_) => {
                readiness.mark_ready();
                return;
            }
            Err(e) => {
                warn!(error = %e, retry_ms = retry.as_millis() as u64, "template store not reachable");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

/// Router of the RPC listener.
pub fn rpc_app(rpc: Arc<dyn TemplateRpc>, config: &Config) -> Router {
    let options = RpcOptions {
        server_timeout: config.request_timeout(),
        ..Default::default()
    };
    rpc_router(rpc, options).layer(TraceLayer::new_for_http())
}

/// Router of the gateway listener. `rpc_addr` is the bound RPC listener,
/// dialed in connected mode unless the config names another server.
pub fn gateway_app(
    rpc: Arc<dyn TemplateRpc>,
    config: &Config,
    rpc_addr: SocketAddr,
) -> anyhow::Result<Router> {
    let mut mux = ServeMux::new(GatewayOptions {
        default_timeout: config.request_timeout(),
        ..Default::default()
    });

    match config.gateway_mode {
        GatewayMode::Local => {
            register_local_handlers(&mut mux, rpc).context("failed to register gateway routes")?;
        }
        GatewayMode::Connected => {
            let target = config.rpc_target(rpc_addr);
            let mut builder =
                TemplateClient::builder(target.as_str()).http2_only(config.rpc_http2);
            if let Some(timeout) = config.rpc_connect_timeout() {
                builder = builder.connect_timeout(timeout);
            }
            let client = builder
                .build()
                .with_context(|| format!("invalid rpc target {target}"))?;
            register_client_handlers(&mut mux, client)
                .context("failed to register gateway routes")?;
            info!(%target, http2 = config.rpc_http2, "gateway connected to rpc server");
        }
    }

    Ok(mux.into_router().layer(TraceLayer::new_for_http()))
}

/// Bind both listeners from `config` and serve until `shutdown` resolves.
pub async fn run(
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let rpc_listener = TcpListener::bind(config.rpc_addr)
        .await
        .with_context(|| format!("failed to bind rpc listener to {}", config.rpc_addr))?;
    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener to {}", config.http_addr))?;

    serve(&config, rpc_listener, http_listener, shutdown).await
}

/// Serve on already bound listeners until `shutdown` resolves.
pub async fn serve(
    config: &Config,
    rpc_listener: TcpListener,
    http_listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    describe_metrics();

    let rpc_addr = rpc_listener.local_addr()?;
    let http_addr = http_listener.local_addr()?;

    let store = Arc::new(MemoryStore::new());
    let readiness = Arc::new(ReadinessFlag::new());
    let service: Arc<dyn TemplateRpc> =
        Arc::new(TemplateService::new(store.clone(), readiness.clone()));
    tokio::spawn(bootstrap_store(store, readiness, STORE_RETRY_INTERVAL));

    let rpc = rpc_app(service.clone(), config);
    let gateway = gateway_app(service, config, rpc_addr)?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown.await;
            token.cancel();
        }
    });

    info!(%rpc_addr, %http_addr, mode = ?config.gateway_mode, "workflow server listening");

    let rpc_server =
        axum::serve(rpc_listener, rpc).with_graceful_shutdown(token.clone().cancelled_owned());
    let http_server =
        axum::serve(http_listener, gateway).with_graceful_shutdown(token.cancelled_owned());

    tokio::try_join!(
        async { rpc_server.await.context("rpc server failure") },
        async { http_server.await.context("gateway server failure") },
    )?;

    info!("workflow server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_marks_ready() {
        let readiness = Arc::new(ReadinessFlag::new());
        bootstrap_store(
            Arc::new(MemoryStore::new()),
            readiness.clone(),
            Duration::from_millis(10),
        )
        .await;
        assert!(workflow_template::ReadinessSource::is_ready(&*readiness));
    }
}
