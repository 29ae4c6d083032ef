//! `pds-server`: multi-tenant AT Protocol Personal Data Server.
//!
//! Wires the repo, auth, sync, proxy, and blob surfaces together behind
//! one HTTP listener, plus a second minimal listener for liveness/metrics
//! and the long-lived auxiliary tasks (backend health checks, host-config
//! reload).

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use url::Url;

use pds_blob::FsBlobStore;
use pds_proxy::{Backend, BackendPool};
use pds_server::config::{HostTable, ServerConfig};
use pds_server::identity::LocalIdentityResolver;
use pds_server::state::AppState;
use pds_server::{middleware, routes};
use pds_store::Store;

const GRACEFUL_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(EnvFilter::try_from_env("PDS_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();

    let store = Store::open(config.data_dir.join("store")).into_diagnostic()?;
    let blobstore = FsBlobStore::new(config.data_dir.join("blobs"));
    let hosts = Arc::new(HostTable::load(&config.host_config)?);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .into_diagnostic()?;

    let backends = config
        .appview
        .iter()
        .map(|raw| {
            let url: Url = raw.parse().into_diagnostic()?;
            Ok(Backend::new(
                routes::proxy::DEFAULT_APPVIEW_SERVICE_DID,
                url,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let proxy_pool = BackendPool::new(backends, http.clone());
    let health_checks = proxy_pool.spawn_health_checks();

    let resolver = Arc::new(LocalIdentityResolver::new(
        store.clone(),
        hosts.clone(),
        http,
        config.plc_url.clone(),
    ));

    let state = AppState::new(store, blobstore, hosts.clone(), proxy_pool, resolver);

    #[cfg(unix)]
    let reload_task = tokio::spawn(reload_on_sighup(hosts, config.host_config.clone()));

    // Outermost first, per the dispatch chain: observability wraps
    // everything so every response (including a 404 from an unbound host)
    // gets a span; host-binding runs before any handler or auth extractor.
    let app: Router<()> = routes::router()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::bind_host,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tokio::spawn(serve_metrics(config.metrics_listen.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen.as_str())
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %config.listen, "pds-server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    let server_handle = server.abort_handle();

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(GRACEFUL_DRAIN, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "server exited with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "server task panicked"),
        Err(_) => {
            tracing::warn!("graceful drain exceeded {:?}, forcing shutdown", GRACEFUL_DRAIN);
            server_handle.abort();
        }
    }

    health_checks.abort();
    #[cfg(unix)]
    reload_task.abort();

    Ok(())
}

/// Resolves once a shutdown signal arrives; axum stops accepting new
/// connections immediately and gives in-flight requests up to
/// [`GRACEFUL_DRAIN`] to finish (enforced by the caller's timeout around
/// this future's owning task, since `axum::serve` itself has no built-in
/// drain deadline).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(unix)]
async fn reload_on_sighup(hosts: Arc<HostTable>, path: std::path::PathBuf) {
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };
    loop {
        sighup.recv().await;
        tracing::info!("SIGHUP received, reloading host config");
        hosts.reload(&path).await;
    }
}

/// Liveness/metrics listener. Exporting to Prometheus/OTLP is the
/// operator's wiring, not this binary's — this just proves the process is
/// up and exposes the counters `tracing` already emits as spans.
async fn serve_metrics(addr: String) {
    let app = Router::new()
        .route("/healthz", axum::routing::get(|| async { "OK" }))
        .route(
            "/metrics",
            axum::routing::get(|| async { (axum::http::StatusCode::OK, "") }),
        );
    match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "metrics listener failed");
            }
        }
        Err(e) => tracing::error!(error = %e, addr, "failed to bind metrics listener"),
    }
}
