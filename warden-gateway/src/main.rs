use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden_policy_engine::{AdmissionListener, AdmissionObserver, PolicyStore, TracingObserver};

mod config;
mod handlers;
mod metrics;
mod notify;
mod source;

use config::Config;
use handlers::{health_live, health_ready, metrics_handler, validate, AppState};
use metrics::Metrics;
use notify::WebhookNotifier;
use source::DirectoryPolicySource;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    let admission = config
        .admission()
        .context("invalid admission configuration")?;

    // Initialize tracing
    init_tracing(&config);

    tracing::info!(
        host = %config.host,
        port = config.port,
        policy_dir = %config.policy_dir.display(),
        fail_safe_mode = %admission.fail_safe_mode,
        startup_mode = %admission.startup_mode,
        deadline_ms = admission.evaluation_deadline_ms,
        max_in_flight = admission.max_in_flight,
        "starting warden-gateway"
    );

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutting_down = Arc::new(AtomicBool::new(false));

    // Metrics and the log sink both observe the pipeline
    let metrics = Metrics::new();
    let observer: Arc<dyn AdmissionObserver> = Arc::new((TracingObserver, metrics.clone()));

    // Policy store over the policy directory
    let source = Arc::new(DirectoryPolicySource::new(
        config.policy_dir.clone(),
        Duration::from_secs(config.policy_watch_interval_secs),
    ));
    let store = Arc::new(PolicyStore::new(source, &admission).with_observer(Arc::clone(&observer)));

    // Spawn the reload loop (performs the initial load)
    let store_shutdown_rx = shutdown_tx.subscribe();
    let store_clone = Arc::clone(&store);
    tokio::spawn(async move {
        store_clone.run(store_shutdown_rx).await;
    });

    // Admission listener
    let mut listener = AdmissionListener::new(Arc::clone(&store), &admission).with_observer(observer);
    if let Some(url) = &config.notifier_url {
        let notifier = WebhookNotifier::new(url.clone(), Duration::from_secs(config.notifier_timeout_secs))
            .context("failed to build violation webhook client")?;
        listener = listener.with_notifier(Arc::new(notifier));
        tracing::info!(url = %url, "violation events posted to webhook");
    }
    let listener = Arc::new(listener);

    // Create app state for health endpoints
    let app_state = AppState {
        store: Arc::clone(&store),
        shutting_down: Arc::clone(&shutting_down),
    };

    // Build application router
    let app = Router::new()
        // Health endpoints
        .route("/health/live", get(health_live))
        .route(
            "/health/ready",
            get(health_ready).with_state(app_state.clone()),
        )
        // Metrics endpoint
        .route("/metrics", get(metrics_handler).with_state(metrics.clone()))
        // Validating admission webhook
        .route("/validate", post(validate).with_state(listener))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // Create TCP listener
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let tcp = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "listening for connections");

    // Spawn graceful shutdown handler
    let shutdown_tx_clone = shutdown_tx.clone();
    let shutting_down_clone = Arc::clone(&shutting_down);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, initiating graceful shutdown");

        // Mark as shutting down (readiness will report not ready)
        shutting_down_clone.store(true, Ordering::SeqCst);

        // Signal all tasks to stop
        let _ = shutdown_tx_clone.send(());
    });

    // Run server with graceful shutdown
    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            let mut rx = shutdown_tx.subscribe();
            let _ = rx.recv().await;
        })
        .await?;

    tracing::info!("warden-gateway stopped");
    Ok(())
}

/// Initialize tracing based on configuration.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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
}
