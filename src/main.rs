use clap::Parser;
use dotenvy::dotenv;
use rust_upload_server::config::UploadConfig;
use rust_upload_server::infrastructure::storage;
use rust_upload_server::services::expiration::janitor_worker;
use rust_upload_server::services::locker::MemoryLocker;
use rust_upload_server::services::upload_service::UploadService;
use rust_upload_server::services::validation::{MaxSizeRule, ValidationRule};
use rust_upload_server::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, janitor, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_upload_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Upload Server [Mode: {}]...", args.mode);

    // 2. Setup Common Infrastructure
    let config = UploadConfig::from_env();
    info!(
        "🛡️  Upload Config: Max Size={}MB, Backend={}, Lock TTL={}s, Max Age={}h",
        config.max_upload_size / 1024 / 1024,
        config.storage_backend,
        config.lock_ttl_secs,
        config.expiration_max_age_hours
    );

    let backend = storage::setup_storage(&config).await?;

    // 3. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 4. Initialize Janitor Service
    if args.mode == "janitor" || args.mode == "all" {
        let janitor_backend = backend.clone();
        let janitor_config = config.clone();
        let janitor_shutdown = shutdown_rx.clone();

        let janitor_handle = tokio::spawn(async move {
            janitor_worker(janitor_backend, janitor_config, janitor_shutdown).await;
        });
        handles.push(janitor_handle);
        info!("🧹 Expiration janitor initialized.");
    }

    // 5. Initialize API Service
    if args.mode == "api" || args.mode == "all" {
        let locker = Arc::new(MemoryLocker::new(Duration::from_secs(config.lock_ttl_secs)));
        let validators: Vec<Box<dyn ValidationRule>> =
            vec![Box::new(MaxSizeRule::new(config.max_upload_size))];
        let uploads = Arc::new(UploadService::new(backend.clone(), locker, validators));

        let state = AppState {
            backend: backend.clone(),
            uploads,
            config: config.clone(),
        };

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ Upload server listening on: http://0.0.0.0:{}", args.port);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        });
        handles.push(server_handle);
    }

    // 6. Wait for Shutdown Signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down upload server...");
    for handle in handles {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Task failed during shutdown: {}", e),
            Err(_) => error!("⏳ Task did not stop within 10s, abandoning it"),
        }
    }
    info!("👋 Exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
