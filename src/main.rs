//! TrueIP HTTP server
//!
//! Starts an Axum web server that resolves the real client IP of each
//! request and exposes extraction counters for Prometheus scraping.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use clap::Parser;
use tower_http::trace::TraceLayer;
use trueip::cli::{Cli, Command, generate_config_template};
use trueip::handlers::AppState;
use trueip::{config::Config, handlers, middleware, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    println!("Wrote configuration template to {path}");
                }
                None => print!("{template}"),
            }
            return Ok(());
        }
        Some(Command::Check) => {
            Config::from_file(&cli.config)?;
            println!("{} is valid", cli.config);
            return Ok(());
        }
        None => {}
    }

    // Load configuration
    let config = Arc::new(Config::from_file(&cli.config)?);

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting TrueIP server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(Arc::clone(&config))?;

    // Build router; client IP resolution runs innermost so handlers always
    // see the extension, request IDs wrap everything for log correlation.
    let app = Router::new()
        .route("/", get(handlers::ip::handler))
        .route("/health", get(handlers::health::handler))
        .route("/metrics", get(handlers::metrics::handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::client_ip::middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            middleware::request_id::middleware,
        ))
        .with_state(state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);
    tracing::info!("Prometheus metrics available at http://{}/metrics", addr);

    // Start server; ConnectInfo supplies the transport remote address used
    // as the extraction fallback.
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
