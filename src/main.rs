use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use imgquery::{config::AppConfig, lookup::LookupService, service_router};

/// imgquery server entry point.
///
/// Initializes tracing, loads and validates configuration, and serves the
/// upload and fetch-by-URL lookup endpoints.
///
/// # Configuration
/// Environment variables:
/// - `IMGQUERY_SERVICES`: searchable databases, e.g. `0:danbooru,1:konachan`
/// - `IMGQUERY_MATCHER`: address of the matching daemon (default: 127.0.0.1:5566)
/// - `IMGQUERY_THUMB_DIR`, `IMGQUERY_TEMP_DIR`: working directories
/// - `IMGQUERY_MAX_SIZE`, `IMGQUERY_MAX_DIM`, `IMGQUERY_MAX_REDIRECTS`: fetch ceilings
/// - `PORT`: HTTP listen port (default: 8080)
/// - `RUST_LOG`: Logging verbosity (default: "imgquery=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgquery=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting imgquery server");

    let cfg = AppConfig::from_env()?;
    cfg.validate()?;
    tracing::info!(
        "{} service(s), matcher at {}, max size {} bytes, max dimension {}",
        cfg.services.len(),
        cfg.matcher_addr,
        cfg.fetch.limits.max_size,
        cfg.fetch.limits.max_dim
    );

    let service = Arc::new(LookupService::new(cfg)?);
    let shutdown = service.shutdown_token();
    let app = Router::new().merge(service_router(service));

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    // Rate limiting keys on the peer address, so serve with connect info.
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down, cancelling transfers in flight");
        shutdown.cancel();
    })
    .await?;
    Ok(())
}
