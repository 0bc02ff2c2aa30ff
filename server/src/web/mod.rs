use axum::{
    Router,
    routing::{any, get},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_PER_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LIMITER_WARN_SIZE: usize = 1_000_000;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors_origins_result: Result<Vec<HeaderValue>, _> = origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .map_err(|e| format!("Invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    let cors_origins = cors_origins_result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "CORS config error. Defaulting to restrictive");
        vec![]
    });

    if cors_origins.is_empty() {
        tracing::info!("Restrictive CORS policy applied (no origins configured)");
        return CorsLayer::new();
    }

    tracing::info!(
        cors.origins.count = cors_origins.len(),
        "CORS configured with allowed origins"
    );
    CorsLayer::new()
        .allow_methods(vec![http::Method::GET])
        .allow_origin(cors_origins)
        .allow_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/lobbies/{code}", get(handlers::lobby_summary_handler))
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_PER_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| {
                WebError::InternalServerError("invalid rate limiter configuration".to_string())
            })?,
    );

    // Evict stale per-IP buckets so limiter memory tracks active clients only.
    let limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            sweep.tick().await;
            if limiter.len() > LIMITER_WARN_SIZE {
                tracing::warn!(
                    rate_limiter.storage_size = limiter.len(),
                    "Rate limiting storage size is large"
                );
            }
            limiter.retain_recent();
        }
    });

    let app = router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new()
                .quality(CompressionLevel::Default)
                .gzip(true),
        )
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer(&server_config.cors_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(server.address = %addr, "herdmind listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}
