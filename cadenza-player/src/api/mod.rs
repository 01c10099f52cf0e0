//! HTTP/SSE command surface
//!
//! Another surface like the widget or the notification: it sends commands
//! and reads the snapshot cache and the event bus, nothing else.

pub mod handlers;
pub mod sse;

use crate::error::{Error, Result};
use crate::orchestrator::OrchestratorHandle;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: OrchestratorHandle,
}

/// Build the router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Playback control
        .route("/playback/play", post(handlers::play))
        .route("/playback/play-queue", post(handlers::play_queue))
        .route("/playback/toggle", post(handlers::toggle))
        .route("/playback/next", post(handlers::next))
        .route("/playback/previous", post(handlers::previous))
        .route("/playback/shuffle", post(handlers::shuffle))
        .route("/playback/repeat", post(handlers::repeat))
        .route("/playback/seek", post(handlers::seek))
        .route("/playback/stop", post(handlers::stop))
        .route("/playback/enqueue", post(handlers::enqueue))
        .route("/playback/favorite", post(handlers::favorite))
        .route("/playback/resume-choice", post(handlers::resume_choice))
        .route("/playback/volume", post(handlers::set_volume))
        .route("/playback/state", get(handlers::get_state))
        // Output routing and screen signals
        .route("/route/signal", post(handlers::route_signal))
        .route("/route/policy", post(handlers::route_policy))
        .route("/screen-on", post(handlers::screen_on))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
