//! HTTP request handlers
//!
//! Control endpoints only forward commands; the controller validates and
//! the outcome shows up on `/events` and `/playback/state`.

use crate::api::AppContext;
use crate::config::RuntimeSettings;
use crate::error::Error;
use crate::playback::Command;
use crate::routing::RouteSignal;
use axum::{extract::State, http::StatusCode, Json};
use cadenza_common::events::{OutputClass, PlaybackSnapshot, TrackId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    track_id: TrackId,
}

#[derive(Debug, Deserialize)]
pub struct PlayQueueRequest {
    tracks: Vec<TrackId>,
    #[serde(default)]
    start_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    position_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ResumeChoiceRequest {
    resume: bool,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    volume: u8, // 0-100 user-facing scale
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    output: OutputClass,
    allowed: bool,
}

type ApiResult = Result<Json<StatusResponse>, (StatusCode, Json<StatusResponse>)>;

fn ok() -> ApiResult {
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

fn failure(code: StatusCode, message: impl Into<String>) -> (StatusCode, Json<StatusResponse>) {
    (
        code,
        Json(StatusResponse {
            status: format!("error: {}", message.into()),
        }),
    )
}

fn map_error(e: Error) -> (StatusCode, Json<StatusResponse>) {
    match e {
        Error::ChannelClosed(_) => failure(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        Error::InvalidState(_) | Error::Queue(_) => failure(StatusCode::BAD_REQUEST, e.to_string()),
        Error::TrackNotFound(_) => failure(StatusCode::NOT_FOUND, e.to_string()),
        e => {
            error!("Request failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn forward(ctx: &AppContext, command: Command) -> ApiResult {
    ctx.orchestrator.send(command).await.map_err(map_error)?;
    ok()
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "cadenza_player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Playback Control Endpoints
// ============================================================================

/// POST /playback/play
pub async fn play(State(ctx): State<AppContext>, Json(req): Json<TrackRequest>) -> ApiResult {
    info!("Play request: track {}", req.track_id);
    forward(&ctx, Command::Play(req.track_id)).await
}

/// POST /playback/play-queue
pub async fn play_queue(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayQueueRequest>,
) -> ApiResult {
    if req.tracks.is_empty() || req.start_index >= req.tracks.len() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            format!(
                "start_index {} out of range for {} tracks",
                req.start_index,
                req.tracks.len()
            ),
        ));
    }
    info!("Play queue request: {} tracks from {}", req.tracks.len(), req.start_index);
    forward(
        &ctx,
        Command::PlayQueue {
            tracks: req.tracks,
            start_index: req.start_index,
        },
    )
    .await
}

/// POST /playback/toggle
pub async fn toggle(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::TogglePlayPause).await
}

/// POST /playback/next
pub async fn next(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::Next).await
}

/// POST /playback/previous
pub async fn previous(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::Previous).await
}

/// POST /playback/shuffle
pub async fn shuffle(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::ToggleShuffle).await
}

/// POST /playback/repeat
pub async fn repeat(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::ToggleRepeat).await
}

/// POST /playback/seek
pub async fn seek(State(ctx): State<AppContext>, Json(req): Json<SeekRequest>) -> ApiResult {
    forward(&ctx, Command::Seek(req.position_ms)).await
}

/// POST /playback/stop
pub async fn stop(State(ctx): State<AppContext>) -> ApiResult {
    forward(&ctx, Command::Stop).await
}

/// POST /playback/enqueue
pub async fn enqueue(State(ctx): State<AppContext>, Json(req): Json<TrackRequest>) -> ApiResult {
    forward(&ctx, Command::Enqueue(req.track_id)).await
}

/// POST /playback/favorite
pub async fn favorite(State(ctx): State<AppContext>, Json(req): Json<TrackRequest>) -> ApiResult {
    forward(&ctx, Command::ToggleFavorite(req.track_id)).await
}

/// POST /playback/resume-choice
pub async fn resume_choice(
    State(ctx): State<AppContext>,
    Json(req): Json<ResumeChoiceRequest>,
) -> ApiResult {
    forward(&ctx, Command::ResolveResumePrompt { resume: req.resume }).await
}

/// POST /playback/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult {
    if req.volume > 100 {
        return Err(failure(StatusCode::BAD_REQUEST, "volume must be 0-100"));
    }
    forward(&ctx, Command::SetVolume(req.volume as f32 / 100.0)).await
}

/// GET /playback/state
pub async fn get_state(State(ctx): State<AppContext>) -> Json<PlaybackSnapshot> {
    Json(ctx.orchestrator.snapshot())
}

// ============================================================================
// Route and Screen Signals
// ============================================================================

/// POST /route/signal
pub async fn route_signal(
    State(ctx): State<AppContext>,
    Json(signal): Json<RouteSignal>,
) -> ApiResult {
    ctx.orchestrator
        .route_signal(signal)
        .await
        .map_err(map_error)?;
    ok()
}

/// POST /route/policy - change and persist the routing policy for a class
pub async fn route_policy(
    State(ctx): State<AppContext>,
    Json(req): Json<PolicyRequest>,
) -> ApiResult {
    if req.output == OutputClass::Speaker {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "speaker output has no routing policy",
        ));
    }
    if let Err(e) =
        RuntimeSettings::save_route_policy(ctx.orchestrator.db(), req.output, req.allowed).await
    {
        // Still apply it for this session
        warn!("Failed to persist routing policy: {}", e);
    }
    ctx.orchestrator
        .route_signal(RouteSignal::PolicyChanged {
            output: req.output,
            allowed: req.allowed,
        })
        .await
        .map_err(map_error)?;
    ok()
}

/// POST /screen-on
pub async fn screen_on(State(ctx): State<AppContext>) -> ApiResult {
    ctx.orchestrator.surfaces().screen_on();
    ok()
}
