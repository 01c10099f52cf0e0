//! Integration tests for the HTTP control surface

mod helpers;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use cadenza_common::events::PlayerEvent;
use cadenza_player::api::{create_router, AppContext};
use cadenza_player::config::RuntimeSettings;
use cadenza_player::db;
use helpers::{track, TestPlayer};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn setup() -> (Router, TestPlayer) {
    let pool = db::open_in_memory().await.unwrap();
    let player = TestPlayer::start(
        pool,
        RuntimeSettings::default(),
        vec![track(1, 180), track(2, 180)],
    )
    .await;
    let router = create_router(AppContext {
        orchestrator: player.handle.clone(),
    });
    (router, player)
}

async fn request(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json_body) => builder
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = (!bytes.is_empty()).then(|| serde_json::from_slice(&bytes).unwrap());
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _player) = setup().await;
    let (status, body) = request(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "cadenza_player");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_play_queue_and_state() {
    let (app, mut player) = setup().await;

    let (status, _) = request(
        &app,
        Method::POST,
        "/playback/play-queue",
        Some(json!({ "tracks": [1, 2], "start_index": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    player.wait_for_playing(true).await;

    let (status, body) = request(&app, Method::GET, "/playback/state", None).await;
    assert_eq!(status, StatusCode::OK);
    let state = body.unwrap();
    assert_eq!(state["track_id"], 2);
    assert_eq!(state["is_playing"], true);
    assert_eq!(state["phase"], "playing");
    assert_eq!(state["queue"], json!([1, 2]));
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let (app, _player) = setup().await;

    let (status, _) = request(
        &app,
        Method::POST,
        "/playback/play-queue",
        Some(json!({ "tracks": [1], "start_index": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app,
        Method::POST,
        "/playback/volume",
        Some(json!({ "volume": 150 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app,
        Method::POST,
        "/route/policy",
        Some(json!({ "output": "speaker", "allowed": false })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_route_policy_is_persisted() {
    let (app, mut player) = setup().await;

    let (status, _) = request(
        &app,
        Method::POST,
        "/route/signal",
        Some(json!({ "signal": "connected", "output": "wireless" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        Method::POST,
        "/route/policy",
        Some(json!({ "output": "wireless", "allowed": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    player
        .wait_for("forced RouteChanged", |e| {
            matches!(
                e,
                PlayerEvent::RouteChanged {
                    forced_speaker: true,
                    ..
                }
            )
        })
        .await;

    let reloaded = RuntimeSettings::load(player.handle.db()).await.unwrap();
    assert!(!reloaded.route_wireless_allowed);
    assert!(reloaded.route_wired_allowed);
}

#[tokio::test]
async fn test_volume_endpoint() {
    let (app, mut player) = setup().await;
    let (status, _) = request(
        &app,
        Method::POST,
        "/playback/volume",
        Some(json!({ "volume": 40 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    player
        .wait_for("VolumeChanged", |e| {
            matches!(e, PlayerEvent::VolumeChanged { .. })
        })
        .await;
    assert!((player.handle.snapshot().volume - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn test_commands_unavailable_after_shutdown() {
    let (app, mut player) = setup().await;
    player.orchestrator.shutdown().await;

    let (status, body) = request(&app, Method::POST, "/playback/toggle", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.unwrap()["status"]
        .as_str()
        .unwrap()
        .starts_with("error"));
}
