// HTTP API tests driven through the router without binding a port

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{MockServer, Received, ScriptedDevices};
use live_voice::{create_router, AppState, Config, SessionState, StaticAuthorizer};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(config: Config, authorized: bool) -> (Router, AppState) {
    let state = AppState::with_backends(
        config,
        ScriptedDevices::new(),
        Arc::new(StaticAuthorizer::new(authorized)),
    );
    (create_router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app(Config::default(), true);
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_list_voices() {
    let (app, _) = app(Config::default(), true);
    let (status, body) = call(&app, "GET", "/voices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "Zephyr");
    assert_eq!(body["voices"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_unknown_voice_is_bad_request() {
    let (app, state) = app(Config::default(), true);
    let (status, body) = call(&app, "POST", "/voice/sessions", Some(json!({"voice": "Nobody"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Nobody"));
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (app, _) = app(Config::default(), true);
    for (method, uri) in [
        ("POST", "/voice/sessions/ghost/stop"),
        ("POST", "/voice/sessions/ghost/mute"),
        ("POST", "/voice/sessions/ghost/unmute"),
        ("GET", "/voice/sessions/ghost/status"),
    ] {
        let (status, body) = call(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body["error"], "Session ghost not found");
    }
}

#[tokio::test]
async fn test_unauthorized_start_is_forbidden() {
    let server = MockServer::start().await;
    let (app, state) = app(server.config(), false);

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(json!({"session_id": "locked"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("Not authorized"));
    assert!(state.session("locked").await.is_none());
}

#[tokio::test]
async fn test_unreachable_model_is_bad_gateway() {
    let server = MockServer::start().await;
    let mut config = server.config();
    config.voice.endpoint = "ws://127.0.0.1:1".to_string();
    let (app, state) = app(config, true);

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(json!({"session_id": "offline"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(state.session("offline").await.is_none());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let mut server = MockServer::start().await;
    let (app, state) = app(server.config(), true);

    let (status, body) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({"session_id": "desk", "voice": "Kore"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "desk");
    assert_eq!(body["status"]["state"], "listening");
    assert_eq!(body["status"]["voice"], "Kore");

    let setup = server.next_json().await;
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(json!({"session_id": "desk"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, "POST", "/voice/sessions/desk/mute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "muted");

    let (status, body) = call(&app, "POST", "/voice/sessions/desk/unmute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "listening");

    let (status, body) = call(&app, "GET", "/voice/sessions/desk/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "desk");

    let (status, body) = call(&app, "POST", "/voice/sessions/desk/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "stopped");
    assert_eq!(
        server.next().await,
        Received::Close(Some((1000, "User initiated stop".to_string())))
    );

    let (status, _) = call(&app, "GET", "/voice/sessions/desk/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn test_mute_after_server_close_is_rejected() {
    let mut server = MockServer::start().await;
    let (app, state) = app(server.config(), true);

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(json!({"session_id": "desk"}))).await;
    assert_eq!(status, StatusCode::OK);
    server.next_json().await;

    // Muting twice is fine
    call(&app, "POST", "/voice/sessions/desk/mute", None).await;
    let (status, _) = call(&app, "POST", "/voice/sessions/desk/mute", None).await;
    assert_eq!(status, StatusCode::OK);

    server.close(1000, "bye");
    let handle = state.session("desk").await.unwrap();
    common::wait_for(&handle, "stopped", |s| s.state == SessionState::Stopped).await;

    // The session stays registered until stopped over the API
    let (status, body) = call(&app, "POST", "/voice/sessions/desk/mute", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Cannot mute"));

    let (status, _) = call(&app, "POST", "/voice/sessions/desk/stop", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_start_without_body_uses_defaults() {
    let mut server = MockServer::start().await;
    let (app, state) = app(server.config(), true);

    let (status, body) = call(&app, "POST", "/voice/sessions", None).await;
    assert_eq!(status, StatusCode::OK);

    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("voice-"), "{}", session_id);
    assert_eq!(body["status"]["voice"], "Zephyr");
    assert!(server.next_json().await.get("setup").is_some());

    let (status, _) = call(&app, "POST", &format!("/voice/sessions/{}/stop", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.sessions.read().await.is_empty());
}
