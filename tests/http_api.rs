// tests/http_api.rs


use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use forest::chat::{DeltaChunk, FinishReason, Role, TurnPolicy};
use forest::core::SseDecoder;
use forest::server::create_router;
use forest::server::handlers::{TURN_FAILED_MESSAGE, TurnResponse};
use test_helpers::{Script, ScriptedProvider, create_test_app_state, next_frame, wake_up_chunks, within};

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_submit_without_context_publishes_empty_context() {
    let state = create_test_app_state(ScriptedProvider::new(vec![]), TurnPolicy::KeepOpen);
    let mut listener = state.bus.subscribe();
    let app = create_router(state);

    let response = app
        .oneshot(form_post("/forest/command", "command=open+eyes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let event = within(listener.recv()).await.unwrap();
    assert_eq!(event.command, "open eyes");
    assert!(event.context.is_empty());
    assert!(event.session.is_none());
}

#[tokio::test]
async fn test_submit_carries_context_and_session() {
    let state = create_test_app_state(ScriptedProvider::new(vec![]), TurnPolicy::KeepOpen);
    let mut listener = state.bus.subscribe();
    let app = create_router(state);

    let context = r#"[{"role":"user","content":"open eyes"},{"role":"assistant","content":"You wake up."}]"#;
    let body = format!(
        "command=look+around&context={}&session=tab-1",
        urlencode(context)
    );
    let response = app.oneshot(form_post("/forest/command", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let event = within(listener.recv()).await.unwrap();
    assert_eq!(event.context.len(), 2);
    assert_eq!(event.context[1].role, Role::Assistant);
    assert_eq!(event.session.as_ref().map(|s| s.as_str()), Some("tab-1"));
}

#[tokio::test]
async fn test_malformed_context_is_rejected_and_not_published() {
    let state = create_test_app_state(ScriptedProvider::new(vec![]), TurnPolicy::KeepOpen);
    let mut listener = state.bus.subscribe();
    let app = create_router(state.clone());

    let body = format!("command=look&context={}", urlencode("[{\"role\":"));
    let response = app.oneshot(form_post("/forest/command", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing reached the bus
    state.bus.publish(forest::chat::CommandEvent::new("marker", Vec::new()));
    let event = within(listener.recv()).await.unwrap();
    assert_eq!(event.command, "marker");
}

#[tokio::test]
async fn test_status_reports_listeners() {
    let state = create_test_app_state(ScriptedProvider::new(vec![]), TurnPolicy::KeepOpen);
    let _listener = state.bus.subscribe();
    let app = create_router(state);

    let response = app.oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["provider"], "scripted");
    assert_eq!(json["model"], "test-model");
    assert_eq!(json["listeners"], 1);
}

#[tokio::test]
async fn test_stream_relays_turn_and_stays_open() {
    let provider = ScriptedProvider::new(vec![Script::Chunks(wake_up_chunks())]);
    let state = create_test_app_state(provider.clone(), TurnPolicy::KeepOpen);
    let app = create_router(state.clone());

    let response = app.clone().oneshot(get("/forest/chat")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(state.bus.listener_count(), 1);

    let response_post = app
        .oneshot(form_post("/forest/command", "command=open+eyes&context=%5B%5D"))
        .await
        .unwrap();
    assert_eq!(response_post.status(), StatusCode::ACCEPTED);

    let mut body = response.into_body().into_data_stream();
    let mut decoder = SseDecoder::new();
    let mut text = String::new();
    let mut finish = None;
    for _ in 0..3 {
        let frame = within(next_frame(&mut body, &mut decoder)).await.unwrap();
        assert_eq!(frame.event_name(), "message");
        let chunk: DeltaChunk = frame.parse().unwrap();
        text.push_str(chunk.content.as_deref().unwrap_or_default());
        finish = chunk.finish_reason.or(finish);
    }
    assert_eq!(text, "You wake up.");
    assert_eq!(finish, Some(FinishReason::Stop));

    // The relay keeps listening after the turn
    assert_eq!(state.bus.listener_count(), 1);
    assert_eq!(provider.call_count(), 1);

    // Shutdown closes the connection and drops the listener
    state.shutdown.cancel();
    assert!(within(next_frame(&mut body, &mut decoder)).await.is_none());
    assert_eq!(state.bus.listener_count(), 0);
}

#[tokio::test]
async fn test_close_after_turn_ends_stream() {
    let provider = ScriptedProvider::new(vec![Script::Chunks(wake_up_chunks())]);
    let state = create_test_app_state(provider, TurnPolicy::CloseAfterTurn);
    let app = create_router(state.clone());

    let response = app.clone().oneshot(get("/forest/chat")).await.unwrap();
    app.oneshot(form_post("/forest/command", "command=open+eyes"))
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    let mut decoder = SseDecoder::new();
    let mut frames = 0;
    while within(next_frame(&mut body, &mut decoder)).await.is_some() {
        frames += 1;
    }
    assert_eq!(frames, 3);
    assert_eq!(state.bus.listener_count(), 0);
}

#[tokio::test]
async fn test_stream_ignores_commands_for_other_sessions() {
    let provider = ScriptedProvider::new(vec![Script::Chunks(wake_up_chunks())]);
    let state = create_test_app_state(provider.clone(), TurnPolicy::CloseAfterTurn);
    let app = create_router(state.clone());

    let response = app.clone().oneshot(get("/forest/chat?session=a")).await.unwrap();
    app.clone()
        .oneshot(form_post("/forest/command", "command=wave&session=b"))
        .await
        .unwrap();
    app.oneshot(form_post("/forest/command", "command=open+eyes&session=a"))
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    let mut decoder = SseDecoder::new();
    let mut text = String::new();
    while let Some(frame) = within(next_frame(&mut body, &mut decoder)).await {
        let chunk: DeltaChunk = frame.parse().unwrap();
        text.push_str(chunk.content.as_deref().unwrap_or_default());
    }
    assert_eq!(text, "You wake up.");

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.last().unwrap().content, "open eyes");
}

#[tokio::test]
async fn test_turn_appends_exchange() {
    let provider = ScriptedProvider::new(vec![Script::Chunks(wake_up_chunks())]);
    let app = create_router(create_test_app_state(provider, TurnPolicy::KeepOpen));

    let response = app
        .oneshot(form_post("/forest/turn", "command=open+eyes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let turn: TurnResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(turn.context.len(), 2);
    assert_eq!(turn.context[0].role, Role::User);
    assert_eq!(turn.context[0].content, "open eyes");
    assert_eq!(turn.context[1].role, Role::Assistant);
    assert_eq!(turn.context[1].content, "You wake up.");
}

#[tokio::test]
async fn test_turn_with_empty_narration_is_success() {
    let provider = ScriptedProvider::new(vec![Script::Chunks(vec![DeltaChunk::finished(
        FinishReason::Stop,
    )])]);
    let app = create_router(create_test_app_state(provider, TurnPolicy::KeepOpen));

    let response = app
        .oneshot(form_post("/forest/turn", "command=stand+still"))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let turn: TurnResponse = serde_json::from_slice(&body).unwrap();

    assert_eq!(turn.context.len(), 2);
    assert_eq!(turn.context[0].content, "stand still");
    assert_eq!(turn.context[1].role, Role::Assistant);
    assert_eq!(turn.context[1].content, "");
}

#[tokio::test]
async fn test_turn_failure_appends_apology() {
    let provider = ScriptedProvider::new(vec![Script::Fail]);
    let app = create_router(create_test_app_state(provider, TurnPolicy::KeepOpen));

    let response = app
        .oneshot(form_post("/forest/turn", "command=open+eyes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let turn: TurnResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(turn.context.len(), 2);
    assert_eq!(turn.context[0].content, "***");
    assert_eq!(turn.context[1].content, TURN_FAILED_MESSAGE);
}

fn urlencode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
