// src/server/handlers.rs
// HTTP handlers for command submission, the relay stream and status

use axum::{
    Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::chat::{
    Completion, CommandEvent, Context, DeltaChunk, Message, Relay, RelayOptions, SessionId,
};
use crate::error::{ForestError, Result};

/// Shown in place of narration when a synchronous turn fails
pub const TURN_FAILED_MESSAGE: &str = "Failed to process your command. Please try again.";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Form posted by the game page
#[derive(Debug, Deserialize)]
pub struct CommandForm {
    pub command: String,
    /// JSON-encoded message array
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    pub context: Context,
}

/// Decode the serialized context; absent or blank means empty
pub fn parse_context(raw: Option<&str>) -> Result<Context> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json).map_err(ForestError::InvalidContext),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": state.completion.provider_name(),
        "model": state.model,
        "listeners": state.bus.listener_count(),
    }))
}

/// Publish a command to the open relays and acknowledge immediately
pub async fn submit_command(
    State(state): State<AppState>,
    Form(form): Form<CommandForm>,
) -> Result<StatusCode> {
    let context = parse_context(form.context.as_deref())?;
    let session = SessionId::parse(form.session.as_deref());

    let event = CommandEvent::new(form.command, context).addressed_to(session);
    let delivered = state.bus.publish(event);
    info!(delivered, "command published");

    Ok(StatusCode::ACCEPTED)
}

/// Long-lived SSE connection carrying delta chunks for every command this
/// tab's relay accepts
pub async fn command_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel::<DeltaChunk>(state.relay.buffer);
    let cancel = state.shutdown.child_token();

    let options = RelayOptions {
        session: SessionId::parse(query.session.as_deref()),
        policy: state.relay.policy,
    };
    let relay = Relay::open(
        &state.bus,
        state.completion.clone(),
        options,
        cancel.clone(),
        tx,
    );
    debug!(relay = %relay.id(), session = ?query.session, "stream connection accepted");
    tokio::spawn(relay.run());

    // Dropping the body (client disconnect) cancels the relay
    let guard = cancel.drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(chunk) = rx.recv().await {
            match serde_json::to_string(&chunk) {
                Ok(data) => yield Ok(Event::default().event("message").data(data)),
                Err(e) => warn!("failed to encode delta chunk: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

/// Run a whole turn and answer with the extended context
pub async fn run_turn(
    State(state): State<AppState>,
    Form(form): Form<CommandForm>,
) -> Result<Json<TurnResponse>> {
    let mut context = parse_context(form.context.as_deref())?;

    let reply = match state.completion.complete(&form.command, &context, None).await {
        // An empty narration is still a successful turn
        Completion::Streaming(stream) => Some(stream.collect_text().await.0),
        Completion::Failed => None,
    };

    match reply {
        Some(text) => {
            context.push(Message::user(form.command));
            context.push(Message::assistant(text));
        }
        None => {
            context.push(Message::user("***"));
            context.push(Message::assistant(TURN_FAILED_MESSAGE));
        }
    }

    Ok(Json(TurnResponse { context }))
}
