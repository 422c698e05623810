//! Stream relay: one per open SSE connection
//!
//! A relay subscribes to the [`CommandBus`] when the connection opens and
//! then loops: wait for a command, run a completion for it, forward every
//! delta chunk to the connection in order, go back to waiting.
//!
//! ```text
//!   OPEN ──command──▶ STREAMING ──stop / end of stream──▶ OPEN
//!    │                   │
//!    └──── cancel ───────┴──────────────▶ CLOSED
//! ```
//!
//! The connection's cancellation token fires on client disconnect and on
//! server shutdown. Every path out ends in [`Relay::close`], which is
//! idempotent.

use std::sync::Arc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bus::{CommandBus, Subscription};
use super::completion::{Completion, CompletionClient};
use super::types::{CommandEvent, DeltaChunk, SessionId};

/// What a connection does after a turn's stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPolicy {
    /// Keep the connection for further turns
    #[default]
    KeepOpen,
    /// Close the connection after the first completed turn
    CloseAfterTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Open,
    Streaming,
    Closed,
}

/// How a single command dispatch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A stop chunk was forwarded
    Completed,
    /// The stream ended without a stop chunk
    Exhausted,
    /// The completion could not be started; nothing was sent
    Failed,
    /// The connection was cancelled mid-turn
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    pub session: Option<SessionId>,
    pub policy: TurnPolicy,
}

pub struct Relay {
    id: Uuid,
    options: RelayOptions,
    completion: Arc<CompletionClient>,
    subscription: Option<Subscription>,
    outbound: Option<mpsc::Sender<DeltaChunk>>,
    cancel: CancellationToken,
    state: RelayState,
}

impl Relay {
    /// Subscribe to the bus for a freshly opened connection.
    ///
    /// Subscribing happens here rather than in [`Relay::run`] so commands
    /// published right after the connection is accepted are not missed.
    pub fn open(
        bus: &Arc<CommandBus>,
        completion: Arc<CompletionClient>,
        options: RelayOptions,
        cancel: CancellationToken,
        outbound: mpsc::Sender<DeltaChunk>,
    ) -> Self {
        let mut relay = Self {
            id: Uuid::new_v4(),
            options,
            completion,
            subscription: None,
            outbound: Some(outbound),
            cancel,
            state: RelayState::Open,
        };

        if relay.cancel.is_cancelled() {
            relay.close();
        } else {
            relay.subscription = Some(bus.subscribe());
            info!(relay = %relay.id, session = ?relay.options.session, "relay opened");
        }
        relay
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Whether this relay handles `event`
    pub fn accepts(&self, event: &CommandEvent) -> bool {
        match (&self.options.session, &event.session) {
            (Some(mine), Some(target)) => mine == target,
            _ => true,
        }
    }

    /// Serve commands until the connection is cancelled, the client goes
    /// away, or the turn policy closes it.
    pub async fn run(mut self) {
        loop {
            let event = {
                let (Some(subscription), Some(outbound)) =
                    (self.subscription.as_mut(), self.outbound.as_ref())
                else {
                    break;
                };

                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    _ = outbound.closed() => None,
                    event = subscription.recv() => event,
                }
            };

            let Some(event) = event else { break };
            if !self.accepts(&event) {
                debug!(relay = %self.id, "ignoring command for session {:?}", event.session);
                continue;
            }

            match self.dispatch(&event).await {
                TurnOutcome::Cancelled => break,
                TurnOutcome::Completed | TurnOutcome::Exhausted
                    if self.options.policy == TurnPolicy::CloseAfterTurn =>
                {
                    break
                }
                _ => {}
            }
        }

        self.close();
    }

    /// Run one command through the completion client and forward its chunks
    pub async fn dispatch(&mut self, event: &CommandEvent) -> TurnOutcome {
        if self.state == RelayState::Closed {
            return TurnOutcome::Cancelled;
        }
        debug!(relay = %self.id, command = %event.command, context_len = event.context.len(), "command received");

        let turn = self.cancel.child_token();
        let completion = self
            .completion
            .complete(&event.command, &event.context, Some(turn))
            .await;

        let mut stream = match completion {
            Completion::Streaming(stream) => stream,
            Completion::Failed if self.cancel.is_cancelled() => return TurnOutcome::Cancelled,
            Completion::Failed => {
                // Nothing reaches the client for a failed turn
                warn!(relay = %self.id, command = %event.command, "completion failed, turn dropped");
                return TurnOutcome::Failed;
            }
        };

        self.state = RelayState::Streaming;
        let mut forwarded = 0usize;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break TurnOutcome::Cancelled,
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break TurnOutcome::Exhausted;
            };
            let Some(outbound) = self.outbound.as_ref() else {
                break TurnOutcome::Cancelled;
            };

            let is_stop = chunk.is_stop();
            if outbound.send(chunk).await.is_err() {
                break TurnOutcome::Cancelled;
            }
            forwarded += 1;

            if is_stop {
                break TurnOutcome::Completed;
            }
        };

        if outcome == TurnOutcome::Cancelled {
            stream.abort();
            debug!(relay = %self.id, forwarded, "turn cancelled, upstream aborted");
        } else {
            self.state = RelayState::Open;
            debug!(relay = %self.id, forwarded, ?outcome, "turn finished");
        }

        outcome
    }

    /// Tear the connection down. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == RelayState::Closed {
            return false;
        }
        self.state = RelayState::Closed;

        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        // Dropping the sender ends the SSE body
        self.outbound.take();
        self.cancel.cancel();

        info!(relay = %self.id, "relay closed");
        true
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.close();
    }
}
