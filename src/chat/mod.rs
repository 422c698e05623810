//! Game chat: the command bus, the completion client and the stream relay
//!
//! ```text
//!  POST /forest/command ──publish──▶ CommandBus ──fan-out──▶ Relay (one per SSE connection)
//!                                                               │
//!                                                   CompletionClient ─▶ Provider (HTTP)
//!                                                               │
//!                                   GET /forest/chat ◀──chunks──┘
//! ```

pub mod bus;
pub mod completion;
pub mod prompt;
pub mod provider;
pub mod relay;
pub mod types;

pub use bus::{CommandBus, Subscription, SubscriptionId};
pub use completion::{Completion, CompletionClient};
pub use provider::{CompletionRequest, DeltaStream, OpenAiProvider, Provider};
pub use relay::{Relay, RelayOptions, RelayState, TurnOutcome, TurnPolicy};
pub use types::{CommandEvent, Context, DeltaChunk, FinishReason, Message, Role, SessionId};
