//! # chat-client
//!
//! Client-side state machines of the realtime core and the runtime that
//! drives them over a gateway connection.
//!
//! The state machines ([`PresenceTracker`], [`TypingCoordinator`],
//! [`MessagePipeline`], [`ConversationDirectory`]) are synchronous and take the
//! current [`tokio::time::Instant`] as an argument, so they can be tested
//! without a runtime. [`TransportSession`] owns the socket, and [`ChatClient`]
//! wires everything together on one event loop.

pub mod client;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod presence;
pub mod transport;
pub mod typing;

pub use client::{ChatClient, ClientState};
pub use directory::{ConversationDirectory, DirectThreadRequest};
pub use error::{ClientError, ClientResult};
pub use pipeline::{
    ApplyOutcome, DayGroup, Delivery, MessagePipeline, MutationKind, PendingMutation,
    PipelineEvent, TimelineEntry,
};
pub use presence::PresenceTracker;
pub use transport::{ConnectionState, DisconnectReason, SessionEvent, Subscription, TransportSession};
pub use typing::TypingCoordinator;
