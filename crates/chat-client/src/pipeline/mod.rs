//! Message pipeline - optimistic send, reconciliation and timeline projection
//!
//! One [`MessagePipeline`] per joined conversation. Server input is folded in
//! by a single reducer over [`PipelineEvent`]; deadlines are plain
//! [`tokio::time::Instant`]s polled by the client runtime.

mod entry;
mod events;
mod grouping;
mod timeline;

pub use entry::{Delivery, MutationKind, PendingMutation, TimelineEntry};
pub use events::{ApplyOutcome, PipelineEvent};
pub use grouping::DayGroup;
pub use timeline::MessagePipeline;
