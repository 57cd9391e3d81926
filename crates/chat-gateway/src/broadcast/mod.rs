//! Event ordering
//!
//! Serializes sequence assignment and fan-out per conversation.

mod sequencer;

pub use sequencer::Sequencer;
