//! # chat-gateway
//!
//! WebSocket gateway for realtime messaging, typing, and presence.
//!
//! Each client identifies with a JWT, joins conversations, and exchanges
//! events over one socket. Messages are sequenced per conversation; the
//! sender's connection gets `message_confirmed` and everyone else in the
//! audience gets the new message.

pub mod broadcast;
pub mod connection;
pub mod handlers;
pub mod presence;
pub mod server;
pub mod store;
pub mod typing;

pub use server::{
    create_app, create_gateway_state, create_router, local_url, run, serve, spawn_typing_sweeper,
    GatewayState, DEFAULT_CHANNEL,
};
