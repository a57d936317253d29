//! ComfyUI WebSocket and REST client library.
//!
//! Provides the HTTP API wrapper used as the engine's
//! [`RemoteEndpoint`](vidflow_core::remote::RemoteEndpoint), typed WebSocket
//! message parsing, translation of raw frames into normalized push events,
//! and a connection manager that keeps one reconnecting WebSocket per
//! server.

pub mod api;
pub mod client;
pub mod events;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod translator;
