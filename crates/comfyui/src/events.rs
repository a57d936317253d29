//! Events emitted by the ComfyUI connection manager.

use vidflow_core::remote::PushEvent;

/// A connection-level or execution-level event from one ComfyUI server.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIEvent {
    /// The WebSocket connection to a server was established.
    InstanceConnected { server_url: String },

    /// The WebSocket connection to a server was lost.
    InstanceDisconnected { server_url: String },

    /// A normalized execution event pushed by a server.
    Push { server_url: String, event: PushEvent },
}
