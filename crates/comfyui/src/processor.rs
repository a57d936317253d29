//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them into
//! typed [`ComfyUIMessage`](crate::messages::ComfyUIMessage) variants, runs
//! them through a [`PushTranslator`] and emits the resulting
//! [`ComfyUIEvent`]s to the broadcast channel.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::events::ComfyUIEvent;
use crate::messages::parse_message;
use crate::translator::PushTranslator;

/// Process WebSocket messages from a ComfyUI connection.
///
/// Loops until the WebSocket closes, encounters a receive error, or the
/// stream is exhausted. Binary frames (preview images) are ignored.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    server_url: &str,
    event_tx: &broadcast::Sender<ComfyUIEvent>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut translator = PushTranslator::new();

    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                handle_text_message(&text, server_url, &mut translator, event_tx);
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(server_url, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(server_url, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(server_url, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Parse and translate a single text frame.
fn handle_text_message(
    text: &str,
    server_url: &str,
    translator: &mut PushTranslator,
    event_tx: &broadcast::Sender<ComfyUIEvent>,
) {
    let message = match parse_message(text) {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(
                server_url,
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
            return;
        }
    };

    if let Some(event) = translator.translate(message) {
        tracing::debug!(server_url, ?event, "ComfyUI push event");
        // No receivers simply means nobody is listening yet.
        let _ = event_tx.send(ComfyUIEvent::Push {
            server_url: server_url.to_string(),
            event,
        });
    }
}
