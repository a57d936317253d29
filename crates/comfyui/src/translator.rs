//! Translation of raw ComfyUI messages into [`PushEvent`]s.
//!
//! ComfyUI reports a finished prompt in pieces: `executed` messages carry
//! each node's output, then `execution_success` and/or an `executing`
//! message with a null node mark the end. [`PushTranslator`] stitches these
//! together so the engine sees one terminal event per execution.

use std::collections::HashMap;

use vidflow_core::remote::PushEvent;

use crate::messages::ComfyUIMessage;

/// Stateful per-connection translator.
#[derive(Debug, Default)]
pub struct PushTranslator {
    /// Prompt the server is currently executing, used when a message omits
    /// its prompt id.
    current: Option<String>,
    /// Node outputs seen so far, per prompt.
    outputs: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    /// Last prompt a terminal event was emitted for.
    last_finished: Option<String>,
}

impl PushTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one message; returns the event it produces, if any.
    pub fn translate(&mut self, message: ComfyUIMessage) -> Option<PushEvent> {
        match message {
            ComfyUIMessage::ExecutionStart(data) => self.start(data.prompt_id),
            ComfyUIMessage::Executing(data) => match (data.node, data.prompt_id) {
                (Some(_), Some(prompt_id)) if self.current.as_ref() != Some(&prompt_id) => {
                    self.start(prompt_id)
                }
                (Some(_), _) => None,
                (None, prompt_id) => {
                    let prompt_id = prompt_id.or_else(|| self.current.clone())?;
                    self.finish(prompt_id)
                }
            },
            ComfyUIMessage::Progress(data) => {
                let execution_id = data.prompt_id.or_else(|| self.current.clone())?;
                Some(PushEvent::Progress {
                    execution_id,
                    value: data.value,
                    max: data.max,
                })
            }
            ComfyUIMessage::Executed(data) => {
                self.outputs
                    .entry(data.prompt_id)
                    .or_default()
                    .insert(data.node, data.output);
                None
            }
            ComfyUIMessage::ExecutionSuccess(data) => self.finish(data.prompt_id),
            ComfyUIMessage::ExecutionError(data) => {
                let reason = match (data.exception_type.is_empty(), data.exception_message.is_empty()) {
                    (_, true) => "execution failed on server".to_string(),
                    (true, false) => data.exception_message,
                    (false, false) => format!("{}: {}", data.exception_type, data.exception_message),
                };
                self.fail(data.prompt_id, reason)
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                self.fail(data.prompt_id, "execution interrupted".to_string())
            }
            ComfyUIMessage::ExecutionCached(_) | ComfyUIMessage::Status(_) => None,
        }
    }

    // ---- private helpers ----

    fn start(&mut self, prompt_id: String) -> Option<PushEvent> {
        self.current = Some(prompt_id.clone());
        self.outputs.remove(&prompt_id);
        Some(PushEvent::Started {
            execution_id: prompt_id,
        })
    }

    /// Mark `prompt_id` ended. Returns `false` when it already was.
    fn end(&mut self, prompt_id: &str) -> bool {
        if self.current.as_deref() == Some(prompt_id) {
            self.current = None;
        }
        if self.last_finished.as_deref() == Some(prompt_id) {
            return false;
        }
        self.last_finished = Some(prompt_id.to_string());
        true
    }

    fn finish(&mut self, prompt_id: String) -> Option<PushEvent> {
        let outputs = self.outputs.remove(&prompt_id);
        if !self.end(&prompt_id) {
            return None;
        }
        match outputs {
            Some(nodes) if !nodes.is_empty() => Some(PushEvent::Succeeded {
                execution_id: prompt_id,
                outputs: serde_json::Value::Object(nodes),
            }),
            _ => Some(PushEvent::Finished {
                execution_id: prompt_id,
            }),
        }
    }

    fn fail(&mut self, prompt_id: String, reason: String) -> Option<PushEvent> {
        self.outputs.remove(&prompt_id);
        if !self.end(&prompt_id) {
            return None;
        }
        Some(PushEvent::Failed {
            execution_id: prompt_id,
            reason,
        })
    }
}
