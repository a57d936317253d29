//! Workflow compilation: turning a job's parameters into an execution
//! graph the server accepts.
//!
//! The engine only depends on [`WorkflowCompiler`]. [`TemplateCompiler`]
//! fills `{{placeholder}}` markers in a JSON graph template:
//!
//! | Placeholder           | Value                               |
//! |-----------------------|-------------------------------------|
//! | `{{image}}`           | name the upload was stored under    |
//! | `{{positive_prompt}}` | positive prompt                     |
//! | `{{negative_prompt}}` | negative prompt                     |
//! | `{{seed}}`            | seed resolved by the caller         |
//! | `{{width}}`           | frame width                         |
//! | `{{height}}`          | frame height                        |
//! | `{{fps}}`             | frame rate                          |
//! | `{{frames}}`          | `fps * duration + 1`                |
//!
//! A string that is exactly one numeric placeholder becomes a JSON number.

use std::path::Path;

use serde_json::Value;
use vidflow_core::job::ConfigSnapshot;

/// Graph shipped with the engine, used when no template file is configured.
const BUILTIN_TEMPLATE: &str = include_str!("workflows/wan_i2v.json");

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("cannot read workflow template {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("workflow template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("workflow template must be a JSON object keyed by node id")]
    NotAGraph,

    #[error("workflow template has no {0} placeholder")]
    MissingPlaceholder(&'static str),
}

/// Builds the execution graph for one job. Must be pure: the same inputs
/// always give the same graph.
pub trait WorkflowCompiler: Send + Sync {
    fn compile(&self, stored_image_name: &str, config: &ConfigSnapshot, seed: u64) -> Result<Value, CompileError>;
}

/// [`WorkflowCompiler`] backed by a JSON template with placeholders.
#[derive(Debug, Clone)]
pub struct TemplateCompiler {
    template: Value,
}

impl TemplateCompiler {
    pub fn builtin() -> Result<Self, CompileError> {
        Self::from_json(BUILTIN_TEMPLATE)
    }

    pub fn from_file(path: &Path) -> Result<Self, CompileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Template file when given, built-in graph otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, CompileError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CompileError> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    /// Validate and wrap a template. The graph must be an object and must
    /// reference the uploaded image somewhere.
    pub fn from_value(template: Value) -> Result<Self, CompileError> {
        if !template.is_object() {
            return Err(CompileError::NotAGraph);
        }
        if !contains_marker(&template, "{{image}}") {
            return Err(CompileError::MissingPlaceholder("{{image}}"));
        }
        Ok(Self { template })
    }
}

impl WorkflowCompiler for TemplateCompiler {
    fn compile(&self, stored_image_name: &str, config: &ConfigSnapshot, seed: u64) -> Result<Value, CompileError> {
        let bindings = [
            ("{{image}}", Binding::Text(stored_image_name.to_string())),
            ("{{positive_prompt}}", Binding::Text(config.positive_prompt.clone())),
            ("{{negative_prompt}}", Binding::Text(config.negative_prompt.clone())),
            ("{{seed}}", Binding::Number(seed)),
            ("{{width}}", Binding::Number(config.resolution.width.into())),
            ("{{height}}", Binding::Number(config.resolution.height.into())),
            ("{{fps}}", Binding::Number(config.fps.into())),
            ("{{frames}}", Binding::Number(config.frame_count().into())),
        ];

        let mut graph = self.template.clone();
        substitute(&mut graph, &bindings);
        Ok(graph)
    }
}

// ---- private helpers ----

enum Binding {
    Text(String),
    Number(u64),
}

impl Binding {
    fn as_text(&self) -> String {
        match self {
            Binding::Text(text) => text.clone(),
            Binding::Number(n) => n.to_string(),
        }
    }
}

fn substitute(value: &mut Value, bindings: &[(&str, Binding)]) {
    match value {
        Value::String(text) => {
            if let Some((_, binding)) = bindings.iter().find(|(marker, _)| text.as_str() == *marker) {
                *value = match binding {
                    Binding::Text(t) => Value::String(t.clone()),
                    Binding::Number(n) => Value::from(*n),
                };
                return;
            }
            if text.contains("{{") {
                let mut out = text.clone();
                for (marker, binding) in bindings {
                    if out.contains(*marker) {
                        out = out.replace(*marker, &binding.as_text());
                    }
                }
                *text = out;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, bindings)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, bindings)),
        _ => {}
    }
}

fn contains_marker(value: &Value, marker: &str) -> bool {
    match value {
        Value::String(text) => text.contains(marker),
        Value::Array(items) => items.iter().any(|v| contains_marker(v, marker)),
        Value::Object(map) => map.values().any(|v| contains_marker(v, marker)),
        _ => false,
    }
}
