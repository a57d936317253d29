//! Result extraction from a ComfyUI outputs record.
//!
//! An outputs record maps graph-node ids to the artifacts each node saved:
//!
//! ```json
//! { "108": { "videos": [{ "filename": "clip_00001.mp4", "subfolder": "video", "type": "output" }] } }
//! ```
//!
//! [`extract_result`] picks the artifact that represents the job's result and
//! turns it into a [`ResultLocator`].

use serde::{Deserialize, Serialize};

/// Node id of the save node in the stock video workflow.
pub const DEFAULT_SAVE_NODE_ID: &str = "108";

/// Output fields holding video artifacts, in preference order.
const VIDEO_FIELDS: &[&str] = &["videos", "gifs"];

/// Output fields holding still images.
const IMAGE_FIELDS: &[&str] = &["images"];

/// Everything needed to download one artifact from the server's `/view`
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLocator {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub storage_type: String,
    pub server_url: String,
}

/// Kind of artifact that was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

/// Where the artifact was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultSource {
    /// The designated save node produced it.
    SaveNode,
    /// The save node had nothing usable; the artifact came from another node.
    Fallback { node_id: String },
}

/// Outcome of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedResult {
    pub locator: ResultLocator,
    /// Locator with the path components split apart, offered when the
    /// primary one fails to load.
    pub alternate: Option<ResultLocator>,
    /// Display name (file name without directories).
    pub name: String,
    pub media: MediaKind,
    pub source: ResultSource,
}

/// Locate the job result inside an outputs record.
///
/// Preference order: the designated save node's video field, then its image
/// field, then the first video-or-image field of any other node (node ids are
/// visited in sorted order so the choice is deterministic). Returns `None`
/// when no node carries a usable artifact.
pub fn extract_result(
    outputs: &serde_json::Value,
    save_node_id: &str,
    server_url: &str,
) -> Option<ExtractedResult> {
    let nodes = outputs.as_object()?;

    if let Some((artifact, media)) = nodes.get(save_node_id).and_then(find_artifact) {
        return Some(build(artifact, media, server_url, ResultSource::SaveNode));
    }

    let mut node_ids: Vec<&String> = nodes.keys().filter(|id| *id != save_node_id).collect();
    node_ids.sort_by(|a, b| compare_node_ids(a, b));

    node_ids.into_iter().find_map(|node_id| {
        find_artifact(&nodes[node_id.as_str()]).map(|(artifact, media)| {
            build(
                artifact,
                media,
                server_url,
                ResultSource::Fallback {
                    node_id: node_id.clone(),
                },
            )
        })
    })
}

/// Percentage for a `value` of `max` progress report, rounded and clamped
/// to `0..=100`. A non-positive `max` reports 0.
pub fn progress_percent(value: i64, max: i64) -> u8 {
    if max <= 0 {
        return 0;
    }
    let percent = (100.0 * value as f64 / max as f64).round();
    percent.clamp(0.0, 100.0) as u8
}

// ---- private helpers ----

#[derive(Debug)]
struct Artifact<'a> {
    filename: &'a str,
    subfolder: &'a str,
    storage_type: &'a str,
}

/// First usable artifact of a node: video fields win over image fields.
fn find_artifact(node: &serde_json::Value) -> Option<(Artifact<'_>, MediaKind)> {
    let video = VIDEO_FIELDS
        .iter()
        .find_map(|field| first_entry(node, field))
        .map(|a| (a, MediaKind::Video));

    video.or_else(|| {
        IMAGE_FIELDS
            .iter()
            .find_map(|field| first_entry(node, field))
            .map(|a| (a, MediaKind::Image))
    })
}

fn first_entry<'a>(node: &'a serde_json::Value, field: &str) -> Option<Artifact<'a>> {
    let entry = node.get(field)?.as_array()?.first()?;
    let filename = entry.get("filename")?.as_str().filter(|f| !f.is_empty())?;
    Some(Artifact {
        filename,
        subfolder: entry.get("subfolder").and_then(|v| v.as_str()).unwrap_or(""),
        storage_type: entry.get("type").and_then(|v| v.as_str()).unwrap_or("output"),
    })
}

fn build(artifact: Artifact<'_>, media: MediaKind, server_url: &str, source: ResultSource) -> ExtractedResult {
    let locator = ResultLocator {
        filename: artifact.filename.to_string(),
        subfolder: artifact.subfolder.to_string(),
        storage_type: artifact.storage_type.to_string(),
        server_url: server_url.to_string(),
    };

    let split = split_path(artifact.filename);
    let name = split
        .as_ref()
        .map_or(artifact.filename, |(_, base)| *base)
        .to_string();
    let alternate = match split {
        Some((dir, base)) if artifact.subfolder.is_empty() => Some(ResultLocator {
            filename: base.to_string(),
            subfolder: dir,
            ..locator.clone()
        }),
        _ => None,
    };

    ExtractedResult {
        locator,
        alternate,
        name,
        media,
        source,
    }
}

/// Split `dir/sub/name.mp4` (either separator) into `("dir/sub", "name.mp4")`.
fn split_path(filename: &str) -> Option<(String, &str)> {
    let idx = filename.rfind(['/', '\\'])?;
    let dir = filename[..idx].replace('\\', "/");
    Some((dir, &filename[idx + 1..]))
}

/// Numeric node ids sort numerically, anything else lexically after them.
fn compare_node_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
