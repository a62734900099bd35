//! Artifact references and the per-run manifest

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Reference to a file-like output produced by a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,

    pub format: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            language: None,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Ordered, path-deduplicated set of artifacts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactManifest {
    entries: Vec<Artifact>,
}

impl ArtifactManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append artifacts. A path seen before keeps its first position but
    /// takes the newer format/language/label.
    pub fn merge<I>(&mut self, artifacts: I)
    where
        I: IntoIterator<Item = Artifact>,
    {
        for artifact in artifacts {
            match self.entries.iter_mut().find(|a| a.path == artifact.path) {
                Some(existing) => *existing = artifact,
                None => self.entries.push(artifact),
            }
        }
    }

    /// Non-mutating form of [`merge`](Self::merge)
    pub fn merged<I>(existing: &ArtifactManifest, artifacts: I) -> ArtifactManifest
    where
        I: IntoIterator<Item = Artifact>,
    {
        let mut manifest = existing.clone();
        manifest.merge(artifacts);
        manifest
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|a| a.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|a| a.path.as_str()).collect()
    }

    pub fn to_vec(&self) -> Vec<Artifact> {
        self.entries.clone()
    }
}

impl FromIterator<Artifact> for ArtifactManifest {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        let mut manifest = ArtifactManifest::new();
        manifest.merge(iter);
        manifest
    }
}

/// Read the artifact list a phase reported in `field` of its output.
///
/// Entries without a `format` get one inferred from the file extension.
/// A missing field means the phase emitted no artifacts.
pub fn extract_artifacts(output: &Value, field: &str) -> Result<Vec<Artifact>, String> {
    let Some(raw) = output.get(field) else {
        return Ok(Vec::new());
    };
    let items = raw
        .as_array()
        .ok_or_else(|| format!("$.{}: expected an array of artifacts", field))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let path = item
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("$.{}[{}].path: expected a string", field, i))?;
            let format = match item.get("format") {
                Some(Value::String(format)) => format.clone(),
                Some(_) => return Err(format!("$.{}[{}].format: expected a string", field, i)),
                None => infer_format(path).to_string(),
            };
            let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
            Ok(Artifact {
                path: path.to_string(),
                format,
                language: text("language"),
                label: text("label"),
            })
        })
        .collect()
}

/// Guess an artifact format from its extension
pub fn infer_format(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("md") | Some("markdown") => "markdown",
        Some("json") => "json",
        Some("yaml") | Some("yml") => "yaml",
        Some("csv") => "csv",
        Some("txt") => "text",
        Some("html") | Some("htm") => "html",
        Some("pdf") => "pdf",
        Some("png") | Some("jpg") | Some("jpeg") | Some("svg") => "image",
        Some("rs") | Some("py") | Some("js") | Some("ts") => "code",
        _ => "file",
    }
}
