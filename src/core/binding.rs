//! Input bindings - how phases reference process inputs and prior outputs
//!
//! A binding template is any JSON value. Strings beginning with `$` are
//! references and are replaced by the value they point to:
//!
//! - `$inputs.topic` - a field of the process inputs
//! - `$phases.review.score` - a field of a completed phase's output
//! - `$item.name` - the current element of a fan-out phase
//!
//! `$$` escapes a literal leading dollar sign. Objects and arrays are
//! resolved recursively; every other value is copied as-is.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while resolving a binding template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("unknown reference root in '{0}' (expected $inputs, $phases or $item)")]
    UnknownRoot(String),

    #[error("phase '{phase}' has not produced an output (referenced by '{reference}')")]
    PhaseNotAvailable { phase: String, reference: String },

    #[error("'{reference}' does not resolve to a value")]
    MissingPath { reference: String },

    #[error("'{0}' is only valid inside a fan-out phase")]
    ItemOutsideFanOut(String),
}

impl BindingError {
    /// The textual reference that failed, used as the offending field
    pub fn reference(&self) -> &str {
        match self {
            BindingError::UnknownRoot(r) | BindingError::ItemOutsideFanOut(r) => r,
            BindingError::PhaseNotAvailable { reference, .. }
            | BindingError::MissingPath { reference } => reference,
        }
    }
}

/// A parsed `$` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Input { path: String },
    Phase { phase: String, path: String },
    Item { path: String },
}

impl Reference {
    /// Parse a reference string. Returns `Ok(None)` for plain literals.
    pub fn parse(raw: &str) -> Result<Option<Reference>, BindingError> {
        let Some(body) = raw.strip_prefix('$') else {
            return Ok(None);
        };
        if body.starts_with('$') {
            return Ok(None);
        }

        let (root, rest) = match body.split_once('.') {
            Some((root, rest)) => (root, rest),
            None => (body, ""),
        };

        match root {
            "inputs" => Ok(Some(Reference::Input {
                path: rest.to_string(),
            })),
            "item" => Ok(Some(Reference::Item {
                path: rest.to_string(),
            })),
            "phases" => {
                let (phase, path) = match rest.split_once('.') {
                    Some((phase, path)) => (phase, path),
                    None => (rest, ""),
                };
                if phase.is_empty() {
                    return Err(BindingError::UnknownRoot(raw.to_string()));
                }
                Ok(Some(Reference::Phase {
                    phase: phase.to_string(),
                    path: path.to_string(),
                }))
            }
            _ => Err(BindingError::UnknownRoot(raw.to_string())),
        }
    }
}

/// Values visible to a binding template
#[derive(Debug, Clone, Copy)]
pub struct BindingScope<'a> {
    pub inputs: &'a Value,
    pub phases: &'a BTreeMap<String, Value>,
    pub item: Option<&'a Value>,
}

/// Resolve a binding template against a scope
pub fn resolve(template: &Value, scope: &BindingScope<'_>) -> Result<Value, BindingError> {
    match template {
        Value::String(raw) => resolve_string(raw, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut resolved = serde_json::Map::with_capacity(fields.len());
            for (key, value) in fields {
                resolved.insert(key.clone(), resolve(value, scope)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(raw: &str, scope: &BindingScope<'_>) -> Result<Value, BindingError> {
    let reference = match Reference::parse(raw)? {
        Some(reference) => reference,
        None => {
            let literal = raw.strip_prefix("$$").map(|rest| format!("${}", rest));
            return Ok(Value::String(literal.unwrap_or_else(|| raw.to_string())));
        }
    };

    let missing = || BindingError::MissingPath {
        reference: raw.to_string(),
    };

    match reference {
        Reference::Input { path } => lookup(scope.inputs, &path).cloned().ok_or_else(missing),
        Reference::Item { path } => {
            let item = scope
                .item
                .ok_or_else(|| BindingError::ItemOutsideFanOut(raw.to_string()))?;
            lookup(item, &path).cloned().ok_or_else(missing)
        }
        Reference::Phase { phase, path } => {
            let output = scope
                .phases
                .get(&phase)
                .ok_or_else(|| BindingError::PhaseNotAvailable {
                    phase: phase.clone(),
                    reference: raw.to_string(),
                })?;
            lookup(output, &path).cloned().ok_or_else(missing)
        }
    }
}

/// Collect every reference in a template (used for load-time validation)
pub fn references(template: &Value) -> Result<Vec<Reference>, BindingError> {
    let mut found = Vec::new();
    collect(template, &mut found)?;
    Ok(found)
}

fn collect(template: &Value, found: &mut Vec<Reference>) -> Result<(), BindingError> {
    match template {
        Value::String(raw) => {
            if let Some(reference) = Reference::parse(raw)? {
                found.push(reference);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, found)?;
            }
        }
        Value::Object(fields) => {
            for value in fields.values() {
                collect(value, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Look up a dotted path (`a.b[0].c` or `a.b.0.c`) inside a value.
/// The empty path returns the value itself.
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path_segments(path) {
        current = match segment {
            Segment::Key(key) => match current {
                Value::Object(fields) => fields.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            },
            Segment::Index(i) => current.as_array()?.get(i)?,
        };
    }
    Some(current)
}

enum Segment<'p> {
    Key(&'p str),
    Index(usize),
}

fn path_segments(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut indices) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }
        while let Some(rest) = indices.strip_prefix('[') {
            let Some(end) = rest.find(']') else {
                // Unterminated index: treat the remainder as a key so the
                // lookup fails instead of silently matching
                segments.push(Segment::Key(indices));
                break;
            };
            match rest[..end].parse::<usize>() {
                Ok(i) => segments.push(Segment::Index(i)),
                Err(_) => segments.push(Segment::Key(&rest[..end])),
            }
            indices = &rest[end + 1..];
        }
    }
    segments
}
