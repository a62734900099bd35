//! Repair of agent output text before it is parsed as JSON
//!
//! Workers write through shells and editors that mangle encodings: UTF-16
//! output from some consoles, byte order marks, and the classic mojibake
//! for dashes and ellipses. They also like to wrap JSON in markdown fences.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Decode raw bytes, honouring UTF-16 and UTF-8 byte order marks
pub fn decode_bytes(raw: &[u8]) -> String {
    if let Some(rest) = raw.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = raw.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn decode_utf16(raw: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn replacements() -> &'static [(Regex, &'static str)] {
    static REPLACEMENTS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    REPLACEMENTS.get_or_init(|| {
        [
            ("ÔÇô|ÔÇö|â€“|â€”", "-"),
            ("ÔÇª|â€¦", "..."),
            // An en-dash that swallowed a neighbouring quote
            ("ا\"اخaُ|ا\"اخa|ا\"اخ", "-"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Replace known mojibake sequences
pub fn repair_text(text: &str) -> String {
    let mut repaired = text.to_string();
    for (pattern, replacement) in replacements() {
        if pattern.is_match(&repaired) {
            repaired = pattern.replace_all(&repaired, *replacement).into_owned();
        }
    }
    repaired
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```").ok())
        .as_ref()
}

/// Find a JSON document in free-form text.
///
/// Tries, in order: the whole text, each fenced code block, and the widest
/// `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fence) = fenced_block() {
        for capture in fence.captures_iter(trimmed) {
            if let Some(body) = capture.get(1) {
                if let Ok(value) = serde_json::from_str(body.as_str().trim()) {
                    return Some(value);
                }
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Decode, repair and parse raw worker output
pub fn parse_output(raw: &[u8]) -> Result<Value, String> {
    let text = repair_text(&decode_bytes(raw));
    extract_json(&text).ok_or_else(|| {
        let preview: String = text.trim().chars().take(120).collect();
        format!("no JSON document found in worker output: {:?}", preview)
    })
}
