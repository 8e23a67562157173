//! Transcript data model, the provider's message-page wire format, and
//! scrubbing of leaked tool-call payloads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Who spoke a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "MESSAGE_ROLE_AGENT", alias = "agent")]
    Agent,
    #[serde(rename = "MESSAGE_ROLE_USER", alias = "user")]
    User,
}

impl Role {
    /// Maps a wire role onto a speaker. Tool-call and tool-result roles have
    /// no speaker and yield `None`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "MESSAGE_ROLE_AGENT" | "agent" | "assistant" => Some(Role::Agent),
            "MESSAGE_ROLE_USER" | "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::User => write!(f, "user"),
        }
    }
}

/// The medium a message was exchanged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Medium {
    #[default]
    #[serde(rename = "MESSAGE_MEDIUM_VOICE", alias = "voice")]
    Voice,
    #[serde(rename = "MESSAGE_MEDIUM_TEXT", alias = "text")]
    Text,
}

impl Medium {
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("MESSAGE_MEDIUM_TEXT") | Some("text") => Medium::Text,
            _ => Medium::Voice,
        }
    }
}

/// One reconciled line of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub medium: Medium,
    /// Position within the call; strictly increasing.
    pub position: u64,
    pub is_final: bool,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>, position: u64) -> Self {
        Self {
            role,
            text: text.into(),
            medium: Medium::Voice,
            position,
            is_final: true,
        }
    }
}

/// A message as returned by `GET /calls/{callId}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub call_stage_message_index: Option<u64>,
    #[serde(default)]
    pub call_stage_id: Option<String>,
}

/// One page of the messages endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub results: Vec<Message>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex is valid"));

/// Removes machine-readable tool-call payloads the agent leaked into spoken
/// text, then collapses whitespace runs to single spaces.
///
/// Only balanced `{...}` or `[...]` segments that look like tool calls are
/// removed; anything else, including malformed or unbalanced brackets, is
/// left as it was.
pub fn scrub_tool_fragments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(['{', '[']) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match balanced_len(candidate) {
            Some(len) if is_tool_call_fragment(&candidate[..len]) => {
                out.push(' ');
                rest = &candidate[len..];
            }
            _ => {
                // Opening brackets are ASCII, so slicing one byte is safe.
                out.push_str(&candidate[..1]);
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);

    WHITESPACE_RUN.replace_all(&out, " ").trim().to_string()
}

/// Byte length of the bracketed segment at the start of `s`, or `None` when
/// it never closes.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn is_tool_call_fragment(segment: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(segment) {
        Ok(value) => looks_like_tool_call(&value),
        // Leaked payloads are not always valid JSON.
        Err(_) => segment.contains("\"function\"") && segment.contains("\"name\""),
    }
}

fn looks_like_tool_call(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            map.get("type").and_then(|t| t.as_str()) == Some("function")
                || map.contains_key("function")
                || map.contains_key("tool_calls")
                || map.contains_key("toolName")
                || (map.contains_key("name")
                    && (map.contains_key("arguments") || map.contains_key("parameters")))
        }
        serde_json::Value::Array(items) => {
            !items.is_empty() && items.iter().all(looks_like_tool_call)
        }
        _ => false,
    }
}
