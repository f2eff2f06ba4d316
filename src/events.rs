//! Event Emitter (C11, §4.5): the wire-level event shape for a streaming
//! `ask`. Each variant serializes as a self-delimited JSON payload suitable
//! for an SSE `data:` line; `event` names the SSE event type.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "progress")]
    Progress {
        phase: u8,
        pct: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        expanded_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        unique_chunks: Option<usize>,
    },
    #[serde(rename = "token")]
    Token { text: String },
    #[serde(rename = "complete")]
    Complete {
        answer: String,
        context_count: usize,
        expanded_questions: Vec<String>,
        truncated: bool,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl Event {
    /// The SSE `event:` line name; `data:` carries the JSON body.
    pub fn sse_event_name(&self) -> &'static str {
        match self {
            Event::Progress { .. } => "progress",
            Event::Token { .. } => "markdown_token",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_sse_contract() {
        assert_eq!(Event::Progress { phase: 1, pct: 0, expanded_count: None, unique_chunks: None }.sse_event_name(), "progress");
        assert_eq!(Event::Token { text: "hi".into() }.sse_event_name(), "markdown_token");
        assert_eq!(
            Event::Complete { answer: String::new(), context_count: 0, expanded_questions: vec![], truncated: false }
                .sse_event_name(),
            "complete"
        );
        assert_eq!(Event::Error { code: "X".into(), message: "y".into() }.sse_event_name(), "error");
    }

    #[test]
    fn progress_serializes_without_optional_noise() {
        let event = Event::Progress { phase: 2, pct: 100, expanded_count: None, unique_chunks: Some(3) };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"unique_chunks\":3"));
        assert!(!json.contains("expanded_count"));
    }
}
