//! Frame classification.
//!
//! Two frame shapes are understood:
//! - `event: citations` followed by `data: [ ...citation objects... ]` -> [`ClassifiedEvent::CitationSet`]
//! - `data: {"token": ...}` -> [`ClassifiedEvent::TokenDelta`], `data: {"answer": ...}` -> [`ClassifiedEvent::TerminalAnswer`]
//!
//! Anything else is ignored (`Ok(None)`). A citations frame whose payload is not a JSON array is
//! the only hard error; a malformed token/answer frame is simply skipped.

use serde_json::Value;

use crate::error::{CoreResult, RagStreamError};
use crate::model::Citation;

pub const EVENT_CITATIONS: &str = "event: citations";
pub const DATA_PREFIX: &str = "data: ";

/// A frame that changes the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedEvent {
    /// Text to append to the open turn.
    TokenDelta(String),
    /// Replaces the open turn's citations.
    CitationSet(Vec<Citation>),
    /// Replaces the open turn's content (refusals, short-circuit answers).
    TerminalAnswer(String),
}

impl ClassifiedEvent {
    /// Short stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenDelta(_) => "token",
            Self::CitationSet(_) => "citations",
            Self::TerminalAnswer(_) => "answer",
        }
    }
}

/// Classify one decoded frame. Pure: the same frame always yields the same result.
pub fn classify(frame: &str) -> CoreResult<Option<ClassifiedEvent>> {
    let lines: Vec<&str> = frame.split('\n').collect();

    if let Some(pos) = lines
        .iter()
        .position(|l| l.trim().starts_with(EVENT_CITATIONS))
    {
        return match lines.get(pos + 1).and_then(|l| l.strip_prefix(DATA_PREFIX)) {
            Some(payload) => parse_citations(payload).map(|c| Some(ClassifiedEvent::CitationSet(c))),
            None => {
                tracing::debug!("citations event without a data line; ignoring frame");
                Ok(None)
            }
        };
    }

    let Some(payload) = lines.iter().find_map(|l| {
        let t = l.trim_start();
        t.starts_with(DATA_PREFIX).then(|| &t[DATA_PREFIX.len()..])
    }) else {
        return Ok(None);
    };

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparsable data frame");
            return Ok(None);
        }
    };

    // A string `token` wins even when empty: `{"token": "", "answer": "x"}` is an empty delta and
    // the answer is not applied. Truthiness-based clients would apply the answer instead.
    if let Some(token) = value.get("token").and_then(Value::as_str) {
        return Ok(Some(ClassifiedEvent::TokenDelta(token.to_owned())));
    }
    if let Some(answer) = value.get("answer").and_then(Value::as_str) {
        return Ok(Some(ClassifiedEvent::TerminalAnswer(answer.to_owned())));
    }
    tracing::debug!("data frame carries neither token nor answer; ignoring");
    Ok(None)
}

/// Parse a citations array. The array itself must be well formed; individual entries that fail
/// validation are dropped and the rest kept in order.
fn parse_citations(payload: &str) -> CoreResult<Vec<Citation>> {
    let entries: Vec<Value> = serde_json::from_str(payload.trim())
        .map_err(|e| RagStreamError::CitationPayload(e.to_string()))?;

    let total = entries.len();
    let citations: Vec<Citation> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Citation>(entry) {
            Ok(c) if c.is_valid() => Some(c),
            Ok(c) => {
                tracing::debug!(document = %c.document_name, page = c.page_number, "dropping invalid citation");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed citation");
                None
            }
        })
        .collect();
    if citations.len() < total {
        tracing::debug!(kept = citations.len(), total, "citation entries dropped");
    }
    Ok(citations)
}
