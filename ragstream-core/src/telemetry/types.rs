use serde::{Deserialize, Serialize};

/// One record per chat exchange, emitted when the exchange finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExchangeTrace {
    /// Assistant turn the exchange filled.
    pub turn_id: Option<String>,

    /// Full URL of the streaming endpoint, when the HTTP transport was used.
    pub endpoint: Option<String>,

    /// Normalized outcome: "completed", "failed", "cancelled".
    pub outcome: Option<String>,

    /// Wall time from request issue to the terminal transition.
    pub latency_ms: Option<u64>,

    pub bytes: u64,
    pub frames: u64,
    pub events_applied: u64,
    pub frames_ignored: u64,
    pub citation_frames_rejected: u64,

    /// Transport error text for failed exchanges.
    pub error_message: Option<String>,
}

impl ExchangeTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn turn_id(mut self, id: impl ToString) -> Self {
        self.turn_id = Some(id.to_string());
        self
    }
    pub fn endpoint_opt(mut self, endpoint: Option<&str>) -> Self {
        self.endpoint = endpoint.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn counts(mut self, bytes: u64, frames: u64, applied: u64, ignored: u64, rejected: u64) -> Self {
        self.bytes = bytes;
        self.frames = frames;
        self.events_applied = applied;
        self.frames_ignored = ignored;
        self.citation_frames_rejected = rejected;
        self
    }
    pub fn error_message_opt(mut self, msg: Option<&str>) -> Self {
        self.error_message = msg.map(|s| s.to_string());
        self
    }
}
