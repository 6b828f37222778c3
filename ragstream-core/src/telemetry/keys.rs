//! Span/Log attribute keys for chat exchanges, recorded when an exchange finishes.
//! Keep these stable; changing them is a breaking change for dashboards.

pub const KEY_STREAM_BYTES: &str = "stream.bytes";
pub const KEY_STREAM_FRAMES: &str = "stream.frames";
pub const KEY_STREAM_EVENTS: &str = "stream.events";
pub const KEY_STREAM_IGNORED: &str = "stream.ignored";

pub const KEY_OUTCOME: &str = "exchange.outcome";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_MESSAGE: &str = "error.message";
