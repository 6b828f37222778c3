//! Drives one chat exchange end to end: request, read loop, framing, classification and
//! conversation updates.
//!
//! Contract:
//! - One task per exchange. The conversation is borrowed mutably for the whole exchange, and the
//!   only suspension points are issuing the request and awaiting the next body chunk.
//! - Events are applied in the order their frames were decoded.
//! - Transport failures never escape: they end the assistant turn (see [`Conversation::fail`]).
//! - Cancelling through the token, or dropping the exchange future, stops reading, drops the
//!   decode buffer and closes the turn with whatever content it already has.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, field};

use crate::classifier::{ClassifiedEvent, classify};
use crate::config::{Config, DEFAULT_ERROR_PLACEHOLDER};
use crate::conversation::{Conversation, Turn, TurnHandle, TurnId};
use crate::error::{CoreResult, RagStreamError};
use crate::frame::FrameDecoder;
use crate::http_client::RequestCtx;
use crate::telemetry::{self, ExchangeTrace};
use crate::transport::{ChatTransport, HttpChatTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Blank input; nothing was appended or sent.
    Skipped,
    /// Stream ended normally.
    Completed,
    /// Transport failed; the turn is `Errored` or closed with partial content.
    Failed,
    /// Stopped through the cancellation token; partial content kept.
    Cancelled,
}

impl ExchangeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Counters for one exchange.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeStats {
    pub bytes: u64,
    pub frames: u64,
    pub events_applied: u64,
    pub frames_ignored: u64,
    pub citation_frames_rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Assistant turn of the exchange; `None` when skipped.
    pub turn: Option<TurnId>,
    pub outcome: ExchangeOutcome,
    pub stats: ExchangeStats,
    pub error: Option<String>,
}

enum Finish {
    Eof,
    Cancelled,
}

/// Called after each event is applied, with the turn as it now stands.
pub type TurnObserver<'a> = dyn FnMut(&Turn, &ClassifiedEvent) + Send + 'a;

/// Owns the conversation borrow for one exchange. If the exchange future is dropped before it
/// settles the turn, the turn is closed with whatever content it already has.
struct OpenTurn<'c> {
    conversation: &'c mut Conversation,
    handle: TurnHandle,
    settled: bool,
}

impl Drop for OpenTurn<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.conversation.close(self.handle) {
            Ok(()) => tracing::debug!(turn = %self.handle.id(), "exchange dropped; turn closed"),
            Err(e) => tracing::error!(error = %e, "could not close dropped turn"),
        }
    }
}

pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    error_placeholder: String,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            error_placeholder: DEFAULT_ERROR_PLACEHOLDER.to_string(),
        }
    }

    /// HTTP transport and placeholder taken from `cfg`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let transport = Arc::new(HttpChatTransport::from_config(cfg)?);
        Ok(Self::new(transport).with_error_placeholder(cfg.conversation.error_placeholder.clone()))
    }

    pub fn with_error_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.error_placeholder = placeholder.into();
        self
    }

    /// Send `user_text` and stream the reply into `conversation`.
    ///
    /// Dropping the returned future stops reading and closes the assistant turn with its partial
    /// content.
    pub async fn send(&self, conversation: &mut Conversation, user_text: &str) -> ExchangeReport {
        self.run(conversation, user_text, CancellationToken::new(), None)
            .await
    }

    /// Like [`Orchestrator::send`], stopping early once `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
        cancel: CancellationToken,
    ) -> ExchangeReport {
        self.run(conversation, user_text, cancel, None).await
    }

    /// Like [`Orchestrator::send_with_cancel`], reporting every applied event to `observer` while
    /// the stream is still being read.
    pub async fn send_observed(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
        cancel: CancellationToken,
        observer: &mut TurnObserver<'_>,
    ) -> ExchangeReport {
        self.run(conversation, user_text, cancel, Some(observer))
            .await
    }

    async fn run(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
        cancel: CancellationToken,
        observer: Option<&mut TurnObserver<'_>>,
    ) -> ExchangeReport {
        let Some(handle) = conversation.begin_exchange(user_text) else {
            tracing::debug!("blank message; nothing sent");
            return ExchangeReport {
                turn: None,
                outcome: ExchangeOutcome::Skipped,
                stats: ExchangeStats::default(),
                error: None,
            };
        };
        let mut open = OpenTurn {
            conversation,
            handle,
            settled: false,
        };

        let turn_id = handle.id().to_string();
        let span = tracing::info_span!(
            "exchange",
            turn.id = %turn_id,
            backend.endpoint = self.transport.endpoint().unwrap_or("-"),
            stream.bytes = field::Empty,
            stream.frames = field::Empty,
            stream.events = field::Empty,
            stream.ignored = field::Empty,
            exchange.outcome = field::Empty,
            latency.ms = field::Empty,
            error.message = field::Empty,
        );

        let started = Instant::now();
        let mut stats = ExchangeStats::default();
        let ctx = RequestCtx {
            turn_id: Some(&turn_id),
        };
        let result = self
            .stream_into(
                open.conversation,
                handle,
                user_text.trim(),
                &ctx,
                &cancel,
                &mut stats,
                observer,
            )
            .instrument(span.clone())
            .await;

        let (outcome, error) = match result {
            Ok(finish) => {
                if let Err(e) = open.conversation.close(handle) {
                    tracing::error!(parent: &span, error = %e, "could not close turn");
                }
                match finish {
                    Finish::Eof => (ExchangeOutcome::Completed, None),
                    Finish::Cancelled => (ExchangeOutcome::Cancelled, None),
                }
            }
            Err(e) => {
                if e.is_transport() {
                    tracing::warn!(parent: &span, error = %e, "exchange failed");
                } else {
                    tracing::error!(parent: &span, error = %e, "exchange aborted");
                }
                if let Err(e) = open.conversation.fail(handle, &self.error_placeholder) {
                    tracing::error!(parent: &span, error = %e, "could not fail turn");
                }
                (ExchangeOutcome::Failed, Some(e.to_string()))
            }
        };
        open.settled = true;

        let latency_ms = started.elapsed().as_millis() as u64;
        span.record(telemetry::KEY_STREAM_BYTES, stats.bytes);
        span.record(telemetry::KEY_STREAM_FRAMES, stats.frames);
        span.record(telemetry::KEY_STREAM_EVENTS, stats.events_applied);
        span.record(telemetry::KEY_STREAM_IGNORED, stats.frames_ignored);
        span.record(telemetry::KEY_OUTCOME, outcome.as_str());
        span.record(telemetry::KEY_LATENCY_MS, latency_ms);
        if let Some(msg) = &error {
            span.record(telemetry::KEY_ERROR_MESSAGE, msg.as_str());
        }
        tracing::info!(
            parent: &span,
            outcome = outcome.as_str(),
            frames = stats.frames,
            applied = stats.events_applied,
            "exchange finished"
        );

        telemetry::emit(
            ExchangeTrace::new()
                .turn_id(&turn_id)
                .endpoint_opt(self.transport.endpoint())
                .outcome(outcome.as_str())
                .latency_ms(latency_ms)
                .counts(
                    stats.bytes,
                    stats.frames,
                    stats.events_applied,
                    stats.frames_ignored,
                    stats.citation_frames_rejected,
                )
                .error_message_opt(error.as_deref()),
        );

        ExchangeReport {
            turn: Some(handle.id()),
            outcome,
            stats,
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_into(
        &self,
        conversation: &mut Conversation,
        handle: TurnHandle,
        message: &str,
        ctx: &RequestCtx<'_>,
        cancel: &CancellationToken,
        stats: &mut ExchangeStats,
        mut observer: Option<&mut TurnObserver<'_>>,
    ) -> CoreResult<Finish> {
        let mut body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Finish::Cancelled),
            opened = self.transport.open_stream(message, ctx) => opened?,
        };

        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(buffered = decoder.residual_len(), "cancelled mid-stream");
                    return Ok(Finish::Cancelled);
                }
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    stats.bytes += chunk.len() as u64;
                    for frame in decoder.feed(&chunk) {
                        stats.frames += 1;
                        apply_frame(conversation, handle, &frame, stats, observer.as_deref_mut())?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    decoder.flush();
                    return Ok(Finish::Eof);
                }
            }
        }
    }
}

/// Classify one frame and fold it into the turn. A rejected citations frame is skipped; the
/// stream goes on.
fn apply_frame(
    conversation: &mut Conversation,
    handle: TurnHandle,
    frame: &str,
    stats: &mut ExchangeStats,
    observer: Option<&mut TurnObserver<'_>>,
) -> CoreResult<()> {
    match classify(frame) {
        Ok(Some(event)) => {
            tracing::trace!(kind = event.kind(), "applying event");
            match observer {
                Some(observe) => {
                    let seen = event.clone();
                    conversation.apply_event(handle, event)?;
                    if let Some(turn) = conversation.turn(handle) {
                        observe(turn, &seen);
                    }
                }
                None => conversation.apply_event(handle, event)?,
            }
            stats.events_applied += 1;
        }
        Ok(None) => stats.frames_ignored += 1,
        Err(e @ RagStreamError::CitationPayload(_)) => {
            tracing::warn!(error = %e, "skipping citations frame");
            stats.citation_frames_rejected += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
