//! Conversation state: the ordered turns of one chat session.
//!
//! Turns are append-only. Each exchange appends a closed user turn and an open assistant turn; the
//! assistant turn is then addressed through the [`TurnHandle`] returned by
//! [`Conversation::begin_exchange`] until it is closed or fails.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::classifier::ClassifiedEvent;
use crate::config::ConversationCfg;
use crate::error::{CoreResult, RagStreamError};
use crate::model::{Citation, Role, TurnStatus};

static NEXT_TURN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique turn identifier, increasing in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Reference to an assistant turn. Only valid for the conversation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnHandle {
    id: TurnId,
    index: usize,
}

impl TurnHandle {
    pub fn id(&self) -> TurnId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    pub citations: Vec<Citation>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn is_open(&self) -> bool {
        self.status == TurnStatus::Open
    }
}

#[derive(Debug, Default, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    /// Most recently opened assistant turn that is still open.
    current: Option<TurnHandle>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation that opens with a closed assistant greeting.
    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(Role::Assistant, greeting.into(), TurnStatus::Closed);
        conv
    }

    /// New conversation, opening with the configured greeting if there is one.
    pub fn from_config(cfg: &ConversationCfg) -> Self {
        match &cfg.greeting {
            Some(greeting) => Self::with_greeting(greeting.clone()),
            None => Self::new(),
        }
    }

    /// Start an exchange: append the trimmed user text as a closed turn and an empty open
    /// assistant turn. Returns `None` (and appends nothing) when the text is blank.
    pub fn begin_exchange(&mut self, user_text: &str) -> Option<TurnHandle> {
        let text = user_text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(prev) = self.current {
            tracing::warn!(open = %prev.id, "exchange started while another turn is still open");
        }
        self.push(Role::User, text.to_owned(), TurnStatus::Closed);
        let handle = self.push(Role::Assistant, String::new(), TurnStatus::Open);
        self.current = Some(handle);
        Some(handle)
    }

    /// Fold one classified event into the open turn behind `handle`.
    pub fn apply_event(&mut self, handle: TurnHandle, event: ClassifiedEvent) -> CoreResult<()> {
        let turn = self.open_turn_mut(handle)?;
        match event {
            ClassifiedEvent::TokenDelta(delta) => turn.content.push_str(&delta),
            ClassifiedEvent::CitationSet(citations) => turn.citations = citations,
            ClassifiedEvent::TerminalAnswer(answer) => turn.content = answer,
        }
        Ok(())
    }

    /// Normal end of stream.
    pub fn close(&mut self, handle: TurnHandle) -> CoreResult<()> {
        self.open_turn_mut(handle)?.status = TurnStatus::Closed;
        self.release(handle);
        Ok(())
    }

    /// Transport failure. A turn that received nothing shows `placeholder` and is marked
    /// `Errored`; a turn with partial content keeps it and is closed.
    pub fn fail(&mut self, handle: TurnHandle, placeholder: &str) -> CoreResult<TurnStatus> {
        let turn = self.open_turn_mut(handle)?;
        turn.status = if turn.content.is_empty() {
            turn.content = placeholder.to_owned();
            TurnStatus::Errored
        } else {
            TurnStatus::Closed
        };
        let status = turn.status;
        self.release(handle);
        Ok(status)
    }

    /// Read-only, chronologically ordered view for rendering.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, handle: TurnHandle) -> Option<&Turn> {
        self.turns.get(handle.index).filter(|t| t.id == handle.id)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True while any assistant turn is still receiving its response.
    pub fn is_exchange_open(&self) -> bool {
        self.turns.iter().any(Turn::is_open)
    }

    pub fn open_handle(&self) -> Option<TurnHandle> {
        self.current
    }

    fn push(&mut self, role: Role, content: String, status: TurnStatus) -> TurnHandle {
        let id = TurnId(NEXT_TURN_ID.fetch_add(1, Ordering::Relaxed));
        let index = self.turns.len();
        self.turns.push(Turn {
            id,
            role,
            content,
            citations: Vec::new(),
            status,
        });
        TurnHandle { id, index }
    }

    fn open_turn_mut(&mut self, handle: TurnHandle) -> CoreResult<&mut Turn> {
        let turn = self
            .turns
            .get_mut(handle.index)
            .filter(|t| t.id == handle.id)
            .ok_or_else(|| {
                RagStreamError::Contract(format!("{} does not belong to this conversation", handle.id))
            })?;
        if !turn.is_open() {
            return Err(RagStreamError::Contract(format!(
                "{} is {:?}, not open",
                handle.id, turn.status
            )));
        }
        Ok(turn)
    }

    fn release(&mut self, handle: TurnHandle) {
        if self.current == Some(handle) {
            self.current = self
                .turns
                .iter()
                .enumerate()
                .rev()
                .find(|(_, t)| t.is_open())
                .map(|(index, t)| TurnHandle { id: t.id, index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLACEHOLDER: &str = "Connection error. Please check backend.";

    fn token(s: &str) -> ClassifiedEvent {
        ClassifiedEvent::TokenDelta(s.into())
    }

    fn cit(name: &str, page: u32) -> Citation {
        Citation {
            document_name: name.into(),
            page_number: page,
            text_snippet: String::new(),
            score: 0.5,
        }
    }

    #[test]
    fn begin_exchange_appends_user_and_open_assistant() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("  what is torque?  ").unwrap();
        assert_eq!(conv.len(), 2);
        let user = &conv.turns()[0];
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "what is torque?");
        assert_eq!(user.status, TurnStatus::Closed);
        let asst = conv.turn(h).unwrap();
        assert_eq!(asst.role, Role::Assistant);
        assert!(asst.is_open());
        assert!(asst.content.is_empty() && asst.citations.is_empty());
        assert!(conv.is_exchange_open());
        assert_eq!(conv.open_handle(), Some(h));
    }

    #[test]
    fn blank_input_is_noop() {
        let mut conv = Conversation::new();
        assert!(conv.begin_exchange("   ").is_none());
        assert!(conv.begin_exchange("").is_none());
        assert!(conv.begin_exchange("\n\t").is_none());
        assert!(conv.is_empty());
    }

    #[test]
    fn token_deltas_append_in_order() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        for t in ["Hel", "lo", " world"] {
            conv.apply_event(h, token(t)).unwrap();
        }
        assert_eq!(conv.turn(h).unwrap().content, "Hello world");
    }

    #[test]
    fn citations_replace_not_merge() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        conv.apply_event(h, token("text")).unwrap();
        conv.apply_event(h, ClassifiedEvent::CitationSet(vec![cit("a.pdf", 1), cit("b.pdf", 2)]))
            .unwrap();
        assert_eq!(conv.turn(h).unwrap().content, "text");
        assert_eq!(conv.turn(h).unwrap().citations.len(), 2);

        conv.apply_event(h, ClassifiedEvent::CitationSet(vec![cit("c.pdf", 3)]))
            .unwrap();
        assert_eq!(conv.turn(h).unwrap().citations, vec![cit("c.pdf", 3)]);
        assert_eq!(conv.turn(h).unwrap().content, "text");
    }

    #[test]
    fn terminal_answer_overrides_content() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        conv.apply_event(h, token("A")).unwrap();
        conv.apply_event(h, token("B")).unwrap();
        conv.apply_event(h, ClassifiedEvent::TerminalAnswer("Final.".into()))
            .unwrap();
        assert_eq!(conv.turn(h).unwrap().content, "Final.");

        conv.apply_event(h, ClassifiedEvent::TerminalAnswer("Later.".into()))
            .unwrap();
        assert_eq!(conv.turn(h).unwrap().content, "Later.");
    }

    #[test]
    fn close_is_terminal() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        conv.close(h).unwrap();
        assert_eq!(conv.turn(h).unwrap().status, TurnStatus::Closed);
        assert!(!conv.is_exchange_open());
        assert_eq!(conv.open_handle(), None);

        assert!(matches!(conv.apply_event(h, token("x")), Err(RagStreamError::Contract(_))));
        assert!(matches!(conv.close(h), Err(RagStreamError::Contract(_))));
        assert!(matches!(conv.fail(h, PLACEHOLDER), Err(RagStreamError::Contract(_))));
        assert_eq!(conv.turn(h).unwrap().content, "");
    }

    #[test]
    fn fail_before_content_writes_placeholder() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        assert_eq!(conv.fail(h, PLACEHOLDER).unwrap(), TurnStatus::Errored);
        let t = conv.turn(h).unwrap();
        assert_eq!(t.content, PLACEHOLDER);
        assert_eq!(t.status, TurnStatus::Errored);
        assert!(!conv.is_exchange_open());
    }

    #[test]
    fn fail_after_content_keeps_partial() {
        let mut conv = Conversation::new();
        let h = conv.begin_exchange("hi").unwrap();
        conv.apply_event(h, token("partial")).unwrap();
        assert_eq!(conv.fail(h, PLACEHOLDER).unwrap(), TurnStatus::Closed);
        assert_eq!(conv.turn(h).unwrap().content, "partial");
    }

    #[test]
    fn handle_from_other_conversation_is_rejected() {
        let mut a = Conversation::new();
        let mut b = Conversation::new();
        a.begin_exchange("y").unwrap();
        let hb = b.begin_exchange("x").unwrap();
        // Index 1 exists in `a` but holds a different turn.
        assert!(matches!(a.apply_event(hb, token("z")), Err(RagStreamError::Contract(_))));
    }

    #[test]
    fn greeting_is_closed_assistant_turn() {
        let conv = Conversation::with_greeting("ready");
        assert_eq!(conv.len(), 1);
        let t = conv.last().unwrap();
        assert_eq!(t.role, Role::Assistant);
        assert_eq!(t.status, TurnStatus::Closed);
        assert!(!conv.is_exchange_open());
    }

    #[test]
    fn from_config_uses_greeting() {
        let mut cfg = ConversationCfg::default();
        assert!(Conversation::from_config(&cfg).is_empty());
        cfg.greeting = Some("Secure Offline RAG Agent ready.".into());
        let conv = Conversation::from_config(&cfg);
        assert_eq!(conv.last().unwrap().content, "Secure Offline RAG Agent ready.");
    }

    #[test]
    fn overlapping_exchanges_stay_independent() {
        let mut conv = Conversation::new();
        let first = conv.begin_exchange("one").unwrap();
        let second = conv.begin_exchange("two").unwrap();
        assert_eq!(conv.len(), 4);
        assert_eq!(conv.open_handle(), Some(second));

        conv.apply_event(first, token("first")).unwrap();
        conv.apply_event(second, token("second")).unwrap();
        conv.close(second).unwrap();
        assert_eq!(conv.open_handle(), Some(first));
        assert!(conv.is_exchange_open());
        conv.close(first).unwrap();

        assert_eq!(conv.turn(first).unwrap().content, "first");
        assert_eq!(conv.turn(second).unwrap().content, "second");
        let ids: Vec<_> = conv.turns().iter().map(|t| t.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
