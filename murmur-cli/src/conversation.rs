use murmur_shared::{ConversationRequest, ConversationTurn, Role, StreamEvent};
use tracing::debug;

/// Client-side history. The server keeps nothing, so every call resends it.
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    pinned: usize,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>) -> Self {
        let turns: Vec<_> = system_prompt
            .into_iter()
            .map(|prompt| ConversationTurn::text(Role::System, prompt))
            .collect();
        Self {
            pinned: turns.len(),
            turns,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::text(Role::User, text));
    }

    pub fn request(&self) -> ConversationRequest {
        ConversationRequest::new(self.turns.clone())
    }

    /// Drops everything except the system prompt.
    pub fn clear(&mut self) {
        self.turns.truncate(self.pinned);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn record_reply(&mut self, reply: Reply) {
        if reply.text.is_empty() {
            debug!("Reply produced no text, history unchanged");
            return;
        }
        self.turns.push(ConversationTurn::text(Role::Assistant, reply.text));
    }
}

/// Accumulates one streamed reply.
#[derive(Debug, Default)]
pub struct Reply {
    pub text: String,
    pub terminal: Option<StreamEvent>,
}

impl Reply {
    /// Returns the delta to print, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta { delta } => {
                self.text.push_str(&delta);
                Some(delta)
            }
            StreamEvent::Error { started: false, .. } => {
                self.text.clear();
                self.terminal = Some(event);
                None
            }
            terminal => {
                self.terminal = Some(terminal);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }
}
