use crate::session::{ChatTurn, TurnRole};
use chrono::Utc;

pub const GREETING: &str = "Hi there! How can I help you today?";
pub const THINKING: &str = "Thinking...";

/// In-memory chat history. Turn ids are never reused, so a late response
/// can only ever replace its own placeholder.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    next_id: u64,
}

impl Transcript {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn push(&mut self, role: TurnRole, text: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.turns.push(ChatTurn {
            id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
        id
    }

    /// Replaces the thinking placeholder `id` in place. Returns false when the
    /// placeholder is gone (transcript cleared while the call was in flight).
    pub fn resolve(&mut self, id: u64, role: TurnRole, text: impl Into<String>) -> bool {
        let Some(turn) = self
            .turns
            .iter_mut()
            .find(|turn| turn.id == id && turn.role == TurnRole::Thinking)
        else {
            return false;
        };
        turn.role = role;
        turn.text = text.into();
        turn.timestamp = Utc::now();
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn seed_greeting(&mut self) {
        self.clear();
        self.push(TurnRole::Assistant, GREETING);
    }

    /// Swaps the fixed greeting for a server-provided one, as long as the
    /// conversation has not moved on.
    pub fn replace_greeting(&mut self, text: impl Into<String>) -> bool {
        match self.turns.as_mut_slice() {
            [only] if only.role == TurnRole::Assistant && only.text == GREETING => {
                only.text = text.into();
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role == TurnRole::Thinking)
            .count()
    }
}
