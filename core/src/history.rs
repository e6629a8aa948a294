//! Bounded per-session conversation history.
//!
//! The first turn is always the system turn and is never evicted. When the
//! history is full, the oldest non-system turn makes room for the new one.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::HistoryError;

/// Smallest usable capacity: the system turn plus one exchange turn
pub const MIN_HISTORY_TURNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    /// Sequence number assigned on append; the system turn is 0
    pub turn_index: u64,
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
    next_index: u64,
}

impl ConversationHistory {
    /// `max_turns` counts the system turn and is raised to
    /// [`MIN_HISTORY_TURNS`] if smaller.
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            turns: vec![ConversationTurn {
                role: TurnRole::System,
                content: system_prompt.into(),
                turn_index: 0,
            }],
            max_turns: max_turns.max(MIN_HISTORY_TURNS),
            next_index: 1,
        }
    }

    pub fn append(
        &mut self,
        role: TurnRole,
        content: impl Into<String>,
    ) -> Result<&ConversationTurn, HistoryError> {
        if role == TurnRole::System {
            return Err(HistoryError::SystemTurnNotAllowed);
        }

        while self.turns.len() >= self.max_turns {
            // Index 1 is the oldest non-system turn.
            self.turns.remove(1);
        }

        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
            turn_index: self.next_index,
        });
        self.next_index += 1;

        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Truncates to the system turn
    pub fn reset(&mut self) {
        self.turns.truncate(1);
        self.next_index = 1;
    }

    /// Owned copy of the turns; changes to it never reach the history
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    /// Replaces the turns with previously persisted ones. The leading system
    /// turn is required; the newest turns are kept if the cap is exceeded.
    pub fn restore(&mut self, turns: Vec<ConversationTurn>) -> Result<(), HistoryError> {
        let mut iter = turns.into_iter();
        let system = match iter.next() {
            Some(turn) if turn.role == TurnRole::System => turn,
            _ => return Err(HistoryError::MissingSystemTurn),
        };

        let rest: Vec<ConversationTurn> = iter.collect();
        if rest.iter().any(|t| t.role == TurnRole::System) {
            return Err(HistoryError::SystemTurnNotAllowed);
        }

        let keep = self.max_turns - 1;
        let skip = rest.len().saturating_sub(keep);

        self.next_index = rest.last().map(|t| t.turn_index + 1).unwrap_or(1);
        self.turns = std::iter::once(system)
            .chain(rest.into_iter().skip(skip))
            .collect();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        // The system turn is always present.
        false
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn system_prompt(&self) -> &str {
        &self.turns[0].content
    }
}
