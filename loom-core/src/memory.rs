//! Conversation memory for long-running sessions.
//!
//! Keeps a sliding window of recent turns plus a persistent summary of
//! everything older. The window caps what the engine retains; the
//! prompt builder's token budget separately caps what reaches the
//! model.

use muse::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};

/// Default number of recent turns kept in full detail.
const DEFAULT_WINDOW: usize = 40;

/// Sliding-window conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    recent: Vec<StoredTurn>,
    /// Summary of turns that have scrolled out of the window.
    pub summary: Option<String>,
    window: usize,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self {
            recent: Vec::new(),
            summary: None,
            window: DEFAULT_WINDOW,
        }
    }

    /// Create with a specific window size.
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            ..Self::new()
        }
    }

    /// Record a player turn.
    pub fn add_player(&mut self, content: impl Into<String>) {
        self.recent.push(StoredTurn {
            speaker: Speaker::Player,
            content: content.into(),
        });
        self.trim();
    }

    /// Record a narrator turn.
    pub fn add_narrator(&mut self, content: impl Into<String>) {
        self.recent.push(StoredTurn {
            speaker: Speaker::Narrator,
            content: content.into(),
        });
        self.trim();
    }

    /// Replace the rolled-up summary of older conversation.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// The retained turns, oldest first, as chat messages.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.recent
            .iter()
            .map(|turn| ChatMessage {
                role: match turn.speaker {
                    Speaker::Player => ChatRole::User,
                    Speaker::Narrator => ChatRole::Assistant,
                },
                content: turn.content.clone(),
            })
            .collect()
    }

    /// Number of retained turns.
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Clear retained turns but keep the summary.
    pub fn clear(&mut self) {
        self.recent.clear();
    }

    /// Recent player and narrator text joined for retrieval scanning.
    ///
    /// Keyword triggers fire against the last few turns, not just the
    /// latest input, so references a turn or two back still surface
    /// their entries.
    pub fn scan_window(&self, turns: usize) -> String {
        let start = self.recent.len().saturating_sub(turns);
        self.recent[start..]
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn trim(&mut self) {
        while self.recent.len() > self.window {
            let dropped = self.recent.remove(0);
            // Oldest turns fold into the summary line instead of vanishing
            let line = match dropped.speaker {
                Speaker::Player => format!("Player: {}", dropped.content),
                Speaker::Narrator => format!("Narrator: {}", dropped.content),
            };
            match &mut self.summary {
                Some(summary) => {
                    summary.push('\n');
                    summary.push_str(&line);
                }
                None => self.summary = Some(line),
            }
        }
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTurn {
    speaker: Speaker,
    content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum Speaker {
    Player,
    Narrator,
}
