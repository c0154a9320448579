//! Conversation transcript log
//!
//! Append-only, insertion-ordered record of what was said. Streaming
//! transcription often re-delivers the same text for a turn; consecutive
//! identical entries are suppressed per role so the display log stays
//! clean.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person speaking into the microphone
    User,
    /// The remote speech model
    Model,
}

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    /// Speaker
    pub role: Role,
    /// Transcribed text
    pub text: String,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
}

/// Insertion-ordered transcript with per-role duplicate suppression.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    last_user: Option<String>,
    last_model: Option<String>,
}

impl TranscriptLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry unless it repeats the role's previous text.
    ///
    /// Returns the appended entry, or `None` when suppressed. Empty and
    /// whitespace-only text is always suppressed.
    pub fn push(&mut self, role: Role, text: &str) -> Option<&TranscriptEntry> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let last = match role {
            Role::User => &mut self.last_user,
            Role::Model => &mut self.last_model,
        };
        if last.as_deref() == Some(trimmed) {
            tracing::trace!(?role, "duplicate transcript suppressed");
            return None;
        }
        *last = Some(trimmed.to_string());

        self.entries.push(TranscriptEntry {
            role,
            text: trimmed.to_string(),
            timestamp: Utc::now(),
        });
        self.entries.last()
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let mut log = TranscriptLog::new();
        log.push(Role::User, "what is the mandi price of wheat");
        log.push(Role::Model, "today wheat is trading at 2,150 rupees");
        log.push(Role::User, "and for mustard");

        let texts: Vec<&str> = log.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "what is the mandi price of wheat",
                "today wheat is trading at 2,150 rupees",
                "and for mustard"
            ]
        );
    }

    #[test]
    fn consecutive_duplicates_are_suppressed_per_role() {
        let mut log = TranscriptLog::new();
        assert!(log.push(Role::User, "hello").is_some());
        assert!(log.push(Role::User, "hello").is_none());

        // Same text from the other role is not a duplicate
        assert!(log.push(Role::Model, "hello").is_some());

        // Interleaving does not clear the per-role memory
        assert!(log.push(Role::User, "hello").is_none());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn new_text_resets_duplicate_tracking() {
        let mut log = TranscriptLog::new();
        log.push(Role::User, "first");
        log.push(Role::User, "second");
        assert!(log.push(Role::User, "first").is_some());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn blank_text_is_ignored() {
        let mut log = TranscriptLog::new();
        assert!(log.push(Role::User, "").is_none());
        assert!(log.push(Role::User, "   ").is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn text_is_trimmed_before_comparison() {
        let mut log = TranscriptLog::new();
        log.push(Role::Model, "namaste");
        assert!(log.push(Role::Model, "  namaste  ").is_none());
    }
}
