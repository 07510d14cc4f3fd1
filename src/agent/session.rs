//! `Session` + `CompactionEngine` — history, token accounting, compaction
//! (spec §4.9).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::CompactionStrategy;
use crate::model::{ConversationEntry, ThinkingLevel};

/// Identity `(workspace, channel, chat)` a [`Session`] belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub workspace: String,
    pub channel: String,
    pub chat: String,
}

impl SessionId {
    pub fn new(workspace: impl Into<String>, channel: impl Into<String>, chat: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            channel: channel.into(),
            chat: chat.into(),
        }
    }

    pub fn as_filename(&self) -> String {
        format!("{}__{}__{}.jsonl", self.workspace, self.channel, self.chat)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.workspace, self.channel, self.chat)
    }
}

/// Per-session mutable state. History is append-only except via compaction;
/// token counters are monotone.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    history: Mutex<Vec<ConversationEntry>>,
    pub thinking_level: Mutex<ThinkingLevel>,
    pub facts: Mutex<Vec<String>>,
    pub active_skills: Mutex<Vec<String>>,
    journal_path: Option<PathBuf>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            history: Mutex::new(Vec::new()),
            thinking_level: Mutex::new(ThinkingLevel::default()),
            facts: Mutex::new(Vec::new()),
            active_skills: Mutex::new(Vec::new()),
            journal_path: None,
        }
    }

    /// Attach a JSONL journal file; history is appended to it on every
    /// `add_message`, and loaded from it by [`Session::load`].
    pub fn with_journal(id: SessionId, journal_path: PathBuf) -> Self {
        let mut session = Self::new(id);
        session.journal_path = Some(journal_path);
        session
    }

    /// Load a session's history from its journal file if one exists.
    pub fn load(id: SessionId, journal_path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&journal_path)
            .ok()
            .map(|text| {
                text.lines()
                    .filter_map(|line| serde_json::from_str::<ConversationEntry>(line).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            history: Mutex::new(entries),
            thinking_level: Mutex::new(ThinkingLevel::default()),
            facts: Mutex::new(Vec::new()),
            active_skills: Mutex::new(Vec::new()),
            journal_path: Some(journal_path),
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<ConversationEntry>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a completed turn, updating token counters, and persist it to
    /// the journal if attached.
    pub fn add_message(&self, entry: ConversationEntry) {
        if let Some(path) = &self.journal_path {
            append_journal_line(path, &entry);
        }
        self.lock_history().push(entry);
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }

    /// Snapshot of the full history, for prompt assembly.
    pub fn history_snapshot(&self) -> Vec<ConversationEntry> {
        self.lock_history().clone()
    }

    pub fn total_tokens(&self) -> u64 {
        self.lock_history()
            .iter()
            .map(|e| e.tokens_in + e.tokens_out)
            .sum()
    }

    /// Discard all history (`/new`, `/reset`). The journal file, if any, is
    /// not removed, so past turns remain on disk; only in-memory recall is
    /// cleared.
    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    /// Atomically replace the oldest `len - keep_recent` entries with a
    /// single synthetic summary entry. Returns the removed entries.
    pub fn compact_history(&self, summary: String, keep_recent: usize) -> Vec<ConversationEntry> {
        let mut history = self.lock_history();
        if history.len() <= keep_recent {
            return Vec::new();
        }
        let drop_count = history.len() - keep_recent;
        let removed: Vec<ConversationEntry> = history.drain(0..drop_count).collect();
        let synthetic = ConversationEntry {
            user: "[compaction summary]".to_string(),
            assistant: summary,
            tokens_in: 0,
            tokens_out: 0,
            timestamp: SystemTime::now(),
        };
        history.insert(0, synthetic);
        removed
    }
}

fn append_journal_line(path: &Path, entry: &ConversationEntry) {
    let Ok(line) = serde_json::to_string(entry) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path);
    match file {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(%err, path = %path.display(), "failed to append session journal line");
            }
        }
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "failed to open session journal");
        }
    }
}

/// Decides when and how to shrink a session's history (spec §4.9).
pub struct CompactionEngine {
    pub max_messages: usize,
    pub strategy: CompactionStrategy,
}

impl CompactionEngine {
    pub fn new(max_messages: usize, strategy: CompactionStrategy) -> Self {
        Self {
            max_messages,
            strategy,
        }
    }

    /// Whether preventive compaction should run: `history_len >= 80% of max`.
    pub fn should_compact(&self, history_len: usize) -> bool {
        history_len * 10 >= self.max_messages * 8
    }

    /// How many recent entries to keep for the current strategy.
    pub fn keep_recent(&self) -> usize {
        match self.strategy {
            CompactionStrategy::Summarize => (self.max_messages / 4).max(5),
            CompactionStrategy::Truncate | CompactionStrategy::Sliding => (self.max_messages / 2).max(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> ConversationEntry {
        ConversationEntry {
            user: format!("u{n}"),
            assistant: format!("a{n}"),
            tokens_in: 1,
            tokens_out: 1,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn add_message_is_append_only() {
        let session = Session::new(SessionId::new("default", "test", "chat1"));
        session.add_message(entry(1));
        session.add_message(entry(2));
        assert_eq!(session.history_len(), 2);
    }

    #[test]
    fn compact_history_replaces_oldest_with_synthetic_entry() {
        let session = Session::new(SessionId::new("default", "test", "chat1"));
        for i in 0..20 {
            session.add_message(entry(i));
        }
        let removed = session.compact_history("summary text".to_string(), 5);
        assert_eq!(removed.len(), 15);
        assert_eq!(session.history_len(), 6);
        let snapshot = session.history_snapshot();
        assert_eq!(snapshot[0].user, "[compaction summary]");
        assert_eq!(snapshot[0].assistant, "summary text");
    }

    #[test]
    fn compact_history_is_noop_when_under_keep_recent() {
        let session = Session::new(SessionId::new("default", "test", "chat1"));
        session.add_message(entry(1));
        let removed = session.compact_history("summary".to_string(), 5);
        assert!(removed.is_empty());
        assert_eq!(session.history_len(), 1);
    }

    #[test]
    fn should_compact_at_80_percent_threshold() {
        let engine = CompactionEngine::new(60, CompactionStrategy::Summarize);
        assert!(!engine.should_compact(47));
        assert!(engine.should_compact(48));
    }

    #[test]
    fn keep_recent_for_summarize_is_quarter_floor_five() {
        let engine = CompactionEngine::new(60, CompactionStrategy::Summarize);
        assert_eq!(engine.keep_recent(), 15);
        let small = CompactionEngine::new(8, CompactionStrategy::Summarize);
        assert_eq!(small.keep_recent(), 5);
    }

    #[test]
    fn keep_recent_for_truncate_is_half_floor_ten() {
        let engine = CompactionEngine::new(60, CompactionStrategy::Truncate);
        assert_eq!(engine.keep_recent(), 30);
        let small = CompactionEngine::new(8, CompactionStrategy::Truncate);
        assert_eq!(small.keep_recent(), 10);
    }

    #[test]
    fn journal_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("session.jsonl");
        let id = SessionId::new("default", "test", "chat1");
        let session = Session::with_journal(id.clone(), journal.clone());
        session.add_message(entry(1));
        session.add_message(entry(2));

        let reloaded = Session::load(id, journal);
        assert_eq!(reloaded.history_len(), 2);
    }
}
