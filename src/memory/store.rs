//! File-backed implementation of the [`Memory`] trait (spec §6 "Memory
//! store" contract: `RecentFacts`, `SaveFact`, `SaveDailyLog`).
//!
//! Facts are kept in a JSON index on disk and scored against a query by
//! plain keyword overlap — no embeddings, no vector search. This is
//! intentionally simple: the corpus this agent operates over (a handful of
//! facts about the user and the workspace) never approaches the scale where
//! approximate nearest-neighbor search would pay for its complexity.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::RwLock,
};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::daily::DailyMemory;
use super::traits::{Memory, MemoryCategory, MemoryEntry};

const INDEX_FILE: &str = "facts.json";

/// Filesystem-backed, thread-safe memory store.
///
/// Facts persist to `<dir>/facts.json`; daily diary entries persist via
/// [`DailyMemory`] to `<dir>/YYYY-MM-DD.md`.
pub struct FileMemoryStore {
    dir: PathBuf,
    entries: RwLock<HashMap<String, MemoryEntry>>,
    daily: DailyMemory,
}

impl FileMemoryStore {
    /// Open (or create) a store rooted at `dir`, loading any existing fact
    /// index from disk.
    pub fn open(dir: PathBuf) -> Result<Self, String> {
        std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create memory dir {dir:?}: {e}"))?;
        let entries = load_index(&dir)?;
        Ok(Self {
            daily: DailyMemory::new(dir.clone()),
            dir,
            entries: RwLock::new(entries),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn persist(&self, entries: &HashMap<String, MemoryEntry>) -> Result<(), String> {
        let values: Vec<&MemoryEntry> = entries.values().collect();
        let json = serde_json::to_string_pretty(&values).map_err(|e| e.to_string())?;
        std::fs::write(self.index_path(), json).map_err(|e| format!("failed to write fact index: {e}"))
    }
}

fn load_index(dir: &std::path::Path) -> Result<HashMap<String, MemoryEntry>, String> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| format!("failed to read fact index: {e}"))?;
    let entries: Vec<MemoryEntry> = serde_json::from_str(&raw).map_err(|e| format!("corrupt fact index: {e}"))?;
    Ok(entries.into_iter().map(|e| (e.key.clone(), e)).collect())
}

/// Fraction of `query`'s lowercased whitespace-split tokens found in
/// `content`. A cheap but effective relevance signal for short facts.
fn keyword_score(query: &str, content: &str) -> f32 {
    let query_tokens: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let hits = query_tokens.iter().filter(|t| content_lower.contains(t.as_str())).count();
    hits as f32 / query_tokens.len() as f32
}

#[async_trait]
impl Memory for FileMemoryStore {
    async fn store(&self, key: &str, content: &str, category: MemoryCategory) -> Result<(), String> {
        let now = Utc::now().to_rfc3339();
        let mut entries = self.entries.write().map_err(|_| "memory index lock poisoned".to_string())?;

        let created_at = entries.get(key).map(|e| e.created_at.clone()).unwrap_or_else(|| now.clone());
        entries.insert(
            key.to_string(),
            MemoryEntry {
                id: Uuid::new_v4().to_string(),
                key: key.to_string(),
                content: content.to_string(),
                category,
                score: 1.0,
                created_at,
                updated_at: now,
            },
        );
        self.persist(&entries)
    }

    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.read().map_err(|_| "memory index lock poisoned".to_string())?;
        let mut scored: Vec<MemoryEntry> = entries
            .values()
            .map(|e| {
                let mut scored = e.clone();
                scored.score = keyword_score(query, &format!("{} {}", e.key, e.content));
                scored
            })
            .filter(|e| e.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn forget(&self, key: &str) -> Result<bool, String> {
        let mut entries = self.entries.write().map_err(|_| "memory index lock poisoned".to_string())?;
        let found = entries.remove(key).is_some();
        if found {
            self.persist(&entries)?;
        }
        Ok(found)
    }

    async fn store_daily(&self, content: &str) -> Result<(), String> {
        self.daily.store_daily(content)
    }

    async fn recall_daily(&self, date: &str) -> Result<Option<String>, String> {
        self.daily.recall_daily(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (FileMemoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::open(dir.path().to_path_buf()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_then_recall_finds_matching_fact() {
        let (store, _dir) = store();
        store.store("user:pet", "The user's cat is named Biscuit", MemoryCategory::Core).await.unwrap();
        let results = store.recall("what is the cat's name", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "user:pet");
    }

    #[tokio::test]
    async fn recall_respects_limit_and_ranks_by_score() {
        let (store, _dir) = store();
        store.store("a", "apples are red", MemoryCategory::Core).await.unwrap();
        store.store("b", "apples and oranges", MemoryCategory::Core).await.unwrap();
        store.store("c", "bananas are yellow", MemoryCategory::Core).await.unwrap();
        let results = store.recall("apples oranges", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "b");
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let (store, _dir) = store();
        store.store("k", "some content", MemoryCategory::Core).await.unwrap();
        assert!(store.forget("k").await.unwrap());
        assert!(!store.forget("k").await.unwrap());
    }

    #[tokio::test]
    async fn index_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMemoryStore::open(dir.path().to_path_buf()).unwrap();
            store.store("k", "persisted content", MemoryCategory::Core).await.unwrap();
        }
        let reopened = FileMemoryStore::open(dir.path().to_path_buf()).unwrap();
        let results = reopened.recall("persisted content", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn daily_log_round_trips() {
        let (store, _dir) = store();
        store.store_daily("did something today").await.unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let content = store.recall_daily(&today).await.unwrap();
        assert!(content.unwrap().contains("did something today"));
    }
}
