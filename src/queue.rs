//! `MessageQueue` — per-session debounce, dedup, burst-coalescing (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::model::{IncomingMessage, QueueEntry};

/// How close two enqueues of identical content must be to count as a dup.
const DEDUP_WINDOW: Duration = Duration::from_secs(5);
const MAX_PENDING: usize = 20;
const DEBOUNCE: Duration = Duration::from_millis(1000);

struct SessionQueue {
    pending: Vec<QueueEntry>,
    processing: bool,
    /// Bumped on every enqueue; a pending debounce task checks this to tell
    /// whether it is still the most recent one before draining.
    generation: u64,
}

impl SessionQueue {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            processing: false,
            generation: 0,
        }
    }
}

/// Guard returned by [`MessageQueue::begin_processing`]; clears the
/// session's `processing` flag on drop, including on panic/early-return.
pub struct ProcessingGuard {
    queue: Arc<MessageQueue>,
    session_id: String,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let queue = self.queue.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Some(q) = queue.sessions.lock().await.get(&session_id) {
                q.lock().await.processing = false;
            }
        });
    }
}

/// Debounces and coalesces bursts of messages per session, then hands the
/// combined payload to a caller-supplied drain callback.
pub struct MessageQueue {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionQueue>>>>,
    debounce: Duration,
    max_pending: usize,
    dedup_window: Duration,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEBOUNCE, MAX_PENDING, DEDUP_WINDOW)
    }

    pub fn with_limits(debounce: Duration, max_pending: usize, dedup_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            debounce,
            max_pending,
            dedup_window,
        })
    }

    async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<SessionQueue>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionQueue::new())))
            .clone()
    }

    /// Whether `session_id` currently has an agent run in flight. Callers
    /// must check this before admitting a message to the agent.
    pub async fn is_processing(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(q) => q.lock().await.processing,
            None => false,
        }
    }

    /// Mark `session_id` as processing, returning a guard that clears the
    /// flag when dropped.
    pub async fn begin_processing(self: &Arc<Self>, session_id: &str) -> ProcessingGuard {
        let queue = self.get_or_create(session_id).await;
        queue.lock().await.processing = true;
        ProcessingGuard {
            queue: self.clone(),
            session_id: session_id.to_string(),
        }
    }

    /// Enqueue `message` for `session_id`, (re)starting the debounce timer.
    /// When the timer fires, `on_drain` is invoked with the combined payload
    /// on a fresh task.
    pub async fn enqueue<F, Fut>(self: &Arc<Self>, session_id: &str, message: IncomingMessage, on_drain: F)
    where
        F: Fn(String, String, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let queue = self.get_or_create(session_id).await;
        let generation = {
            let mut q = queue.lock().await;

            if q.pending.iter().any(|entry| {
                entry.message.content == message.content && entry.age() < self.dedup_window
            }) {
                tracing::debug!(session_id, "dropping duplicate message within dedup window");
                return;
            }

            if q.pending.len() >= self.max_pending {
                q.pending.remove(0);
                tracing::warn!(session_id, "pending queue full, evicted oldest message");
            }

            q.pending.push(QueueEntry::new(message));
            q.generation += 1;
            q.generation
        };

        let session_id = session_id.to_string();
        let queue_ref = queue.clone();
        let debounce = self.debounce;
        let on_drain = Arc::new(on_drain);

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let drained = {
                let mut q = queue_ref.lock().await;
                if q.generation != generation {
                    // A newer enqueue superseded this timer; let that one fire instead.
                    return;
                }
                std::mem::take(&mut q.pending)
            };

            if drained.is_empty() {
                return;
            }

            let reply_to = drained.last().map(|e| e.message.message_id.clone());
            let combined = combine(&drained);
            on_drain(session_id, combined, reply_to).await;
        });
    }

    /// Remove a session's queue state entirely (e.g. on idle prune).
    pub async fn remove(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }
}

/// Render a burst of drained messages as the single-turn payload spec §4.4
/// calls for.
fn combine(entries: &[QueueEntry]) -> String {
    if entries.len() == 1 {
        return entries[0].message.content.clone();
    }
    let mut out = String::from("[Multiple messages received while busy]\n");
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, entry.message.content));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn msg(content: &str) -> IncomingMessage {
        IncomingMessage {
            channel: "test".to_string(),
            chat_id: "chat1".to_string(),
            sender_id: "sender1".to_string(),
            message_id: "m1".to_string(),
            content: content.to_string(),
            media: None,
            is_group: false,
            arrived_at: SystemTime::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_message_drains_unmodified() {
        let queue = MessageQueue::with_limits(Duration::from_millis(50), 20, Duration::from_secs(5));
        let drained = Arc::new(Mutex::new(None));
        let drained_clone = drained.clone();

        queue
            .enqueue("s1", msg("hello"), move |_session, combined, _reply_to| {
                let drained_clone = drained_clone.clone();
                async move {
                    *drained_clone.lock().await = Some(combined);
                }
            })
            .await;

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(drained.lock().await.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_combined_into_one_payload() {
        let queue = MessageQueue::with_limits(Duration::from_millis(50), 20, Duration::from_secs(5));
        let count = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Mutex::new(String::new()));

        for content in ["one", "two", "three"] {
            let drained = drained.clone();
            let count = count.clone();
            queue
                .enqueue("s1", msg(content), move |_s, combined, _reply_to| {
                    let drained = drained.clone();
                    let count = count.clone();
                    async move {
                        *drained.lock().await = combined;
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let combined = drained.lock().await.clone();
        assert!(combined.contains("Multiple messages"));
        assert!(combined.contains("1. one"));
        assert!(combined.contains("3. three"));
    }

    #[tokio::test]
    async fn duplicate_content_within_window_is_dropped() {
        let queue = MessageQueue::with_limits(Duration::from_millis(10), 20, Duration::from_secs(5));
        let queue_handle = queue.get_or_create("s1").await;
        queue_handle.lock().await.pending.push(QueueEntry::new(msg("dup")));

        let before = queue_handle.lock().await.pending.len();
        queue
            .enqueue("s1", msg("dup"), |_s, _c, _reply_to| async {})
            .await;
        let after = queue_handle.lock().await.pending.len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn processing_flag_clears_on_guard_drop() {
        let queue = MessageQueue::new();
        {
            let _guard = queue.begin_processing("s1").await;
            assert!(queue.is_processing("s1").await);
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!queue.is_processing("s1").await);
    }
}
