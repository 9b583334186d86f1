//! Advisory per-conversation locks so turns within one conversation run one at a time.
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<LockMap>,
}

/// Holds a conversation's lock until dropped; idle entries are pruned on release
pub struct ConversationGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: &str) -> ConversationGuard {
        let mutex = Arc::clone(self.inner.entry(conversation_id.to_string()).or_default().value());
        let guard = mutex.lock_owned().await;
        ConversationGuard {
            key: conversation_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of conversations with a held or awaited lock
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map itself still references an idle lock
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
