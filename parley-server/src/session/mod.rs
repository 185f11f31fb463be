//! Per-user session state.

pub mod history;
pub mod registry;

pub use history::{HistoryBuffer, Speaker, Turn};
pub use registry::SessionRegistry;

use crate::conversation::ConversationHandle;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// One user's conversational state.
///
/// Owns exactly one conversation handle for its whole lifetime. History and
/// the turn gate are per-session, so work on different sessions never
/// contends.
pub struct Session {
    id: String,
    conversation: ConversationHandle,
    history: Mutex<HistoryBuffer>,
    turn_gate: Mutex<()>,
    created_at: DateTime<Utc>,
    last_access_ms: AtomicI64,
    access_seq: AtomicU64,
}

/// Exclusive right to run one turn on a session.
///
/// Held from the User append until the Bot append so same-session requests
/// are serialized and their turns stay adjacent.
pub struct TurnGuard<'a> {
    _gate: MutexGuard<'a, ()>,
}

impl Session {
    pub(crate) fn new(
        id: impl Into<String>,
        conversation: ConversationHandle,
        history_capacity: usize,
        access_seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            conversation,
            history: Mutex::new(HistoryBuffer::with_capacity(history_capacity)),
            turn_gate: Mutex::new(()),
            created_at: now,
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
            access_seq: AtomicU64::new(access_seq),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &ConversationHandle {
        &self.conversation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_access_ms.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    /// Wait for this session's turn gate.
    pub async fn begin_turn(&self) -> TurnGuard<'_> {
        TurnGuard {
            _gate: self.turn_gate.lock().await,
        }
    }

    pub async fn append(&self, turn: Turn) {
        self.history.lock().await.append(turn);
    }

    /// Copy of the history, oldest first.
    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.snapshot()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub(crate) fn touch(&self, access_seq: u64) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.access_seq.fetch_max(access_seq, Ordering::Relaxed);
    }

    pub(crate) fn access_seq(&self) -> u64 {
        self.access_seq.load(Ordering::Relaxed)
    }

    /// Whether the session has gone unused for longer than `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        let elapsed = Utc::now().timestamp_millis() - self.last_access_ms.load(Ordering::Relaxed);
        elapsed > timeout.as_millis() as i64
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("conversation", &self.conversation.id())
            .field("created_at", &self.created_at)
            .finish()
    }
}
