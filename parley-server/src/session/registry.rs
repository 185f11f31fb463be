//! Session registry with get-or-create semantics.

use super::Session;
use crate::conversation::ConversationGateway;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_common::SessionConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Concurrent map from user id to session.
///
/// Backed by a sharded map, so lookups for different ids rarely touch the
/// same lock and never wait on network calls. Bounded two ways: a maximum
/// session count (least recently used session evicted on overflow) and an
/// idle timeout enforced by a background sweeper.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<String, Arc<Session>>,
    gateway: ConversationGateway,
    config: SessionConfig,
    history_capacity: usize,
    clock: AtomicU64,
}

impl SessionRegistry {
    pub fn new(gateway: ConversationGateway, config: SessionConfig, history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                gateway,
                config,
                history_capacity,
                clock: AtomicU64::new(0),
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Return the session for `id`, creating it if absent.
    ///
    /// Racing callers for the same id all receive the one session that won
    /// the insert; a session is never replaced.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let seq = self.tick();

        let existing = self.inner.sessions.get(id).map(|s| s.value().clone());
        if let Some(session) = existing {
            session.touch(seq);
            return session;
        }

        let (session, created) = match self.inner.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(
                    id,
                    self.inner.gateway.start(),
                    self.inner.history_capacity,
                    seq,
                ));
                entry.insert(session.clone());
                (session, true)
            }
        };

        session.touch(seq);
        if created {
            tracing::info!(
                session_id = %id,
                conversation = session.conversation().id(),
                sessions = self.inner.sessions.len(),
                "Session created"
            );
            self.enforce_capacity(id);
        }
        session
    }

    /// Look up a session without creating or touching it.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Evict least recently used sessions until under the limit.
    fn enforce_capacity(&self, keep: &str) {
        while self.inner.sessions.len() > self.inner.config.max_sessions {
            let victim = self
                .inner
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().access_seq())
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                break;
            };
            if self.inner.sessions.remove(&victim).is_some() {
                tracing::info!(session_id = %victim, "Session evicted (capacity)");
            }
        }
    }

    /// Remove sessions idle for longer than the configured timeout.
    pub fn evict_idle(&self) -> usize {
        let timeout = self.inner.config.idle_timeout;
        let mut evicted = 0;
        self.inner.sessions.retain(|id, session| {
            if session.is_idle(timeout) {
                tracing::debug!(session_id = %id, "Session evicted (idle)");
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) periodically until cancelled.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = registry.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = registry.evict_idle();
                        if evicted > 0 {
                            tracing::info!(evicted, remaining = registry.len(), "Idle sessions swept");
                        }
                    }
                }
            }
            tracing::debug!("Session sweeper stopped");
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::testing::EchoProvider;
    use crate::session::Turn;
    use std::time::Duration;

    fn registry_with(provider: Arc<EchoProvider>, config: SessionConfig) -> SessionRegistry {
        SessionRegistry::new(ConversationGateway::new(provider), config, 25)
    }

    fn registry() -> (SessionRegistry, Arc<EchoProvider>) {
        let provider = Arc::new(EchoProvider::default());
        (registry_with(provider.clone(), SessionConfig::default()), provider)
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (registry, provider) = registry();
        let a = registry.get_or_create("u1");
        let b = registry.get_or_create("u1");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_creates_one_session() {
        let (registry, provider) = registry();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create("shared") })
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len(), 1);
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (registry, _) = registry();
        let a = registry.get_or_create("alice");
        let b = registry.get_or_create("bob");

        a.append(Turn::user("from alice")).await;

        assert_eq!(a.history_len().await, 1);
        assert_eq!(b.history_len().await, 0);
        assert_ne!(a.conversation().id(), b.conversation().id());
    }

    #[test]
    fn test_get_does_not_create() {
        let (registry, _) = registry();
        assert!(registry.get("ghost").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let config = SessionConfig {
            max_sessions: 2,
            ..Default::default()
        };
        let registry = registry_with(Arc::new(EchoProvider::default()), config);

        registry.get_or_create("a");
        registry.get_or_create("b");
        registry.get_or_create("a");
        registry.get_or_create("c");

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
        assert!(registry.get("c").is_some());
    }

    #[test]
    fn test_remove() {
        let (registry, _) = registry();
        registry.get_or_create("u1");
        assert!(registry.remove("u1").is_some());
        assert!(registry.remove("u1").is_none());
    }

    #[tokio::test]
    async fn test_evict_idle_removes_only_expired() {
        let config = SessionConfig {
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let registry = registry_with(Arc::new(EchoProvider::default()), config);

        registry.get_or_create("old");
        tokio::time::sleep(Duration::from_millis(120)).await;
        registry.get_or_create("fresh");

        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let config = SessionConfig {
            idle_timeout: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let registry = registry_with(Arc::new(EchoProvider::default()), config);
        registry.get_or_create("u1");

        let token = CancellationToken::new();
        let handle = registry.spawn_sweeper(token.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.is_empty());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
