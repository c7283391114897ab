//! Connection registry with address-based reuse and idle eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use super::device::DeviceInfo;
use super::state::Session;
use crate::llm::ProviderRegistry;

/// Lifetimes that govern session reuse and eviction.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// A reconnect from the same address within this window adopts the old session.
    pub reuse_window: Duration,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reuse_window: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// A registered session.
///
/// `state` is held only briefly; `turn` is held for a whole turn so that at
/// most one turn per session is in flight.
pub struct SessionHandle {
    state: Mutex<Session>,
    turn: Mutex<()>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            turn: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> MutexGuard<'_, Session> {
        self.state.lock().await
    }

    /// Wait for any in-flight turn, then claim the session for a new one.
    pub async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }
}

struct Entry {
    handle: Arc<SessionHandle>,
    origin_address: String,
}

#[derive(Default)]
struct Index {
    sessions: HashMap<String, Entry>,
    by_address: HashMap<String, String>,
}

/// Live sessions keyed by connection id, with a secondary origin-address index.
#[derive(Clone)]
pub struct SessionRegistry {
    index: Arc<RwLock<Index>>,
    providers: Arc<ProviderRegistry>,
    system_prompt: Arc<str>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        system_prompt: impl Into<Arc<str>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            index: Arc::new(RwLock::new(Index::default())),
            providers,
            system_prompt: system_prompt.into(),
            settings,
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Register a new connection and return its id.
    ///
    /// A recently active session from the same address is adopted under the
    /// new id; otherwise a fresh session on the default provider is created.
    pub async fn connect(&self, origin_address: &str, device: DeviceInfo) -> String {
        let connection_id = ulid::Ulid::new().to_string();

        if let Some(previous) = self.reusable(origin_address).await {
            let adopted = {
                let mut index = self.index.write().await;
                let still_indexed = index.by_address.get(origin_address) == Some(&previous);
                match still_indexed.then(|| index.sessions.remove(&previous)).flatten() {
                    Some(entry) => {
                        let handle = entry.handle.clone();
                        index
                            .by_address
                            .insert(entry.origin_address.clone(), connection_id.clone());
                        index.sessions.insert(connection_id.clone(), entry);
                        Some(handle)
                    }
                    None => None,
                }
            };

            if let Some(handle) = adopted {
                let mut session = handle.state().await;
                session.set_connection_id(connection_id.clone());
                session.touch();
                info!(
                    connection_id = %connection_id,
                    previous = %previous,
                    origin = %origin_address,
                    "Reusing recent session"
                );
                return connection_id;
            }
        }

        let session = Session::new(
            &self.providers,
            &self.system_prompt,
            connection_id.clone(),
            origin_address,
            device,
        );
        let entry = Entry {
            handle: Arc::new(SessionHandle::new(session)),
            origin_address: origin_address.to_string(),
        };

        let mut index = self.index.write().await;
        index
            .by_address
            .insert(origin_address.to_string(), connection_id.clone());
        index.sessions.insert(connection_id.clone(), entry);
        info!(connection_id = %connection_id, origin = %origin_address, "Session created");
        connection_id
    }

    /// The connection id of a session at `origin_address` still inside the reuse window.
    async fn reusable(&self, origin_address: &str) -> Option<String> {
        let (previous, handle) = {
            let index = self.index.read().await;
            let previous = index.by_address.get(origin_address)?.clone();
            let handle = index.sessions.get(&previous)?.handle.clone();
            (previous, handle)
        };
        let last_active = handle.state().await.last_active();
        (last_active.elapsed() < self.settings.reuse_window).then_some(previous)
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<SessionHandle>> {
        let index = self.index.read().await;
        index.sessions.get(connection_id).map(|e| e.handle.clone())
    }

    /// Drop a connection's session.
    pub async fn disconnect(&self, connection_id: &str) {
        let mut index = self.index.write().await;
        if let Some(entry) = index.sessions.remove(connection_id) {
            let indexed = index.by_address.get(&entry.origin_address);
            if indexed.map(String::as_str) == Some(connection_id) {
                index.by_address.remove(&entry.origin_address);
            }
            info!(connection_id = %connection_id, "Session closed");
        }
    }

    /// Remove sessions idle past the timeout. Sessions with a turn in flight are kept.
    pub async fn evict_idle(&self, now: Instant) -> Vec<String> {
        let handles: Vec<(String, Arc<SessionHandle>)> = {
            let index = self.index.read().await;
            index
                .sessions
                .iter()
                .map(|(id, e)| (id.clone(), e.handle.clone()))
                .collect()
        };

        let mut expired = Vec::new();
        for (id, handle) in handles {
            if handle.is_busy() {
                continue;
            }
            let last_active = handle.state().await.last_active();
            if now.saturating_duration_since(last_active) > self.settings.idle_timeout {
                expired.push((id, handle));
            }
        }

        let mut evicted = Vec::new();
        let mut index = self.index.write().await;
        for (id, handle) in expired {
            let same = index
                .sessions
                .get(&id)
                .is_some_and(|e| Arc::ptr_eq(&e.handle, &handle));
            if !same {
                continue;
            }
            if let Some(entry) = index.sessions.remove(&id) {
                if index.by_address.get(&entry.origin_address) == Some(&id) {
                    index.by_address.remove(&entry.origin_address);
                }
                debug!(connection_id = %id, "Evicted idle session");
                evicted.push(id);
            }
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Spawn the periodic idle-session reaper. Returns its handle for shutdown.
pub fn spawn_reaper(registry: SessionRegistry, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle(Instant::now()).await;
            if !evicted.is_empty() {
                info!(count = evicted.len(), "Evicted idle sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, registry};

    fn sessions() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(registry(ScriptedProvider::new(vec![]))),
            "sys",
            SessionSettings::default(),
        )
    }

    async fn history_len(registry: &SessionRegistry, id: &str) -> usize {
        registry.get(id).await.unwrap().state().await.history().len()
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_window_adopts_history() {
        let registry = sessions();
        let first = registry.connect("1.2.3.4", DeviceInfo::default()).await;
        {
            let handle = registry.get(&first).await.unwrap();
            let mut session = handle.state().await;
            session.begin_turn("hi");
            session.append_assistant("hello");
        }

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        let second = registry.connect("1.2.3.4", DeviceInfo::default()).await;

        assert_ne!(first, second);
        assert!(registry.get(&first).await.is_none());
        assert_eq!(history_len(&registry, &second).await, 3);
        assert_eq!(registry.len().await, 1);

        let handle = registry.get(&second).await.unwrap();
        assert_eq!(handle.state().await.connection_id(), second);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_window_starts_fresh() {
        let registry = sessions();
        let first = registry.connect("1.2.3.4", DeviceInfo::default()).await;
        {
            let handle = registry.get(&first).await.unwrap();
            handle.state().await.begin_turn("hi");
        }

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let second = registry.connect("1.2.3.4", DeviceInfo::default()).await;

        assert_eq!(history_len(&registry, &second).await, 1);
        assert!(registry.get(&first).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn different_addresses_get_different_sessions() {
        let registry = sessions();
        let a = registry.connect("1.1.1.1", DeviceInfo::default()).await;
        let b = registry.connect("2.2.2.2", DeviceInfo::default()).await;
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_session_and_index() {
        let registry = sessions();
        let id = registry.connect("1.2.3.4", DeviceInfo::default()).await;
        registry.disconnect(&id).await;
        assert!(registry.is_empty().await);

        let again = registry.connect("1.2.3.4", DeviceInfo::default()).await;
        assert_ne!(id, again);
        assert_eq!(history_len(&registry, &again).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_disconnect_keeps_newer_index_entry() {
        let registry = sessions();
        let old = registry.connect("1.2.3.4", DeviceInfo::default()).await;
        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let new = registry.connect("1.2.3.4", DeviceInfo::default()).await;

        registry.disconnect(&old).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        let third = registry.connect("1.2.3.4", DeviceInfo::default()).await;

        // The index still pointed at `new`, so it was adopted.
        assert!(registry.get(&new).await.is_none());
        assert!(registry.get(&third).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_idle_sessions() {
        let registry = sessions();
        let idle = registry.connect("1.1.1.1", DeviceInfo::default()).await;
        tokio::time::advance(Duration::from_secs(50 * 60)).await;
        let fresh = registry.connect("2.2.2.2", DeviceInfo::default()).await;
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        let evicted = registry.evict_idle(Instant::now()).await;
        assert_eq!(evicted, vec![idle.clone()]);
        assert!(registry.get(&idle).await.is_none());
        assert!(registry.get(&fresh).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_sessions_survive_eviction() {
        let registry = sessions();
        let id = registry.connect("1.1.1.1", DeviceInfo::default()).await;
        let handle = registry.get(&id).await.unwrap();
        let _turn = handle.begin_turn().await;

        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert!(registry.evict_idle(Instant::now()).await.is_empty());
        assert!(registry.get(&id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_periodically() {
        let registry = sessions();
        let id = registry.connect("1.1.1.1", DeviceInfo::default()).await;
        let reaper = spawn_reaper(registry.clone(), Duration::from_secs(5 * 60));

        tokio::time::sleep(Duration::from_secs(66 * 60)).await;
        assert!(registry.get(&id).await.is_none());
        reaper.abort();
    }
}
