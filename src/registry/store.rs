//! Session registry implementation

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::error::RegistryError;
use super::key::StreamKey;
use crate::error::Result;
use crate::session::{RelayEventKind, RelaySession};

/// Central registry for all relay sessions
///
/// Thread-safe via `RwLock`. Lookups from connections vastly outnumber
/// session creation.
pub struct SessionRegistry {
    /// Map of stream key to its session
    sessions: RwLock<HashMap<StreamKey, RelaySession>>,

    /// Configuration
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Session for `key`, created from the relay template if needed
    ///
    /// The flag is true when the session was created by this call. A
    /// stopped session still in the map is replaced.
    pub async fn get_or_create(self: &Arc<Self>, key: &StreamKey) -> Result<(RelaySession, bool)> {
        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.get(key) {
            if !session.is_stopped() {
                return Ok((session.clone(), false));
            }
            sessions.remove(key);
        }

        let max = self.config.max_sessions;
        if max > 0 && sessions.len() >= max {
            tracing::warn!(stream = %key, max_sessions = max, "Session limit reached");
            return Err(RegistryError::SessionLimitReached(max).into());
        }

        let session = RelaySession::new(key.clone(), self.config.relay.clone())?;
        self.remove_on_stop(&session);
        sessions.insert(key.clone(), session.clone());

        tracing::info!(
            stream = %key,
            session_id = session.id(),
            sessions = sessions.len(),
            "Session registered"
        );

        Ok((session, true))
    }

    fn remove_on_stop(self: &Arc<Self>, session: &RelaySession) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let key = session.key().clone();
        let id = session.id();

        session.events().subscribe(RelayEventKind::Stopped, move |_| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            // Without a runtime the periodic cleanup picks it up instead
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let key = key.clone();
                handle.spawn(async move {
                    registry.remove(&key, id).await;
                });
            }
        });
    }

    /// Running session for `key`
    pub async fn get(&self, key: &StreamKey) -> Option<RelaySession> {
        self.sessions
            .read()
            .await
            .get(key)
            .filter(|s| !s.is_stopped())
            .cloned()
    }

    /// Remove the session for `key` if it is the one with `session_id`
    ///
    /// A newer session registered under the same key is left alone.
    pub async fn remove(&self, key: &StreamKey, session_id: u64) -> Option<RelaySession> {
        let mut sessions = self.sessions.write().await;

        match sessions.get(key) {
            Some(session) if session.id() == session_id => {}
            Some(session) => {
                tracing::debug!(
                    stream = %key,
                    expected = session_id,
                    actual = session.id(),
                    "Session remove mismatch"
                );
                return None;
            }
            None => return None,
        }

        let removed = sessions.remove(key);
        tracing::info!(stream = %key, session_id = session_id, "Session removed");
        removed
    }

    /// Stop the session for `key`
    pub async fn stop(&self, key: &StreamKey) -> std::result::Result<(), RegistryError> {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| RegistryError::SessionNotFound(key.clone()))?;
        session.stop().await;
        self.remove(key, session.id()).await;
        Ok(())
    }

    /// Stop and forget every session; returns how many were running
    pub async fn stop_all(&self) -> usize {
        let sessions: Vec<RelaySession> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };

        let mut stopped = 0;
        for session in &sessions {
            if session.stop().await {
                stopped += 1;
            }
        }

        if stopped > 0 {
            tracing::info!(sessions = stopped, "All sessions stopped");
        }
        stopped
    }

    /// Get total number of sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Keys of every registered session
    pub async fn keys(&self) -> Vec<StreamKey> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Run cleanup once
    ///
    /// Removes sessions that have stopped but are still registered.
    pub async fn cleanup(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|key, session| {
            let keep = !session.is_stopped();
            if !keep {
                tracing::info!(stream = %key, session_id = session.id(), "Session removed by cleanup");
            }
            keep
        });

        before - sessions.len()
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}
