//! Name-keyed registry of connection sessions.
//!
//! The name→session map sits behind its own `RwLock`, separate from every session's
//! connection lock, and is never held across an `.await`. Lookups therefore never wait on a
//! slow connect or search.

use crate::client::DirectoryConnector;
use crate::session::ConnectionSession;
use crate::store::ConfigStore;
use crate::Result;
use dirbrowse_core::{ConnectionConfig, Error};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Registry of named connections.
///
/// Constructed explicitly and passed to whatever needs it; there is no process-wide
/// instance.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<ConnectionSession>>>,
    connector: Arc<dyn DirectoryConnector>,
    store: Option<Arc<dyn ConfigStore>>,
    // Held across snapshot and save so saves land in map order.
    persist_lock: Mutex<()>,
}

impl ConnectionRegistry {
    /// Creates an empty registry without persistence.
    #[must_use]
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            store: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Creates a registry backed by `store`, loading every persisted configuration.
    ///
    /// Records that do not convert into a valid configuration are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading fails.
    pub fn with_store(
        connector: Arc<dyn DirectoryConnector>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let records = store.load()?;
        let mut sessions = HashMap::with_capacity(records.len());
        for record in records {
            let name = record.name.clone();
            match ConnectionConfig::from_record(record) {
                Ok(config) => {
                    let session = ConnectionSession::new(config, Arc::clone(&connector));
                    sessions.insert(name, Arc::new(session));
                }
                Err(err) => warn!(connection = %name, error = %err, "skipping stored connection"),
            }
        }
        info!(count = sessions.len(), "loaded stored connections");

        Ok(Self {
            sessions: RwLock::new(sessions),
            connector,
            store: Some(store),
            persist_lock: Mutex::new(()),
        })
    }

    /// Inserts `config` under its name, disconnecting and replacing any existing session
    /// with that name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the name is empty.
    pub async fn add_or_replace(&self, config: ConnectionConfig) -> Result<Arc<ConnectionSession>> {
        let name = checked_name(&config)?;
        let session = Arc::new(ConnectionSession::new(config, Arc::clone(&self.connector)));
        let previous = self.write().insert(name.clone(), Arc::clone(&session));

        if let Some(previous) = previous {
            previous.disconnect().await;
            debug!(connection = %name, "replaced connection");
        } else {
            debug!(connection = %name, "added connection");
        }
        self.persist();
        Ok(session)
    }

    /// Replaces the connection registered as `original_name` with `config`, which may carry
    /// a different name. Behaves like [`ConnectionRegistry::add_or_replace`] when
    /// `original_name` is not registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the new name is empty.
    pub async fn update(
        &self,
        original_name: &str,
        config: ConnectionConfig,
    ) -> Result<Arc<ConnectionSession>> {
        let name = checked_name(&config)?;
        let session = Arc::new(ConnectionSession::new(config, Arc::clone(&self.connector)));
        let detached = {
            let mut sessions = self.write();
            let mut detached = Vec::with_capacity(2);
            if original_name != name {
                detached.extend(sessions.remove(original_name));
            }
            detached.extend(sessions.insert(name.clone(), Arc::clone(&session)));
            detached
        };

        for previous in detached {
            previous.disconnect().await;
        }
        debug!(from = original_name, to = %name, "updated connection");
        self.persist();
        Ok(session)
    }

    /// Disconnects and removes `name`. Removing an unknown name is a no-op.
    pub async fn remove(&self, name: &str) {
        let removed = self.write().remove(name);
        if let Some(session) = removed {
            session.disconnect().await;
            debug!(connection = %name, "removed connection");
            self.persist();
        }
    }

    /// Connects the named session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConnection`] if `name` is not registered, otherwise the
    /// session's connect error.
    pub async fn connect(&self, name: &str) -> Result<Arc<ConnectionSession>> {
        let session = self
            .get(name)
            .ok_or_else(|| Error::UnknownConnection(name.to_string()))?;
        session.connect().await?;
        Ok(session)
    }

    /// Disconnects the named session if it exists. Never fails.
    pub async fn disconnect(&self, name: &str) {
        if let Some(session) = self.get(name) {
            session.disconnect().await;
        }
    }

    /// Checks that `config` can connect and bind, without registering it.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`ConnectionSession::connect`].
    pub async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        config.check()?;
        let mut client = self.connector.open(config).await?;
        let outcome = if config.has_bind_identity() {
            client
                .bind(config.bind_dn(), config.credential().expose_secret())
                .await
        } else {
            Ok(())
        };
        if let Err(err) = client.close().await {
            warn!(connection = %config.name(), error = %err, "close after connection test");
        }
        outcome
    }

    /// Session registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ConnectionSession>> {
        self.read().get(name).cloned()
    }

    /// Alias of [`ConnectionRegistry::get`].
    #[must_use]
    pub fn session(&self, name: &str) -> Option<Arc<ConnectionSession>> {
        self.get(name)
    }

    /// Snapshot of every session, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ConnectionSession>> {
        self.read().values().cloned().collect()
    }

    /// Snapshot of registered names, in no particular order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of registered configurations, in no particular order.
    #[must_use]
    pub fn configs(&self) -> Vec<ConnectionConfig> {
        self.read()
            .values()
            .map(|session| session.config().clone())
            .collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _serialized = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let records = self
            .read()
            .values()
            .map(|session| session.config().to_record())
            .collect::<Vec<_>>();
        if let Err(err) = store.save(&records) {
            warn!(error = %err, "failed to save connections");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ConnectionSession>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ConnectionSession>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn checked_name(config: &ConnectionConfig) -> Result<String> {
    if config.name().trim().is_empty() {
        return Err(Error::ConfigError(
            "connection name cannot be empty".to_string(),
        ));
    }
    Ok(config.name().to_string())
}
