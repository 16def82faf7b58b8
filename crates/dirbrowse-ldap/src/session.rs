//! Connection session: one endpoint, at most one open client handle.
//!
//! All network traffic for a session goes through a single `tokio` mutex. Connect,
//! disconnect and every request hold it for the whole round-trip, so a disconnect can never
//! close the handle under a search that is still using it.

use crate::client::{
    DirectoryClient, DirectoryConnector, SearchScope, ALL_USER_ATTRIBUTES, MATCH_ALL_FILTER,
};
use crate::Result;
use chrono::{DateTime, Utc};
use dirbrowse_core::{
    diff, AttributeChangeSet, Attributes, ConnectionConfig, DirectoryEntry, Error,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No open handle.
    Disconnected,
    /// Transport being opened or bind in flight.
    Connecting,
    /// Open, bound handle.
    Connected,
}

#[derive(Default)]
struct SessionState {
    client: Option<Box<dyn DirectoryClient>>,
}

#[derive(Debug, Clone, Copy)]
struct StatusSnapshot {
    status: SessionStatus,
    connected_since: Option<DateTime<Utc>>,
}

/// Owns the client handle for one configured endpoint.
pub struct ConnectionSession {
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn DirectoryConnector>,
    state: Mutex<SessionState>,
    snapshot: RwLock<StatusSnapshot>,
    epoch: AtomicU64,
}

impl ConnectionSession {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(config: ConnectionConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            state: Mutex::new(SessionState::default()),
            snapshot: RwLock::new(StatusSnapshot {
                status: SessionStatus::Disconnected,
                connected_since: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    /// Configuration this session was created from.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Registry name of the session.
    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Point-in-time lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.read_snapshot().status
    }

    /// Returns true while the session holds an open, bound handle whose transport reports
    /// alive.
    ///
    /// The transport is asked only when no request holds the session lock; during a request
    /// the last known status is returned. A dead handle is cleared by the next request or by
    /// [`ConnectionSession::check_alive`], and [`ConnectionSession::status`] keeps reporting
    /// `Connected` until then.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        if self.status() != SessionStatus::Connected {
            return false;
        }
        match self.state.try_lock() {
            Ok(mut state) => state
                .client
                .as_mut()
                .is_some_and(|client| client.is_alive()),
            Err(_) => true,
        }
    }

    /// When the current connection was established.
    #[must_use]
    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.read_snapshot().connected_since
    }

    /// Number of successful connects so far. Caches keyed on a connection compare this to
    /// notice a reconnect.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Opens the transport and binds if a bind identity is configured.
    ///
    /// Connecting an already connected session is a no-op. On failure any handle opened
    /// during the attempt is closed and the session stays disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for an invalid configuration, [`Error::ConnectError`] if
    /// the transport cannot be opened, or [`Error::AuthError`] if the bind is rejected.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(client) = state.client.as_mut() {
            if client.is_alive() {
                return Ok(());
            }
            self.release(&mut state).await;
        }

        self.set_status(SessionStatus::Connecting, None);
        match self.open_bound_client().await {
            Ok(client) => {
                state.client = Some(client);
                self.epoch.fetch_add(1, Ordering::AcqRel);
                self.set_status(SessionStatus::Connected, Some(Utc::now()));
                info!(connection = %self.name(), endpoint = %self.config, "connected");
                Ok(())
            }
            Err(err) => {
                self.set_status(SessionStatus::Disconnected, None);
                warn!(connection = %self.name(), error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Closes the transport if open. Idempotent and never fails.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.client.is_some() {
            self.release(&mut state).await;
            info!(connection = %self.name(), "disconnected");
        } else {
            self.set_status(SessionStatus::Disconnected, None);
        }
    }

    /// Re-checks the transport and clears the handle if it died. Returns the resulting
    /// connected state.
    pub async fn check_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        let alive = state.client.as_mut().is_some_and(|client| client.is_alive());
        if !alive && state.client.is_some() {
            warn!(connection = %self.name(), "transport closed by peer");
            self.release(&mut state).await;
        }
        alive
    }

    /// Acquires the serialized-access guard. Requests made through the guard run one at a
    /// time with respect to connect, disconnect and other guards of this session.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            state: self.state.lock().await,
        }
    }

    /// One-level fetch of the children of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn children(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.lock().await.children(path).await
    }

    /// Subtree search below `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        self.lock().await.search(base, filter, attributes).await
    }

    /// Reads a single entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn entry(&self, path: &str) -> Result<Option<DirectoryEntry>> {
        self.lock().await.entry(path).await
    }

    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn add(&self, path: &str, attributes: &Attributes) -> Result<()> {
        self.lock().await.add(path, attributes).await
    }

    /// Submits a change set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn modify(&self, path: &str, changes: &AttributeChangeSet) -> Result<()> {
        self.lock().await.modify(path, changes).await
    }

    /// Replaces one attribute with a single value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn replace_attribute(&self, path: &str, attribute: &str, value: &str) -> Result<()> {
        self.modify(path, &AttributeChangeSet::replace_value(attribute, value))
            .await
    }

    /// Diffs `original` against `modified` and submits the result. Returns the submitted
    /// change set, which is empty when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn apply_edit(
        &self,
        path: &str,
        original: &Attributes,
        modified: &Attributes,
    ) -> Result<AttributeChangeSet> {
        let changes = diff(original, modified);
        self.modify(path, &changes).await?;
        Ok(changes)
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.lock().await.delete(path).await
    }

    async fn open_bound_client(&self) -> Result<Box<dyn DirectoryClient>> {
        self.config.check()?;
        let mut client = self.connector.open(&self.config).await?;

        if self.config.has_bind_identity() {
            let identity = self.config.bind_dn();
            let bound = client
                .bind(identity, self.config.credential().expose_secret())
                .await;
            if let Err(err) = bound {
                if let Err(close_err) = client.close().await {
                    warn!(connection = %self.name(), error = %close_err, "close after failed bind");
                }
                return Err(match err {
                    Error::ProtocolError { code, message } => Error::AuthError {
                        identity: identity.to_string(),
                        message: format!("{message} (result code {code})"),
                    },
                    other => other,
                });
            }
            debug!(connection = %self.name(), identity, "bind accepted");
        }

        Ok(client)
    }

    /// Closes and drops the handle, then records the disconnected state.
    async fn release(&self, state: &mut SessionState) {
        if let Some(mut client) = state.client.take() {
            if let Err(err) = client.close().await {
                warn!(connection = %self.name(), error = %err, "error while closing transport");
            }
        }
        self.set_status(SessionStatus::Disconnected, None);
    }

    fn set_status(&self, status: SessionStatus, connected_since: Option<DateTime<Utc>>) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = StatusSnapshot {
                status,
                connected_since,
            };
        }
    }

    fn read_snapshot(&self) -> StatusSnapshot {
        self.snapshot
            .read()
            .map(|snapshot| *snapshot)
            .unwrap_or(StatusSnapshot {
                status: SessionStatus::Disconnected,
                connected_since: None,
            })
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a session's client handle.
pub struct SessionGuard<'a> {
    session: &'a ConnectionSession,
    state: MutexGuard<'a, SessionState>,
}

impl SessionGuard<'_> {
    /// Returns true if the guarded session holds a live handle.
    pub async fn is_connected(&mut self) -> bool {
        self.client().await.is_ok()
    }

    /// One-level fetch of the children of `path` with all user attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn children(&mut self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let attributes = [ALL_USER_ATTRIBUTES.to_string()];
        let entries = self
            .client()
            .await?
            .search(path, SearchScope::OneLevel, MATCH_ALL_FILTER, &attributes)
            .await?;
        debug!(
            connection = %self.session.name(),
            path,
            count = entries.len(),
            "fetched children"
        );
        Ok(entries)
    }

    /// Subtree search below `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        self.client()
            .await?
            .search(base, SearchScope::Subtree, filter, attributes)
            .await
    }

    /// Reads a single entry, `None` if the service returned nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or the client's error.
    pub async fn entry(&mut self, path: &str) -> Result<Option<DirectoryEntry>> {
        let attributes = [ALL_USER_ATTRIBUTES.to_string()];
        let entries = self
            .client()
            .await?
            .search(path, SearchScope::Base, MATCH_ALL_FILTER, &attributes)
            .await?;
        Ok(entries.into_iter().next())
    }

    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn add(&mut self, path: &str, attributes: &Attributes) -> Result<()> {
        self.client().await?.add(path, attributes).await
    }

    /// Submits a change set. An empty change set makes no round-trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn modify(&mut self, path: &str, changes: &AttributeChangeSet) -> Result<()> {
        let client = self.client().await?;
        if changes.is_empty() {
            return Ok(());
        }
        client.modify(path, changes).await?;
        debug!(
            connection = %self.session.name(),
            path,
            changes = changes.len(),
            "modify accepted"
        );
        Ok(())
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a live handle, or [`Error::ProtocolError`].
    pub async fn delete(&mut self, path: &str) -> Result<()> {
        self.client().await?.delete(path).await
    }

    async fn client(&mut self) -> Result<&mut (dyn DirectoryClient + 'static)> {
        let alive = self
            .state
            .client
            .as_mut()
            .is_some_and(|client| client.is_alive());
        if !alive {
            if self.state.client.is_some() {
                warn!(connection = %self.session.name(), "transport closed by peer");
                self.session.release(&mut self.state).await;
            }
            return Err(Error::NotConnected(self.session.name().to_string()));
        }
        self.state
            .client
            .as_deref_mut()
            .ok_or_else(|| Error::NotConnected(self.session.name().to_string()))
    }
}
