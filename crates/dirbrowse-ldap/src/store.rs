//! Persistence contract for connection configurations.

use crate::Result;
use dirbrowse_core::ConnectionRecord;
use std::sync::Mutex;

/// Loads and saves the connection list. The storage medium and format belong to the
/// implementation.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send + Sync {
    /// Returns every persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn load(&self) -> Result<Vec<ConnectionRecord>>;

    /// Replaces the persisted list with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save(&self, records: &[ConnectionRecord]) -> Result<()>;
}

/// Store that keeps records in memory, for embedding without persistence and for tests.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    records: Mutex<Vec<ConnectionRecord>>,
}

impl InMemoryConfigStore {
    /// Creates a store pre-populated with `records`.
    #[must_use]
    pub fn new(records: Vec<ConnectionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Returns the last saved records.
    #[must_use]
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load(&self) -> Result<Vec<ConnectionRecord>> {
        Ok(self.records())
    }

    fn save(&self, records: &[ConnectionRecord]) -> Result<()> {
        if let Ok(mut stored) = self.records.lock() {
            *stored = records.to_vec();
        }
        Ok(())
    }
}
