use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::ServerRecord;

/// Discovered records, in the order they were found. Cheap to clone; clones
/// share the same entries.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    entries: Arc<Mutex<Vec<ServerRecord>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the new record count.
    pub fn push(&self, record: ServerRecord) -> usize {
        let mut guard = self.entries.lock();
        guard.push(record);
        guard.len()
    }

    /// Snapshot of every record.
    pub fn get_servers(&self) -> Vec<ServerRecord> {
        self.entries.lock().clone()
    }

    pub fn clear_servers(&self) {
        self.entries.lock().clear();
    }

    /// Swap the whole contents, e.g. after loading a saved result set.
    pub fn replace(&self, records: Vec<ServerRecord>) {
        *self.entries.lock() = records;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
