//! Scan events and the observer registry.
//!
//! Observers run synchronously, in registration order, on the task that
//! reaps probe completions. An observer that returns an error or panics is
//! logged and skipped; the remaining observers and the scan carry on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::types::{ScanProgress, ServerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ScanStarted,
    Progress,
    ServerFound,
    ScanComplete,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ScanStarted,
        EventKind::Progress,
        EventKind::ServerFound,
        EventKind::ScanComplete,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::ScanStarted => 0,
            EventKind::Progress => 1,
            EventKind::ServerFound => 2,
            EventKind::ScanComplete => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    ScanStarted { total_targets: u64 },
    Progress(ScanProgress),
    ServerFound(ServerRecord),
    /// `total_records` is the size of the result store when the scan ended.
    ScanComplete { total_records: usize },
}

impl ScanEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ScanEvent::ScanStarted { .. } => EventKind::ScanStarted,
            ScanEvent::Progress(_) => EventKind::Progress,
            ScanEvent::ServerFound(_) => EventKind::ServerFound,
            ScanEvent::ScanComplete { .. } => EventKind::ScanComplete,
        }
    }
}

pub type Callback = Arc<dyn Fn(&ScanEvent) -> anyhow::Result<()> + Send + Sync>;

/// Ordered callbacks per event kind.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    lists: Arc<RwLock<[Vec<Callback>; 4]>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists.read();
        f.debug_struct("CallbackRegistry")
            .field("scan_started", &lists[0].len())
            .field("progress", &lists[1].len())
            .field("server_found", &lists[2].len())
            .field("scan_complete", &lists[3].len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`; it runs after every callback already
    /// registered for that kind.
    pub fn add<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ScanEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lists.write()[kind.index()].push(Arc::new(callback));
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.lists.read()[kind.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.read().iter().all(Vec::is_empty)
    }

    /// Invoke every callback for the event's kind. Returns how many failed.
    pub fn emit(&self, event: &ScanEvent) -> usize {
        let kind = event.kind();
        // Snapshot so a callback may register further callbacks without deadlocking.
        let callbacks: Vec<Callback> = self.lists.read()[kind.index()].clone();
        let mut failures = 0;
        for (i, cb) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| cb(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(?kind, observer = i, error = %e, "observer failed");
                }
                Err(panic) => {
                    failures += 1;
                    let msg = panic_message(&*panic);
                    warn!(?kind, observer = i, panic = %msg, "observer panicked");
                }
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
