//! Export progress events.
//!
//! The bus is created once by the caller and handed to the pipeline by
//! reference. Publishing never blocks and never fails: with no subscribers,
//! events are dropped.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::acquire::Strategy;
use crate::resolve::ModulePath;
use crate::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    PhaseStarted(Phase),
    StrategySelected(Strategy),
    ModuleRegistered { path: ModulePath, bytes: usize },
    /// An optional feature could not be embedded; the export continues.
    FeatureDegraded { feature: String, reason: String },
    Assembled { bytes: usize },
    Delivered { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExportEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ExportEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
