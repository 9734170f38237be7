//! Persists rule bodies published by the orchestrator.
//!
//! The orchestrator never stores rules itself; it publishes
//! `UpdateFilterRules` events. [`SinkNotifier`] hands every event to the sink
//! task over an unbounded channel, so none is dropped however far the sink
//! falls behind. The sink drains the channel until every notifier is gone,
//! so awaiting it after dropping the orchestrator flushes all pending rule
//! bodies.

use bastion_core::{FilterEvent, Notifier};
use bastion_storage::Database;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters reported when the sink stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub saved: usize,
    pub failed: usize,
}

/// Publish side of the rules sink.
#[derive(Debug, Clone)]
pub struct SinkNotifier {
    sender: UnboundedSender<FilterEvent>,
}

impl Notifier for SinkNotifier {
    fn publish(&self, event: FilterEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!("Rules sink stopped, dropping {}", e.0.kind().as_str());
        }
    }
}

/// Spawns the sink task and returns the notifier feeding it.
pub fn spawn_rules_sink(db: Database) -> (SinkNotifier, JoinHandle<SinkStats>) {
    let (sender, events) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_rules_sink(db, events));
    (SinkNotifier { sender }, handle)
}

async fn run_rules_sink(db: Database, mut events: UnboundedReceiver<FilterEvent>) -> SinkStats {
    let mut stats = SinkStats::default();

    while let Some(event) = events.recv().await {
        match event {
            FilterEvent::UpdateFilterRules { filter, rules } => {
                match db.save_rules(filter.filter_id, filter.version.as_str(), &rules) {
                    Ok(()) => {
                        stats.saved += 1;
                        info!(
                            "Stored {} rules for filter {} ({})",
                            rules.len(),
                            filter.filter_id,
                            filter.version
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!("Failed to store rules for filter {}: {}", filter.filter_id, e);
                    }
                }
            }
            FilterEvent::UpdateFiltersShowPopup(report) => {
                info!(
                    "Update check finished: success={}, updated={:?}",
                    report.success,
                    report.updated_ids()
                );
            }
            other => {
                debug!(
                    "{} {:?}",
                    other.kind().as_str(),
                    other.filter().map(|f| f.filter_id)
                );
            }
        }
    }

    debug!("Rules sink stopped: {:?}", stats);
    stats
}
