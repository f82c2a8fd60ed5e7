//! Metrics for hub-sync

use iroh_metrics::{
    core::{Counter, Metric},
    struct_iterable::Iterable,
};

/// Metrics for hub-sync
#[allow(missing_docs)]
#[derive(Debug, Clone, Iterable)]
pub struct Metrics {
    pub messages_merged: Counter,
    pub messages_rejected: Counter,
    pub messages_deleted: Counter,
    pub messages_pruned: Counter,
    pub messages_revoked: Counter,
    pub registry_events_merged: Counter,
    pub sync_attempts: Counter,
    pub sync_success: Counter,
    pub sync_failure: Counter,
    pub sync_messages_fetched: Counter,
    pub sync_messages_deferred: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            messages_merged: Counter::new("Number of messages merged"),
            messages_rejected: Counter::new("Number of messages rejected by validation"),
            messages_deleted: Counter::new("Number of messages displaced by conflicts or bounds"),
            messages_pruned: Counter::new("Number of messages pruned by TTL or capacity sweeps"),
            messages_revoked: Counter::new("Number of messages discarded by revocation cascades"),
            registry_events_merged: Counter::new("Number of on-chain registry events applied"),
            sync_attempts: Counter::new("Number of diff sync cycles started"),
            sync_success: Counter::new("Number of diff sync cycles completed"),
            sync_failure: Counter::new("Number of diff sync cycles failed"),
            sync_messages_fetched: Counter::new("Number of messages fetched from peers"),
            sync_messages_deferred: Counter::new(
                "Number of fetched messages re-queued on authorization",
            ),
        }
    }
}

impl Metric for Metrics {
    fn name() -> &'static str {
        "hub_sync"
    }
}
