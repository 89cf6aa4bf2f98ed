// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replays the mutation queue when connectivity returns.
//!
//! # State machine
//!
//! ```text
//!            online                 done
//! Offline ───────────► Replaying ─────────► Idle
//!    ▲                                        │
//!    └────────────────── offline ─────────────┘
//! ```
//!
//! A replay pass walks the queue once, in queue order, one request at a
//! time. Confirmed writes are removed and their entity's [`SyncStatus`]
//! updated; failed writes get their retry count bumped and stay queued.

pub mod connectivity;
pub mod network;
pub mod status;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub use connectivity::{ConnectivitySource, ManualConnectivity};
pub use network::{MutationRequest, NetworkClient, NetworkError, ReplayOutcome};
pub use status::SyncStatusStore;
pub use types::{ConflictResolution, ReplayReport, SyncState, SyncStatus};

use crate::config::OfflineSyncConfig;
use crate::metrics::LatencyTimer;
use crate::queue::{MutationDescriptor, MutationQueue, OfflineMutation};
use crate::storage::{StorageEngine, StorageError};

pub struct SyncCoordinator {
    queue: Arc<MutationQueue>,
    statuses: SyncStatusStore,
    network: Arc<dyn NetworkClient>,
    connectivity: Arc<dyn ConnectivitySource>,
    state: watch::Sender<SyncState>,
    replaying: AtomicBool,
    background_sync_tag: String,
}

impl SyncCoordinator {
    pub fn new(
        storage: Arc<StorageEngine>,
        queue: Arc<MutationQueue>,
        network: Arc<dyn NetworkClient>,
        connectivity: Arc<dyn ConnectivitySource>,
        config: &OfflineSyncConfig,
    ) -> Self {
        let initial = if *connectivity.subscribe().borrow() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial);
        crate::metrics::set_sync_state(initial.as_gauge());

        Self {
            queue,
            statuses: SyncStatusStore::new(storage),
            network,
            connectivity,
            state,
            replaying: AtomicBool::new(false),
            background_sync_tag: config.background_sync_tag.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn statuses(&self) -> &SyncStatusStore {
        &self.statuses
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Sync state changed");
        }
        crate::metrics::set_sync_state(state.as_gauge());
    }

    fn is_online(&self) -> bool {
        *self.connectivity.subscribe().borrow()
    }

    /// Queue a write for later replay. Does not start a replay.
    pub async fn queue_mutation(&self, descriptor: MutationDescriptor) -> Result<String, StorageError> {
        let id = self.queue.queue_mutation(descriptor).await?;
        if let Ok(pending) = self.queue.pending_count().await {
            crate::metrics::set_queue_depth(pending);
        }
        Ok(id)
    }

    /// Drain the queue once.
    ///
    /// Returns an empty report if another pass is already running. Only
    /// the initial queue read can fail; per-mutation problems are tallied
    /// in `failed`.
    #[tracing::instrument(skip(self))]
    pub async fn replay(&self) -> Result<ReplayReport, StorageError> {
        if self.replaying.swap(true, Ordering::AcqRel) {
            debug!("Replay already in progress");
            return Ok(ReplayReport::default());
        }
        let _guard = ReplayGuard(&self.replaying);
        let _timer = LatencyTimer::new("sync", "replay");

        let mutations = self.queue.get_mutation_queue().await?;
        let mut report = ReplayReport {
            total: mutations.len(),
            ..Default::default()
        };
        if mutations.is_empty() {
            self.settle();
            return Ok(report);
        }

        self.set_state(SyncState::Replaying);
        info!(pending = report.total, "Replaying offline mutations");

        for mutation in &mutations {
            if self.replay_one(mutation).await {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        if let Ok(pending) = self.queue.pending_count().await {
            crate::metrics::set_queue_depth(pending);
        }
        self.settle();
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Replay pass complete"
        );
        Ok(report)
    }

    fn settle(&self) {
        let state = if self.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        self.set_state(state);
    }

    async fn replay_one(&self, mutation: &OfflineMutation) -> bool {
        let request = MutationRequest::from(mutation);
        match self.network.send(&request).await {
            Ok(outcome) => {
                let version = match outcome {
                    ReplayOutcome::Applied { version } => version,
                    ReplayOutcome::AlreadyApplied => {
                        debug!(id = %mutation.id, "Server already had this mutation");
                        None
                    }
                };

                if let Err(e) = self.queue.remove_mutation(&mutation.id).await {
                    error!(id = %mutation.id, error = %e, "Replayed mutation could not be removed");
                    crate::metrics::record_error("sync", "remove");
                    crate::metrics::record_mutation_replay("failed");
                    return false;
                }
                if let Some((entity_type, entity_id)) = mutation.entity() {
                    if let Err(e) = self.statuses.record_sync(entity_type, entity_id, version).await {
                        warn!(id = %mutation.id, error = %e, "Sync status update failed");
                        crate::metrics::record_error("sync", "status");
                    }
                }
                crate::metrics::record_mutation_replay("applied");
                debug!(id = %mutation.id, url = %mutation.url, "Mutation replayed");
                true
            }
            Err(e) => {
                warn!(
                    id = %mutation.id,
                    url = %mutation.url,
                    retry_count = mutation.retry_count,
                    error = %e,
                    "Mutation replay failed"
                );
                if let Err(storage_err) = self.queue.increment_mutation_retry(&mutation.id).await {
                    error!(id = %mutation.id, error = %storage_err, "Retry count could not be recorded");
                    crate::metrics::record_error("sync", "retry");
                }
                crate::metrics::record_mutation_replay("failed");
                false
            }
        }
    }

    /// Entry point for a platform background-sync wake-up.
    pub async fn on_background_sync(&self, tag: &str) -> Result<ReplayReport, StorageError> {
        if tag != self.background_sync_tag {
            debug!(tag, "Ignoring background sync for another tag");
            return Ok(ReplayReport::default());
        }
        self.replay().await
    }

    /// Follow connectivity until `shutdown` flips to `true`.
    ///
    /// Replays on every transition to online (and once at start if already
    /// online), moves to `Offline` on every transition to offline.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self
            .connectivity
            .register_background_sync(&self.background_sync_tag)
            .await
        {
            warn!(tag = %self.background_sync_tag, error = %e, "Background sync registration failed");
        }

        let mut online_rx = self.connectivity.subscribe();
        if *online_rx.borrow_and_update() {
            self.replay_logged().await;
        } else {
            self.set_state(SyncState::Offline);
        }
        info!(state = %self.state(), "Sync coordinator running");

        loop {
            tokio::select! {
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        warn!("Connectivity source closed, sync coordinator stopping");
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        info!("Connectivity restored");
                        self.replay_logged().await;
                    } else {
                        info!("Connectivity lost");
                        self.set_state(SyncState::Offline);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sync coordinator stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn replay_logged(&self) {
        if let Err(e) = self.replay().await {
            error!(error = %e, "Replay could not read the mutation queue");
            crate::metrics::record_error("sync", "replay");
            self.settle();
        }
    }
}

/// Clears the in-flight flag when a replay pass ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Scripted responses per URL; anything unscripted is applied.
    #[derive(Default)]
    struct ScriptedNetwork {
        responses: Mutex<HashMap<String, Result<ReplayOutcome, NetworkError>>>,
        sent: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedNetwork {
        fn respond(&self, url: &str, response: Result<ReplayOutcome, NetworkError>) {
            self.responses.lock().insert(url.to_string(), response);
        }
    }

    #[async_trait]
    impl NetworkClient for ScriptedNetwork {
        async fn send(&self, request: &MutationRequest) -> Result<ReplayOutcome, NetworkError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sent.lock().push(request.url.clone());
            self.responses
                .lock()
                .get(&request.url)
                .cloned()
                .unwrap_or(Ok(ReplayOutcome::Applied { version: None }))
        }
    }

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        network: Arc<ScriptedNetwork>,
        connectivity: Arc<ManualConnectivity>,
    }

    fn harness(online: bool, network: ScriptedNetwork) -> Harness {
        let storage = Arc::new(StorageEngine::in_memory());
        let queue = Arc::new(MutationQueue::new(storage.clone()));
        let network = Arc::new(network);
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let coordinator = Arc::new(SyncCoordinator::new(
            storage,
            queue,
            network.clone(),
            connectivity.clone(),
            &OfflineSyncConfig::default(),
        ));
        Harness { coordinator, network, connectivity }
    }

    #[tokio::test]
    async fn test_initial_state_follows_connectivity() {
        assert_eq!(harness(false, ScriptedNetwork::default()).coordinator.state(), SyncState::Offline);
        assert_eq!(harness(true, ScriptedNetwork::default()).coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_replay_in_queue_order_and_updates_status() {
        let h = harness(true, ScriptedNetwork::default());
        h.coordinator
            .queue_mutation(MutationDescriptor::new("PUT", "/low").with_priority(Priority::Low))
            .await
            .unwrap();
        h.coordinator
            .queue_mutation(
                MutationDescriptor::new("PUT", "/high")
                    .with_priority(Priority::High)
                    .for_entity("vendor", "7"),
            )
            .await
            .unwrap();
        h.network.respond("/high", Ok(ReplayOutcome::Applied { version: Some(4) }));

        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report, ReplayReport { total: 2, succeeded: 2, failed: 0 });
        assert_eq!(*h.network.sent.lock(), vec!["/high", "/low"]);
        assert_eq!(h.coordinator.queue().pending_count().await.unwrap(), 0);

        let status = h.coordinator.statuses().get("vendor", "7").await.unwrap().unwrap();
        assert_eq!(status.version, 4);
        assert_eq!(h.coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_failure_increments_retry_and_continues() {
        let h = harness(true, ScriptedNetwork::default());
        let failing = h
            .coordinator
            .queue_mutation(MutationDescriptor::new("POST", "/fails").with_priority(Priority::High))
            .await
            .unwrap();
        h.coordinator.queue_mutation(MutationDescriptor::new("POST", "/ok")).await.unwrap();
        h.network.respond(
            "/fails",
            Err(NetworkError::Rejected { status: 500, message: "boom".into() }),
        );

        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report, ReplayReport { total: 2, succeeded: 1, failed: 1 });

        let remaining = h.coordinator.queue().get_mutation_queue().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, failing);
        assert_eq!(remaining[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_already_applied_removes_and_bumps_version() {
        let h = harness(true, ScriptedNetwork::default());
        h.coordinator
            .queue_mutation(MutationDescriptor::new("PUT", "/dup").for_entity("vendor", "1"))
            .await
            .unwrap();
        h.network.respond("/dup", Ok(ReplayOutcome::AlreadyApplied));

        let report = h.coordinator.replay().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.coordinator.queue().pending_count().await.unwrap(), 0);
        assert_eq!(h.coordinator.statuses().get("vendor", "1").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_overlapping_replay_returns_empty() {
        let network = ScriptedNetwork { delay: Some(Duration::from_millis(100)), ..Default::default() };
        let h = harness(true, network);
        h.coordinator.queue_mutation(MutationDescriptor::new("PUT", "/slow")).await.unwrap();

        let first = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.replay().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.coordinator.state(), SyncState::Replaying);

        let second = h.coordinator.replay().await.unwrap();
        assert!(second.is_empty());

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.succeeded, 1);
        assert_eq!(h.network.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_run_replays_on_reconnect() {
        let h = harness(false, ScriptedNetwork::default());
        h.coordinator
            .queue_mutation(MutationDescriptor::new("POST", "/later").with_body(json!({"a": 1})))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.run(shutdown_rx).await })
        };

        let mut state_rx = h.coordinator.state_receiver();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.coordinator.state(), SyncState::Offline);
        assert_eq!(h.connectivity.registered_tags(), vec!["offline-mutations"]);

        h.connectivity.set_online(true);
        tokio::time::timeout(
            Duration::from_secs(1),
            state_rx.wait_for(|s| *s == SyncState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(h.coordinator.queue().pending_count().await.unwrap(), 0);

        h.connectivity.set_online(false);
        tokio::time::timeout(
            Duration::from_secs(1),
            state_rx.wait_for(|s| *s == SyncState::Offline),
        )
        .await
        .unwrap()
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_background_sync_tag_filter() {
        let h = harness(true, ScriptedNetwork::default());
        h.coordinator.queue_mutation(MutationDescriptor::new("PUT", "/x")).await.unwrap();

        assert!(h.coordinator.on_background_sync("other").await.unwrap().is_empty());
        assert_eq!(h.coordinator.on_background_sync("offline-mutations").await.unwrap().succeeded, 1);
    }
}
