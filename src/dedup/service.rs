use crate::dedup::errors::DedupError;
use crate::dedup::fingerprint::fingerprint;
use crate::dedup::gateway::{DecisionGateway, TransferControl};
use crate::dedup::store::{DOWNLOAD_LINKS_TABLE, MappingTable, PENDING_DOWNLOADS, SyncStore};
use crate::dedup::types::{Decision, DownloadEvent, DownloadId, DownloadRecord, TransferState};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Debug, Clone)]
pub struct DedupServiceConfig {
    pub event_buffer: usize,
}

impl Default for DedupServiceConfig {
    fn default() -> Self {
        Self { event_buffer: 128 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DedupServiceStatus {
    pub running: bool,
    /// Ids with a reconciliation executing or queued right now.
    pub reconciling: usize,
    pub flagged: u64,
    pub completed_recorded: u64,
    pub discarded: u64,
}

#[derive(Debug)]
pub enum DedupCommand {
    Event {
        event: DownloadEvent,
    },
    Decision {
        decision: Decision,
        id: DownloadId,
        reply: oneshot::Sender<()>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct DedupServiceHandle {
    tx: mpsc::Sender<DedupCommand>,
}

impl DedupServiceHandle {
    /// Feeds one lifecycle event into the reconciler. Events for the same
    /// DownloadId are applied in the order they are submitted.
    pub async fn submit_event(&self, event: DownloadEvent) -> Result<()> {
        self.tx
            .send(DedupCommand::Event { event })
            .await
            .map_err(|_| DedupError::ChannelClosed)
    }

    /// Relays the operator's answer for a flagged download. Translated into
    /// a resume (continue) or cancel command against the transfer mechanism.
    pub async fn apply_decision(&self, decision: Decision, id: DownloadId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DedupCommand::Decision {
                decision,
                id,
                reply: tx,
            })
            .await
            .map_err(|_| DedupError::ChannelClosed)?;
        rx.await.map_err(|_| DedupError::ChannelClosed)
    }

    /// Resolves once every event submitted before this call has been fully
    /// reconciled.
    pub async fn wait_idle(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DedupCommand::WaitIdle { reply: tx })
            .await
            .map_err(|_| DedupError::ChannelClosed)?;
        rx.await.map_err(|_| DedupError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DedupCommand::Shutdown { reply: tx })
            .await
            .map_err(|_| DedupError::ChannelClosed)?;
        rx.await.map_err(|_| DedupError::ChannelClosed)
    }
}

struct Deps {
    /// In-Flight Registry: downloads created but not yet terminally resolved.
    registry: MappingTable,
    /// Duplicate Index: completed downloads, the duplicate-detection ground
    /// truth. Append-mostly; this core never deletes from it.
    index: MappingTable,
    transfer: Arc<dyn TransferControl>,
    gateway: Arc<dyn DecisionGateway>,
}

pub fn start_service(
    cfg: DedupServiceConfig,
    store: Arc<dyn SyncStore>,
    transfer: Arc<dyn TransferControl>,
    gateway: Arc<dyn DecisionGateway>,
) -> (
    DedupServiceHandle,
    watch::Receiver<DedupServiceStatus>,
    tokio::task::JoinHandle<Result<()>>,
) {
    let deps = Arc::new(Deps {
        registry: MappingTable::new(store.clone(), PENDING_DOWNLOADS),
        index: MappingTable::new(store, DOWNLOAD_LINKS_TABLE),
        transfer,
        gateway,
    });
    let (tx, rx) = mpsc::channel(cfg.event_buffer);
    let (status_tx, status_rx) = watch::channel(DedupServiceStatus {
        running: true,
        ..Default::default()
    });
    let join = tokio::spawn(run_service(rx, status_tx, deps));
    (DedupServiceHandle { tx }, status_rx, join)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    /// Creation event handled; the download is now in the registry.
    Tracked { flagged: bool },
    /// Completion promoted the registry entry into the duplicate index.
    Recorded,
    /// Interruption dropped the registry entry without promotion.
    Discarded,
    /// Untracked id or a non-terminal state change.
    Ignored,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    flagged: u64,
    recorded: u64,
    discarded: u64,
}

impl Stats {
    fn apply(&mut self, outcome: &Result<Reconciled>) {
        match outcome {
            Ok(Reconciled::Tracked { flagged: true }) => self.flagged += 1,
            Ok(Reconciled::Recorded) => self.recorded += 1,
            Ok(Reconciled::Discarded) => self.discarded += 1,
            _ => {}
        }
    }
}

async fn run_service(
    mut rx: mpsc::Receiver<DedupCommand>,
    status_tx: watch::Sender<DedupServiceStatus>,
    deps: Arc<Deps>,
) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::channel::<(DownloadId, Result<Reconciled>)>(64);

    // Per-id FIFO: a key means a reconciliation for that id is executing;
    // its queue holds events that arrived in the meantime. Distinct ids
    // reconcile concurrently, the same id never does.
    let mut pending: HashMap<DownloadId, VecDeque<DownloadEvent>> = HashMap::new();
    // Decision commands run as tracked tasks so idle waiters and shutdown
    // cover them too.
    let mut decisions: JoinSet<()> = JoinSet::new();
    let mut stats = Stats::default();
    let mut idle_waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(DedupCommand::Event { event }) => {
                    let id = event.download_id();
                    match pending.get_mut(&id) {
                        Some(queue) => queue.push_back(event),
                        None => {
                            pending.insert(id, VecDeque::new());
                            spawn_reconcile(deps.clone(), event, done_tx.clone());
                        }
                    }
                    publish_status(&status_tx, true, &pending, &stats);
                }
                Some(DedupCommand::Decision { decision, id, reply }) => {
                    // Decisions never touch the mappings, so they bypass the
                    // per-id queue and run immediately.
                    let deps = deps.clone();
                    decisions.spawn(async move { apply_decision(&deps, decision, id).await });
                    let _ = reply.send(());
                }
                Some(DedupCommand::WaitIdle { reply }) => {
                    if pending.is_empty() && decisions.is_empty() {
                        let _ = reply.send(());
                    } else {
                        idle_waiters.push(reply);
                    }
                }
                Some(DedupCommand::Shutdown { reply }) => {
                    let _ = reply.send(());
                    break;
                }
                None => break,
            },
            Some((id, outcome)) = done_rx.recv() => {
                match &outcome {
                    Ok(step) => tracing::debug!(id = %id, ?step, "reconciled"),
                    Err(err) => {
                        // No event outcome is fatal to the stream.
                        tracing::warn!(id = %id, error = %err, "reconciliation failed; continuing");
                    }
                }
                stats.apply(&outcome);
                match pending.get_mut(&id).and_then(|queue| queue.pop_front()) {
                    Some(next) => spawn_reconcile(deps.clone(), next, done_tx.clone()),
                    None => {
                        pending.remove(&id);
                    }
                }
                if pending.is_empty() && decisions.is_empty() {
                    for waiter in idle_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
                publish_status(&status_tx, true, &pending, &stats);
            }
            Some(result) = decisions.join_next() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "decision task failed");
                }
                if pending.is_empty() && decisions.is_empty() {
                    for waiter in idle_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
        }
    }

    // Let decision commands already in flight finish before reporting the
    // service stopped.
    while let Some(result) = decisions.join_next().await {
        if let Err(err) = result {
            tracing::warn!(error = %err, "decision task failed");
        }
    }

    publish_status(&status_tx, false, &pending, &stats);
    Ok(())
}

fn publish_status(
    status_tx: &watch::Sender<DedupServiceStatus>,
    running: bool,
    pending: &HashMap<DownloadId, VecDeque<DownloadEvent>>,
    stats: &Stats,
) {
    let _ = status_tx.send(DedupServiceStatus {
        running,
        reconciling: pending.len(),
        flagged: stats.flagged,
        completed_recorded: stats.recorded,
        discarded: stats.discarded,
    });
}

fn spawn_reconcile(
    deps: Arc<Deps>,
    event: DownloadEvent,
    done_tx: mpsc::Sender<(DownloadId, Result<Reconciled>)>,
) {
    let id = event.download_id();
    tokio::spawn(async move {
        let outcome = reconcile(&deps, event).await;
        let _ = done_tx.send((id, outcome)).await;
    });
}

async fn reconcile(deps: &Deps, event: DownloadEvent) -> Result<Reconciled> {
    match event {
        DownloadEvent::DownloadCreated { id, locator } => on_created(deps, id, locator).await,
        DownloadEvent::DownloadStateChanged { id, new_state } => {
            on_state_changed(deps, id, new_state).await
        }
    }
}

async fn on_created(deps: &Deps, id: DownloadId, locator: String) -> Result<Reconciled> {
    let fp = fingerprint(&locator).await;
    let completed = deps.index.scan().await?;

    // Both predicates are always evaluated against the same index snapshot.
    // Either alone flags the download; a creation event is flagged at most
    // once even when both hold.
    let locator_dup = completed.iter().any(|(_, rec)| rec.locator == locator);
    let fingerprint_dup = completed.iter().any(|(_, rec)| rec.fingerprint == fp);

    if locator_dup || fingerprint_dup {
        tracing::info!(
            id = %id,
            locator = %locator,
            locator_dup,
            fingerprint_dup,
            "duplicate download flagged"
        );
        // Pause first, then request the decision. A failed pause is logged
        // and the transition proceeds as if it had succeeded.
        if let Err(err) = deps.transfer.pause(id).await {
            tracing::warn!(id = %id, error = %err, "failed to pause flagged download");
        }
        deps.gateway.request_decision(id, &locator).await;
    }

    // Tracked unconditionally, flagged or not, before any decision arrives.
    let record = DownloadRecord {
        locator,
        fingerprint: fp,
    };
    deps.registry.put(id, record).await?;
    Ok(Reconciled::Tracked {
        flagged: locator_dup || fingerprint_dup,
    })
}

async fn on_state_changed(
    deps: &Deps,
    id: DownloadId,
    new_state: TransferState,
) -> Result<Reconciled> {
    match new_state {
        TransferState::Complete => {
            let Some(record) = deps.registry.get(id).await? else {
                // Duplicate or late event for an untracked id.
                return Ok(Reconciled::Ignored);
            };
            deps.registry.delete(id).await?;
            deps.index.put(id, record).await?;
            tracing::info!(id = %id, "download completed; recorded in duplicate index");
            Ok(Reconciled::Recorded)
        }
        TransferState::Interrupted => {
            let Some(record) = deps.registry.get(id).await? else {
                return Ok(Reconciled::Ignored);
            };
            deps.registry.delete(id).await?;
            tracing::info!(
                id = %id,
                locator = %record.locator,
                "download interrupted; dropped without promotion"
            );
            Ok(Reconciled::Discarded)
        }
        TransferState::Other => Ok(Reconciled::Ignored),
    }
}

async fn apply_decision(deps: &Deps, decision: Decision, id: DownloadId) {
    let result = match decision {
        Decision::Continue => deps.transfer.resume(id).await,
        Decision::Cancel => deps.transfer.cancel(id).await,
    };
    match result {
        Ok(()) => tracing::info!(id = %id, ?decision, "decision applied"),
        Err(err) => {
            tracing::warn!(id = %id, ?decision, error = %err, "transfer command failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::gateway::TransferCommandError;
    use crate::dedup::store::{MemoryStore, Result as StoreResult, Table};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Issued {
        Pause(DownloadId),
        Resume(DownloadId),
        Cancel(DownloadId),
    }

    #[derive(Clone, Default)]
    struct RecordingTransfer {
        issued: Arc<Mutex<Vec<Issued>>>,
        fail_pause: bool,
        /// Delay before each command takes effect, to widen command races.
        delay_ms: u64,
    }

    impl RecordingTransfer {
        fn issued(&self) -> Vec<Issued> {
            self.issued.lock().expect("lock").clone()
        }

        async fn delay(&self) {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
        }
    }

    #[async_trait]
    impl TransferControl for RecordingTransfer {
        async fn pause(&self, id: DownloadId) -> std::result::Result<(), TransferCommandError> {
            self.delay().await;
            self.issued.lock().expect("lock").push(Issued::Pause(id));
            if self.fail_pause {
                return Err(TransferCommandError {
                    id,
                    reason: "no such download".to_string(),
                });
            }
            Ok(())
        }

        async fn resume(&self, id: DownloadId) -> std::result::Result<(), TransferCommandError> {
            self.delay().await;
            self.issued.lock().expect("lock").push(Issued::Resume(id));
            Ok(())
        }

        async fn cancel(&self, id: DownloadId) -> std::result::Result<(), TransferCommandError> {
            self.delay().await;
            self.issued.lock().expect("lock").push(Issued::Cancel(id));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingGateway {
        requests: Arc<Mutex<Vec<(DownloadId, String)>>>,
    }

    impl RecordingGateway {
        fn requests(&self) -> Vec<(DownloadId, String)> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl DecisionGateway for RecordingGateway {
        async fn request_decision(&self, id: DownloadId, locator: &str) {
            self.requests
                .lock()
                .expect("lock")
                .push((id, locator.to_string()));
        }
    }

    /// Memory store that sleeps on every round trip, widening the window in
    /// which a terminal event can arrive while its creation still
    /// reconciles.
    #[derive(Clone)]
    struct SlowStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SyncStore for SlowStore {
        async fn read_table(&self, key: &str) -> StoreResult<Table> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.read_table(key).await
        }

        async fn write_table(&self, key: &str, table: &Table) -> StoreResult<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inner.write_table(key, table).await
        }
    }

    struct Harness {
        handle: DedupServiceHandle,
        status_rx: watch::Receiver<DedupServiceStatus>,
        join: tokio::task::JoinHandle<Result<()>>,
        store: Arc<MemoryStore>,
        transfer: RecordingTransfer,
        gateway: RecordingGateway,
    }

    impl Harness {
        fn start() -> Self {
            Self::start_with(RecordingTransfer::default())
        }

        fn start_with(transfer: RecordingTransfer) -> Self {
            let store = Arc::new(MemoryStore::new());
            let gateway = RecordingGateway::default();
            let (handle, status_rx, join) = start_service(
                DedupServiceConfig::default(),
                store.clone(),
                Arc::new(transfer.clone()),
                Arc::new(gateway.clone()),
            );
            Self {
                handle,
                status_rx,
                join,
                store,
                transfer,
                gateway,
            }
        }

        fn registry(&self) -> MappingTable {
            MappingTable::new(self.store.clone(), PENDING_DOWNLOADS)
        }

        fn index(&self) -> MappingTable {
            MappingTable::new(self.store.clone(), DOWNLOAD_LINKS_TABLE)
        }

        async fn created(&self, id: u32, locator: &str) {
            self.handle
                .submit_event(DownloadEvent::DownloadCreated {
                    id: DownloadId(id),
                    locator: locator.to_string(),
                })
                .await
                .expect("submit created");
        }

        async fn state_changed(&self, id: u32, new_state: TransferState) {
            self.handle
                .submit_event(DownloadEvent::DownloadStateChanged {
                    id: DownloadId(id),
                    new_state,
                })
                .await
                .expect("submit state change");
        }

        async fn finish(self) {
            self.handle.shutdown().await.expect("shutdown");
            self.join.await.expect("join").expect("service");
        }
    }

    #[tokio::test]
    async fn create_then_complete_records_exactly_one_entry() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        h.handle.wait_idle().await.expect("idle");

        let index = h.index().scan().await.expect("scan");
        assert_eq!(index.len(), 1);
        let (id, record) = &index[0];
        assert_eq!(*id, DownloadId(1));
        assert_eq!(record.locator, "https://x/a.bin");
        assert_eq!(record.fingerprint, fingerprint("https://x/a.bin").await);
        assert!(h.registry().scan().await.expect("scan").is_empty());
        assert!(h.transfer.issued().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn create_then_interrupt_leaves_no_trace() {
        let h = Harness::start();
        h.created(2, "https://x/a.bin").await;
        h.state_changed(2, TransferState::Interrupted).await;
        h.handle.wait_idle().await.expect("idle");

        assert!(h.index().scan().await.expect("scan").is_empty());
        assert!(h.registry().scan().await.expect("scan").is_empty());
        assert_eq!(h.status_rx.borrow().discarded, 1);
        h.finish().await;
    }

    #[tokio::test]
    async fn exact_locator_duplicate_flags_exactly_once() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        // Cross-id visibility is best-effort; settle before the duplicate.
        h.handle.wait_idle().await.expect("idle");
        h.created(2, "https://x/a.bin").await;
        h.handle.wait_idle().await.expect("idle");

        // Same locator means both predicates hold, yet one flag action.
        assert_eq!(h.transfer.issued(), vec![Issued::Pause(DownloadId(2))]);
        assert_eq!(
            h.gateway.requests(),
            vec![(DownloadId(2), "https://x/a.bin".to_string())]
        );
        assert_eq!(h.status_rx.borrow().flagged, 1);

        // The flagged download is still tracked before any decision arrives.
        assert!(h.registry().get(DownloadId(2)).await.expect("get").is_some());
        h.finish().await;
    }

    #[tokio::test]
    async fn fingerprint_duplicate_flags_even_when_locators_differ() {
        let h = Harness::start();

        // Seed a completed entry whose fingerprint matches the new locator's
        // but whose locator does not.
        h.index()
            .put(
                DownloadId(1),
                DownloadRecord {
                    locator: "https://mirror/b.bin".to_string(),
                    fingerprint: fingerprint("https://x/c.bin").await,
                },
            )
            .await
            .expect("seed");

        h.created(3, "https://x/c.bin").await;
        h.handle.wait_idle().await.expect("idle");

        assert_eq!(h.transfer.issued(), vec![Issued::Pause(DownloadId(3))]);
        assert_eq!(
            h.gateway.requests(),
            vec![(DownloadId(3), "https://x/c.bin".to_string())]
        );
        h.finish().await;
    }

    #[tokio::test]
    async fn non_duplicate_creation_is_not_flagged() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        h.handle.wait_idle().await.expect("idle");
        h.created(2, "https://x/b.bin").await;
        h.handle.wait_idle().await.expect("idle");

        assert!(h.transfer.issued().is_empty());
        assert!(h.gateway.requests().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn terminal_event_for_untracked_id_is_a_noop() {
        let h = Harness::start();
        h.state_changed(42, TransferState::Complete).await;
        h.state_changed(42, TransferState::Interrupted).await;
        h.handle.wait_idle().await.expect("idle");

        assert!(h.index().scan().await.expect("scan").is_empty());
        assert!(h.registry().scan().await.expect("scan").is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn duplicate_complete_event_does_not_record_twice() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        h.state_changed(1, TransferState::Complete).await;
        h.handle.wait_idle().await.expect("idle");

        assert_eq!(h.index().scan().await.expect("scan").len(), 1);
        assert_eq!(h.status_rx.borrow().completed_recorded, 1);
        h.finish().await;
    }

    #[tokio::test]
    async fn non_terminal_state_change_keeps_the_registry_entry() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Other).await;
        h.handle.wait_idle().await.expect("idle");

        assert!(h.registry().get(DownloadId(1)).await.expect("get").is_some());
        assert!(h.index().scan().await.expect("scan").is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn decisions_translate_into_transfer_commands() {
        let h = Harness::start();
        h.handle
            .apply_decision(Decision::Continue, DownloadId(7))
            .await
            .expect("continue");
        h.handle
            .apply_decision(Decision::Cancel, DownloadId(8))
            .await
            .expect("cancel");

        // Decisions run off the actor loop but are tracked, so wait_idle
        // covers them. Their relative order is not guaranteed.
        h.handle.wait_idle().await.expect("idle");
        let issued = h.transfer.issued();
        assert_eq!(issued.len(), 2);
        assert!(issued.contains(&Issued::Resume(DownloadId(7))));
        assert!(issued.contains(&Issued::Cancel(DownloadId(8))));
        h.finish().await;
    }

    #[tokio::test]
    async fn wait_idle_covers_slow_decision_commands() {
        let h = Harness::start_with(RecordingTransfer {
            delay_ms: 50,
            ..Default::default()
        });
        h.handle
            .apply_decision(Decision::Continue, DownloadId(7))
            .await
            .expect("continue");
        h.handle.wait_idle().await.expect("idle");
        assert_eq!(h.transfer.issued(), vec![Issued::Resume(DownloadId(7))]);
        h.finish().await;
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_decision_commands() {
        let h = Harness::start_with(RecordingTransfer {
            delay_ms: 50,
            ..Default::default()
        });
        h.handle
            .apply_decision(Decision::Cancel, DownloadId(9))
            .await
            .expect("cancel");

        let transfer = h.transfer.clone();
        // finish() joins the service task, which drains decision tasks
        // before returning.
        h.finish().await;
        assert_eq!(transfer.issued(), vec![Issued::Cancel(DownloadId(9))]);
    }

    #[tokio::test]
    async fn failed_pause_still_requests_a_decision_and_tracks_the_download() {
        let h = Harness::start_with(RecordingTransfer {
            fail_pause: true,
            ..Default::default()
        });
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        h.handle.wait_idle().await.expect("idle");
        h.created(2, "https://x/a.bin").await;
        h.handle.wait_idle().await.expect("idle");

        assert_eq!(h.gateway.requests().len(), 1);
        assert!(h.registry().get(DownloadId(2)).await.expect("get").is_some());
        h.finish().await;
    }

    #[tokio::test]
    async fn terminal_event_waits_for_its_creation_to_reconcile() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
        });
        let transfer = RecordingTransfer::default();
        let gateway = RecordingGateway::default();
        let (handle, _status_rx, join) = start_service(
            DedupServiceConfig::default(),
            store.clone(),
            Arc::new(transfer),
            Arc::new(gateway),
        );

        // The complete event lands while the creation is still suspended on
        // the store; it must queue behind it, not race it or be dropped.
        handle
            .submit_event(DownloadEvent::DownloadCreated {
                id: DownloadId(1),
                locator: "https://x/a.bin".to_string(),
            })
            .await
            .expect("created");
        handle
            .submit_event(DownloadEvent::DownloadStateChanged {
                id: DownloadId(1),
                new_state: TransferState::Complete,
            })
            .await
            .expect("complete");
        handle.wait_idle().await.expect("idle");

        let index = MappingTable::new(store.clone(), DOWNLOAD_LINKS_TABLE);
        let registry = MappingTable::new(store, PENDING_DOWNLOADS);
        assert_eq!(index.scan().await.expect("scan").len(), 1);
        assert!(registry.scan().await.expect("scan").is_empty());

        handle.shutdown().await.expect("shutdown");
        join.await.expect("join").expect("service");
    }

    #[tokio::test]
    async fn status_tracks_counters_and_shutdown() {
        let h = Harness::start();
        h.created(1, "https://x/a.bin").await;
        h.state_changed(1, TransferState::Complete).await;
        h.handle.wait_idle().await.expect("idle");
        h.created(2, "https://x/a.bin").await;
        h.state_changed(2, TransferState::Interrupted).await;
        h.handle.wait_idle().await.expect("idle");

        {
            let status = h.status_rx.borrow();
            assert!(status.running);
            assert_eq!(status.reconciling, 0);
            assert_eq!(status.flagged, 1);
            assert_eq!(status.completed_recorded, 1);
            assert_eq!(status.discarded, 1);
        }

        let status_rx = h.status_rx.clone();
        // finish() joins the service task, so the final status is published.
        h.finish().await;
        assert!(!status_rx.borrow().running);
    }
}
