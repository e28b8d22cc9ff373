mod attendance;
mod bulk;
mod documents;
mod error;
mod occupancy;
mod quota;
mod reservations;
mod roster;
mod store;
mod validate;

pub use attendance::ends_consecutive_run;
pub use bulk::{BulkItemError, BulkItemResult, BulkStatus, BulkSummary};
pub use error::{EngineError, ErrorCode};
pub use occupancy::{
    capacity_left, capacity_left_percent, count_occupancy, occupancy_rate, summarize, OccupancyReport,
};
pub use quota::{RangeDelete, RangeWrite};
pub use store::{InMemoryStore, SharedQuotaSlot, SharedReservation};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex, RwLock, RwLockReadGuard};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, then pays for one fsync and answers every caller in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Runtime knobs the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on every lock acquisition and WAL round-trip.
    pub store_timeout: Duration,
    /// Form whose schema describes reservation submissions.
    pub reservation_form: String,
    /// Field of that form holding the employee reference.
    pub employee_field: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            reservation_form: "reserve_days".into(),
            employee_field: "employee".into(),
        }
    }
}

/// The scheduling engine: quota store, occupancy calculator, attendance
/// ledger and the reference data they read, behind one handle.
pub struct Engine {
    pub(crate) store: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    settings: EngineSettings,
    /// Mutations hold it shared from before their record lock until the
    /// event is applied; compaction holds it exclusively from snapshot to swap.
    compaction_gate: RwLock<()>,
    /// Serializes form-document writes (check, persist, apply).
    document_writes: Mutex<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// from inside a tokio runtime.
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        for event in &events {
            store.replay(event);
        }
        tracing::info!(
            events = events.len(),
            quotas = store.quota_count(),
            reservations = store.reservation_count(),
            "engine state restored"
        );

        Ok(Self {
            store,
            wal_tx,
            settings,
            compaction_gate: RwLock::new(()),
            document_writes: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn quota_count(&self) -> usize {
        self.store.quota_count()
    }

    pub fn reservation_count(&self) -> usize {
        self.store.reservation_count()
    }

    /// Run `fut` under the store deadline.
    pub(super) async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, EngineError> {
        tokio::time::timeout(self.settings.store_timeout, fut)
            .await
            .map_err(|_| EngineError::Timeout(what))
    }

    /// Shared side of the compaction gate. Take it before any record lock and
    /// keep it until the event is applied.
    pub(super) async fn mutation_gate(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        self.bounded("compaction gate", self.compaction_gate.read()).await
    }

    pub(super) async fn document_write_lock(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, EngineError> {
        self.bounded("document lock", self.document_writes.lock()).await
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Durably record `event` before the caller applies it.
    ///
    /// Only the enqueue is bounded. Once the writer owns the event it will be
    /// written, so the caller must wait for the outcome and apply on success.
    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.bounded("WAL append", self.wal_tx.send(cmd))
            .await?
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }

    /// Rewrite the WAL as the minimal event list that recreates current state.
    /// No mutation can land between the snapshot and the file swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.bounded("compaction gate", self.compaction_gate.write()).await?;
        let mut events: Vec<Event> = Vec::new();
        for (form, fields) in self.store.all_schemas() {
            events.push(Event::SchemaRegistered {
                form,
                fields: fields.as_ref().clone(),
            });
        }
        for document in self.store.all_documents() {
            events.push(Event::DocumentUpserted { document });
        }
        for (_, slot) in self.store.quota_slots(None) {
            let guard = self.bounded("quota read", slot.read()).await?;
            if let Some(quota) = guard.as_ref() {
                events.push(Event::QuotaCreated { quota: quota.clone() });
            }
        }
        for res in self.store.all_reservations() {
            let guard = self.bounded("reservation read", res.read()).await?;
            events.push(Event::ReservationRecorded {
                reservation: guard.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
