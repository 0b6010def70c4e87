use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::compactor;
use crate::engine::{AppointmentStore, InMemoryStore, NotFoundTarget, SchedulingError};
use crate::limits::MAX_TENANTS;
use crate::model::*;
use crate::tenant::TenantId;
use crate::wal::Wal;

const WAL_CHANNEL_CAPACITY: usize = 4096;

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Rewrite the log as one booking per live appointment. Responds with
    /// the number of events written.
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns one tenant's WAL plus the latest durable version of every
/// appointment in it, which is what compaction writes back.
struct WalWriter {
    wal: Wal,
    latest: HashMap<Ulid, Appointment>,
}

impl WalWriter {
    fn compact(&mut self) -> io::Result<usize> {
        let mut appointments: Vec<&Appointment> = self.latest.values().collect();
        appointments.sort_by_key(|a| a.id);
        let events: Vec<Event> = appointments
            .into_iter()
            .map(|a| Event::AppointmentBooked { appointment: a.clone() })
            .collect();
        self.wal.rewrite(&events)?;
        Ok(events.len())
    }

    fn flush_batch(&mut self, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();

        let mut result = batch
            .iter()
            .try_for_each(|(event, _)| self.wal.append_buffered(event));
        if result.is_ok() {
            result = self.wal.flush_sync();
        }
        if result.is_err() {
            if let Err(e) = self.wal.discard_uncommitted() {
                error!("{}: WAL rollback failed, refusing further writes: {e}", self.wal.path().display());
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        result?;
        for (event, _) in batch {
            let appointment = event.appointment();
            self.latest.insert(appointment.id, appointment.clone());
        }
        Ok(())
    }

    fn handle_other(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { response } => {
                let _ = response.send(self.compact());
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { event, response } => {
                let batch = vec![(event, response)];
                let result = self.flush_batch(&batch);
                respond_batch(batch, &result);
            }
        }
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Group commit: block for the first append, drain whatever else is
/// already queued, then pay for one fsync across the whole batch.
async fn wal_writer_loop(mut writer: WalWriter, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            writer.handle_other(cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        let result = writer.flush_batch(&batch);
        if let Err(e) = &result {
            warn!("{}: WAL flush failed: {e}", writer.wal.path().display());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            writer.handle_other(cmd);
        }
    }
}

pub(crate) async fn request_compact(tx: &mpsc::Sender<WalCommand>) -> Result<usize, SchedulingError> {
    let (response, rx) = oneshot::channel();
    tx.send(WalCommand::Compact { response })
        .await
        .map_err(|_| writer_gone())?;
    rx.await
        .map_err(|_| writer_gone())?
        .map_err(|e| SchedulingError::Storage(e.to_string()))
}

pub(crate) async fn request_appends_since_compact(tx: &mpsc::Sender<WalCommand>) -> Result<u64, SchedulingError> {
    let (response, rx) = oneshot::channel();
    tx.send(WalCommand::AppendsSinceCompact { response })
        .await
        .map_err(|_| writer_gone())?;
    rx.await.map_err(|_| writer_gone())
}

fn writer_gone() -> SchedulingError {
    SchedulingError::Storage("WAL writer shut down".into())
}

struct Replayed {
    events: Vec<Event>,
    wal: Wal,
}

/// Replay and open a tenant's log on the blocking pool. With `create` unset
/// a missing file yields `None` and nothing is created.
async fn replay_tenant_log(path: PathBuf, create: bool) -> Result<Option<Replayed>, SchedulingError> {
    tokio::task::spawn_blocking(move || -> io::Result<Option<Replayed>> {
        if !create && !path.try_exists()? {
            return Ok(None);
        }
        let events = Wal::replay(&path)?;
        let wal = Wal::open(&path)?;
        Ok(Some(Replayed { events, wal }))
    })
    .await
    .map_err(|e| SchedulingError::Storage(format!("WAL replay task failed: {e}")))?
    .map_err(|e| SchedulingError::Storage(e.to_string()))
}

/// Appointment store backed by one write-ahead log per tenant.
///
/// Reads are served from memory. A write is acknowledged only after its
/// event is fsynced, and it reaches memory after that. Each tenant's log is
/// replayed the first time the tenant is touched. Only writes create a log;
/// reads for a tenant with nothing on disk leave no trace.
pub struct DurableStore {
    data_dir: PathBuf,
    compact_threshold: u64,
    memory: InMemoryStore,
    logs: DashMap<TenantId, mpsc::Sender<WalCommand>>,
}

impl DurableStore {
    /// Must be called inside a Tokio runtime: opening a tenant spawns its
    /// writer and compactor tasks.
    pub fn open(data_dir: impl Into<PathBuf>, compact_threshold: u64) -> io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            compact_threshold,
            memory: InMemoryStore::new(),
            logs: DashMap::new(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tenant_count(&self) -> usize {
        self.logs.len()
    }

    /// The tenant's writer channel, replaying its log on first use.
    /// Without `create`, a tenant with no log on disk is left untouched and
    /// `None` comes back.
    async fn log(
        &self,
        tenant: &TenantId,
        create: bool,
    ) -> Result<Option<mpsc::Sender<WalCommand>>, SchedulingError> {
        if let Some(tx) = self.logs.get(tenant) {
            return Ok(Some(tx.value().clone()));
        }
        if create && self.logs.len() >= MAX_TENANTS {
            return Err(SchedulingError::LimitExceeded("too many tenants"));
        }
        let path = self.data_dir.join(tenant.wal_file_name());
        let Some(Replayed { events, wal }) = replay_tenant_log(path.clone(), create).await? else {
            return Ok(None);
        };
        if self.logs.len() >= MAX_TENANTS {
            return Err(SchedulingError::LimitExceeded("too many tenants"));
        }

        let tx = match self.logs.entry(tenant.clone()) {
            // Another caller opened it while we were replaying.
            Entry::Occupied(e) => return Ok(Some(e.get().clone())),
            Entry::Vacant(e) => {
                let mut latest = HashMap::new();
                for event in &events {
                    let appointment = event.appointment();
                    if appointment.tenant_id != *tenant {
                        warn!("{}: skipping event for tenant {}", path.display(), appointment.tenant_id);
                        continue;
                    }
                    self.memory.apply_event(event);
                    latest.insert(appointment.id, appointment.clone());
                }
                info!("tenant {tenant}: replayed {} events, {} appointments", events.len(), latest.len());

                let (tx, rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
                tokio::spawn(wal_writer_loop(WalWriter { wal, latest }, rx));
                tokio::spawn(compactor::run_compactor(
                    tenant.clone(),
                    tx.downgrade(),
                    self.compact_threshold,
                    compactor::CHECK_INTERVAL,
                ));
                e.insert(tx.clone());
                tx
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.logs.len() as f64);
        Ok(Some(tx))
    }

    /// Writer channel for a tenant about to be written, creating its log.
    async fn log_for_write(&self, tenant: &TenantId) -> Result<mpsc::Sender<WalCommand>, SchedulingError> {
        self.log(tenant, true)
            .await?
            .ok_or_else(|| SchedulingError::Storage(format!("tenant {tenant}: WAL not opened")))
    }

    async fn wal_append(&self, tenant: &TenantId, event: Event) -> Result<(), SchedulingError> {
        let tx = self.log_for_write(tenant).await?;
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append { event, response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| SchedulingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| SchedulingError::Storage(e.to_string()))
    }

    /// Rewrite the tenant's log down to one event per appointment.
    pub async fn compact(&self, tenant: &TenantId) -> Result<usize, SchedulingError> {
        let Some(tx) = self.log(tenant, false).await? else {
            return Ok(0);
        };
        let written = request_compact(&tx).await?;
        info!("tenant {tenant}: compacted WAL to {written} events");
        Ok(written)
    }

    pub async fn appends_since_compact(&self, tenant: &TenantId) -> Result<u64, SchedulingError> {
        match self.log(tenant, false).await? {
            Some(tx) => request_appends_since_compact(&tx).await,
            None => Ok(0),
        }
    }
}

#[async_trait]
impl AppointmentStore for DurableStore {
    async fn get(&self, tenant: &TenantId, id: Ulid) -> Result<Option<Appointment>, SchedulingError> {
        self.log(tenant, false).await?;
        Ok(self.memory.get_sync(tenant, id))
    }

    async fn list(
        &self,
        tenant: &TenantId,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.log(tenant, false).await?;
        self.memory.list_sync(tenant, filter)
    }

    async fn find_by_provider_and_date(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        exclude_cancelled: bool,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.log(tenant, false).await?;
        Ok(self
            .memory
            .find_by_provider_and_date_sync(tenant, provider_id, date, exclude_cancelled))
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        let tenant = &appointment.tenant_id;
        self.log_for_write(tenant).await?;
        if self.memory.get_sync(tenant, appointment.id).is_some() {
            return Err(SchedulingError::Storage(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }
        self.wal_append(tenant, Event::AppointmentBooked { appointment: appointment.clone() })
            .await?;
        self.memory.insert_sync(appointment)
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        let tenant = &appointment.tenant_id;
        self.log(tenant, false).await?;
        if self.memory.get_sync(tenant, appointment.id).is_none() {
            return Err(SchedulingError::NotFound(NotFoundTarget::Appointment(appointment.id)));
        }
        self.wal_append(tenant, Event::AppointmentRevised { appointment: appointment.clone() })
            .await?;
        self.memory.update_sync(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("schedula_test_durable")
            .join(format!("{name}_{}", Ulid::new()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    fn appt(tenant_id: &TenantId, start: &str, end: &str) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Ulid::new(),
            tenant_id: tenant_id.clone(),
            client_id: Ulid::new(),
            provider_id: Ulid::new(),
            service_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            status: AppointmentStatus::Scheduled,
            price: dec!(60.00),
            notes: Some("first visit".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reopen_replays_inserts_and_updates() {
        let dir = test_data_dir("reopen");
        let t = tenant("clinic");
        let mut a = appt(&t, "09:00", "10:00");
        let b = appt(&t, "11:00", "12:00");
        {
            let store = DurableStore::open(&dir, 1000).unwrap();
            store.insert(&a).await.unwrap();
            store.insert(&b).await.unwrap();
            a.status = AppointmentStatus::Confirmed;
            store.update(&a).await.unwrap();
        }

        let store = DurableStore::open(&dir, 1000).unwrap();
        assert_eq!(store.get(&t, a.id).await.unwrap(), Some(a.clone()));
        assert_eq!(store.get(&t, b.id).await.unwrap(), Some(b));
        assert_eq!(store.appends_since_compact(&t).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn truncated_tail_loses_only_the_torn_write() {
        let dir = test_data_dir("torn");
        let t = tenant("clinic");
        let a = appt(&t, "09:00", "10:00");
        let b = appt(&t, "10:00", "11:00");
        {
            let store = DurableStore::open(&dir, 1000).unwrap();
            store.insert(&a).await.unwrap();
            store.insert(&b).await.unwrap();
        }
        let path = dir.join(t.wal_file_name());
        let len = fs::metadata(&path).unwrap().len();
        fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 2).unwrap();

        let store = DurableStore::open(&dir, 1000).unwrap();
        assert_eq!(store.get(&t, a.id).await.unwrap(), Some(a));
        assert_eq!(store.get(&t, b.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn compaction_keeps_latest_versions() {
        let dir = test_data_dir("compact");
        let t = tenant("clinic");
        let mut a = appt(&t, "09:00", "10:00");
        {
            let store = DurableStore::open(&dir, 1000).unwrap();
            store.insert(&a).await.unwrap();
            for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
                a.status = status;
                store.update(&a).await.unwrap();
            }
            assert_eq!(store.appends_since_compact(&t).await.unwrap(), 3);
            assert_eq!(store.compact(&t).await.unwrap(), 1);
            assert_eq!(store.appends_since_compact(&t).await.unwrap(), 0);
        }

        let events = Wal::replay(&dir.join(t.wal_file_name())).unwrap();
        assert_eq!(events, vec![Event::AppointmentBooked { appointment: a.clone() }]);

        let store = DurableStore::open(&dir, 1000).unwrap();
        assert_eq!(store.get(&t, a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn tenants_get_separate_logs() {
        let dir = test_data_dir("isolation");
        let store = DurableStore::open(&dir, 1000).unwrap();
        let (ta, tb) = (tenant("tenant_a"), tenant("tenant_b"));
        let a = appt(&ta, "09:00", "10:00");
        store.insert(&a).await.unwrap();

        let b = appt(&tb, "09:00", "10:00");
        store.insert(&b).await.unwrap();

        assert_eq!(store.get(&tb, a.id).await.unwrap(), None);
        assert_eq!(store.list(&tb, &AppointmentFilter::default()).await.unwrap(), vec![b.clone()]);
        assert_eq!(store.tenant_count(), 2);
        assert_eq!(
            Wal::replay(&dir.join("tenant_a.wal")).unwrap(),
            vec![Event::AppointmentBooked { appointment: a }]
        );
        assert_eq!(
            Wal::replay(&dir.join("tenant_b.wal")).unwrap(),
            vec![Event::AppointmentBooked { appointment: b }]
        );
    }

    #[tokio::test]
    async fn reads_for_unknown_tenants_leave_no_trace() {
        let dir = test_data_dir("no_trace");
        let store = DurableStore::open(&dir, 1000).unwrap();
        for i in 0..5 {
            let t = tenant(&format!("nobody{i}"));
            assert_eq!(store.get(&t, Ulid::new()).await.unwrap(), None);
            assert!(store.list(&t, &AppointmentFilter::default()).await.unwrap().is_empty());
            assert!(store
                .find_by_provider_and_date(&t, Ulid::new(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), true)
                .await
                .unwrap()
                .is_empty());
            assert_eq!(store.appends_since_compact(&t).await.unwrap(), 0);
        }
        assert_eq!(store.tenant_count(), 0);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn first_read_replays_an_existing_log() {
        let dir = test_data_dir("read_replay");
        let t = tenant("clinic");
        let a = appt(&t, "09:00", "10:00");
        {
            let store = DurableStore::open(&dir, 1000).unwrap();
            store.insert(&a).await.unwrap();
        }

        let store = DurableStore::open(&dir, 1000).unwrap();
        assert_eq!(store.tenant_count(), 0);
        assert_eq!(store.list(&t, &AppointmentFilter::default()).await.unwrap(), vec![a]);
        assert_eq!(store.tenant_count(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_appointment_writes_nothing() {
        let dir = test_data_dir("ghost");
        let store = DurableStore::open(&dir, 1000).unwrap();
        let t = tenant("clinic");
        let ghost = appt(&t, "09:00", "10:00");
        assert!(matches!(
            store.update(&ghost).await,
            Err(SchedulingError::NotFound(NotFoundTarget::Appointment(_)))
        ));
        assert_eq!(store.appends_since_compact(&t).await.unwrap(), 0);
        assert!(!dir.join(t.wal_file_name()).exists());
    }

    #[tokio::test]
    async fn concurrent_inserts_all_become_durable() {
        let dir = test_data_dir("group_commit");
        let t = tenant("clinic");
        let appointments: Vec<Appointment> = (0..50).map(|_| appt(&t, "09:00", "10:00")).collect();
        {
            let store = std::sync::Arc::new(DurableStore::open(&dir, 1000).unwrap());
            let handles: Vec<_> = appointments
                .iter()
                .cloned()
                .map(|a| {
                    let store = store.clone();
                    tokio::spawn(async move { store.insert(&a).await })
                })
                .collect();
            for h in handles {
                h.await.unwrap().unwrap();
            }
        }

        let store = DurableStore::open(&dir, 1000).unwrap();
        let listed = store.list(&t, &AppointmentFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 50);
    }
}
