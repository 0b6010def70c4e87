use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::durable::{WalCommand, request_appends_since_compact, request_compact};
use crate::tenant::TenantId;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts one tenant's WAL once it has taken
/// `threshold` appends since the last rewrite. Exits when the writer does.
pub(crate) async fn run_compactor(
    tenant: TenantId,
    wal: mpsc::WeakSender<WalCommand>,
    threshold: u64,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(tx) = wal.upgrade() else {
            debug!("tenant {tenant}: WAL writer gone, compactor exiting");
            return;
        };
        let appends = match request_appends_since_compact(&tx).await {
            Ok(n) => n,
            Err(e) => {
                debug!("tenant {tenant}: compactor exiting: {e}");
                return;
            }
        };
        if appends < threshold {
            continue;
        }
        match request_compact(&tx).await {
            Ok(written) => info!("tenant {tenant}: compacted {appends} appends into {written} events"),
            Err(e) => warn!("tenant {tenant}: compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::DurableStore;
    use crate::engine::AppointmentStore;
    use crate::model::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir()
            .join("schedula_test_compactor")
            .join(format!("{name}_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test(start_paused = true)]
    async fn compacts_once_threshold_reached() {
        let dir = test_data_dir("threshold");
        let store = DurableStore::open(&dir, 3).unwrap();
        let t = TenantId::new("clinic").unwrap();
        let now = Utc::now();
        let mut a = Appointment {
            id: Ulid::new(),
            tenant_id: t.clone(),
            client_id: Ulid::new(),
            provider_id: Ulid::new(),
            service_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: "09:00".parse().unwrap(),
            end_time: "10:00".parse().unwrap(),
            status: AppointmentStatus::Scheduled,
            price: dec!(10),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        store.insert(&a).await.unwrap();
        a.status = AppointmentStatus::Confirmed;
        store.update(&a).await.unwrap();
        a.status = AppointmentStatus::Completed;
        store.update(&a).await.unwrap();
        assert_eq!(store.appends_since_compact(&t).await.unwrap(), 3);

        // The store's compactor ticks every CHECK_INTERVAL.
        tokio::time::sleep(CHECK_INTERVAL * 2).await;

        assert_eq!(store.appends_since_compact(&t).await.unwrap(), 0);
        assert_eq!(store.get(&t, a.id).await.unwrap(), Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_writer_dropped() {
        let (tx, _rx) = mpsc::channel::<WalCommand>(1);
        let weak = tx.downgrade();
        drop(tx);
        let handle = tokio::spawn(run_compactor(
            TenantId::new("gone").unwrap(),
            weak,
            1,
            Duration::from_millis(10),
        ));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("compactor should exit")
            .unwrap();
    }
}
