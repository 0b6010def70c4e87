use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal_macros::dec;
use ulid::Ulid;

use schedula::catalog::StaticCatalog;
use schedula::collaborators::SystemClock;
use schedula::config::Config;
use schedula::durable::DurableStore;
use schedula::engine::{Collaborators, Scheduler, SchedulingError};
use schedula::model::*;
use schedula::tenant::TenantId;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Hour-long starts inside a 09:00-18:00 window.
const HOURLY_STARTS: [&str; 9] = [
    "09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00", "17:00",
];

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Bench {
    scheduler: Arc<Scheduler>,
    catalog: Arc<StaticCatalog>,
    service: Ulid,
}

impl Bench {
    fn open(config: &Config) -> Self {
        let catalog = Arc::new(StaticCatalog::new());
        let store = DurableStore::open(&config.data_dir, config.compact_threshold).expect("open store");
        let scheduler = Scheduler::new(
            config.scheduler_options(),
            Collaborators {
                services: catalog.clone(),
                schedules: catalog.clone(),
                pricing: catalog.clone(),
                store: Arc::new(store),
                clock: Arc::new(SystemClock),
            },
        );
        Self {
            scheduler: Arc::new(scheduler),
            catalog,
            service: Ulid::new(),
        }
    }

    /// A tenant with the hour-long service and a provider open every day.
    fn tenant(&self) -> (TenantId, Ulid) {
        let tenant = TenantId::new(format!("bench_{}", Ulid::new())).expect("tenant id");
        self.catalog.add_service(
            tenant.clone(),
            self.service,
            ServiceInfo { duration_minutes: 60, default_price: dec!(50) },
        );
        (tenant, self.provider())
    }

    fn provider(&self) -> Ulid {
        let provider = Ulid::new();
        for day in WEEKDAYS {
            self.catalog.set_working_window(
                provider,
                day,
                ProviderWorkingWindow {
                    start_time: "09:00".parse().expect("time"),
                    end_time: "18:00".parse().expect("time"),
                    is_available: true,
                },
            );
        }
        provider
    }

    fn request(&self, provider: Ulid, date: NaiveDate, start: &str) -> NewAppointment {
        NewAppointment {
            client_id: Ulid::new(),
            provider_id: provider,
            service_id: self.service,
            date,
            start_time: start.parse().expect("time"),
            price: None,
            notes: None,
        }
    }
}

fn day(offset: usize) -> NaiveDate {
    let base = NaiveDate::from_ymd_opt(2026, 1, 5).expect("date");
    base + chrono::Duration::days(offset as i64)
}

async fn phase1_sequential(bench: &Bench) {
    let (tenant, provider) = bench.tenant();
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let req = bench.request(provider, day(i / HOURLY_STARTS.len()), HOURLY_STARTS[i % HOURLY_STARTS.len()]);
        let t = Instant::now();
        bench
            .scheduler
            .create_appointment(&tenant, req)
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create_appointment", &mut latencies);
}

async fn phase2_concurrent(bench: &Bench) {
    let n_tasks = 10;
    let n_per_task = 200;
    let (tenant, _) = bench.tenant();

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let scheduler = bench.scheduler.clone();
        let tenant = tenant.clone();
        let provider = bench.provider();
        let requests: Vec<NewAppointment> = (0..n_per_task)
            .map(|j| bench.request(provider, day(j / HOURLY_STARTS.len()), HOURLY_STARTS[j % HOURLY_STARTS.len()]))
            .collect();
        handles.push(tokio::spawn(async move {
            for req in requests {
                scheduler
                    .create_appointment(&tenant, req)
                    .await
                    .expect("concurrent booking");
            }
        }));
    }
    for h in handles {
        h.await.expect("task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention(bench: &Bench) {
    let (tenant, provider) = bench.tenant();
    let n_tasks = 32;
    let days = 20;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let scheduler = bench.scheduler.clone();
        let tenant = tenant.clone();
        let requests: Vec<NewAppointment> = (0..days)
            .flat_map(|d| HOURLY_STARTS.iter().map(move |s| (d, *s)))
            .map(|(d, s)| bench.request(provider, day(d), s))
            .collect();
        handles.push(tokio::spawn(async move {
            let (mut won, mut lost) = (0usize, 0usize);
            for req in requests {
                match scheduler.create_appointment(&tenant, req).await {
                    Ok(_) => won += 1,
                    Err(SchedulingError::SchedulingConflict(_)) => lost += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (won, lost)
        }));
    }

    let (mut won, mut lost) = (0, 0);
    for h in handles {
        let (w, l) = h.await.expect("task");
        won += w;
        lost += l;
    }
    let elapsed = start.elapsed();
    let slots = days * HOURLY_STARTS.len();
    println!(
        "  {n_tasks} tasks racing for {slots} slots: {won} booked, {lost} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, slots, "every slot should be booked exactly once");
}

async fn phase4_slots_under_load(bench: &Bench) {
    let (tenant, provider) = bench.tenant();
    let days = 30;

    let writer = {
        let scheduler = bench.scheduler.clone();
        let tenant = tenant.clone();
        let requests: Vec<NewAppointment> = (0..days)
            .flat_map(|d| HOURLY_STARTS.iter().step_by(2).map(move |s| (d, *s)))
            .map(|(d, s)| bench.request(provider, day(d), s))
            .collect();
        tokio::spawn(async move {
            for req in requests {
                let _ = scheduler.create_appointment(&tenant, req).await;
            }
        })
    };

    let mut readers = Vec::new();
    for r in 0..4 {
        let scheduler = bench.scheduler.clone();
        let tenant = tenant.clone();
        let service = bench.service;
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for i in 0..500 {
                let t = Instant::now();
                scheduler
                    .available_slots(&tenant, provider, day((i + r) % days), Some(service))
                    .await
                    .expect("slots");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    writer.await.expect("writer");
    let mut latencies = Vec::new();
    for r in readers {
        latencies.extend(r.await.expect("reader"));
    }
    print_latency("available_slots", &mut latencies);

    let sample = bench
        .scheduler
        .available_slots(&tenant, provider, day(0), Some(bench.service))
        .await
        .expect("slots");
    println!("  {} open slots left on {} ({})", sample.len(), day(0), day(0).weekday());
}

#[tokio::main]
async fn main() {
    schedula::observability::init_tracing();

    let mut config = Config::from_env();
    if std::env::var("SCHEDULA_DATA_DIR").is_err() {
        config.data_dir = std::env::temp_dir().join(format!("schedula_bench_{}", Ulid::new()));
    }
    if let Err(e) = schedula::observability::init_metrics(config.metrics_port) {
        eprintln!("metrics exporter not installed: {e}");
    }

    println!("=== schedula stress benchmark ===");
    println!("data_dir: {}\n", config.data_dir.display());

    let bench = Bench::open(&config);

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&bench).await;

    println!("\n[phase 3] contention on identical slots");
    phase3_contention(&bench).await;

    println!("\n[phase 4] slot query latency under write load");
    phase4_slots_under_load(&bench).await;

    println!("\n=== benchmark complete ===");
}
