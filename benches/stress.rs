use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use headcount::engine::{Engine, EngineError, EngineSettings};
use headcount::model::{NewQuotaRange, ReservationSubmission};

fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("headcount_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    Arc::new(Engine::new(dir.join(name), EngineSettings::default()).expect("open engine"))
}

fn day(base: NaiveDate, offset: u64) -> NaiveDate {
    base.checked_add_days(Days::new(offset)).expect("date in range")
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn submission(employee: usize, start: NaiveDate, len: u64) -> ReservationSubmission {
    ReservationSubmission {
        employee_id: format!("emp-{employee}"),
        start_date: start,
        end_date: Some(day(start, len.saturating_sub(1))),
        unit: None,
        order_number: None,
        funding_source: None,
    }
}

async fn setup(engine: &Engine, base: NaiveDate) {
    let summary = engine
        .create_quota_range(NewQuotaRange {
            start_date: base,
            end_date: Some(day(base, 364)),
            quota: 40,
            notes: None,
            created_by: Some("bench".into()),
        })
        .await
        .expect("quota range");
    println!("  created {} quotas", summary.created);
}

async fn phase1_sequential(engine: &Engine, base: NaiveDate) {
    let n = 2_000;
    let start = Instant::now();
    for i in 0..n {
        engine
            .record_reservation(submission(i, day(base, (i % 300) as u64), 5))
            .await
            .expect("reservation");
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} reservations in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
}

async fn phase2_concurrent(engine: &Arc<Engine>, base: NaiveDate) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let employee = 10_000 + t * n_per_task + j;
                engine
                    .record_reservation(submission(employee, day(base, (j % 300) as u64), 3))
                    .await
                    .expect("reservation");
            }
        }));
    }
    for h in handles {
        h.await.expect("writer task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase3_occupancy_under_load(engine: &Arc<Engine>, base: NaiveDate) {
    let writer_engine = engine.clone();
    let writer = tokio::spawn(async move {
        for i in 0..1_000 {
            let _ = writer_engine
                .record_reservation(submission(50_000 + i, day(base, (i % 200) as u64), 7))
                .await;
        }
    });

    let mut full = Vec::new();
    let mut counts_only = Vec::new();
    for i in 0..200u64 {
        let from = day(base, i % 60);
        let to = day(from, 29);

        let t = Instant::now();
        engine.occupancy_range(from, to, false).await.expect("occupancy");
        full.push(t.elapsed());

        let t = Instant::now();
        engine.occupancy_range(from, to, true).await.expect("occupancy");
        counts_only.push(t.elapsed());
    }
    writer.await.expect("writer task");

    print_latency("30-day occupancy with summary", &mut full);
    print_latency("30-day occupancy counts only", &mut counts_only);
}

async fn phase4_manager_report_contention(engine: &Arc<Engine>, base: NaiveDate) {
    let n_dates = 100u64;
    let n_reporters = 8;

    let start = Instant::now();
    let mut handles = Vec::new();
    for r in 0..n_reporters {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            let mut won = 0u32;
            for i in 0..n_dates {
                let t = Instant::now();
                match engine
                    .submit_manager_report(day(base, i), Some(format!("manager-{r}")))
                    .await
                {
                    Ok(_) => won += 1,
                    Err(EngineError::AlreadyReported { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut wins = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (won, mut l) = h.await.expect("reporter task");
        wins += won;
        latencies.append(&mut l);
    }
    println!(
        "  {n_reporters} reporters x {n_dates} dates in {:.2}s, {wins} accepted",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(wins as u64, n_dates, "each date must accept exactly one report");
    print_latency("manager report", &mut latencies);
}

#[tokio::main]
async fn main() {
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");

    println!("=== headcount stress benchmark ===\n");
    let engine = open_engine("stress.wal");

    println!("[setup]");
    setup(&engine, base).await;

    println!("\n[phase 1] sequential reservation throughput");
    phase1_sequential(&engine, base).await;

    println!("\n[phase 2] concurrent reservation throughput");
    phase2_concurrent(&engine, base).await;

    println!("\n[phase 3] occupancy latency under write load");
    phase3_occupancy_under_load(&engine, base).await;

    println!("\n[phase 4] manager report contention");
    phase4_manager_report_contention(&engine, base).await;

    println!("\n=== benchmark complete ===");
}
