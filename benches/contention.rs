use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::join_all;
use ulid::Ulid;

use sessiondesk::draft::{BookingDraft, SessionMode, SessionType, Student};
use sessiondesk::engine::{attempt_commit_booking, BookingFailure, Engine};
use sessiondesk::notify::NotifyHub;
use sessiondesk::policy::BookingPolicy;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
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

fn draft(n: usize) -> BookingDraft {
    BookingDraft {
        student: Student {
            student_id: format!("stu-{n}"),
            name: "Bench".into(),
            surname: format!("Student{n}"),
            email: format!("bench{n}@example.edu"),
            student_number: Some(format!("{:09}", 223_000_000 + n)),
        },
        session_type: SessionType::Individual,
        group_members: Vec::new(),
        reasons: vec!["Academic Performance".into()],
        other_reason: None,
        mode: SessionMode::Online,
        comments: None,
    }
}

fn fresh_engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join(format!("sessiondesk_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Engine::new(dir.join(name), Arc::new(NotifyHub::new())).unwrap()
}

/// Sequential commits filling every slot of one advisor's horizon.
async fn phase1_sequential(policy: &BookingPolicy, today: NaiveDate) {
    let engine = fresh_engine("sequential.journal");
    let mut latencies = Vec::new();
    let start = Instant::now();

    let dates = engine.bookable_dates("adv-seq", policy, today).await;
    for (d, date) in dates.iter().enumerate() {
        for (s, slot) in policy.slot_catalog.iter().enumerate() {
            let t = Instant::now();
            attempt_commit_booking(&engine, policy, "adv-seq", *date, &slot.label, &draft(d * 100 + s), today)
                .await
                .unwrap();
            latencies.push(t.elapsed());
        }
    }

    let elapsed = start.elapsed();
    let n = latencies.len();
    println!(
        "  {n} commits in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("commit latency", &mut latencies);
    assert!(engine.bookable_dates("adv-seq", policy, today).await.is_empty());
}

/// Many tasks racing for the same few slots: exactly one winner per slot.
async fn phase2_contended(policy: &BookingPolicy, today: NaiveDate) {
    let engine = Arc::new(fresh_engine("contended.journal"));
    let policy = Arc::new(policy.clone());
    let date = engine.bookable_dates("adv-hot", &policy, today).await[0];
    let n_tasks = 64;

    let start = Instant::now();
    let attempts = (0..n_tasks).map(|i| {
        let engine = engine.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            let slot = &policy.slot_catalog[i % 3].label;
            let t = Instant::now();
            let result =
                attempt_commit_booking(engine.as_ref(), &policy, "adv-hot", date, slot, &draft(i), today).await;
            (result, t.elapsed())
        })
    });
    let outcomes = join_all(attempts).await;
    let elapsed = start.elapsed();

    let mut wins = 0;
    let mut lost = 0;
    let mut latencies = Vec::new();
    for outcome in outcomes {
        let (result, latency) = outcome.unwrap();
        latencies.push(latency);
        match result {
            Ok(_) => wins += 1,
            Err(BookingFailure::SlotNoLongerAvailable) => lost += 1,
            Err(e) => panic!("unexpected failure: {e}"),
        }
    }
    println!(
        "  {n_tasks} racing commits on 3 slots in {:.2}ms: {wins} won, {lost} lost",
        elapsed.as_secs_f64() * 1000.0
    );
    print_latency("contended latency", &mut latencies);
    assert_eq!(wins, 3);
}

/// Independent advisors in parallel: group commit shares fsyncs across them.
async fn phase3_parallel_advisors(policy: &BookingPolicy, today: NaiveDate) {
    let engine = Arc::new(fresh_engine("parallel.journal"));
    let policy = Arc::new(policy.clone());
    let n_advisors = 20;

    let start = Instant::now();
    let tasks = (0..n_advisors).map(|a| {
        let engine = engine.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            let advisor = format!("adv-{a}");
            let dates = engine.bookable_dates(&advisor, &policy, today).await;
            let mut n = 0;
            for date in dates {
                for slot in &policy.slot_catalog {
                    attempt_commit_booking(engine.as_ref(), &policy, &advisor, date, &slot.label, &draft(n), today)
                        .await
                        .unwrap();
                    n += 1;
                }
            }
            n
        })
    });
    let total: usize = join_all(tasks).await.into_iter().map(|r| r.unwrap()).sum();
    let elapsed = start.elapsed();
    println!(
        "  {n_advisors} advisors, {total} commits in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );

    let t = Instant::now();
    let records = engine.compact_journal().await.unwrap();
    println!(
        "  compacted {records} records in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let policy = BookingPolicy::default();
    // A fixed Monday keeps the set of bookable dates stable between runs.
    let today = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();

    println!("phase 1: sequential commits");
    phase1_sequential(&policy, today).await;

    println!("phase 2: contended slots");
    phase2_contended(&policy, today).await;

    println!("phase 3: parallel advisors");
    phase3_parallel_advisors(&policy, today).await;
}
