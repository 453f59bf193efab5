//! Cross-module scenarios for the pool and timer together.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use job_pool::{FireTime, PoolAttr, Priority, ThreadPool, TimeoutKind, TimerService};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_starved_jobs_overtake_in_promotion_order() {
    init_logging();
    // a single worker, fast aging: low promotes at 50ms, med at 100ms
    let pool = ThreadPool::start(
        PoolAttr::new()
            .with_thread_range(1, Some(1))
            .with_jobs_per_thread(100)
            .with_max_idle_time(Duration::from_millis(50))
            .with_starvation_time(Duration::from_millis(100)),
    )
    .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    {
        let order = Arc::clone(&order);
        pool.add_job(Priority::High, move || {
            order.lock().unwrap().push("high");
            started_tx.send(()).unwrap();
            // hold the only worker long enough for both waiters to age
            thread::sleep(Duration::from_millis(200));
        })
        .unwrap();
    }
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    {
        let order = Arc::clone(&order);
        pool.add_job(Priority::Low, move || {
            order.lock().unwrap().push("low");
            done_tx.send(()).unwrap();
        })
        .unwrap();
    }
    {
        let order = Arc::clone(&order);
        pool.add_job(Priority::Med, move || {
            order.lock().unwrap().push("med");
        })
        .unwrap();
    }

    // by the time the spinner finishes, the medium job has been promoted
    // to high first and the low job has climbed behind it
    done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["high", "med", "low"]);
    pool.shutdown();
}

#[test]
fn test_pool_respects_thread_bounds_under_load() {
    let pool = ThreadPool::start(
        PoolAttr::new()
            .with_thread_range(2, Some(4))
            .with_jobs_per_thread(1),
    )
    .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    for _ in 0..20 {
        let done = done_tx.clone();
        pool.add_job(Priority::Med, move || {
            thread::sleep(Duration::from_millis(10));
            let _ = done.send(());
        })
        .unwrap();
    }
    for _ in 0..20 {
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    let stats = pool.stats();
    assert!(stats.max_threads <= 4, "max observed: {}", stats.max_threads);
    assert!(stats.total_threads >= 2);
    assert_eq!(stats.total_jobs_mq, 20);
    pool.shutdown();
}

#[test]
fn test_timer_fires_into_pool_with_expected_delay() {
    let pool = ThreadPool::start(PoolAttr::new().with_thread_range(1, Some(3))).unwrap();
    let timer = TimerService::start(&pool).unwrap();

    let (tx, rx) = mpsc::channel();
    let queued_at = Instant::now();
    timer
        .schedule(
            TimeoutKind::ShortTerm,
            FireTime::RelSec(1),
            Priority::High,
            move || {
                tx.send(queued_at.elapsed()).unwrap();
            },
        )
        .unwrap();

    let elapsed = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert!(elapsed >= Duration::from_secs(1), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "fired late: {elapsed:?}");

    timer.shutdown();
    pool.shutdown();
}

#[test]
fn test_idle_workers_retire_to_minimum() {
    let pool = ThreadPool::start(
        PoolAttr::new()
            .with_thread_range(1, Some(4))
            .with_jobs_per_thread(1)
            .with_max_idle_time(Duration::from_millis(50)),
    )
    .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    for _ in 0..8 {
        let done = done_tx.clone();
        pool.add_job(Priority::Med, move || {
            thread::sleep(Duration::from_millis(5));
            let _ = done.send(());
        })
        .unwrap();
    }
    for _ in 0..8 {
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    // give the extra workers a few idle timeouts to wind down
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if pool.stats().total_threads == 1 || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(pool.stats().total_threads, 1);
    pool.shutdown();
}
