use esox_resourcepool::{Fairness, LeakMode, Pool, PoolConfiguration, PoolError, PoolSource, Scheduler};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("refused")]
struct Refused;

#[derive(Debug)]
struct Conn {
    id: usize,
}

/// Source recording every resource it has open
#[derive(Default)]
struct Tracking {
    next_id: AtomicUsize,
    live: DashMap<usize, Instant>,
    peak: AtomicUsize,
    broken: AtomicBool,
    shut_down: AtomicBool,
}

/// Pool-side handle on a shared [`Tracking`]
struct Source(Arc<Tracking>);

impl Deref for Source {
    type Target = Tracking;

    fn deref(&self) -> &Tracking {
        &self.0
    }
}

impl PoolSource for Source {
    type Resource = Conn;
    type Error = Refused;

    fn create(&self) -> Result<Conn, Refused> {
        if self.broken.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
            return Err(Refused);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.insert(id, Instant::now());
        self.peak.fetch_max(self.live.len(), Ordering::SeqCst);
        Ok(Conn { id })
    }

    fn destroy(&self, conn: Conn) -> Result<(), Refused> {
        self.live.remove(&conn.id);
        Ok(())
    }

    fn validate(&self, conn: &Conn) -> Result<bool, Refused> {
        Ok(self.live.contains_key(&conn.id))
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

fn new_pool(config: PoolConfiguration) -> (Pool<Source>, Arc<Tracking>) {
    let source = Arc::new(Tracking::default());
    let pool = Pool::with_scheduler("it", Source(Arc::clone(&source)), config, Arc::new(Scheduler::new())).unwrap();
    (pool, source)
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_single_resource_is_shared_in_turn() {
    let (pool, source) = new_pool(PoolConfiguration::default().with_max_open(1));

    let started = Instant::now();
    let first = pool.acquire().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    let first_id = first.id;

    let second_pool = pool.clone();
    let second = thread::spawn(move || {
        let conn = second_pool.acquire().unwrap();
        let id = conn.id;
        second_pool.release(conn).unwrap();
        id
    });

    assert!(wait_for(|| pool.waiting_count() == 1));
    thread::sleep(Duration::from_millis(50));
    assert!(!second.is_finished());

    pool.release(first).unwrap();
    assert_eq!(second.join().unwrap(), first_id);
    assert_eq!(source.next_id.load(Ordering::SeqCst), 1);
}

#[test]
fn test_idle_resources_are_evicted() {
    let (pool, source) = new_pool(PoolConfiguration::default().with_max_idle(Duration::from_millis(100)));

    let conn = pool.acquire().unwrap();
    pool.release(conn).unwrap();
    assert_eq!(pool.size(), 1);

    thread::sleep(Duration::from_millis(500));
    assert!(wait_for(|| pool.size() == 0));
    assert!(source.live.is_empty());
    assert_eq!(pool.get_metrics().evicted, 1);
}

#[test]
fn test_broken_source_fails_fast() {
    let config = PoolConfiguration::default()
        .with_give_up(Duration::from_millis(100))
        .with_give_up_broken(Duration::from_millis(1));
    let (pool, source) = new_pool(config);
    source.broken.store(true, Ordering::SeqCst);

    let started = Instant::now();
    let err = pool.acquire().unwrap_err();
    let first = started.elapsed();
    assert!(matches!(err, PoolError::Source(_)), "got {err:?}");
    assert!(first >= Duration::from_millis(100));
    assert!(first < Duration::from_secs(1));

    let started = Instant::now();
    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::Source(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_millis(100));

    let health = pool.get_health_status();
    assert!(!health.is_healthy());
    assert!(pool.get_metrics().failing);
}

#[test]
fn test_dropped_lease_is_reported_as_leak() {
    let (pool, _source) = new_pool(PoolConfiguration::default().with_leak_mode(LeakMode::On));

    let conn = pool.acquire().unwrap();
    assert_eq!(pool.size(), 1);
    drop(conn);

    // Any acquire prompts maintenance, which sweeps for leaks
    assert!(wait_for(|| {
        if let Ok(conn) = pool.acquire() {
            pool.release(conn).unwrap();
        }
        pool.get_metrics().leaks_detected == 1
    }));
    assert!(wait_for(|| pool.size() == 1));
}

#[test]
fn test_fifo_serves_waiters_in_arrival_order() {
    let config = PoolConfiguration::default()
        .with_max_open(1)
        .with_fairness(Fairness::Fifo);
    let (pool, _source) = new_pool(config);
    let held = pool.acquire().unwrap();

    let served = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..5 {
        let waiter_pool = pool.clone();
        let served = Arc::clone(&served);
        waiters.push(thread::spawn(move || {
            let conn = waiter_pool.acquire().unwrap();
            served.lock().push(i);
            waiter_pool.release(conn).unwrap();
        }));
        assert!(wait_for(|| pool.waiting_count() == i + 1));
    }

    pool.release(held).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*served.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_lifo_serves_newest_waiter_first() {
    let config = PoolConfiguration::default()
        .with_max_open(1)
        .with_fairness(Fairness::Lifo);
    let (pool, _source) = new_pool(config);
    let held = pool.acquire().unwrap();

    let served = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..3 {
        let waiter_pool = pool.clone();
        let served = Arc::clone(&served);
        waiters.push(thread::spawn(move || {
            let conn = waiter_pool.acquire().unwrap();
            served.lock().push(i);
            waiter_pool.release(conn).unwrap();
        }));
        assert!(wait_for(|| pool.waiting_count() == i + 1));
    }

    pool.release(held).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*served.lock(), vec![2, 1, 0]);
}

#[test]
fn test_shutdown_returns_idle_resources_to_source() {
    let (pool, source) = new_pool(PoolConfiguration::default());
    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    for lease in leases {
        pool.release(lease).unwrap();
    }
    assert_eq!(source.live.len(), 3);

    pool.shutdown();
    assert!(wait_for(|| source.shut_down.load(Ordering::SeqCst)));
    assert!(source.live.is_empty());
    assert_eq!(pool.get_metrics().destroyed, 3);
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_shutdown_waits_for_checked_out_resources() {
    let (pool, source) = new_pool(PoolConfiguration::default());
    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

    let started = Instant::now();
    pool.shutdown();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(matches!(pool.acquire(), Err(PoolError::Shutdown)));

    thread::sleep(Duration::from_millis(100));
    assert!(!source.shut_down.load(Ordering::SeqCst));

    let mut leases = leases.into_iter();
    if let Some(lease) = leases.next() {
        pool.abandon(lease).unwrap();
    }
    for lease in leases {
        pool.release(lease).unwrap();
    }

    assert!(wait_for(|| source.shut_down.load(Ordering::SeqCst)));
    assert!(source.live.is_empty());
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_shutdown_aborts_waiters() {
    let config = PoolConfiguration::default()
        .with_max_open(1)
        .with_give_up(Duration::from_secs(30));
    let (pool, _source) = new_pool(config);
    let held = pool.acquire().unwrap();

    let waiter_pool = pool.clone();
    let waiter = thread::spawn(move || waiter_pool.acquire().map(|c| c.id));
    assert!(wait_for(|| pool.waiting_count() == 1));

    let started = Instant::now();
    pool.shutdown();
    assert!(matches!(waiter.join().unwrap(), Err(PoolError::Shutdown)));
    assert!(started.elapsed() < Duration::from_secs(5));
    pool.release(held).unwrap();
}

#[test]
fn test_open_resources_never_exceed_max_open() {
    let max_open = 4;
    let config = PoolConfiguration::default()
        .with_max_open(max_open)
        .with_give_up(Duration::from_secs(10));
    let (pool, source) = new_pool(config);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    let conn = pool.acquire().unwrap();
                    assert!(pool.size() <= max_open);
                    if round % 50 == 0 {
                        pool.abandon(conn).unwrap();
                    } else {
                        pool.release(conn).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(source.peak.load(Ordering::SeqCst) <= max_open);
    assert!(pool.size() <= max_open);
}

#[test]
fn test_wrong_pool_is_rejected() {
    let (pool, _source) = new_pool(PoolConfiguration::default());
    let (other, _other_source) = new_pool(PoolConfiguration::default());

    let foreign = other.acquire().unwrap();
    assert!(matches!(pool.release(foreign), Err(PoolError::NotTracked)));

    let foreign = other.acquire().unwrap();
    assert!(matches!(pool.abandon(foreign), Err(PoolError::NotTracked)));
}

#[test]
fn test_drop_closes_source() {
    let (pool, source) = new_pool(PoolConfiguration::default());
    let conn = pool.acquire().unwrap();
    pool.release(conn).unwrap();

    drop(pool);
    assert!(wait_for(|| source.shut_down.load(Ordering::SeqCst)));
    assert!(source.live.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_acquire_under_contention() {
    let (pool, source) = new_pool(PoolConfiguration::default().with_max_open(2));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.acquire_async().await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(conn)
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert!(source.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.get_metrics().acquired, 20);
}

#[tokio::test]
async fn test_async_acquire_times_out() {
    let config = PoolConfiguration::default()
        .with_max_open(1)
        .with_give_up(Duration::from_millis(50));
    let (pool, _source) = new_pool(config);

    let held = pool.acquire_async().await.unwrap();
    let err = pool.acquire_async().await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));
    pool.release(held).unwrap();
}
