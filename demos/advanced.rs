//! Advanced features: failing sources, eviction, leak detection, metrics export

use esox_resourcepool::{
    CircuitBreaker, Fairness, LeakMode, Pool, PoolConfiguration, PoolSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
#[error("database unreachable")]
struct Unreachable;

#[derive(Debug)]
struct Connection {
    id: usize,
}

#[derive(Default)]
struct Database {
    next_id: AtomicUsize,
    closed: AtomicUsize,
    down: AtomicBool,
}

impl PoolSource for Database {
    type Resource = Connection;
    type Error = Unreachable;

    fn create(&self) -> Result<Connection, Unreachable> {
        if self.down.load(Ordering::Relaxed) {
            return Err(Unreachable);
        }
        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn destroy(&self, _conn: Connection) -> Result<(), Unreachable> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn validate(&self, _conn: &Connection) -> Result<bool, Unreachable> {
        Ok(!self.down.load(Ordering::Relaxed))
    }

    fn shutdown(&self) {
        println!("   (database source shut down)");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== EsoxSolutions.ResourcePool - Advanced Features ===\n");

    // Example 1: Fail fast while the source is down
    failing_source();

    // Example 2: Idle eviction
    idle_eviction();

    // Example 3: Leak detection
    leak_detection();

    // Example 4: Fairness
    fairness();

    // Example 5: Prometheus metrics
    prometheus_export();

    // Example 6: Circuit breaker on its own
    circuit_breaker_demo();

    // Example 7: Shutdown with resources checked out
    shutdown_drain();
}

fn failing_source() {
    println!("1. Failing Source:");

    let config = PoolConfiguration::new()
        .with_give_up(Duration::from_millis(300))
        .with_give_up_broken(Duration::from_millis(20));
    let pool = Pool::new("failing", Database::default(), config).unwrap();
    pool.source().down.store(true, Ordering::Relaxed);

    for attempt in 1..=3 {
        let started = Instant::now();
        let result = pool.acquire();
        println!(
            "   Attempt {}: {:?} after {:?}",
            attempt,
            result.map(|c| c.id).map_err(|e| e.to_string()),
            started.elapsed()
        );
    }
    println!("   Health: {:?}", pool.get_health_status().warnings);

    pool.source().down.store(false, Ordering::Relaxed);
    thread::sleep(Duration::from_millis(600));
    let conn = pool.acquire().unwrap();
    println!("   Recovered with connection {}\n", conn.id);
    pool.release(conn).unwrap();
}

fn idle_eviction() {
    println!("2. Idle Eviction:");

    let config = PoolConfiguration::new().with_max_idle(Duration::from_millis(100));
    let pool = Pool::new("eviction", Database::default(), config).unwrap();

    let conn = pool.acquire().unwrap();
    pool.release(conn).unwrap();
    println!("   Open before: {}", pool.size());

    thread::sleep(Duration::from_millis(500));
    println!("   Open after idling: {}", pool.size());
    println!("   Evicted: {}\n", pool.get_metrics().evicted);
}

fn leak_detection() {
    println!("3. Leak Detection:");

    let config = PoolConfiguration::new().with_leak_mode(LeakMode::On);
    let pool = Pool::new("leaky", Database::default(), config).unwrap();

    let conn = pool.acquire().unwrap();
    println!("   Dropping connection {} without releasing it", conn.id);
    drop(conn);

    // Checking out another one prompts maintenance, which sweeps for leaks
    let other = pool.acquire().unwrap();
    thread::sleep(Duration::from_millis(100));
    println!("   Leaks detected: {}", pool.get_metrics().leaks_detected);
    pool.release(other).unwrap();
    println!();
}

fn fairness() {
    println!("4. Fairness:");

    for fairness in [Fairness::Fifo, Fairness::Lifo] {
        let config = PoolConfiguration::new().with_max_open(1).with_fairness(fairness);
        let pool = Pool::new("fair", Database::default(), config).unwrap();
        let held = pool.acquire().unwrap();

        let mut waiters = vec![];
        for i in 0..3 {
            let waiter_pool = pool.clone();
            waiters.push(thread::spawn(move || {
                let conn = waiter_pool.acquire().unwrap();
                waiter_pool.release(conn).unwrap();
                i
            }));
            while pool.waiting_count() <= i {
                thread::yield_now();
            }
        }

        pool.release(held).unwrap();
        let served: Vec<usize> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
        println!("   {:?}: every waiter served {:?}", fairness, served);
    }
    println!();
}

fn prometheus_export() {
    println!("5. Prometheus Export:");

    let pool = Pool::new("metrics", Database::default(), PoolConfiguration::default()).unwrap();
    let conn = pool.acquire().unwrap();
    pool.release(conn).unwrap();

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "orders".to_string());

    let output = pool.export_metrics_prometheus(Some(&tags));
    for line in output.lines().filter(|l| !l.starts_with('#')).take(4) {
        println!("   {line}");
    }
    println!();
}

fn circuit_breaker_demo() {
    println!("6. Circuit Breaker:");

    let breaker = CircuitBreaker::new(Duration::from_millis(50));
    println!("   Initial state: {:?}", breaker.state());

    breaker.record_attempt();
    breaker.record_failure(esox_resourcepool::PoolError::from_source(Unreachable));
    println!("   After failure: {:?}", breaker.state());

    thread::sleep(Duration::from_millis(60));
    println!("   After retry window: {:?}", breaker.state());

    breaker.record_success();
    println!("   After success: {:?}\n", breaker.state());
}

fn shutdown_drain() {
    println!("7. Shutdown:");

    let pool = Pool::new("draining", Database::default(), PoolConfiguration::default()).unwrap();
    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

    pool.shutdown();
    println!("   Running: {}", pool.is_running());
    println!("   New acquire: {:?}", pool.acquire().map(|c| c.id).map_err(|e| e.to_string()));

    for lease in leases {
        pool.release(lease).unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    println!("   Closed: {}", pool.source().closed.load(Ordering::Relaxed));
}
