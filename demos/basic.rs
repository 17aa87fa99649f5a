//! Basic usage examples for Pool

use esox_resourcepool::{Pool, PoolConfiguration, PoolSource, Profile};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Connection {
    id: usize,
}

#[derive(Default)]
struct Connections {
    next_id: AtomicUsize,
}

impl PoolSource for Connections {
    type Resource = Connection;
    type Error = Infallible;

    fn create(&self) -> Result<Connection, Infallible> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("   (opening connection {id})");
        Ok(Connection { id })
    }

    fn destroy(&self, conn: Connection) -> Result<(), Infallible> {
        println!("   (closing connection {})", conn.id);
        Ok(())
    }

    fn validate(&self, _conn: &Connection) -> Result<bool, Infallible> {
        Ok(true)
    }

    fn shutdown(&self) {
        println!("   (source shut down)");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ResourcePool - Basic Examples ===\n");

    // Example 1: Acquire and release
    simple_pool();

    // Example 2: Pool with configuration
    configured_pool();

    // Example 3: Abandoning a broken resource
    abandon_broken();

    // Example 4: Metrics and health
    metrics_and_health();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = Pool::new("simple", Connections::default(), PoolConfiguration::default()).unwrap();

    let conn = pool.acquire().unwrap();
    println!("   Got connection: {}", conn.id);
    pool.release(conn).unwrap();

    // The same connection comes back
    let conn = pool.acquire().unwrap();
    println!("   Got connection again: {}", conn.id);
    pool.release(conn).unwrap();

    println!("   {pool}\n");
}

fn configured_pool() {
    println!("2. Configured Pool:");

    let config = PoolConfiguration::from_profile(Profile::Tiny)
        .with_max_open(2)
        .with_open_concurrent(1);

    let pool = Pool::new("configured", Connections::default(), config).unwrap();

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    println!("   Open: {}", pool.size());
    println!("   Available: {}", pool.available_count());

    pool.release(first).unwrap();
    pool.release(second).unwrap();
    println!("   After release - Available: {}\n", pool.available_count());
}

fn abandon_broken() {
    println!("3. Abandon:");
    let pool = Pool::new("abandon", Connections::default(), PoolConfiguration::default()).unwrap();

    let conn = pool.acquire().unwrap();
    println!("   Connection {} broke, abandoning it", conn.id);
    pool.abandon(conn).unwrap();

    let conn = pool.acquire().unwrap();
    println!("   Fresh connection: {}", conn.id);
    pool.release(conn).unwrap();
    println!();
}

fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let pool = Pool::new("metrics", Connections::default(), PoolConfiguration::default()).unwrap();

    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    let metrics = pool.get_metrics();
    println!("   Acquired: {}", metrics.acquired);
    println!("   In use: {}", metrics.in_use);
    println!("   Utilization: {:.1}%", metrics.utilization * 100.0);

    for lease in leases {
        pool.release(lease).unwrap();
    }

    let health = pool.get_health_status();
    println!("   Healthy: {}", health.is_healthy());
    println!("   Warnings: {}", health.warning_count);

    pool.shutdown();
    println!();
}
