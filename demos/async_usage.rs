//! Async usage examples

use esox_resourcepool::{Pool, PoolConfiguration, PoolSource};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Sessions {
    next_id: AtomicUsize,
}

impl PoolSource for Sessions {
    type Resource = usize;
    type Error = Infallible;

    fn create(&self) -> Result<usize, Infallible> {
        // Opening a session is slow
        std::thread::sleep(Duration::from_millis(20));
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn destroy(&self, _session: usize) -> Result<(), Infallible> {
        Ok(())
    }

    fn validate(&self, _session: &usize) -> Result<bool, Infallible> {
        Ok(true)
    }

    fn shutdown(&self) {}
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ResourcePool - Async Examples ===\n");

    // Example 1: Async acquire
    async_acquire().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Concurrent access
    concurrent_access().await;
}

async fn async_acquire() {
    println!("1. Async Acquire:");
    let pool = Pool::new("async", Sessions::default(), PoolConfiguration::default()).unwrap();

    let session = pool.acquire_async().await.unwrap();
    println!("   Got session asynchronously: {}", *session);
    pool.release(session).unwrap();

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");

    let config = PoolConfiguration::new()
        .with_max_open(1)
        .with_give_up(Duration::from_millis(100));

    let pool = Pool::new("timeout", Sessions::default(), config).unwrap();

    // Take the only session
    let held = pool.acquire_async().await.unwrap();

    // Try to get another (should time out)
    match pool.acquire_async().await {
        Ok(_) => println!("   Got session"),
        Err(e) => println!("   Error: {}", e),
    }

    // Giving up early by dropping the future is fine too
    let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.acquire_async()).await;
    println!("   Cancelled wait: {}", cancelled.is_err());

    pool.release(held).unwrap();
    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");

    let config = PoolConfiguration::new().with_max_open(4);
    let pool = Pool::new("concurrent", Sessions::default(), config).unwrap();

    let mut handles = vec![];
    for i in 0..10 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let session = pool.acquire_async().await.unwrap();
            println!("   Task {} got session {}", i, *session);
            sleep(Duration::from_millis(10)).await;
            pool.release(session).unwrap();
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Sessions opened: {}", pool.size());
    println!("   {pool}\n");
}
