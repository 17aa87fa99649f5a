//! Identity-keyed registry of every resource a pool owns
//!
//! Records live in a fixed array of buckets. Each bucket is an immutable list
//! replaced by compare-and-swap, so adds and removes never lock. Records hold a
//! [`Weak`] handle: the registry never keeps a resource alive, and a record whose
//! resource is gone without being retired is a leak.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::errors::{PoolError, PoolResult};

/// When and where a resource was handed out
#[derive(Debug)]
pub(crate) struct Checkout {
    pub at: Instant,
    pub trace: Option<Backtrace>,
}

struct Tracked<T> {
    key: usize,
    handle: Weak<T>,
    checkout: ArcSwapOption<Checkout>,
    retiring: AtomicBool,
}

impl<T> Tracked<T> {
    fn is_leaked(&self) -> bool {
        !self.retiring.load(Ordering::Acquire) && self.handle.strong_count() == 0
    }
}

/// A resource that went away while it was still tracked
#[derive(Debug)]
pub(crate) struct Leak {
    pub checkout: Option<Arc<Checkout>>,
}

pub(crate) fn identity<T>(resource: &Arc<T>) -> usize {
    Arc::as_ptr(resource) as usize
}

type Bucket<T> = ArcSwap<Vec<Arc<Tracked<T>>>>;

pub(crate) struct LeakTracker<T> {
    buckets: Box<[Bucket<T>]>,
}

impl<T> LeakTracker<T> {
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets.max(1)).map(|_| ArcSwap::from_pointee(Vec::new())).collect(),
        }
    }

    fn bucket(&self, key: usize) -> &Bucket<T> {
        // Allocations are aligned, so spread the low bits before taking the modulus
        let hash = (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32;
        &self.buckets[hash as usize % self.buckets.len()]
    }

    fn update<F>(&self, key: usize, mut op: F) -> PoolResult<()>
    where
        F: FnMut(&[Arc<Tracked<T>>]) -> PoolResult<Vec<Arc<Tracked<T>>>>,
    {
        let bucket = self.bucket(key);
        loop {
            let current = bucket.load_full();
            let next = op(&current)?;
            let previous = bucket.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(());
            }
        }
    }

    fn find(&self, key: usize) -> PoolResult<Arc<Tracked<T>>> {
        self.bucket(key)
            .load()
            .iter()
            .find(|record| record.key == key)
            .cloned()
            .ok_or(PoolError::NotTracked)
    }

    pub fn add(&self, resource: &Arc<T>) -> PoolResult<()> {
        let key = identity(resource);
        let record = Arc::new(Tracked {
            key,
            handle: Arc::downgrade(resource),
            checkout: ArcSwapOption::empty(),
            retiring: AtomicBool::new(false),
        });

        self.update(key, |records| {
            if records.iter().any(|r| r.key == key) {
                return Err(PoolError::AlreadyTracked);
            }
            let mut next = Vec::with_capacity(records.len() + 1);
            next.push(Arc::clone(&record));
            next.extend(records.iter().cloned());
            Ok(next)
        })
    }

    fn remove_matching<P>(&self, key: usize, matches: P) -> PoolResult<()>
    where
        P: Fn(&Arc<Tracked<T>>) -> bool,
    {
        self.update(key, |records| {
            let pos = records.iter().position(&matches).ok_or(PoolError::NotTracked)?;
            Ok(records
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, r)| Arc::clone(r))
                .collect())
        })
    }

    pub fn remove(&self, key: usize) -> PoolResult<()> {
        self.remove_matching(key, |r| r.key == key)
    }

    /// Mark a resource as on its way out so its disappearance isn't reported as a leak
    pub fn retire(&self, key: usize) -> PoolResult<()> {
        self.find(key)?.retiring.store(true, Ordering::Release);
        Ok(())
    }

    pub fn check_out(&self, resource: &Arc<T>, trace: bool) -> PoolResult<()> {
        let checkout = Checkout {
            at: Instant::now(),
            trace: trace.then(Backtrace::force_capture),
        };
        self.find(identity(resource))?.checkout.store(Some(Arc::new(checkout)));
        Ok(())
    }

    /// End a checkout, returning when and where it started
    pub fn check_in(&self, resource: &Arc<T>) -> PoolResult<Arc<Checkout>> {
        self.find(identity(resource))?
            .checkout
            .swap(None)
            .ok_or(PoolError::NotCheckedOut)
    }

    pub fn count(&self) -> usize {
        self.buckets.iter().map(|b| b.load().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.load().is_empty())
    }

    /// Remove and report every record whose resource was dropped without being retired
    pub fn collect_leaks(&self) -> Vec<Leak> {
        let mut leaks = Vec::new();
        for bucket in self.buckets.iter() {
            let records = bucket.load_full();
            for record in records.iter().filter(|r| r.is_leaked()) {
                if self.remove_matching(record.key, |r| Arc::ptr_eq(r, record)).is_ok() {
                    leaks.push(Leak {
                        checkout: record.checkout.load_full(),
                    });
                }
            }
        }
        leaks
    }

    /// Bucket length -> number of buckets with that length
    pub fn collision_histogram(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        for bucket in self.buckets.iter() {
            *histogram.entry(bucket.load().len()).or_insert(0) += 1;
        }
        histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_access_remove() {
        let tracker = LeakTracker::new(4457);
        let values: Vec<Arc<u64>> = (0..10_000u64).map(|v| Arc::new(v.wrapping_mul(31))).collect();

        for value in &values {
            tracker.add(value).unwrap();
        }
        assert_eq!(tracker.count(), values.len());
        assert_eq!(tracker.collision_histogram().values().sum::<usize>(), 4457);

        for value in &values {
            tracker.check_out(value, false).unwrap();
            let checkout = tracker.check_in(value).unwrap();
            assert!(checkout.trace.is_none());
        }

        for value in &values {
            tracker.remove(identity(value)).unwrap();
        }
        assert!(tracker.is_empty());
        assert!(tracker.collect_leaks().is_empty());
    }

    #[test]
    fn test_dropped_resources_are_leaks() {
        let tracker = LeakTracker::new(97);
        let kept = Arc::new("kept".to_string());
        tracker.add(&kept).unwrap();

        for i in 0..1_000 {
            let dropped = Arc::new(i.to_string());
            tracker.add(&dropped).unwrap();
            tracker.check_out(&dropped, i == 0).unwrap();
        }

        let leaks = tracker.collect_leaks();
        assert_eq!(leaks.len(), 1_000);
        assert_eq!(leaks.iter().filter(|l| l.checkout.as_ref().is_some_and(|c| c.trace.is_some())).count(), 1);
        assert_eq!(tracker.count(), 1);
        assert!(tracker.collect_leaks().is_empty());
    }

    #[test]
    fn test_retired_resources_are_not_leaks() {
        let tracker = LeakTracker::new(7);
        let resource = Arc::new(1);
        let key = identity(&resource);
        tracker.add(&resource).unwrap();

        tracker.retire(key).unwrap();
        drop(resource);
        assert!(tracker.collect_leaks().is_empty());
        tracker.remove(key).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_equal_values_are_tracked_by_identity() {
        let tracker = LeakTracker::new(1);
        let a = Arc::new(5);
        let b = Arc::new(5);
        tracker.add(&a).unwrap();
        tracker.add(&b).unwrap();
        assert_eq!(tracker.count(), 2);

        tracker.check_out(&b, false).unwrap();
        assert!(matches!(tracker.check_in(&a), Err(PoolError::NotCheckedOut)));
        assert!(tracker.check_in(&b).is_ok());

        tracker.remove(identity(&a)).unwrap();
        assert!(matches!(tracker.check_out(&a, false), Err(PoolError::NotTracked)));
        assert!(tracker.check_out(&b, false).is_ok());
    }

    #[test]
    fn test_misuse_fails_loudly() {
        let tracker = LeakTracker::new(3);
        let resource = Arc::new(1);
        assert!(matches!(tracker.remove(identity(&resource)), Err(PoolError::NotTracked)));

        tracker.add(&resource).unwrap();
        assert!(matches!(tracker.add(&resource), Err(PoolError::AlreadyTracked)));

        tracker.check_out(&resource, false).unwrap();
        tracker.check_in(&resource).unwrap();
        assert!(matches!(tracker.check_in(&resource), Err(PoolError::NotCheckedOut)));
    }

    #[test]
    fn test_concurrent_add_remove() {
        let tracker = Arc::new(LeakTracker::new(5));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let mine: Vec<Arc<u32>> = (0..500).map(Arc::new).collect();
                    for r in &mine {
                        tracker.add(r).unwrap();
                    }
                    for r in &mine {
                        tracker.remove(identity(r)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(tracker.is_empty());
    }
}
