//! Core resource pool implementation

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{Fairness, LeakMode, PoolConfiguration};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{EvictionPolicy, Freshness};
use crate::executor::TaskExecutor;
use crate::health::HealthStatus;
use crate::metrics::{Gauges, MetricsExporter, MetricsTracker, PoolMetrics};
use crate::scheduler::{Maintain, Scheduler};
use crate::source::PoolSource;
use crate::stack::{DualStack, Outcome, Stamped, Wake, WaitNode};
use crate::tracker::{identity, Checkout, LeakTracker};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// How long a leak or overly long checkout keeps `LeakMode::Auto` tracing on
const LEAK_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Maintenance interval while a stopped pool waits for resources to come back
const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Rescheduling delay when the pool stops in the middle of a population pass
const STOPPING_INTERVAL: Duration = Duration::from_millis(100);

/// Attempts to become the sole owner of a resource before giving up on destroying it
const UNWRAP_ATTEMPTS: usize = 100;

/// A checked-out resource
///
/// Hand it back with [`Pool::release`] or [`Pool::abandon`]. Dropping a lease
/// instead drops the resource without the source seeing it again, and the pool
/// reports it as a leak.
#[derive(Debug)]
pub struct Lease<T> {
    resource: Arc<T>,
}

impl<T> Lease<T> {
    fn new(resource: Arc<T>) -> Self {
        Self { resource }
    }

    fn into_inner(self) -> Arc<T> {
        self.resource
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

/// Thread-safe pool of resources opened on demand by a [`PoolSource`]
///
/// Cloning is cheap and every clone refers to the same pool. Dropping the last
/// clone destroys the idle resources and shuts the source down.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration, PoolSource};
/// use std::convert::Infallible;
///
/// struct Buffers;
///
/// impl PoolSource for Buffers {
///     type Resource = Vec<u8>;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<Vec<u8>, Infallible> { Ok(vec![0; 1024]) }
///     fn destroy(&self, _: Vec<u8>) -> Result<(), Infallible> { Ok(()) }
///     fn validate(&self, buffer: &Vec<u8>) -> Result<bool, Infallible> { Ok(buffer.len() == 1024) }
///     fn shutdown(&self) {}
/// }
///
/// let pool = Pool::new("buffers", Buffers, PoolConfiguration::default()).unwrap();
///
/// let buffer = pool.acquire().unwrap();
/// assert_eq!(buffer.len(), 1024);
/// pool.release(buffer).unwrap();
///
/// assert_eq!(pool.size(), 1);
/// ```
pub struct Pool<S: PoolSource> {
    shared: Arc<Shared<S>>,
}

impl<S: PoolSource> Clone for Pool<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<S: PoolSource> {
    name: String,
    source: S,
    config: PoolConfiguration,
    policy: EvictionPolicy,
    stack: DualStack<S::Resource>,
    tracker: LeakTracker<S::Resource>,
    breaker: CircuitBreaker,
    pending_open: AtomicUsize,
    opening_throttled: AtomicBool,
    running: AtomicBool,
    show_leaks: AtomicBool,
    epoch: Instant,
    // Millis since `epoch`, offset by one so zero means "never"
    last_leak: AtomicU64,
    source_closed: AtomicBool,
    metrics: MetricsTracker,
    scheduler: Arc<Scheduler>,
    executor: Arc<TaskExecutor>,
    me: Weak<Shared<S>>,
}

impl<S: PoolSource> Pool<S> {
    /// Create a pool serviced by the process-wide [`Scheduler`]
    ///
    /// Nothing is opened until the first acquire.
    pub fn new(name: impl Into<String>, source: S, config: PoolConfiguration) -> PoolResult<Self> {
        Self::with_scheduler(name, source, config, Arc::clone(Scheduler::global()))
    }

    /// Create a pool serviced by its own scheduler
    pub fn with_scheduler(
        name: impl Into<String>,
        source: S,
        config: PoolConfiguration,
        scheduler: Arc<Scheduler>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let shared = Arc::new_cyclic(|me| Shared {
            name: name.into(),
            source,
            policy: EvictionPolicy::new(config.max_idle, config.validate_interval),
            stack: DualStack::new(),
            tracker: LeakTracker::new(config.max_open.saturating_mul(3)),
            breaker: CircuitBreaker::new(config.open_broken_rate),
            pending_open: AtomicUsize::new(0),
            opening_throttled: AtomicBool::new(false),
            running: AtomicBool::new(true),
            show_leaks: AtomicBool::new(config.leak_mode == LeakMode::On),
            epoch: Instant::now(),
            last_leak: AtomicU64::new(0),
            source_closed: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
            scheduler,
            executor: Arc::clone(TaskExecutor::global()),
            me: me.clone(),
            config,
        });

        Ok(Self { shared })
    }

    /// Take a resource, blocking the current thread until one is available
    ///
    /// Waits up to `give_up`, or `give_up_broken` while the source is failing.
    /// A timeout while the source is failing reports the source's error.
    pub fn acquire(&self) -> PoolResult<Lease<S::Resource>> {
        let shared = &self.shared;
        shared.ensure_running()?;

        let waiter = WaitNode::for_current_thread();
        let resource = match shared.stack.pop_or_wait(&waiter) {
            Some(stamped) => stamped.into_resource(),
            None => {
                if !shared.is_running() {
                    return Err(shared.abandon_wait(&waiter));
                }
                shared.request_service_unless_throttled();
                let wait = shared.wait_budget();
                let outcome = waiter.wait_until(Instant::now() + wait);
                shared.settle(outcome, wait)?
            }
        };

        shared.check_out(resource)
    }

    /// Take a resource, suspending the current task until one is available
    ///
    /// Same waiting rules as [`Pool::acquire`]. Dropping the future gives up the
    /// place in line; a resource handed over at that moment goes back to the pool.
    pub async fn acquire_async(&self) -> PoolResult<Lease<S::Resource>> {
        let shared = &self.shared;
        shared.ensure_running()?;

        let notify = Arc::new(Notify::new());
        let waiter = WaitNode::new(Wake::Task(Arc::clone(&notify)));
        let resource = match shared.stack.pop_or_wait(&waiter) {
            Some(stamped) => stamped.into_resource(),
            None => {
                let guard = WaitGuard {
                    shared,
                    waiter: &waiter,
                };
                if !shared.is_running() {
                    return Err(guard.give_up());
                }
                shared.request_service_unless_throttled();
                let wait = shared.wait_budget();
                let deadline = tokio::time::Instant::now() + wait;
                while waiter.is_alive() {
                    if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                        break;
                    }
                }
                shared.settle(guard.claim(), wait)?
            }
        };

        shared.check_out(resource)
    }

    /// Return a resource for reuse
    ///
    /// A lease held longer than `warn_long_use` is logged and, in
    /// `LeakMode::Auto`, turns on checkout tracing. One held longer than
    /// `validate_interval` is validated before anyone else gets it. On a
    /// stopped pool the resource is destroyed right away and the source's error,
    /// if any, is returned.
    pub fn release(&self, lease: Lease<S::Resource>) -> PoolResult<()> {
        let shared = &self.shared;
        let resource = lease.into_inner();
        let checkout = shared.tracker.check_in(&resource)?;
        MetricsTracker::incr(&shared.metrics.released);

        let now = Instant::now();
        let held = now.saturating_duration_since(checkout.at);
        if held > shared.config.warn_long_use {
            shared.report_long_use(held, &checkout);
        }

        if !shared.is_running() {
            let result = shared.send_back(resource);
            shared.request_service();
            return result;
        }

        if held > shared.config.validate_interval {
            shared.validate_async(resource, now);
            return Ok(());
        }

        shared.push(Stamped::new(resource, now, checkout.at));
        Ok(())
    }

    /// Give up on a resource that is no longer usable
    ///
    /// It is destroyed in the background and never handed to another caller.
    pub fn abandon(&self, lease: Lease<S::Resource>) -> PoolResult<()> {
        let shared = &self.shared;
        let resource = lease.into_inner();
        shared.tracker.check_in(&resource)?;
        MetricsTracker::incr(&shared.metrics.abandoned);
        shared.abandon_async(resource);
        Ok(())
    }

    /// Stop the pool
    ///
    /// Returns immediately. Waiting and future acquires fail with
    /// [`PoolError::Shutdown`], idle resources are destroyed in the background,
    /// and the source is shut down once every checked-out resource has come back.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.running.swap(false, Ordering::AcqRel) {
            debug!(pool = %shared.name, "shutting down");
        }
        shared.breaker.record_failure(PoolError::Shutdown);
        shared.request_service();
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Callers currently waiting for a resource
    pub fn waiting_count(&self) -> usize {
        self.shared.stack.waiting_count()
    }

    /// Resources ready to hand out
    pub fn available_count(&self) -> usize {
        self.shared.stack.available_count()
    }

    /// Resources being opened right now
    pub fn opening_count(&self) -> usize {
        self.shared.pending_open.load(Ordering::Acquire)
    }

    /// Every resource the pool tracks, checked out or not
    pub fn size(&self) -> usize {
        self.shared.tracker.count()
    }

    /// Leak tracker bucket occupancy: bucket length -> number of buckets
    pub fn collision_histogram(&self) -> BTreeMap<usize, usize> {
        self.shared.tracker.collision_histogram()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.shared.get_metrics()
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let shared = &self.shared;
        let failure = shared.breaker.failure();
        HealthStatus::new(&shared.get_metrics(), shared.is_running(), failure.as_ref())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool's name
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), &self.shared.name, tags)
    }
}

impl<S: PoolSource> fmt::Display for Pool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool {} (open={} waiting={} available={} opening={} throttled={})",
            self.shared.name,
            self.size(),
            self.waiting_count(),
            self.available_count(),
            self.opening_count(),
            self.shared.opening_throttled.load(Ordering::Relaxed),
        )
    }
}

impl<S: PoolSource> fmt::Debug for Pool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Gives up an async wait that is dropped before it resolves
struct WaitGuard<'a, S: PoolSource> {
    shared: &'a Arc<Shared<S>>,
    waiter: &'a Arc<WaitNode<S::Resource>>,
}

impl<S: PoolSource> WaitGuard<'_, S> {
    fn claim(self) -> Outcome<S::Resource> {
        let outcome = self.waiter.claim();
        std::mem::forget(self);
        outcome
    }

    fn give_up(self) -> PoolError {
        let err = self.shared.abandon_wait(self.waiter);
        std::mem::forget(self);
        err
    }
}

impl<S: PoolSource> Drop for WaitGuard<'_, S> {
    fn drop(&mut self) {
        if let Outcome::Granted(stamped) = self.waiter.claim() {
            self.shared.restore(stamped);
        }
    }
}

/// Keeps `pending_open` honest even if `create` panics
struct OpenGuard<'a, S: PoolSource> {
    shared: &'a Arc<Shared<S>>,
}

impl<S: PoolSource> Drop for OpenGuard<'_, S> {
    fn drop(&mut self) {
        let _ = self
            .shared
            .pending_open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        // More may be waiting than this open could serve
        self.shared.request_service();
    }
}

impl<S: PoolSource> Shared<S> {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_throttled(&self) -> bool {
        self.opening_throttled.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> PoolResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(self.stopped_error())
        }
    }

    fn stopped_error(&self) -> PoolError {
        self.breaker.failure().unwrap_or(PoolError::Shutdown)
    }

    fn wait_budget(&self) -> Duration {
        if self.breaker.is_failing() {
            self.config.give_up_broken
        } else {
            self.config.give_up
        }
    }

    fn request_service(&self) {
        let target: Weak<dyn Maintain> = self.me.clone();
        self.scheduler.request(target);
    }

    fn request_service_unless_throttled(&self) {
        if !self.is_throttled() {
            self.request_service();
        }
    }

    /// Close a wait the pool stopped under, giving back anything granted meanwhile
    fn abandon_wait(self: &Arc<Self>, waiter: &WaitNode<S::Resource>) -> PoolError {
        if let Outcome::Granted(stamped) = waiter.claim() {
            self.restore(stamped);
        }
        self.stopped_error()
    }

    fn settle(&self, outcome: Outcome<S::Resource>, waited: Duration) -> PoolResult<Arc<S::Resource>> {
        match outcome {
            Outcome::Granted(stamped) => Ok(stamped.into_resource()),
            Outcome::Aborted => Err(self.stopped_error()),
            Outcome::Expired => {
                MetricsTracker::incr(&self.metrics.timeouts);
                Err(self.breaker.failure().unwrap_or(PoolError::Timeout(waited)))
            }
        }
    }

    fn check_out(&self, resource: Arc<S::Resource>) -> PoolResult<Lease<S::Resource>> {
        self.tracker
            .check_out(&resource, self.show_leaks.load(Ordering::Relaxed))?;
        MetricsTracker::incr(&self.metrics.acquired);
        self.request_service_unless_throttled();
        Ok(Lease::new(resource))
    }

    fn push(&self, stamped: Arc<Stamped<S::Resource>>) {
        match self.config.fairness {
            Fairness::Fifo => self.stack.push_fair(stamped),
            Fairness::Lifo => self.stack.push_unfair(stamped),
        }
    }

    /// Put back a resource that was handed over but never checked out.
    /// Its stamps are kept so the idle and validation clocks keep running.
    fn restore(self: &Arc<Self>, stamped: Arc<Stamped<S::Resource>>) {
        if self.is_running() {
            self.push(stamped);
        } else {
            self.abandon_async(stamped.into_resource());
        }
    }

    fn millis_since_epoch(&self, at: Instant) -> u64 {
        let millis = at.saturating_duration_since(self.epoch).as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX - 1) + 1
    }

    fn note_leak(&self, at: Instant) {
        self.last_leak.store(self.millis_since_epoch(at), Ordering::Release);
    }

    fn leaked_recently(&self, now: Instant) -> bool {
        match self.last_leak.load(Ordering::Acquire) {
            0 => false,
            last => {
                let at = self.epoch + Duration::from_millis(last - 1);
                now.saturating_duration_since(at) < LEAK_WINDOW
            }
        }
    }

    fn report_long_use(&self, held: Duration, checkout: &Checkout) {
        match &checkout.trace {
            Some(trace) => warn!(pool = %self.name, ?held, "resource used too long, checked out at:\n{trace}"),
            None => warn!(pool = %self.name, ?held, "resource used too long"),
        }
        self.note_leak(Instant::now());
        if self.config.leak_mode == LeakMode::Auto {
            self.show_leaks.store(true, Ordering::Relaxed);
        }
    }

    /// Hand a resource back to the source and stop tracking it
    fn send_back(&self, resource: Arc<S::Resource>) -> PoolResult<()> {
        let key = identity(&resource);
        // Retire first so the sweep never mistakes this for a leak
        let retired = self.tracker.retire(key);

        let result = match into_owned(resource) {
            Ok(resource) => {
                let result = self.source.destroy(resource).map_err(PoolError::from_source);
                if retired.is_ok() {
                    MetricsTracker::incr(&self.metrics.destroyed);
                }
                result
            }
            Err(_) => {
                warn!(pool = %self.name, "resource still shared, dropping it without destroy");
                Ok(())
            }
        };
        if let Err(err) = &result {
            warn!(pool = %self.name, error = %err, "failed to destroy resource");
        }

        if retired.is_ok() {
            // The weak handle pins the address until now, so the key can't be reused early
            let _ = self.tracker.remove(key);
        }
        result
    }

    fn abandon_async(self: &Arc<Self>, resource: Arc<S::Resource>) {
        let me = Arc::clone(self);
        self.executor.execute(move || {
            let _ = me.send_back(resource);
            me.request_service();
        });
    }

    fn validate_async(self: &Arc<Self>, resource: Arc<S::Resource>, last_used: Instant) {
        let me = Arc::clone(self);
        self.executor.execute(move || {
            let valid = match me.source.validate(&resource) {
                Ok(valid) => valid,
                Err(err) => {
                    warn!(pool = %me.name, error = %err, "failed to validate");
                    false
                }
            };

            if valid {
                me.push(Stamped::new(resource, last_used, Instant::now()));
            } else {
                MetricsTracker::incr(&me.metrics.validation_failures);
                let _ = me.send_back(resource);
                me.request_service();
            }
        });
    }

    /// Open one resource. Runs on the executor.
    fn open(self: &Arc<Self>) {
        let _guard = OpenGuard { shared: self };
        let started = Instant::now();

        match self.source.create() {
            Ok(resource) => {
                MetricsTracker::incr(&self.metrics.created);
                let resource = Arc::new(resource);
                if let Err(err) = self.tracker.add(&resource) {
                    warn!(pool = %self.name, error = %err, "dropping untrackable resource");
                    return;
                }

                if self.is_running() {
                    self.breaker.record_success();
                    self.push(Stamped::new(resource, started, started));
                } else {
                    let _ = self.send_back(resource);
                }
            }
            Err(err) => {
                MetricsTracker::incr(&self.metrics.create_failures);
                if self.is_running() {
                    warn!(pool = %self.name, error = %err, "failed to create");
                    self.breaker.record_failure(PoolError::from_source(err));
                }
            }
        }
    }

    /// Start opens while live waiters outnumber the opens in flight
    fn populate(self: &Arc<Self>) -> Option<Duration> {
        let max_wait = self.config.service_interval();

        while self.is_running() {
            // Cleared before counting so a racing acquire errs towards requesting service
            self.opening_throttled.store(false, Ordering::Release);

            let opening = self.pending_open.load(Ordering::Acquire);
            if !self.stack.live_waiting_exceeds(opening) {
                return if self.tracker.is_empty() { None } else { Some(max_wait) };
            }

            let now = Instant::now();
            if let Some(wait) = self.breaker.retry_wait(now) {
                self.opening_throttled.store(true, Ordering::Release);
                debug!(pool = %self.name, opening, ?wait, "opening throttled after failure");
                return Some(wait.min(max_wait));
            }

            if opening >= self.config.open_concurrent {
                self.opening_throttled.store(true, Ordering::Release);
                debug!(pool = %self.name, opening, "opening throttled by concurrency");
                return Some(max_wait);
            }

            let total = opening + self.tracker.count();
            if total >= self.config.max_open {
                self.opening_throttled.store(true, Ordering::Release);
                debug!(pool = %self.name, total, opening, "max open reached");
                return Some(max_wait);
            }

            if self
                .pending_open
                .compare_exchange(opening, opening + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.breaker.record_attempt();
                debug!(
                    pool = %self.name,
                    total,
                    opening = opening + 1,
                    waiting = self.stack.waiting_count(),
                    "opening"
                );
                let me = Arc::clone(self);
                self.executor.execute(move || me.open());
            }
        }

        Some(STOPPING_INTERVAL)
    }

    /// Evict idle resources and send stale ones for validation
    ///
    /// Only the head of the ready stack can be removed, so a fresh entry is
    /// popped from the head and swapped into the slot of each expired or stale
    /// entry found further down. Returns when the next entry falls due.
    fn age_available(self: &Arc<Self>) -> Duration {
        let now = Instant::now();
        let mut next_due = self.policy.horizon();
        let mut expired = Vec::new();
        let mut stale = Vec::new();
        let mut spare = None;

        'refill: loop {
            let top = loop {
                let Some(top) = self.stack.try_pop() else {
                    break 'refill;
                };
                match self.policy.classify(top.last_used, top.last_tested, now) {
                    Freshness::Expired => expired.push(top),
                    Freshness::Stale => stale.push(top),
                    Freshness::Fresh(due) => {
                        next_due = next_due.min(due);
                        break top;
                    }
                }
            };

            for node in self.stack.ready_walk() {
                let Some(current) = node.peek() else {
                    continue;
                };
                let verdict = self.policy.classify(current.last_used, current.last_tested, now);
                if let Freshness::Fresh(due) = verdict {
                    next_due = next_due.min(due);
                    continue;
                }
                if node.try_swap(&current, Arc::clone(&top)).is_ok() {
                    if verdict == Freshness::Expired {
                        expired.push(current);
                    } else {
                        stale.push(current);
                    }
                    // `top` is used up, fetch another
                    continue 'refill;
                }
            }

            spare = Some(top);
            break;
        }

        if let Some(top) = spare {
            self.push(top);
        }

        if !expired.is_empty() || !stale.is_empty() {
            debug!(pool = %self.name, evicting = expired.len(), validating = stale.len(), "aged ready resources");
        }
        MetricsTracker::add(&self.metrics.evicted, expired.len());
        for stamped in expired {
            self.abandon_async(stamped.into_resource());
        }
        for stamped in stale {
            let last_used = stamped.last_used;
            self.validate_async(stamped.into_resource(), last_used);
        }

        next_due
    }

    fn collect_leaks(&self) {
        let leaks = self.tracker.collect_leaks();
        let now = Instant::now();

        if leaks.is_empty() {
            let show = match self.config.leak_mode {
                LeakMode::Auto => self.leaked_recently(now),
                LeakMode::On => true,
                LeakMode::Off => false,
            };
            self.show_leaks.store(show, Ordering::Relaxed);
            return;
        }

        self.note_leak(now);
        self.show_leaks
            .store(self.config.leak_mode != LeakMode::Off, Ordering::Relaxed);
        MetricsTracker::add(&self.metrics.leaks_detected, leaks.len());

        for leak in leaks {
            let Some(checkout) = leak.checkout else {
                warn!(pool = %self.name, "leaked a resource that was never checked out");
                continue;
            };
            let since = now.saturating_duration_since(checkout.at);
            match &checkout.trace {
                Some(trace) => warn!(pool = %self.name, ?since, "leaked resource, checked out at:\n{trace}"),
                None => warn!(pool = %self.name, ?since, "leaked resource"),
            }
        }
    }

    fn cleanup_for_quit(&self) -> Option<Duration> {
        while let Some(stamped) = self.stack.try_pop() {
            let _ = self.send_back(stamped.into_resource());
        }

        let aborted = self.stack.abort_waiting();
        if aborted > 0 {
            debug!(pool = %self.name, aborted, "aborted waiting callers");
        }

        if self.tracker.is_empty() && self.pending_open.load(Ordering::Acquire) == 0 {
            self.close_source();
            None
        } else {
            Some(DRAIN_INTERVAL)
        }
    }

    fn close_source(&self) {
        if !self.source_closed.swap(true, Ordering::AcqRel) {
            self.source.shutdown();
            info!(pool = %self.name, "pool shut down");
        }
    }

    fn get_metrics(&self) -> PoolMetrics {
        self.metrics.get_metrics(Gauges {
            open: self.tracker.count(),
            available: self.stack.available_count(),
            waiting: self.stack.waiting_count(),
            opening: self.pending_open.load(Ordering::Acquire),
            max_open: self.config.max_open,
            throttled: self.is_throttled(),
            failing: self.is_running() && self.breaker.is_failing(),
        })
    }
}

impl<S: PoolSource> Maintain for Shared<S> {
    fn service(self: Arc<Self>) -> Option<Duration> {
        self.collect_leaks();
        if self.is_running() {
            let aging = self.age_available();
            self.populate().map(|population| population.min(aging))
        } else {
            self.cleanup_for_quit()
        }
    }
}

impl<S: PoolSource> Drop for Shared<S> {
    fn drop(&mut self) {
        while let Some(stamped) = self.stack.try_pop() {
            let _ = self.send_back(stamped.into_resource());
        }
        self.close_source();
    }
}

/// Wait out transient references held by concurrent readers of the stack
fn into_owned<T>(mut resource: Arc<T>) -> Result<T, Arc<T>> {
    for _ in 0..UNWRAP_ATTEMPTS {
        match Arc::try_unwrap(resource) {
            Ok(owned) => return Ok(owned),
            Err(shared) => {
                resource = shared;
                thread::yield_now();
            }
        }
    }
    Err(resource)
}
