//! Background maintenance shared by every pool
//!
//! One worker thread serves all registered targets. A target asks for service by
//! pushing itself onto a lock-free request stack. The bottom of that stack
//! doubles as the worker's lifecycle flag: when the worker runs out of work it
//! leaves a quit marker there and exits, and the next request that finds the
//! marker starts a new worker. Otherwise a request just unparks the worker.

use std::collections::HashMap;
use std::iter;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::sync::{Parker, Unparker};
use tracing::{error, warn};

/// Longest the worker sleeps without looking at its schedule
pub const MAX_INTERVAL: Duration = Duration::from_secs(10);

static GLOBAL: LazyLock<Arc<Scheduler>> = LazyLock::new(|| Arc::new(Scheduler::new()));

/// Something the scheduler calls periodically
pub(crate) trait Maintain: Send + Sync {
    /// Do one round of maintenance. `Some(delay)` asks to be called again after
    /// `delay`; `None` means there is nothing left to do until the next request.
    fn service(self: Arc<Self>) -> Option<Duration>;
}

struct Request {
    // `None` is the quit marker
    target: Option<Weak<dyn Maintain>>,
    next: Option<Arc<Request>>,
}

impl Request {
    fn quit_marker() -> Arc<Self> {
        Arc::new(Self {
            target: None,
            next: None,
        })
    }

    fn is_quit_marker(&self) -> bool {
        self.target.is_none()
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut link) => next = link.next.take(),
                Err(_) => break,
            }
        }
    }
}

fn target_key(target: &Weak<dyn Maintain>) -> usize {
    target.as_ptr() as *const () as usize
}

/// Drives maintenance for any number of pools from a single thread
///
/// Pools use [`Scheduler::global`] unless given their own. The worker starts on
/// the first request and exits once nothing is scheduled.
pub struct Scheduler {
    requests: ArcSwapOption<Request>,
    unparker: ArcSwapOption<Unparker>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            requests: ArcSwapOption::new(Some(Request::quit_marker())),
            unparker: ArcSwapOption::empty(),
            running: AtomicBool::new(false),
        }
    }

    /// The process-wide scheduler
    pub fn global() -> &'static Arc<Scheduler> {
        &GLOBAL
    }

    /// Whether a worker thread is currently alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn request(self: &Arc<Self>, target: Weak<dyn Maintain>) {
        let link_target = Some(target);
        let original = self.requests.rcu(|current| {
            Some(Arc::new(Request {
                target: link_target.clone(),
                next: current.clone(),
            }))
        });

        if original.as_ref().is_some_and(|r| r.is_quit_marker()) {
            self.start_worker();
        } else if let Some(unparker) = self.unparker.load_full() {
            unparker.unpark();
        }
    }

    fn start_worker(self: &Arc<Self>) {
        let parker = Parker::new();
        self.unparker.store(Some(Arc::new(parker.unparker().clone())));
        self.running.store(true, Ordering::Release);

        let me = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("pool-servicing".to_string())
            .spawn(move || me.run(parker));

        if let Err(err) = spawned {
            error!("failed to start pool servicing thread: {err}");
            self.running.store(false, Ordering::Release);
            // Put the marker back on top so the next request tries again
            self.requests.rcu(|current| {
                Some(Arc::new(Request {
                    target: None,
                    next: current.clone(),
                }))
            });
        }
    }

    fn run(&self, parker: Parker) {
        let mut schedule: HashMap<usize, (Weak<dyn Maintain>, Instant)> = HashMap::new();

        loop {
            loop {
                let now = Instant::now();
                self.take_requests(&mut schedule, now);

                let due: Vec<(usize, Weak<dyn Maintain>)> = schedule
                    .iter()
                    .filter(|(_, (_, at))| *at <= now)
                    .map(|(key, (target, _))| (*key, target.clone()))
                    .collect();

                for (key, target) in due {
                    match Self::service(&target) {
                        Some(delay) => {
                            schedule.insert(key, (target, now + delay));
                        }
                        None => {
                            schedule.remove(&key);
                        }
                    }
                }

                if schedule.is_empty() {
                    break;
                }

                let nearest = schedule.values().map(|(_, at)| *at).min().unwrap_or(now);
                let sleep = nearest.saturating_duration_since(Instant::now()).min(MAX_INTERVAL);
                if !sleep.is_zero() {
                    parker.park_timeout(sleep);
                }
            }

            // Nothing scheduled. Quit unless a request slipped in meanwhile.
            self.running.store(false, Ordering::Release);
            let previous = self
                .requests
                .compare_and_swap(&None::<Arc<Request>>, Some(Request::quit_marker()));
            if previous.is_none() {
                return;
            }
            self.running.store(true, Ordering::Release);
        }
    }

    fn take_requests(&self, schedule: &mut HashMap<usize, (Weak<dyn Maintain>, Instant)>, now: Instant) {
        let chain = self.requests.swap(None);
        let links = iter::successors(chain, |link| link.next.clone());
        for link in links {
            if let Some(target) = &link.target {
                schedule.insert(target_key(target), (target.clone(), now));
            }
        }
    }

    fn service(target: &Weak<dyn Maintain>) -> Option<Duration> {
        let target = target.upgrade()?;
        match panic::catch_unwind(AssertUnwindSafe(move || target.service())) {
            Ok(next) => next,
            Err(_) => {
                warn!("pool maintenance panicked, dropping it from the schedule");
                None
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Countdown {
        calls: AtomicUsize,
        rounds: usize,
        delay: Duration,
    }

    impl Countdown {
        fn new(rounds: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                rounds,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Maintain for Countdown {
        fn service(self: Arc<Self>) -> Option<Duration> {
            let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (done < self.rounds).then_some(self.delay)
        }
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

    fn weak(target: &Arc<Countdown>) -> Weak<dyn Maintain> {
        let target: Arc<dyn Maintain> = target.clone();
        Arc::downgrade(&target)
    }

    #[test]
    fn test_services_until_quiescent() {
        let scheduler = Arc::new(Scheduler::new());
        let target = Countdown::new(3, Duration::from_millis(10));

        scheduler.request(weak(&target));
        assert!(wait_for(|| target.calls() == 3));
        assert!(wait_for(|| !scheduler.is_running()));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(target.calls(), 3);
    }

    #[test]
    fn test_worker_restarts_on_request() {
        let scheduler = Arc::new(Scheduler::new());
        let first = Countdown::new(1, Duration::ZERO);
        scheduler.request(weak(&first));
        assert!(wait_for(|| first.calls() == 1 && !scheduler.is_running()));

        let second = Countdown::new(1, Duration::ZERO);
        scheduler.request(weak(&second));
        assert!(wait_for(|| second.calls() == 1));
    }

    #[test]
    fn test_request_wakes_sleeping_worker() {
        let scheduler = Arc::new(Scheduler::new());
        let slow = Countdown::new(usize::MAX, Duration::from_secs(3600));
        scheduler.request(weak(&slow));
        assert!(wait_for(|| slow.calls() == 1));

        let fast = Countdown::new(1, Duration::ZERO);
        scheduler.request(weak(&fast));
        assert!(wait_for(|| fast.calls() == 1));

        // Re-requesting makes it due immediately
        scheduler.request(weak(&slow));
        assert!(wait_for(|| slow.calls() == 2));
    }

    #[test]
    fn test_dropped_targets_fall_out() {
        let scheduler = Arc::new(Scheduler::new());
        let target = Countdown::new(usize::MAX, Duration::from_millis(10));
        scheduler.request(weak(&target));
        assert!(wait_for(|| target.calls() >= 1));

        drop(target);
        assert!(wait_for(|| !scheduler.is_running()));
    }

    struct Panics;

    impl Maintain for Panics {
        fn service(self: Arc<Self>) -> Option<Duration> {
            panic!("maintenance bug")
        }
    }

    #[test]
    fn test_panicking_target_does_not_kill_worker() {
        let scheduler = Arc::new(Scheduler::new());
        let bad: Arc<dyn Maintain> = Arc::new(Panics);
        scheduler.request(Arc::downgrade(&bad));

        let good = Countdown::new(2, Duration::from_millis(10));
        scheduler.request(weak(&good));
        assert!(wait_for(|| good.calls() == 2));
    }
}
