//! Lock-free dual stack of ready resources and waiting requests
//!
//! Both stacks hang off a single immutable [`Heads`] snapshot that is replaced
//! wholesale by compare-and-swap. An acquire can therefore pop a resource *or*
//! enqueue itself, and a release can serve a waiter *or* push a resource, in one
//! atomic step and without locks.
//!
//! Published ready links never change. The contents of a ready slot may be taken
//! or swapped in place, which is how the aging pass replaces stale entries deep in
//! the stack without restructuring it. Waiting requests are never spliced out:
//! dead ones are skipped while walking and fall away when they reach the front, or
//! when the FIFO hand-off cuts the dead tail behind the waiter it just served.

use std::iter;
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::Notify;

/// A resource with the stamps the aging pass looks at
pub(crate) struct Stamped<T> {
    pub resource: Arc<T>,
    pub last_used: Instant,
    pub last_tested: Instant,
}

impl<T> Stamped<T> {
    pub fn new(resource: Arc<T>, last_used: Instant, last_tested: Instant) -> Arc<Self> {
        Arc::new(Self {
            resource,
            last_used,
            last_tested,
        })
    }

    /// Drop the stamps, leaving this handle the sole owner where possible
    pub fn into_resource(self: Arc<Self>) -> Arc<T> {
        match Arc::try_unwrap(self) {
            Ok(stamped) => stamped.resource,
            Err(shared) => Arc::clone(&shared.resource),
        }
    }
}

pub(crate) struct ReadyNode<T> {
    slot: ArcSwapOption<Stamped<T>>,
    next: Option<Arc<ReadyNode<T>>>,
}

impl<T> ReadyNode<T> {
    fn linked(stamped: Arc<Stamped<T>>, next: Option<Arc<ReadyNode<T>>>) -> Arc<Self> {
        Arc::new(Self {
            slot: ArcSwapOption::new(Some(stamped)),
            next,
        })
    }

    pub fn peek(&self) -> Option<Arc<Stamped<T>>> {
        self.slot.load_full()
    }

    /// First taker wins; everyone else sees `None`
    pub fn try_take(&self) -> Option<Arc<Stamped<T>>> {
        self.slot.swap(None)
    }

    /// Replace `current` with `replacement` unless the slot changed since `current` was read.
    /// Gives `replacement` back on failure.
    pub fn try_swap(
        &self,
        current: &Arc<Stamped<T>>,
        replacement: Arc<Stamped<T>>,
    ) -> Result<(), Arc<Stamped<T>>> {
        let previous = self.slot.compare_and_swap(current, Some(Arc::clone(&replacement)));
        match &*previous {
            Some(found) if Arc::ptr_eq(found, current) => Ok(()),
            _ => Err(replacement),
        }
    }
}

impl<T> Drop for ReadyNode<T> {
    fn drop(&mut self) {
        // Unlink iteratively so a long stack can't overflow the thread stack
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// How a blocked caller gets woken
pub(crate) enum Wake {
    Thread(Thread),
    Task(Arc<Notify>),
}

impl Wake {
    fn wake(&self) {
        match self {
            Wake::Thread(thread) => thread.unpark(),
            Wake::Task(notify) => notify.notify_one(),
        }
    }
}

enum Response<T> {
    Granted(Arc<Stamped<T>>),
    Aborted,
    Expired,
}

/// Final state of a waiting request, seen exactly once by its owner
pub(crate) enum Outcome<T> {
    Granted(Arc<Stamped<T>>),
    Aborted,
    Expired,
}

pub(crate) struct WaitNode<T> {
    response: ArcSwapOption<Response<T>>,
    wake: Wake,
    next: ArcSwapOption<WaitNode<T>>,
}

impl<T> WaitNode<T> {
    pub fn new(wake: Wake) -> Arc<Self> {
        Arc::new(Self {
            response: ArcSwapOption::empty(),
            wake,
            next: ArcSwapOption::empty(),
        })
    }

    pub fn for_current_thread() -> Arc<Self> {
        Self::new(Wake::Thread(thread::current()))
    }

    pub fn is_alive(&self) -> bool {
        self.response.load().is_none()
    }

    /// Hand over a resource. Fails if the request already resolved.
    pub fn try_respond(&self, stamped: &Arc<Stamped<T>>) -> bool {
        self.resolve(Response::Granted(Arc::clone(stamped)))
    }

    pub fn abort(&self) -> bool {
        self.resolve(Response::Aborted)
    }

    fn resolve(&self, response: Response<T>) -> bool {
        if !self.is_alive() {
            return false;
        }
        let previous = self
            .response
            .compare_and_swap(&None::<Arc<Response<T>>>, Some(Arc::new(response)));
        if previous.is_none() {
            self.wake.wake();
            true
        } else {
            false
        }
    }

    /// Close the request and collect whatever it resolved to.
    /// Later responders fail, so a granted resource is never lost.
    pub fn claim(&self) -> Outcome<T> {
        let previous = self.response.swap(Some(Arc::new(Response::Expired)));
        match previous.as_deref() {
            Some(Response::Granted(stamped)) => Outcome::Granted(Arc::clone(stamped)),
            Some(Response::Aborted) => Outcome::Aborted,
            Some(Response::Expired) | None => Outcome::Expired,
        }
    }

    /// Park the current thread until resolved or `deadline` passes, then claim
    pub fn wait_until(&self, deadline: Instant) -> Outcome<T> {
        while self.is_alive() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        self.claim()
    }
}

impl<T> Drop for WaitNode<T> {
    fn drop(&mut self) {
        let mut next = self.next.swap(None);
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(node) => next = node.next.swap(None),
                Err(_) => break,
            }
        }
    }
}

fn waiters<T>(head: Option<Arc<WaitNode<T>>>) -> impl Iterator<Item = Arc<WaitNode<T>>> {
    iter::successors(head, |node| node.next.load_full())
}

fn first_live<T>(head: Option<Arc<WaitNode<T>>>) -> Option<Arc<WaitNode<T>>> {
    waiters(head).find(|w| w.is_alive())
}

fn last_live<T>(head: Option<Arc<WaitNode<T>>>) -> Option<Arc<WaitNode<T>>> {
    waiters(head).filter(|w| w.is_alive()).last()
}

struct Heads<T> {
    ready: Option<Arc<ReadyNode<T>>>,
    waiting: Option<Arc<WaitNode<T>>>,
}

impl<T> Default for Heads<T> {
    fn default() -> Self {
        Self {
            ready: None,
            waiting: None,
        }
    }
}

/// Walks the ready stack as it was when the walk started
pub(crate) struct ReadyWalk<T> {
    next: Option<Arc<ReadyNode<T>>>,
}

impl<T> Iterator for ReadyWalk<T> {
    type Item = Arc<ReadyNode<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        self.next = node.next.clone();
        Some(node)
    }
}

pub(crate) struct DualStack<T> {
    heads: ArcSwap<Heads<T>>,
}

impl<T> DualStack<T> {
    pub fn new() -> Self {
        Self {
            heads: ArcSwap::from_pointee(Heads::default()),
        }
    }

    /// The only way the heads change. `op` may run several times and must only
    /// compute the replacement from the snapshot it is given.
    fn swap<F>(&self, mut op: F) -> Arc<Heads<T>>
    where
        F: FnMut(&Heads<T>) -> Heads<T>,
    {
        self.heads.rcu(|current| op(current))
    }

    /// Pop a ready resource, or enqueue `waiter` if there is none
    pub fn pop_or_wait(&self, waiter: &Arc<WaitNode<T>>) -> Option<Arc<Stamped<T>>> {
        loop {
            let original = self.swap(|h| match &h.ready {
                Some(top) => Heads {
                    ready: top.next.clone(),
                    waiting: h.waiting.clone(),
                },
                None => {
                    waiter.next.store(h.waiting.clone());
                    Heads {
                        ready: None,
                        waiting: Some(Arc::clone(waiter)),
                    }
                }
            });

            let top = original.ready.as_ref()?;
            waiter.next.store(None);
            if let Some(stamped) = top.try_take() {
                return Some(stamped);
            }
        }
    }

    /// Pop a ready resource regardless of who is waiting
    pub fn try_pop(&self) -> Option<Arc<Stamped<T>>> {
        loop {
            let original = self.swap(|h| Heads {
                ready: h.ready.as_ref().and_then(|top| top.next.clone()),
                waiting: h.waiting.clone(),
            });

            let top = original.ready.as_ref()?;
            if let Some(stamped) = top.try_take() {
                return Some(stamped);
            }
        }
    }

    /// Serve the newest waiter, else push onto the ready stack
    pub fn push_unfair(&self, stamped: Arc<Stamped<T>>) {
        loop {
            let original = self.swap(|h| match &h.waiting {
                Some(waiter) => Heads {
                    ready: h.ready.clone(),
                    waiting: waiter.next.load_full(),
                },
                None => Heads {
                    ready: Some(ReadyNode::linked(Arc::clone(&stamped), h.ready.clone())),
                    waiting: None,
                },
            });

            let Some(waiter) = &original.waiting else {
                return;
            };
            // Fails only if that waiter timed out meanwhile
            if waiter.try_respond(&stamped) {
                return;
            }
        }
    }

    /// Serve the oldest live waiter, else push onto the ready stack
    pub fn push_fair(&self, stamped: Arc<Stamped<T>>) {
        loop {
            if Self::respond_oldest(self.heads.load().waiting.clone(), &stamped) {
                return;
            }

            let original = self.swap(|h| match &h.waiting {
                Some(waiter) => {
                    let next = waiter.next.load_full();
                    let waiting = if next.is_none() {
                        None
                    } else if waiter.is_alive() {
                        h.waiting.clone()
                    } else {
                        first_live(next)
                    };
                    Heads {
                        ready: h.ready.clone(),
                        waiting,
                    }
                }
                None => Heads {
                    ready: Some(ReadyNode::linked(Arc::clone(&stamped), h.ready.clone())),
                    waiting: None,
                },
            });

            if original.waiting.is_none() {
                return;
            }
            if Self::respond_oldest(original.waiting.clone(), &stamped) {
                return;
            }
        }
    }

    fn respond_oldest(chain: Option<Arc<WaitNode<T>>>, stamped: &Arc<Stamped<T>>) -> bool {
        while let Some(waiter) = last_live(chain.clone()) {
            if waiter.try_respond(stamped) {
                // Everything behind the oldest live waiter is dead
                waiter.next.store(None);
                return true;
            }
        }
        false
    }

    /// Unlink every waiter and abort the live ones
    pub fn abort_waiting(&self) -> usize {
        let original = self.swap(|h| Heads {
            ready: h.ready.clone(),
            waiting: None,
        });
        waiters(original.waiting.clone()).filter(|w| w.abort()).count()
    }

    pub fn ready_walk(&self) -> ReadyWalk<T> {
        ReadyWalk {
            next: self.heads.load().ready.clone(),
        }
    }

    pub fn available_count(&self) -> usize {
        self.ready_walk().filter(|node| node.slot.load().is_some()).count()
    }

    pub fn waiting_count(&self) -> usize {
        waiters(self.heads.load().waiting.clone()).filter(|w| w.is_alive()).count()
    }

    /// Whether more than `limit` callers are waiting. Stops counting early.
    pub fn live_waiting_exceeds(&self, limit: usize) -> bool {
        waiters(self.heads.load().waiting.clone())
            .filter(|w| w.is_alive())
            .nth(limit)
            .is_some()
    }
}
