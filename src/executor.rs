//! Shared worker threads for asynchronous create, validate and destroy work
//!
//! Behaves like a cached thread pool: a task goes to an idle worker if there is
//! one and to a freshly spawned worker otherwise, so a slow `create` never holds
//! up unrelated tasks. Workers idle for [`KEEP_ALIVE`] exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::error;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: LazyLock<Arc<TaskExecutor>> = LazyLock::new(|| Arc::new(TaskExecutor::new(KEEP_ALIVE)));

pub(crate) struct TaskExecutor {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    // Workers waiting for a job that no submitter has claimed yet
    idle: AtomicUsize,
    workers: AtomicUsize,
    keep_alive: Duration,
}

impl TaskExecutor {
    pub fn new(keep_alive: Duration) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            idle: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
            keep_alive,
        }
    }

    pub fn global() -> &'static Arc<TaskExecutor> {
        &GLOBAL
    }

    #[cfg(test)]
    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn execute<F>(self: &Arc<Self>, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let claimed = self
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if let Err(err) = self.sender.send(Box::new(task)) {
            // The executor owns the receiver, so this can't happen while `self` lives
            error!("task queue closed: {err}");
            return;
        }
        if claimed {
            return;
        }

        let me = Arc::clone(self);
        self.workers.fetch_add(1, Ordering::Relaxed);
        let spawned = thread::Builder::new()
            .name("pool-task-worker".to_string())
            .spawn(move || me.work());

        if let Err(err) = spawned {
            self.workers.fetch_sub(1, Ordering::Relaxed);
            error!("failed to spawn pool worker, running task inline: {err}");
            if let Ok(job) = self.receiver.try_recv() {
                run_job(job);
            }
        }
    }

    fn work(&self) {
        // Spawned for a job that is already queued
        let mut job = self.receiver.recv().ok();
        while let Some(current) = job.take() {
            run_job(current);
            job = self.next_job();
        }
        self.workers.fetch_sub(1, Ordering::Relaxed);
    }

    fn next_job(&self) -> Option<Job> {
        self.idle.fetch_add(1, Ordering::AcqRel);
        match self.receiver.recv_timeout(self.keep_alive) {
            // Whoever sent this already claimed our idle slot
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout) => {
                let released = self
                    .idle
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                if released {
                    None
                } else {
                    // A submitter claimed us just now and its job is on the way
                    self.receiver.recv().ok()
                }
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("pool task panicked");
    }
}
