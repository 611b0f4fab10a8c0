//! Bounded pool of concurrent downloads.
//!
//! Every download holds one socket, so the pool never runs more workers than
//! the process can open sockets for. Work is admitted in the order it was
//! enqueued.
use std::{collections::VecDeque, future::Future};

use futures::{future::BoxFuture, FutureExt};
use hashbrown::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// File descriptors kept for the process itself.
pub const RESERVED_FDS: u64 = 5;

/// Soft limit assumed when the real one cannot be read.
const DEFAULT_NOFILE: u64 = 1024;

/// How many workers can run at the same time, derived from the soft limit
/// of open files.
pub fn max_workers() -> usize {
    #[cfg(unix)]
    let soft = rlimit::getrlimit(rlimit::Resource::NOFILE)
        .map(|(soft, _hard)| soft)
        .unwrap_or(DEFAULT_NOFILE);

    #[cfg(not(unix))]
    let soft = DEFAULT_NOFILE;

    capacity_for(soft)
}

/// Half of `nofile` minus the reserved descriptors, at least one.
pub fn capacity_for(nofile: u64) -> usize {
    let capacity = (nofile / 2).saturating_sub(RESERVED_FDS);
    usize::try_from(capacity).unwrap_or(usize::MAX).max(1)
}

enum Slot {
    Queued(BoxFuture<'static, ()>),
    Running(JoinHandle<()>),
}

/// Result of [`WorkerPool::poll`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Workers still running.
    pub running: usize,
    /// The oldest slot that was not started yet.
    pub next_queued: Option<usize>,
    /// Slots whose worker panicked since the last poll.
    pub crashed: Vec<usize>,
}

pub struct WorkerPool {
    /// Work that was not reaped yet, a slot is never reused.
    slots: HashMap<usize, Slot>,
    next_slot: usize,
    /// Queued slots, oldest first.
    queued: VecDeque<usize>,
    running: Vec<usize>,
    capacity: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            next_slot: 0,
            queued: VecDeque::new(),
            running: Vec::new(),
            capacity: capacity.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cancelled when the pool shuts down, every worker stops at its next
    /// await point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register work without starting it, returns its slot.
    pub fn enqueue<F>(&mut self, task: F) -> usize
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(slot, Slot::Queued(task.boxed()));
        self.queued.push_back(slot);
        slot
    }

    /// Reap finished workers and report what is running and what is next.
    pub fn poll(&mut self) -> PoolStatus {
        let mut crashed = Vec::new();
        let slots = &mut self.slots;

        self.running.retain(|slot| {
            let Some(Slot::Running(handle)) = slots.get(slot) else {
                return false;
            };
            if !handle.is_finished() {
                return true;
            }

            if let Some(Slot::Running(handle)) = slots.remove(slot) {
                if let Some(Err(e)) = handle.now_or_never() {
                    if e.is_panic() {
                        warn!("{}", Error::WorkerCrash { slot: *slot });
                        crashed.push(*slot);
                    }
                }
            }
            false
        });

        PoolStatus {
            running: self.running.len(),
            next_queued: self.queued.front().copied(),
            crashed,
        }
    }

    /// Whether another worker can be started.
    pub fn has_room(&self, status: &PoolStatus) -> bool {
        status.running < self.capacity
    }

    /// Start the worker of `slot`, returns false if it is not queued.
    pub fn admit_next(&mut self, slot: usize) -> bool {
        let Some(Slot::Queued(_)) = self.slots.get(&slot) else {
            return false;
        };
        let Some(Slot::Queued(task)) = self.slots.remove(&slot) else {
            return false;
        };

        if let Some(pos) = self.queued.iter().position(|s| *s == slot) {
            self.queued.remove(pos);
        }

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });

        self.slots.insert(slot, Slot::Running(handle));
        self.running.push(slot);
        true
    }

    /// Stop every worker and forget every queued one.
    ///
    /// Workers are aborted where they are, a piece being downloaded is
    /// simply lost.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();

        for (_, slot) in self.slots.drain() {
            if let Slot::Running(handle) = slot {
                handle.abort();
            }
        }

        debug!("pool shutdown, {} workers stopped", self.running.len());

        self.queued.clear();
        self.running.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    // poll until nothing runs, keeping every crash seen on the way
    async fn settle(pool: &mut WorkerPool) -> PoolStatus {
        let mut crashed = Vec::new();
        for _ in 0..100 {
            let mut status = pool.poll();
            crashed.append(&mut status.crashed);
            if status.running == 0 {
                return PoolStatus { crashed, ..status };
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        PoolStatus { crashed, ..pool.poll() }
    }

    #[test]
    fn capacity_from_nofile() {
        assert_eq!(capacity_for(1024), 507);
        assert_eq!(capacity_for(8), 1);
        assert_eq!(capacity_for(0), 1);
        assert!(max_workers() >= 1);
    }

    #[tokio::test]
    async fn fcfs_admission() {
        let mut pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            pool.enqueue(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        let status = pool.poll();
        assert_eq!(status.running, 0);
        assert_eq!(status.next_queued, Some(0));

        assert!(pool.admit_next(0));
        assert!(!pool.admit_next(0));
        assert_eq!(pool.poll().next_queued, Some(1));

        assert!(pool.admit_next(1));
        let status = settle(&mut pool).await;
        assert_eq!(status.next_queued, Some(2));
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_worker_is_reaped() {
        let mut pool = WorkerPool::new(4);
        let slot = pool.enqueue(async { panic!("worker crash") });
        pool.enqueue(async {});

        pool.admit_next(slot);
        pool.admit_next(slot + 1);

        let status = settle(&mut pool).await;
        assert_eq!(status.running, 0);
        assert_eq!(status.crashed, vec![slot]);
        assert!(pool.poll().crashed.is_empty());
    }

    #[tokio::test]
    async fn reaped_slots_are_freed() {
        let mut pool = WorkerPool::new(2);

        for round in 0..50 {
            let slot = pool.enqueue(async {});
            assert_eq!(slot, round);
            assert!(pool.admit_next(slot));
            settle(&mut pool).await;
        }

        assert!(pool.slots.is_empty());
        assert!(pool.queued.is_empty());
        assert!(!pool.admit_next(0));
    }

    #[tokio::test]
    async fn shutdown_stops_running_workers() {
        let mut pool = WorkerPool::new(4);
        let token = pool.cancel_token();
        pool.enqueue(std::future::pending());
        pool.enqueue(async {});

        pool.admit_next(0);
        assert_eq!(pool.poll().running, 1);

        pool.shutdown();

        let status = pool.poll();
        assert_eq!(status, PoolStatus::default());
        assert!(token.is_cancelled());
        assert!(!pool.admit_next(1));
    }
}
