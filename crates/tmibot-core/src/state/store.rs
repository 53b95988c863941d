//! Concurrent state store.
//!
//! A mutex-guarded value with two ways in:
//!
//! - [`StateStore::access`] blocks until the lock is free, runs a closure
//!   against the value and returns its result.
//! - [`StateStore::buffered_write`] never blocks. If the lock is free it first
//!   replays every write previously buffered under the same [`Operation`]
//!   (FIFO), then applies the new one. If the lock is busy the write is queued
//!   under the operation's name and the call returns immediately.
//!
//! A buffered write is applied by whichever caller next acquires the lock for
//! that operation, or by [`StateStore::flush_pending`].
//!
//! ```rust,ignore
//! static BUMP: Operation<BotState, String> = Operation::new("bump", |state, user| {
//!     *state.counter_mut("messages", &user) += 1;
//! });
//!
//! store.buffered_write(&BUMP, "alice".to_string());
//! let total = store.access(|state| state.counter("messages", "alice"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

type PendingWrite<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A named mutation usable with [`StateStore::buffered_write`].
///
/// The name is the operation's identity: writes buffered under the same name
/// are replayed together, in the order they were buffered.
pub struct Operation<S, A> {
    name: &'static str,
    apply: fn(&mut S, A),
}

impl<S, A> Operation<S, A> {
    /// Creates a named operation.
    pub const fn new(name: &'static str, apply: fn(&mut S, A)) -> Self {
        Self { name, apply }
    }

    /// Returns the operation's identity.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<S, A> Clone for Operation<S, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, A> Copy for Operation<S, A> {}

impl<S, A> fmt::Debug for Operation<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

/// What happened to a buffered write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied now, after replaying `replayed` queued writes.
    Applied {
        /// Number of earlier writes drained first.
        replayed: usize,
    },
    /// The lock was busy; the write is queued.
    Buffered,
}

struct StoreInner<S> {
    state: Mutex<S>,
    pending: Mutex<HashMap<&'static str, VecDeque<PendingWrite<S>>>>,
}

/// Shared, cloneable handle to a guarded value.
pub struct StateStore<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for StateStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Default> Default for StateStore<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S> fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl<S> StateStore<S> {
    /// Wraps `state` in a new store.
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runs `f` with exclusive access to the state, blocking until the lock
    /// is available.
    pub fn access<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.state.lock();
        f(&mut guard)
    }

    /// Applies `op` now if the lock is free, otherwise queues it.
    pub fn buffered_write<A>(&self, op: &Operation<S, A>, args: A) -> WriteOutcome
    where
        S: 'static,
        A: Send + 'static,
    {
        // The queue lock is held across the try so a write cannot be queued
        // after a later caller of the same operation has already drained.
        let mut pending = self.inner.pending.lock();
        let Some(mut guard) = self.inner.state.try_lock() else {
            let apply = op.apply;
            pending
                .entry(op.name)
                .or_default()
                .push_back(Box::new(move |state| apply(state, args)));
            drop(pending);
            trace!(operation = op.name, "State busy, write buffered");
            return WriteOutcome::Buffered;
        };

        let queued = pending.remove(op.name).unwrap_or_default();
        drop(pending);

        let replayed = queued.len();
        for write in queued {
            write(&mut guard);
        }
        (op.apply)(&mut guard, args);
        if replayed > 0 {
            trace!(operation = op.name, replayed, "Replayed buffered writes");
        }
        WriteOutcome::Applied { replayed }
    }

    /// Blocks for the lock and applies every buffered write, identity by
    /// identity. Returns how many were applied.
    pub fn flush_pending(&self) -> usize {
        let mut guard = self.inner.state.lock();
        let queues = std::mem::take(&mut *self.inner.pending.lock());
        let mut applied = 0;
        for (_, queue) in queues {
            for write in queue {
                write(&mut guard);
                applied += 1;
            }
        }
        applied
    }

    /// Total number of buffered writes not yet applied.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().values().map(VecDeque::len).sum()
    }

    /// Number of buffered writes queued under one operation name.
    pub fn pending_for(&self, name: &str) -> usize {
        self.inner.pending.lock().get(name).map_or(0, VecDeque::len)
    }

    /// Clones the current value under the lock.
    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.access(|state| state.clone())
    }

    /// Replaces the whole value under the lock, returning the old one.
    pub fn replace(&self, state: S) -> S {
        self.access(|current| std::mem::replace(current, state))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    static PUSH: Operation<Vec<u32>, u32> = Operation::new("push", |v, n| v.push(n));
    static PUSH_TEN: Operation<Vec<u32>, u32> = Operation::new("push_ten", |v, n| v.push(n * 10));

    #[test]
    fn access_returns_result() {
        let store = StateStore::new(vec![1, 2, 3]);
        let sum: u32 = store.access(|v| v.iter().sum());
        assert_eq!(sum, 6);
    }

    #[test]
    fn buffered_write_applies_when_uncontended() {
        let store = StateStore::new(Vec::new());
        assert_eq!(
            store.buffered_write(&PUSH, 7),
            WriteOutcome::Applied { replayed: 0 }
        );
        assert_eq!(store.snapshot(), vec![7]);
    }

    #[test]
    fn contended_writes_drain_in_fifo_order() {
        let store = StateStore::new(Vec::new());

        store.access(|_| {
            for n in 0..5 {
                assert_eq!(store.buffered_write(&PUSH, n), WriteOutcome::Buffered);
            }
        });
        assert_eq!(store.pending_for("push"), 5);
        assert!(store.snapshot().is_empty());

        assert_eq!(
            store.buffered_write(&PUSH, 5),
            WriteOutcome::Applied { replayed: 5 }
        );
        assert_eq!(store.snapshot(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn identities_drain_independently() {
        let store = StateStore::new(Vec::new());
        store.access(|_| {
            store.buffered_write(&PUSH, 1);
            store.buffered_write(&PUSH_TEN, 2);
        });

        store.buffered_write(&PUSH_TEN, 3);
        assert_eq!(store.snapshot(), vec![20, 30]);
        assert_eq!(store.pending_for("push"), 1);

        assert_eq!(store.flush_pending(), 1);
        assert_eq!(store.snapshot(), vec![20, 30, 1]);
    }

    #[test]
    fn writes_from_many_threads_apply_exactly_once() {
        const THREADS: usize = 8;
        const PER_THREAD: u32 = 50;

        let store = StateStore::new(Vec::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_THREAD {
                        store.buffered_write(&PUSH, t as u32 * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        store.flush_pending();

        let mut values = store.snapshot();
        assert_eq!(values.len(), THREADS * PER_THREAD as usize);

        // Per-thread order is preserved.
        for t in 0..THREADS as u32 {
            let mine: Vec<_> = values.iter().copied().filter(|v| v / 1000 == t).collect();
            let expected: Vec<_> = (0..PER_THREAD).map(|i| t * 1000 + i).collect();
            assert_eq!(mine, expected);
        }

        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), THREADS * PER_THREAD as usize);
    }

    #[test]
    fn applied_write_leaves_nothing_queued_for_its_operation() {
        const ROUNDS: u32 = 2000;

        let store = StateStore::new(Vec::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        // Keeps the lock busy so writers keep hitting the buffered path.
        let holder = {
            let store = store.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    store.access(|v: &mut Vec<u32>| v.len());
                }
            })
        };
        let buffering = {
            let store = store.clone();
            thread::spawn(move || {
                for n in 0..ROUNDS {
                    store.buffered_write(&PUSH, n);
                }
            })
        };
        buffering.join().unwrap();
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        holder.join().unwrap();

        // Every buffering call has returned, so one more applied write must
        // drain the whole queue without a flush.
        assert!(matches!(
            store.buffered_write(&PUSH, ROUNDS),
            WriteOutcome::Applied { .. }
        ));
        assert_eq!(store.pending_for("push"), 0);
        assert_eq!(store.snapshot(), (0..=ROUNDS).collect::<Vec<_>>());
    }

    #[test]
    fn write_issued_inside_access_is_queued_not_deadlocked() {
        let store = StateStore::new(Vec::new());
        let outcome = store.access(|v: &mut Vec<u32>| {
            v.push(1);
            store.buffered_write(&PUSH, 2)
        });
        assert_eq!(outcome, WriteOutcome::Buffered);
        assert_eq!(store.pending_len(), 1);
        assert_eq!(
            store.buffered_write(&PUSH, 3),
            WriteOutcome::Applied { replayed: 1 }
        );
        assert_eq!(store.snapshot(), vec![1, 2, 3]);
    }
}
