/*
 * This file is part of corebase.
 *
 * corebase is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * corebase is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with corebase. If not, see <https://www.gnu.org/licenses/>.
*/

//! A pool of sequence-keyed completions: a producer calls [`FuturePool::alloc`]
//! to get a [`FutureHandle`] and hands the sequence number to a worker; the
//! worker opens a [`Promise`] against that sequence and commits a result.
//!
//! The source keys a future by splaying an embedded `x_btnode` on its
//! sequence number. The lookup here is purely by key (never a range query or
//! an in-order walk), so it's a better fit for this crate's chained
//! [`crate::containers::HashMap`] than for the splay tree; the splay is put
//! to its intended use in [`crate::rope`] and [`crate::pathset`] instead,
//! where ordered traversal actually happens.
//!
//! The sequence space is a fixed 65 536 slots, tracked by a [`crate::containers::Bitmap`]
//! exactly as wide as the source's `bit_buf[8192]`. `last_id` is a round-robin
//! cursor into that bitmap so a freed sequence isn't immediately reused,
//! trimming the odds of a stale [`FutureHandle`] aliasing a fresh allocation.

use crate::containers::{Bitmap, HashMap};
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SEQ_SPACE: usize = 1 << 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FutureState {
    Pending,
    Busy,
    Ready,
}

struct Slot<T> {
    state: FutureState,
    data: Option<T>,
    retcode: i32,
}

struct Pool<T> {
    table: HashMap<u16, Slot<T>>,
    in_use: Bitmap,
    last_id: u16,
}

/// Construct/tear-down unit for a set of in-flight futures. On drop, any
/// future still registered is simply dropped along with the table; nothing
/// external holds a raw pointer into it, so there's no "detach every live
/// future" step to perform by hand the way the source's `fupool_free` does.
pub struct FuturePool<T> {
    inner: Mutex<Pool<T>>,
    status_cond: Condvar,
    seq_cond: Condvar,
}

impl<T> FuturePool<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Pool {
                table: HashMap::new(),
                in_use: Bitmap::new(SEQ_SPACE),
                last_id: 0,
            }),
            status_cond: Condvar::new(),
            seq_cond: Condvar::new(),
        })
    }

    /// Allocates a sequence number and inserts `data` in `Pending` state.
    /// Blocks on the pool's free-sequence condvar if every one of the
    /// 65 536 slots is in flight (pathological, but the source handles it
    /// rather than erroring, and so do we).
    pub fn alloc(self: &Arc<Self>, data: T) -> FutureHandle<T> {
        let mut state = self.inner.lock();
        let mut warned = false;
        loop {
            let start = state.last_id as usize + 1;
            if let Some(bit) = state.in_use.find(start, false) {
                state.in_use.set(bit);
                state.last_id = bit as u16;
                state.table.insert(
                    bit as u16,
                    Slot {
                        state: FutureState::Pending,
                        data: Some(data),
                        retcode: 0,
                    },
                );
                trace!("fupool: allocated seq {bit}");
                return FutureHandle {
                    pool: Arc::clone(self),
                    seq: bit as u16,
                };
            }
            if !warned {
                warn!("fupool: sequence space exhausted, blocking future_init until a free occurs");
                warned = true;
            }
            self.seq_cond.wait(&mut state);
        }
    }

    /// Finds the future named by `seq`. If it's `Pending`, transitions it to
    /// `Busy` and hands back a [`Promise`] holding its payload. Otherwise
    /// (already freed, or racing another promise) the returned promise is
    /// empty: `commit` on it is a no-op.
    pub fn promise_start(self: &Arc<Self>, seq: u16) -> Promise<T> {
        let mut state = self.inner.lock();
        let data = match state.table.get_mut(&seq) {
            Some(slot) if slot.state == FutureState::Pending => {
                slot.state = FutureState::Busy;
                trace!("fupool: seq {seq} pending -> busy");
                slot.data.take()
            }
            _ => {
                trace!("fupool: promise_start on seq {seq} found no pending future; empty promise");
                None
            }
        };
        Promise {
            pool: Arc::clone(self),
            seq,
            data,
        }
    }

    fn deadline(timeout: Option<Duration>) -> Option<Instant> {
        timeout.map(|d| Instant::now() + d)
    }

    /// Blocks until `self.status_cond` wakes, honoring `deadline`. Returns
    /// `false` if the deadline passed.
    fn wait_for_status<'a>(
        cond: &Condvar,
        guard: &mut parking_lot::MutexGuard<'a, Pool<T>>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            None => {
                cond.wait(guard);
                true
            }
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                !cond.wait_for(guard, remaining).timed_out()
            }
        }
    }
}

/// Outcome of waiting on a single future.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready(i32),
    /// the future was already gone (freed) when awaited
    WasNull,
    TimedOut,
}

/// Outcome of [`FuturePool::wait_any`].
#[derive(Debug, PartialEq, Eq)]
pub enum AnyOutcome {
    ReadyAt(usize, i32),
    /// every future in the set was NULL (already freed)
    AllNull,
    TimedOut,
}

/// Outcome of [`FuturePool::wait_all`].
#[derive(Debug, PartialEq, Eq)]
pub enum AllOutcome {
    /// at least one future became ready and every other is ready or NULL
    Ready,
    AllNull,
    TimedOut,
}

impl<T> FuturePool<T> {
    pub fn wait(&self, seq: u16, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = Self::deadline(timeout);
        let mut state = self.inner.lock();
        loop {
            match state.table.get(&seq) {
                None => return WaitOutcome::WasNull,
                Some(slot) if slot.state == FutureState::Ready => {
                    return WaitOutcome::Ready(slot.retcode)
                }
                _ => {}
            }
            if !Self::wait_for_status(&self.status_cond, &mut state, deadline) {
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// Returns the index of the first ready future in `seqs`, or [`AnyOutcome::AllNull`]
    /// if every one was NULL when observed.
    pub fn wait_any(&self, seqs: &[u16], timeout: Option<Duration>) -> AnyOutcome {
        let deadline = Self::deadline(timeout);
        let mut state = self.inner.lock();
        loop {
            let mut all_null = true;
            for (i, &seq) in seqs.iter().enumerate() {
                if let Some(slot) = state.table.get(&seq) {
                    all_null = false;
                    if slot.state == FutureState::Ready {
                        return AnyOutcome::ReadyAt(i, slot.retcode);
                    }
                }
            }
            if all_null {
                return AnyOutcome::AllNull;
            }
            if !Self::wait_for_status(&self.status_cond, &mut state, deadline) {
                return AnyOutcome::TimedOut;
            }
        }
    }

    /// Returns [`AllOutcome::Ready`] once every non-NULL future in `seqs` is
    /// ready, provided at least one was ever non-NULL.
    pub fn wait_all(&self, seqs: &[u16], timeout: Option<Duration>) -> AllOutcome {
        let deadline = Self::deadline(timeout);
        let mut state = self.inner.lock();
        loop {
            let mut have_any = false;
            let mut have_pending = false;
            for &seq in seqs {
                if let Some(slot) = state.table.get(&seq) {
                    have_any = true;
                    if slot.state != FutureState::Ready {
                        have_pending = true;
                    }
                }
            }
            if !have_any {
                return AllOutcome::AllNull;
            }
            if !have_pending {
                return AllOutcome::Ready;
            }
            if !Self::wait_for_status(&self.status_cond, &mut state, deadline) {
                return AllOutcome::TimedOut;
            }
        }
    }
}

/// A handle to an in-flight future, named by its sequence number.
pub struct FutureHandle<T> {
    pool: Arc<FuturePool<T>>,
    seq: u16,
}

impl<T> FutureHandle<T> {
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn is_ready(&self) -> bool {
        let state = self.pool.inner.lock();
        matches!(
            state.table.get(&self.seq).map(|s| s.state),
            Some(FutureState::Ready)
        )
    }

    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.pool.wait(self.seq, timeout)
    }

    /// Blocks while the future is `Busy`, then removes it from the pool,
    /// recycles its sequence, and wakes anyone waiting on a free sequence
    /// or on this future's status.
    pub fn free(self) {
        let mut state = self.pool.inner.lock();
        loop {
            match state.table.get(&self.seq).map(|s| s.state) {
                Some(FutureState::Busy) => {
                    self.pool.status_cond.wait(&mut state);
                }
                _ => break,
            }
        }
        state.table.remove(&self.seq);
        state.in_use.clear(self.seq as usize);
        drop(state);
        trace!("fupool: seq {} freed and recycled", self.seq);
        self.pool.seq_cond.notify_one();
        self.pool.status_cond.notify_all();
    }
}

/// A worker's claim on a future's payload, opened via [`FuturePool::promise_start`].
pub struct Promise<T> {
    pool: Arc<FuturePool<T>>,
    seq: u16,
    data: Option<T>,
}

impl<T> Promise<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut T> {
        self.data.as_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// Commits `retcode` and transitions the future to `Ready`, waking
    /// everyone blocked on it. A no-op if this promise is empty: there is
    /// nothing left to write a result into.
    pub fn commit(self, retcode: i32) {
        if self.data.is_none() {
            return;
        }
        {
            let mut state = self.pool.inner.lock();
            if let Some(slot) = state.table.get_mut(&self.seq) {
                slot.retcode = retcode;
                slot.state = FutureState::Ready;
            }
        }
        trace!("fupool: seq {} busy -> ready (retcode={retcode})", self.seq);
        self.pool.status_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn alloc_wait_commit_roundtrip() {
        let pool = FuturePool::new();
        let fut = pool.alloc(42i32);
        let seq = fut.seq();

        let worker_pool = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            let mut promise = worker_pool.promise_start(seq);
            assert!(!promise.is_empty());
            assert_eq!(*promise.data_mut().unwrap(), 42);
            promise.commit(7);
        });

        assert_eq!(fut.wait(None), WaitOutcome::Ready(7));
        handle.join().unwrap();
        fut.free();
    }

    #[test]
    fn wait_after_free_is_was_null() {
        let pool: Arc<FuturePool<i32>> = FuturePool::new();
        let fut = pool.alloc(1);
        let seq = fut.seq();
        fut.free();
        assert_eq!(pool.wait(seq, None), WaitOutcome::WasNull);
    }

    #[test]
    fn wait_any_returns_first_ready_index() {
        let pool = FuturePool::new();
        let a = pool.alloc("a");
        let b = pool.alloc("b");
        let seqs = [a.seq(), b.seq()];

        let promise = pool.promise_start(b.seq());
        promise.commit(0);

        match pool.wait_any(&seqs, None) {
            AnyOutcome::ReadyAt(idx, _) => assert_eq!(idx, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        a.free();
        b.free();
    }

    #[test]
    fn wait_all_waits_for_every_future() {
        let pool = FuturePool::new();
        let a = pool.alloc(1);
        let b = pool.alloc(2);
        let seqs = [a.seq(), b.seq()];

        pool.promise_start(a.seq()).commit(0);
        assert_eq!(pool.wait_all(&seqs, Some(Duration::from_millis(20))), AllOutcome::TimedOut);

        pool.promise_start(b.seq()).commit(0);
        assert_eq!(pool.wait_all(&seqs, None), AllOutcome::Ready);
        a.free();
        b.free();
    }

    #[test]
    fn wait_all_on_only_freed_futures_is_all_null() {
        let pool: Arc<FuturePool<i32>> = FuturePool::new();
        let a = pool.alloc(1);
        let seq = a.seq();
        a.free();
        assert_eq!(pool.wait_all(&[seq], None), AllOutcome::AllNull);
    }

    #[test]
    fn empty_promise_commit_is_a_no_op() {
        let pool: Arc<FuturePool<i32>> = FuturePool::new();
        let fut = pool.alloc(1);
        let seq = fut.seq();
        fut.free();
        let empty = pool.promise_start(seq);
        assert!(empty.is_empty());
        empty.commit(99); // must not panic
    }
}
