// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unbounded FIFO queue where consumers may wait for items.
//!
//! ## Handoff discipline
//!
//! Produced items and pending consumers live in two lock-free FIFOs. Every
//! operation bumps an atomic pending counter; the thread that moves it from
//! zero owns a single-flight handoff region and pairs items with waiters
//! until either side runs dry, re-checking the counter before leaving.
//! Everyone else only increments and moves on. Consequences:
//!
//! - a producer never waits on a consumer
//! - a consumer never spins for an item; it parks on its own waiter cell
//! - exactly one thread performs handoff work at any instant
//!
//! Items returned via [`put_head`](ConcurrentBlockingQueue::put_head)
//! (aborted reads) and the item the handoff is left holding when waiters
//! run dry live in a small mutex-guarded deque that is always drained
//! before fresh items, preserving FIFO order.
//!
//! ## Deadlines and cancellation
//!
//! Each waiter is a single-assignment cell. Expiry and delivery race on an
//! atomic state transition: whichever of the timed wait and the handoff
//! loop transitions the cell first wins, and the handoff loop discards
//! waiters it lost to. Cancelling (or dropping) a wait handle behaves like
//! deadline expiry; an item that had already been assigned to a cancelled
//! waiter goes back to the head of the queue.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use crossbeam::queue::SegQueue;

enum WaiterState<T> {
    Waiting,
    Filled(T),
    Taken,
    Expired,
}

/// A single-assignment result cell for one pending consumer.
struct Waiter<T> {
    state: Mutex<WaiterState<T>>,
    cond:  Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaiterState::Waiting),
            cond:  Condvar::new(),
        }
    }

    /// Deliver an item. Fails (returning the item) if the waiter already
    /// expired or was cancelled.
    fn fill(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().expect("waiter lock poisoned");
        match *state {
            WaiterState::Waiting => {
                *state = WaiterState::Filled(item);
                self.cond.notify_one();
                Ok(())
            }
            _ => Err(item),
        }
    }

    /// Take a delivered item without waiting.
    fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock().expect("waiter lock poisoned");
        match *state {
            WaiterState::Filled(_) => match std::mem::replace(&mut *state, WaiterState::Taken) {
                WaiterState::Filled(item) => Some(item),
                _ => None,
            },
            _ => None,
        }
    }

    /// Expire the waiter; if delivery already won the race, yield the item
    /// back so the caller can requeue it.
    fn expire_take(&self) -> Option<T> {
        let mut state = self.state.lock().expect("waiter lock poisoned");
        match *state {
            WaiterState::Waiting => {
                *state = WaiterState::Expired;
                None
            }
            WaiterState::Filled(_) => match std::mem::replace(&mut *state, WaiterState::Taken) {
                WaiterState::Filled(item) => Some(item),
                _ => None,
            },
            _ => None,
        }
    }

    /// Park until filled, expired, or past the deadline.
    fn wait(&self, deadline: Option<Instant>) -> Option<T> {
        let mut state = self.state.lock().expect("waiter lock poisoned");
        loop {
            match *state {
                WaiterState::Filled(_) => {
                    return match std::mem::replace(&mut *state, WaiterState::Taken) {
                        WaiterState::Filled(item) => Some(item),
                        _ => None,
                    };
                }
                WaiterState::Expired | WaiterState::Taken => return None,
                WaiterState::Waiting => match deadline {
                    None => {
                        state = self.cond.wait(state).expect("waiter lock poisoned");
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            *state = WaiterState::Expired;
                            return None;
                        }
                        state = self
                            .cond
                            .wait_timeout(state, deadline - now)
                            .expect("waiter lock poisoned")
                            .0;
                    }
                },
            }
        }
    }
}

struct CbqInner<T> {
    /// Fresh items, in arrival order.
    items:    SegQueue<T>,
    /// Aborted/returned items plus the item the handoff was left holding;
    /// always drained before `items`.
    returned: Mutex<VecDeque<T>>,
    /// Pending consumers, in registration order.
    waiters:  SegQueue<Arc<Waiter<T>>>,
    /// Handoff counter; the zero-to-one transition elects the handoff owner.
    pending:  AtomicUsize,
    /// Items not yet handed to a consumer.
    len:      AtomicUsize,
}

impl<T> CbqInner<T> {
    fn schedule_handoff(&self) {
        if self.pending.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut claimed = 1;
        loop {
            self.handoff();
            let before = self.pending.fetch_sub(claimed, Ordering::AcqRel);
            if before == claimed {
                break;
            }
            claimed = before - claimed;
        }
    }

    fn handoff(&self) {
        let mut returned = self.returned.lock().expect("returned lock poisoned");
        loop {
            let Some(item) = returned.pop_front().or_else(|| self.items.pop()) else {
                break;
            };
            if let Some(unclaimed) = self.offer(item) {
                returned.push_front(unclaimed);
                break;
            }
        }
    }

    /// Hand `item` to the first live waiter; returns it if none remain.
    fn offer(&self, item: T) -> Option<T> {
        let mut item = item;
        while let Some(waiter) = self.waiters.pop() {
            match waiter.fill(item) {
                Ok(()) => {
                    self.len.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
                Err(back) => item = back,
            }
        }
        Some(item)
    }

    fn put_head(&self, item: T) {
        self.returned
            .lock()
            .expect("returned lock poisoned")
            .push_front(item);
        self.len.fetch_add(1, Ordering::AcqRel);
        self.schedule_handoff();
    }
}

/// A pending `get`: the consumer-side future.
pub struct WaitHandle<T> {
    waiter:   Arc<Waiter<T>>,
    queue:    Arc<CbqInner<T>>,
    deadline: Option<Instant>,
}

impl<T> WaitHandle<T> {
    /// Block until an item arrives or the deadline passes.
    pub fn wait(self) -> Option<T> { self.waiter.wait(self.deadline) }

    /// Cancel the wait; equivalent to deadline expiry. An item already
    /// assigned to this waiter is returned to the head of the queue.
    pub fn cancel(&self) {
        if let Some(item) = self.waiter.expire_take() {
            self.queue.put_head(item);
        }
    }
}

impl<T> Drop for WaitHandle<T> {
    fn drop(&mut self) {
        // An abandoned handle must not strand a delivered item.
        if let Some(item) = self.waiter.expire_take() {
            self.queue.put_head(item);
        }
    }
}

/// Unbounded FIFO with blocking consumers. Cheap to clone; clones share
/// the same queue.
#[derive(Clone)]
pub struct ConcurrentBlockingQueue<T> {
    inner: Arc<CbqInner<T>>,
}

impl<T> Default for ConcurrentBlockingQueue<T> {
    fn default() -> Self { Self::new() }
}

impl<T> ConcurrentBlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CbqInner {
                items:    SegQueue::new(),
                returned: Mutex::new(VecDeque::new()),
                waiters:  SegQueue::new(),
                pending:  AtomicUsize::new(0),
                len:      AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueue an item. Never blocks, never fails.
    pub fn put(&self, item: T) {
        self.inner.items.push(item);
        self.inner.len.fetch_add(1, Ordering::AcqRel);
        self.inner.schedule_handoff();
    }

    /// Return an item to the *front* of the queue, ahead of fresh puts.
    pub fn put_head(&self, item: T) { self.inner.put_head(item); }

    /// Register a consumer. The returned handle completes with the next
    /// item, or empty once `deadline` passes (`None` = wait indefinitely).
    pub fn get(&self, deadline: Option<Instant>) -> WaitHandle<T> {
        let waiter = Arc::new(Waiter::new());
        self.inner.waiters.push(Arc::clone(&waiter));
        self.inner.schedule_handoff();
        WaitHandle {
            waiter,
            queue: Arc::clone(&self.inner),
            deadline,
        }
    }

    /// Take an item if one is immediately available.
    pub fn poll(&self) -> Option<T> {
        let waiter = Arc::new(Waiter::new());
        self.inner.waiters.push(Arc::clone(&waiter));
        self.inner.schedule_handoff();
        // Our increment guarantees the current handoff owner runs another
        // drain round; once the counter rests at zero this waiter has been
        // considered.
        loop {
            if let Some(item) = waiter.try_take() {
                return Some(item);
            }
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                break;
            }
            std::thread::yield_now();
        }
        waiter.expire_take()
    }

    /// Items not yet handed to a consumer.
    pub fn len(&self) -> usize { self.inner.len.load(Ordering::Acquire) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn to_debug(&self) -> String {
        format!(
            "ConcurrentBlockingQueue(items={}, waiters={})",
            self.len(),
            self.inner.waiters.len()
        )
    }
}
