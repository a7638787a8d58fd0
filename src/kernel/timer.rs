//! Virtual clock and timers
//!
//! Kernel time is a monotonic millisecond counter owned by the kernel and
//! moved forward by the host (`Kernel::advance_to`) or, when the system is
//! otherwise idle, jumped straight to the next deadline by `Kernel::run`.
//!
//! Design:
//! - TimerQueue is a min-heap sorted by deadline
//! - Each timer completes a one-shot slot that a `sleep` future awaits
//! - Timers whose sleeper went away (e.g. the losing side of a select
//!   race) are pruned lazily

use super::ipc::Completion;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Entry in the timer heap (for ordering)
#[derive(Debug)]
struct TimerEntry {
    deadline: f64,
    id: TimerId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; ties fire in creation order
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Timer queue - manages all active timers
struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<TimerId, Rc<Completion<()>>>,
    next_id: u64,
}

impl TimerQueue {
    fn schedule(&mut self, deadline: f64, done: Rc<Completion<()>>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(TimerEntry { deadline, id });
        self.timers.insert(id, done);
        id
    }

    /// Pop every timer due at `now`
    fn expire(&mut self, now: f64) -> Vec<Rc<Completion<()>>> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            if let Some(done) = self.timers.remove(&entry.id) {
                due.push(done);
            }
        }
        due
    }

    /// Drop heap entries whose sleepers are gone
    fn prune(&mut self) {
        while let Some(entry) = self.heap.peek() {
            let live = self
                .timers
                .get(&entry.id)
                .is_some_and(|done| done.is_pending());
            if live {
                break;
            }
            let id = entry.id;
            self.heap.pop();
            self.timers.remove(&id);
        }
    }
}

struct ClockInner {
    now: Cell<f64>,
    queue: RefCell<TimerQueue>,
}

/// Shared handle to kernel time
#[derive(Clone)]
pub struct Clock {
    inner: Rc<ClockInner>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ClockInner {
                now: Cell::new(0.0),
                queue: RefCell::new(TimerQueue {
                    heap: BinaryHeap::new(),
                    timers: HashMap::new(),
                    next_id: 1,
                }),
            }),
        }
    }

    /// Current kernel time in milliseconds
    pub fn now(&self) -> f64 {
        self.inner.now.get()
    }

    /// Suspend for `ms` milliseconds of kernel time
    pub async fn sleep(&self, ms: f64) {
        if ms <= 0.0 {
            return;
        }
        let done = Completion::new();
        let deadline = self.now() + ms;
        self.inner.queue.borrow_mut().schedule(deadline, done.clone());
        done.wait().await
    }

    /// Move time forward (never backwards) and fire due timers.
    /// Returns how many sleepers were woken.
    pub fn advance_to(&self, now: f64) -> usize {
        if now > self.now() {
            self.inner.now.set(now);
        }
        let due = self.inner.queue.borrow_mut().expire(self.now());
        due.into_iter()
            .filter(|done| done.complete(()).is_ok())
            .count()
    }

    /// Deadline of the earliest timer that still has a sleeper
    pub fn next_deadline(&self) -> Option<f64> {
        let mut queue = self.inner.queue.borrow_mut();
        queue.prune();
        queue.heap.peek().map(|entry| entry.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn test_sleep_fires_at_deadline() {
        let clock = Clock::new();
        let mut sleep = Box::pin(clock.sleep(100.0));
        assert!(poll_once(&mut sleep).is_pending());
        assert_eq!(clock.next_deadline(), Some(100.0));

        assert_eq!(clock.advance_to(99.0), 0);
        assert!(poll_once(&mut sleep).is_pending());

        assert_eq!(clock.advance_to(100.0), 1);
        assert_eq!(poll_once(&mut sleep), Poll::Ready(()));
        assert_eq!(clock.next_deadline(), None);
    }

    #[test]
    fn test_time_never_goes_backwards() {
        let clock = Clock::new();
        clock.advance_to(50.0);
        clock.advance_to(10.0);
        assert_eq!(clock.now(), 50.0);
    }

    #[test]
    fn test_deadlines_ordered() {
        let clock = Clock::new();
        let mut late = Box::pin(clock.sleep(300.0));
        let mut early = Box::pin(clock.sleep(100.0));
        assert!(poll_once(&mut late).is_pending());
        assert!(poll_once(&mut early).is_pending());

        assert_eq!(clock.next_deadline(), Some(100.0));
        clock.advance_to(100.0);
        assert_eq!(poll_once(&mut early), Poll::Ready(()));
        assert_eq!(clock.next_deadline(), Some(300.0));
    }

    #[test]
    fn test_abandoned_sleep_pruned() {
        let clock = Clock::new();
        let mut sleep = Box::pin(clock.sleep(10.0));
        assert!(poll_once(&mut sleep).is_pending());
        drop(sleep);
        assert_eq!(clock.next_deadline(), None);
    }

    #[test]
    fn test_zero_sleep_is_immediate() {
        let clock = Clock::new();
        let mut sleep = Box::pin(clock.sleep(0.0));
        assert_eq!(poll_once(&mut sleep), Poll::Ready(()));
    }
}
