//! Blocking channels and one-shot completions
//!
//! `Channel<T>` is a multi-producer/multi-consumer queue with optional
//! capacity and close semantics. It carries the scheduler's ready queue and
//! is available to anything that needs to hand values across a suspension
//! point. No lock-free tricks: everything is a RefCell-wrapped VecDeque,
//! which is sound because the kernel is single-threaded.
//!
//! Blocked callers park on a [`Completion`]: a one-shot slot that is filled
//! exactly once and wakes whoever awaits it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

// ============================================================================
// Completion
// ============================================================================

struct Slot<T> {
    value: Option<T>,
    done: bool,
    abandoned: bool,
    waker: Option<Waker>,
}

/// One-shot value slot shared between a producer and a [`Waiter`]
pub(crate) struct Completion<T> {
    slot: RefCell<Slot<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            slot: RefCell::new(Slot {
                value: None,
                done: false,
                abandoned: false,
                waker: None,
            }),
        })
    }

    /// Still waiting for a value and someone still cares about it
    pub(crate) fn is_pending(&self) -> bool {
        let slot = self.slot.borrow();
        !slot.done && !slot.abandoned
    }

    /// Fill the slot. Hands the value back if it was already filled or the
    /// waiter went away.
    pub(crate) fn complete(&self, value: T) -> Result<(), T> {
        let waker = {
            let mut slot = self.slot.borrow_mut();
            if slot.done || slot.abandoned {
                return Err(value);
            }
            slot.value = Some(value);
            slot.done = true;
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    pub(crate) fn wait(self: &Rc<Self>) -> Waiter<T> {
        Waiter {
            completion: self.clone(),
        }
    }
}

/// Future resolving to the value of a [`Completion`]
pub(crate) struct Waiter<T> {
    completion: Rc<Completion<T>>,
}

impl<T> Future for Waiter<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.completion.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut slot = self.completion.slot.borrow_mut();
        if !slot.done {
            slot.abandoned = true;
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// The channel was closed; the item (if any) was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// Result of a non-blocking receive
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<T> {
    Item(T),
    Empty,
    Closed,
}

/// Result of a non-blocking send; rejected items are handed back
#[derive(Debug, PartialEq, Eq)]
pub enum TrySend<T> {
    Sent,
    Full(T),
    Closed(T),
}

struct ChannelInner<T> {
    queue: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
    pending_gets: VecDeque<Rc<Completion<Option<T>>>>,
    pending_puts: VecDeque<(T, Rc<Completion<Result<(), Closed>>>)>,
}

impl<T> ChannelInner<T> {
    fn has_space(&self) -> bool {
        self.capacity.is_none_or(|cap| self.queue.len() < cap)
    }

    /// Hand the item to the oldest live getter, or buffer it
    fn enqueue(&mut self, item: T) {
        while let Some(getter) = self.pending_gets.pop_front() {
            if getter.is_pending() {
                let _ = getter.complete(Some(item));
                return;
            }
        }
        self.queue.push_back(item);
    }

    /// Move the oldest live blocked put into the freed slot
    fn admit_pending_put(&mut self) {
        while let Some((item, putter)) = self.pending_puts.pop_front() {
            if putter.is_pending() {
                self.queue.push_back(item);
                let _ = putter.complete(Ok(()));
                return;
            }
        }
    }
}

/// Blocking MPMC queue
pub struct Channel<T> {
    inner: Rc<RefCell<ChannelInner<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    /// Unbounded channel
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Channel holding at most `capacity` items; 0 means unbounded
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity((capacity > 0).then_some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelInner {
                queue: VecDeque::new(),
                capacity,
                closed: false,
                pending_gets: VecDeque::new(),
                pending_puts: VecDeque::new(),
            })),
        }
    }

    /// Enqueue an item, suspending while the channel is full
    pub async fn put(&self, item: T) -> Result<(), Closed> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(Closed);
            }
            if inner.has_space() {
                inner.enqueue(item);
                return Ok(());
            }
            let completion = Completion::new();
            inner.pending_puts.push_back((item, completion.clone()));
            completion.wait()
        };
        waiter.await
    }

    /// Dequeue the oldest item, suspending while empty. `None` once closed
    /// and drained.
    pub async fn get(&self) -> Option<T> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if let Some(item) = inner.queue.pop_front() {
                inner.admit_pending_put();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let completion = Completion::new();
            inner.pending_gets.push_back(completion.clone());
            completion.wait()
        };
        waiter.await
    }

    pub fn try_put(&self, item: T) -> TrySend<T> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return TrySend::Closed(item);
        }
        if !inner.has_space() {
            return TrySend::Full(item);
        }
        inner.enqueue(item);
        TrySend::Sent
    }

    pub fn try_get(&self) -> TryRecv<T> {
        let mut inner = self.inner.borrow_mut();
        match inner.queue.pop_front() {
            Some(item) => {
                inner.admit_pending_put();
                TryRecv::Item(item)
            }
            None if inner.closed => TryRecv::Closed,
            None => TryRecv::Empty,
        }
    }

    /// Close the channel, releasing every blocked caller
    pub fn close(&self) {
        let (gets, puts) = {
            let mut inner = self.inner.borrow_mut();
            inner.closed = true;
            (
                std::mem::take(&mut inner.pending_gets),
                std::mem::take(&mut inner.pending_puts),
            )
        };
        for getter in gets {
            let _ = getter.complete(None);
        }
        for (_item, putter) in puts {
            let _ = putter.complete(Err(Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::task::noop_waker_ref;

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn test_put_then_get() {
        let chan = Channel::new();
        block_on(chan.put(1)).unwrap();
        block_on(chan.put(2)).unwrap();
        assert_eq!(block_on(chan.get()), Some(1));
        assert_eq!(chan.try_get(), TryRecv::Item(2));
        assert_eq!(chan.try_get(), TryRecv::Empty);
    }

    #[test]
    fn test_get_suspends_until_put() {
        let chan = Channel::new();
        let mut get = Box::pin(chan.get());
        assert!(poll_once(&mut get).is_pending());

        assert_eq!(chan.try_put(42), TrySend::Sent);
        // Handed straight to the waiting getter, not buffered
        assert_eq!(chan.len(), 0);
        assert_eq!(poll_once(&mut get), Poll::Ready(Some(42)));
    }

    #[test]
    fn test_bounded_put_blocks_until_get() {
        let chan = Channel::bounded(1);
        assert_eq!(chan.try_put('a'), TrySend::Sent);
        assert_eq!(chan.try_put('b'), TrySend::Full('b'));

        let mut put = Box::pin(chan.put('c'));
        assert!(poll_once(&mut put).is_pending());

        assert_eq!(chan.try_get(), TryRecv::Item('a'));
        assert_eq!(poll_once(&mut put), Poll::Ready(Ok(())));
        assert_eq!(chan.try_get(), TryRecv::Item('c'));
    }

    #[test]
    fn test_close_releases_pending_gets() {
        let chan: Channel<u32> = Channel::new();
        let mut first = Box::pin(chan.get());
        let mut second = Box::pin(chan.get());
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());

        chan.close();
        assert_eq!(poll_once(&mut first), Poll::Ready(None));
        assert_eq!(poll_once(&mut second), Poll::Ready(None));

        // Everything after close resolves without suspending
        let mut later = Box::pin(chan.get());
        assert_eq!(poll_once(&mut later), Poll::Ready(None));
        let mut put = Box::pin(chan.put(1));
        assert_eq!(poll_once(&mut put), Poll::Ready(Err(Closed)));
        assert_eq!(chan.try_put(2), TrySend::Closed(2));
        assert_eq!(chan.try_get(), TryRecv::Closed);
    }

    #[test]
    fn test_close_releases_pending_puts() {
        let chan = Channel::bounded(1);
        assert_eq!(chan.try_put(1), TrySend::Sent);
        let mut put = Box::pin(chan.put(2));
        assert!(poll_once(&mut put).is_pending());

        chan.close();
        assert_eq!(poll_once(&mut put), Poll::Ready(Err(Closed)));
        // Buffered items survive close
        assert_eq!(chan.try_get(), TryRecv::Item(1));
        assert_eq!(chan.try_get(), TryRecv::Closed);
    }

    #[test]
    fn test_abandoned_getter_is_skipped() {
        let chan = Channel::new();
        let mut dropped = Box::pin(chan.get());
        assert!(poll_once(&mut dropped).is_pending());
        drop(dropped);

        let mut live = Box::pin(chan.get());
        assert!(poll_once(&mut live).is_pending());
        assert_eq!(chan.try_put(7), TrySend::Sent);
        assert_eq!(poll_once(&mut live), Poll::Ready(Some(7)));
    }

    #[test]
    fn test_bounded_zero_is_unbounded() {
        let chan = Channel::bounded(0);
        for i in 0..100 {
            assert_eq!(chan.try_put(i), TrySend::Sent);
        }
        assert_eq!(chan.len(), 100);
    }
}
