//! Byte streams
//!
//! A `Stream` is a (possibly bounded) byte buffer with blocking reads and
//! writes plus edge-triggered readiness callbacks. Pipes, both directions
//! of a PTY pair and the kernel console all sit on top of one.
//!
//! Semantics:
//! - `write` accepts up to the spare capacity and returns how many bytes
//!   went in; it only suspends when there is no room at all
//! - `read` returns whatever is buffered (up to `size`); it only suspends
//!   when the buffer is empty and the stream is still open
//! - pending readers and writers are serviced FIFO
//! - `close` wakes everyone: readers get EOF, writers get 0

use super::ipc::Completion;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Readiness direction for [`Stream::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollFlag {
    /// Data is buffered (or the stream hit EOF)
    Readable,
    /// There is spare capacity (or the stream is closed)
    Writable,
}

/// One-shot readiness callback registered with [`Stream::poll`].
///
/// A hook may be tied to a waiter that can give up (a `select` that timed
/// out or found another descriptor ready). Dead hooks are dropped unfired
/// the next time anyone registers on the same stream.
pub struct PollHook {
    fire: Box<dyn FnOnce()>,
    live: Option<Box<dyn Fn() -> bool>>,
}

impl PollHook {
    pub fn new(fire: impl FnOnce() + 'static) -> Self {
        Self {
            fire: Box::new(fire),
            live: None,
        }
    }

    /// Keep the hook only while `live` returns true
    pub fn while_live(mut self, live: impl Fn() -> bool + 'static) -> Self {
        self.live = Some(Box::new(live));
        self
    }

    pub fn is_live(&self) -> bool {
        self.live.as_ref().is_none_or(|live| live())
    }

    fn fire(self) {
        if self.is_live() {
            (self.fire)();
        }
    }
}

impl std::fmt::Debug for PollHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHook")
            .field("live", &self.is_live())
            .finish()
    }
}

struct PendingRead {
    size: usize,
    done: Rc<Completion<Vec<u8>>>,
}

struct PendingWrite {
    data: Vec<u8>,
    done: Rc<Completion<usize>>,
}

struct StreamInner {
    buf: VecDeque<u8>,
    capacity: Option<usize>,
    closed: bool,
    reads: VecDeque<PendingRead>,
    writes: VecDeque<PendingWrite>,
    read_polls: Vec<PollHook>,
    write_polls: Vec<PollHook>,
}

impl StreamInner {
    fn space(&self) -> usize {
        match self.capacity {
            Some(cap) => cap.saturating_sub(self.buf.len()),
            None => usize::MAX,
        }
    }

    fn take(&mut self, size: usize) -> Vec<u8> {
        let n = size.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        self.buf.extend(&data[..n]);
        n
    }

    /// Feed buffered bytes to blocked readers, oldest first
    fn service_reads(&mut self) {
        while !self.buf.is_empty() {
            let Some(read) = self.reads.pop_front() else {
                break;
            };
            if read.done.is_pending() {
                let data = self.take(read.size);
                let _ = read.done.complete(data);
            }
        }
    }

    /// Let blocked writers fill freed space, oldest first
    fn service_writes(&mut self) {
        while self.space() > 0 {
            let Some(write) = self.writes.pop_front() else {
                break;
            };
            if write.done.is_pending() {
                let n = self.push(&write.data);
                let _ = write.done.complete(n);
            }
        }
    }

    fn ready_callbacks(&mut self) -> Vec<PollHook> {
        let mut fire = Vec::new();
        if !self.buf.is_empty() || self.closed {
            fire.append(&mut self.read_polls);
        }
        if self.space() > 0 || self.closed {
            fire.append(&mut self.write_polls);
        }
        fire
    }
}

fn run_callbacks(callbacks: Vec<PollHook>) {
    for callback in callbacks {
        callback.fire();
    }
}

/// Shared handle to a byte stream
#[derive(Clone)]
pub struct Stream {
    inner: Rc<RefCell<StreamInner>>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Stream")
            .field("buffered", &inner.buf.len())
            .field("capacity", &inner.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl Stream {
    /// Unbounded stream
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Stream buffering at most `capacity` bytes
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StreamInner {
                buf: VecDeque::new(),
                capacity,
                closed: false,
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                read_polls: Vec::new(),
                write_polls: Vec::new(),
            })),
        }
    }

    /// Read up to `size` bytes. An empty result means EOF.
    pub async fn read(&self, size: usize) -> Vec<u8> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if size == 0 {
                return Vec::new();
            }
            if !inner.buf.is_empty() {
                let data = inner.take(size);
                inner.service_writes();
                let fire = inner.ready_callbacks();
                drop(inner);
                run_callbacks(fire);
                return data;
            }
            if inner.closed {
                return Vec::new();
            }
            let done = Completion::new();
            inner.reads.push_back(PendingRead {
                size,
                done: done.clone(),
            });
            done.wait()
        };
        let data = waiter.await;
        // A reader woken by a write may have freed room for blocked writers
        let fire = {
            let mut inner = self.inner.borrow_mut();
            inner.service_writes();
            inner.ready_callbacks()
        };
        run_callbacks(fire);
        data
    }

    /// Write as much of `data` as fits. Returns bytes accepted; 0 on a
    /// closed stream.
    pub async fn write(&self, data: &[u8]) -> usize {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return 0;
            }
            if data.is_empty() {
                return 0;
            }
            if inner.space() > 0 {
                let n = inner.push(data);
                inner.service_reads();
                let fire = inner.ready_callbacks();
                drop(inner);
                run_callbacks(fire);
                return n;
            }
            let done = Completion::new();
            inner.writes.push_back(PendingWrite {
                data: data.to_vec(),
                done: done.clone(),
            });
            done.wait()
        };
        let n = waiter.await;
        let fire = {
            let mut inner = self.inner.borrow_mut();
            inner.service_reads();
            inner.ready_callbacks()
        };
        run_callbacks(fire);
        n
    }

    /// Non-blocking read of whatever is buffered
    pub fn try_read(&self, size: usize) -> Vec<u8> {
        let (data, fire) = {
            let mut inner = self.inner.borrow_mut();
            let data = inner.take(size);
            inner.service_writes();
            (data, inner.ready_callbacks())
        };
        run_callbacks(fire);
        data
    }

    /// Non-blocking write of as much as fits
    pub fn try_write(&self, data: &[u8]) -> usize {
        let (n, fire) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return 0;
            }
            let n = inner.push(data);
            inner.service_reads();
            (n, inner.ready_callbacks())
        };
        run_callbacks(fire);
        n
    }

    /// Register `on_ready` to fire once the stream is ready in `flag`'s
    /// direction. Returns true (without registering) if it already is.
    pub fn poll(&self, flag: PollFlag, on_ready: PollHook) -> bool {
        let mut inner = self.inner.borrow_mut();
        let polls = match flag {
            PollFlag::Readable => {
                if !inner.buf.is_empty() || inner.closed {
                    return true;
                }
                &mut inner.read_polls
            }
            PollFlag::Writable => {
                if inner.space() > 0 || inner.closed {
                    return true;
                }
                &mut inner.write_polls
            }
        };
        polls.retain(PollHook::is_live);
        polls.push(on_ready);
        false
    }

    /// Registered readiness hooks, both directions
    pub fn pending_polls(&self) -> usize {
        let inner = self.inner.borrow();
        inner.read_polls.len() + inner.write_polls.len()
    }

    /// Close the stream. Buffered bytes stay readable.
    pub fn close(&self) {
        let (reads, writes, fire) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let reads = std::mem::take(&mut inner.reads);
            let writes = std::mem::take(&mut inner.writes);
            let fire = inner.ready_callbacks();
            (reads, writes, fire)
        };
        for read in reads {
            let _ = read.done.complete(Vec::new());
        }
        for write in writes {
            let _ = write.done.complete(0);
        }
        run_callbacks(fire);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.inner.borrow().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.borrow().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use std::cell::Cell;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn test_write_then_read() {
        let stream = Stream::new();
        assert_eq!(block_on(stream.write(b"hello")), 5);
        assert_eq!(block_on(stream.read(3)), b"hel");
        assert_eq!(block_on(stream.read(64)), b"lo");
    }

    #[test]
    fn test_read_suspends_until_write() {
        let stream = Stream::new();
        let mut read = Box::pin(stream.read(4));
        assert!(poll_once(&mut read).is_pending());

        assert_eq!(block_on(stream.write(b"abcdef")), 6);
        assert_eq!(poll_once(&mut read), Poll::Ready(b"abcd".to_vec()));
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_pending_reads_served_fifo() {
        let stream = Stream::new();
        let mut first = Box::pin(stream.read(2));
        let mut second = Box::pin(stream.read(2));
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());

        block_on(stream.write(b"wxyz"));
        assert_eq!(poll_once(&mut first), Poll::Ready(b"wx".to_vec()));
        assert_eq!(poll_once(&mut second), Poll::Ready(b"yz".to_vec()));
    }

    #[test]
    fn test_capacity_backpressure() {
        let stream = Stream::bounded(4);
        // Partial accept without suspending
        assert_eq!(block_on(stream.write(b"abcdef")), 4);

        // Full: the next byte suspends
        let mut write = Box::pin(stream.write(b"g"));
        assert!(poll_once(&mut write).is_pending());

        // Draining one byte lets the blocked writer in
        assert_eq!(block_on(stream.read(1)), b"a");
        assert_eq!(poll_once(&mut write), Poll::Ready(1));
        assert_eq!(block_on(stream.read(64)), b"bcdg");
    }

    #[test]
    fn test_close_semantics() {
        let stream = Stream::new();
        block_on(stream.write(b"left"));
        stream.close();

        assert_eq!(block_on(stream.write(b"more")), 0);
        assert_eq!(block_on(stream.read(64)), b"left");
        assert!(block_on(stream.read(64)).is_empty());
    }

    #[test]
    fn test_close_releases_pending() {
        let reader = Stream::new();
        let mut read = Box::pin(reader.read(8));
        assert!(poll_once(&mut read).is_pending());
        reader.close();
        assert_eq!(poll_once(&mut read), Poll::Ready(Vec::new()));

        let writer = Stream::bounded(1);
        block_on(writer.write(b"x"));
        let mut write = Box::pin(writer.write(b"y"));
        assert!(poll_once(&mut write).is_pending());
        writer.close();
        assert_eq!(poll_once(&mut write), Poll::Ready(0));
    }

    #[test]
    fn test_poll_fires_once() {
        let stream = Stream::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        assert!(!stream.poll(PollFlag::Readable, PollHook::new(move || h.set(h.get() + 1))));

        block_on(stream.write(b"a"));
        block_on(stream.write(b"b"));
        assert_eq!(hits.get(), 1);

        // Already readable: immediate, nothing registered
        assert!(stream.poll(PollFlag::Readable, PollHook::new(|| panic!("must not register"))));
        assert!(stream.poll(PollFlag::Writable, PollHook::new(|| panic!("must not register"))));
    }

    #[test]
    fn test_poll_writable_after_drain() {
        let stream = Stream::bounded(2);
        block_on(stream.write(b"ab"));
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        assert!(!stream.poll(PollFlag::Writable, PollHook::new(move || h.set(true))));
        assert_eq!(stream.try_read(1), b"a");
        assert!(hit.get());
    }

    #[test]
    fn test_close_fires_read_poll() {
        let stream = Stream::new();
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        stream.poll(PollFlag::Readable, PollHook::new(move || h.set(true)));
        stream.close();
        assert!(hit.get());
    }

    #[test]
    fn test_dead_hooks_are_pruned() {
        let stream = Stream::new();
        for _ in 0..10 {
            let waiting = Rc::new(Cell::new(true));
            let w = waiting.clone();
            let hook = PollHook::new(|| panic!("dead hook fired")).while_live(move || w.get());
            assert!(!stream.poll(PollFlag::Readable, hook));
            waiting.set(false);
        }
        assert_eq!(stream.pending_polls(), 1);

        // The last one is dead too: dropped on readiness without firing
        stream.try_write(b"x");
        assert_eq!(stream.pending_polls(), 0);
    }
}
