//! Pseudo-terminals
//!
//! `/dev/ptmx` is a multiplexer: every open of it allocates a new pair of
//! streams and mounts the matching slave at `/dev/pts/<n>`. The first four
//! bytes readable from the new master handle are `n` as a little-endian
//! u32, so the opener can find its slave.
//!
//! The slave swaps the streams: what the master writes the slave reads and
//! vice versa. Closing the master unmounts the slave path but does not
//! close either stream.

use super::ProcessContext;
use super::stream::{PollFlag, PollHook, Stream};
use crate::error::{KResult, KernelError};
use crate::vfs::{FileKind, HandleId, Inode, InodeKind};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Mode of a freshly mounted slave
const SLAVE_MODE: u32 = 0o620;

/// Path of slave `index`
pub fn slave_path(index: u32) -> String {
    format!("/dev/pts/{}", index)
}

/// The slave end of a pair
#[derive(Debug, Clone)]
pub struct PtySlave {
    read: Stream,
    write: Stream,
}

impl PtySlave {
    pub fn new(read: Stream, write: Stream) -> Self {
        Self { read, write }
    }

    pub async fn read(&self, size: usize) -> Vec<u8> {
        self.read.read(size).await
    }

    pub async fn write(&self, data: &[u8]) -> usize {
        self.write.write(data).await
    }

    pub fn poll(&self, flag: PollFlag, on_ready: PollHook) -> bool {
        match flag {
            PollFlag::Readable => self.read.poll(flag, on_ready),
            PollFlag::Writable => self.write.poll(flag, on_ready),
        }
    }
}

#[derive(Debug, Clone)]
struct PtyPair {
    index: u32,
    /// Master reads, slave writes
    read: Stream,
    /// Master writes, slave reads
    write: Stream,
}

/// PTY master multiplexer
#[derive(Debug, Default)]
pub struct Ptmx {
    next_index: Cell<u32>,
    pairs: RefCell<HashMap<HandleId, PtyPair>>,
}

impl Ptmx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a pair for the new master handle `hid`
    pub fn open(&self, ctx: &ProcessContext, hid: HandleId) -> KResult<()> {
        let index = self.next_index.get();
        let read = Stream::new();
        let write = Stream::new();
        let cred = ctx.cred()?;
        let slave = Inode::new(
            SLAVE_MODE,
            InodeKind::File(FileKind::PtySlave(PtySlave::new(write.clone(), read.clone()))),
        )
        .owned_by(cred.uid, cred.primary_gid());

        ctx.kernel
            .vfs()
            .mount(&ctx.kernel_context(), &slave_path(index), slave)?;
        self.next_index.set(index + 1);

        read.try_write(&index.to_le_bytes());
        self.pairs
            .borrow_mut()
            .insert(hid, PtyPair { index, read, write });
        log::debug!("{} opened pty {}", ctx.pid, index);
        Ok(())
    }

    /// The master handle `hid` went away
    pub fn release(&self, ctx: &ProcessContext, hid: HandleId) {
        let Some(pair) = self.pairs.borrow_mut().remove(&hid) else {
            log::warn!("release of unknown pty master handle {}", hid.0);
            return;
        };
        let path = slave_path(pair.index);
        if let Err(e) = ctx.kernel.vfs().unmount(&ctx.kernel_context(), &path) {
            log::warn!("failed to unmount {}: {}", path, e);
        }
    }

    fn pair(&self, hid: HandleId) -> KResult<PtyPair> {
        self.pairs
            .borrow()
            .get(&hid)
            .cloned()
            .ok_or_else(|| KernelError::BadFd(format!("no pty for handle {}", hid.0)))
    }

    pub async fn read(&self, hid: HandleId, size: usize) -> KResult<Vec<u8>> {
        let pair = self.pair(hid)?;
        Ok(pair.read.read(size).await)
    }

    pub async fn write(&self, hid: HandleId, data: &[u8]) -> KResult<usize> {
        let pair = self.pair(hid)?;
        Ok(pair.write.write(data).await)
    }

    pub fn poll(
        &self,
        hid: HandleId,
        flag: PollFlag,
        on_ready: PollHook,
    ) -> KResult<bool> {
        let pair = self.pair(hid)?;
        Ok(match flag {
            PollFlag::Readable => pair.read.poll(flag, on_ready),
            PollFlag::Writable => pair.write.poll(flag, on_ready),
        })
    }

    /// Pairs currently allocated
    pub fn open_count(&self) -> usize {
        self.pairs.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_slave_path() {
        assert_eq!(slave_path(0), "/dev/pts/0");
        assert_eq!(slave_path(12), "/dev/pts/12");
    }

    #[test]
    fn test_slave_swaps_streams() {
        let to_master = Stream::new();
        let to_slave = Stream::new();
        let slave = PtySlave::new(to_slave.clone(), to_master.clone());

        block_on(slave.write(b"out"));
        assert_eq!(to_master.try_read(64), b"out");

        to_slave.try_write(b"in");
        assert_eq!(block_on(slave.read(64)), b"in");
    }

    #[test]
    fn test_unknown_handle() {
        let ptmx = Ptmx::new();
        assert_eq!(ptmx.open_count(), 0);
        let err = block_on(ptmx.read(HandleId(3), 4)).unwrap_err();
        assert_eq!(err.code(), "EBADF");
    }
}
