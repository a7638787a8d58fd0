//! Narrowed inode views
//!
//! `DirRef`, `FileRef` and `SymlinkRef` are the per-capability method sets
//! over an arena inode. The VFS narrows an id to one of them before calling
//! into the kind-specific code, and the views keep atime/mtime/ctime
//! current the way a kernel's generic inode layer would:
//! - read / list: atime
//! - write / truncate: mtime + ctime
//! - entry changes: parent mtime + ctime, target ctime

use super::{memory, procfs, DirKind, FileKind, HandleId, Inode, InodeAttr, InodeId, InodeKind, SymlinkKind, Vfs};
use crate::error::{KResult, KernelError};
use crate::kernel::pty::{Ptmx, PtySlave};
use crate::kernel::stream::{PollFlag, PollHook, Stream};
use crate::kernel::syscall::fs as fd_ops;
use crate::kernel::ProcessContext;
use crate::kernel::process::{Fd, Pid};
use futures::FutureExt;
use std::rc::Rc;

/// Which timestamps an operation updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Touch {
    Access,
    Modify,
    Change,
}

impl Touch {
    pub(super) fn apply(self, attr: &mut InodeAttr, now: f64) {
        match self {
            Touch::Access => attr.atime = now,
            Touch::Modify => {
                attr.mtime = now;
                attr.ctime = now;
            }
            Touch::Change => attr.ctime = now,
        }
    }
}

// ============================================================================
// Directories
// ============================================================================

pub(super) struct DirRef<'a> {
    vfs: &'a Vfs,
    id: InodeId,
}

impl<'a> DirRef<'a> {
    pub(super) fn new(vfs: &'a Vfs, id: InodeId) -> Self {
        Self { vfs, id }
    }

    pub(super) fn lookup(&self, ctx: &ProcessContext, name: &str) -> KResult<Option<InodeId>> {
        let found = self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::Dir(DirKind::Memory(entries)) => Ok(memory::entry(entries, name)),
            InodeKind::Dir(_) => Err(()),
            _ => Ok(None),
        })?;
        match found {
            Ok(id) => Ok(id),
            Err(()) => procfs::lookup(self.vfs, ctx, self.id, name),
        }
    }

    pub(super) fn list(&self, ctx: &ProcessContext) -> KResult<Vec<String>> {
        let listed = self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::Dir(DirKind::Memory(entries)) => Some(memory::names(entries)),
            _ => None,
        })?;
        let names = match listed {
            Some(names) => names,
            None => procfs::list(self.vfs, ctx, self.id)?,
        };
        self.vfs.touch(self.id, Touch::Access);
        Ok(names)
    }

    pub(super) fn is_empty(&self) -> KResult<bool> {
        self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::Dir(dir) => dir.children().is_empty(),
            _ => true,
        })
    }

    /// Allocate `inode` and enter it as `name`
    pub(super) fn create(&self, name: &str, inode: Inode, what: &str) -> KResult<InodeId> {
        self.require_free(name, what)?;
        let id = self.vfs.alloc(inode);
        if let Err(e) = memory::insert_entry(self.vfs, self.id, name, id, what) {
            self.vfs.reclaim(id);
            return Err(e);
        }
        self.vfs.touch(self.id, Touch::Modify);
        Ok(id)
    }

    pub(super) fn link(
        &self,
        _ctx: &ProcessContext,
        name: &str,
        target: InodeId,
        what: &str,
    ) -> KResult<()> {
        memory::insert_entry(self.vfs, self.id, name, target, what)?;
        self.vfs.touch(self.id, Touch::Modify);
        self.vfs.touch(target, Touch::Change);
        Ok(())
    }

    /// Remove `name`, returning the inode it named (not yet reclaimed)
    pub(super) fn unlink(&self, name: &str, what: &str) -> KResult<InodeId> {
        let id = memory::remove_entry(self.vfs, self.id, name, what)?;
        self.vfs.touch(self.id, Touch::Modify);
        self.vfs.touch(id, Touch::Change);
        Ok(id)
    }

    /// Move entry `name` to `dest` as `new_name`
    pub(super) fn relink(
        &self,
        name: &str,
        dest: &DirRef<'_>,
        new_name: &str,
        what: &str,
    ) -> KResult<()> {
        if !memory::is_memory_dir(self.vfs, self.id)? {
            return Err(KernelError::Unsupported(what.to_string()));
        }
        dest.require_free(new_name, what)?;
        let id = memory::remove_entry(self.vfs, self.id, name, what)?;
        memory::insert_entry(self.vfs, dest.id, new_name, id, what)?;
        self.vfs.touch(self.id, Touch::Modify);
        self.vfs.touch(dest.id, Touch::Modify);
        self.vfs.touch(id, Touch::Change);
        Ok(())
    }

    fn require_free(&self, name: &str, what: &str) -> KResult<()> {
        let taken = self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::Dir(DirKind::Memory(entries)) => Ok(entries.contains_key(name)),
            _ => Err(KernelError::Unsupported(what.to_string())),
        })??;
        if taken {
            return Err(KernelError::Exists(what.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Files
// ============================================================================

/// Side effect of the last handle on an inode going away
pub(super) enum ReleaseHook {
    Nothing,
    CloseStream(Stream),
    ReleasePty(Rc<Ptmx>),
}

impl ReleaseHook {
    pub(super) fn run(self, ctx: &ProcessContext, hid: HandleId) {
        match self {
            ReleaseHook::Nothing => {}
            ReleaseHook::CloseStream(stream) => stream.close(),
            ReleaseHook::ReleasePty(ptmx) => ptmx.release(ctx, hid),
        }
    }
}

/// What a read or write has to do once the arena borrow is gone
enum IoOp {
    Done(KResult<Vec<u8>>),
    Stream(Stream),
    Master(Rc<Ptmx>),
    Slave(PtySlave),
    ProcFd { pid: Pid, fd: Fd },
}

/// Follow `/proc/<pid>/fd/<n>` nodes to the descriptor that really does
/// the I/O. A descriptor may be dup'd onto the very node that names it, so
/// the chain is bounded like symlink expansion.
fn proc_fd_target(
    vfs: &Vfs,
    ctx: &ProcessContext,
    pid: Pid,
    fd: Fd,
) -> KResult<(ProcessContext, Fd)> {
    let (mut pid, mut fd) = (pid, fd);
    for _ in 0..vfs.max_symlink_depth {
        let target = ctx.with_pid(pid);
        let hid = target.with_process(|p| p.files.handle(fd))??;
        let inode = vfs.handle(hid)?.inode;
        let next = vfs.with_node(inode, |node| match &node.kind {
            InodeKind::File(FileKind::ProcFd { pid, fd }) => Some((*pid, *fd)),
            _ => None,
        })?;
        match next {
            Some(link) => (pid, fd) = link,
            None => return Ok((target, fd)),
        }
    }
    Err(KernelError::Loop(format!("/proc/{}/fd/{}", pid.0, fd.0)))
}

pub(super) struct FileRef<'a> {
    vfs: &'a Vfs,
    id: InodeId,
}

impl<'a> FileRef<'a> {
    pub(super) fn new(vfs: &'a Vfs, id: InodeId) -> Self {
        Self { vfs, id }
    }

    pub(super) fn is_regular(&self) -> KResult<bool> {
        self.vfs.with_node(self.id, |node| {
            matches!(node.kind, InodeKind::File(FileKind::Regular(_)))
        })
    }

    pub(super) fn release_hook(kind: &InodeKind) -> ReleaseHook {
        match kind {
            InodeKind::File(FileKind::Stream(stream)) => ReleaseHook::CloseStream(stream.clone()),
            InodeKind::File(FileKind::PtyMaster(ptmx)) => ReleaseHook::ReleasePty(ptmx.clone()),
            _ => ReleaseHook::Nothing,
        }
    }

    pub(super) fn open_hook(&self, ctx: &ProcessContext, hid: HandleId) -> KResult<()> {
        let ptmx = self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::File(FileKind::PtyMaster(ptmx)) => Some(ptmx.clone()),
            _ => None,
        })?;
        match ptmx {
            Some(ptmx) => ptmx.open(ctx, hid),
            None => Ok(()),
        }
    }

    fn io_op(
        &self,
        regular: impl FnOnce(&mut Vec<u8>, &mut InodeAttr) -> KResult<Vec<u8>>,
    ) -> KResult<IoOp> {
        self.vfs.with_node_mut(self.id, |node| match &mut node.kind {
            InodeKind::File(FileKind::Regular(data)) => IoOp::Done(regular(data, &mut node.attr)),
            InodeKind::File(FileKind::Executable(program)) => IoOp::Done(Err(
                KernelError::Unsupported(format!("{} is an executable image", program.name())),
            )),
            InodeKind::File(FileKind::Stream(stream)) => IoOp::Stream(stream.clone()),
            InodeKind::File(FileKind::PtyMaster(ptmx)) => IoOp::Master(ptmx.clone()),
            InodeKind::File(FileKind::PtySlave(slave)) => IoOp::Slave(slave.clone()),
            InodeKind::File(FileKind::ProcFd { pid, fd }) => IoOp::ProcFd { pid: *pid, fd: *fd },
            _ => IoOp::Done(Err(KernelError::Internal("not a file".into()))),
        })
    }

    pub(super) async fn read(
        &self,
        ctx: &ProcessContext,
        hid: HandleId,
        pos: u64,
        size: usize,
    ) -> KResult<Vec<u8>> {
        let data = match self.io_op(|data, _| Ok(memory::read_at(data, pos, size)))? {
            IoOp::Done(result) => result?,
            IoOp::Stream(stream) => stream.read(size).await,
            IoOp::Master(ptmx) => ptmx.read(hid, size).await?,
            IoOp::Slave(slave) => slave.read(size).await,
            IoOp::ProcFd { pid, fd } => {
                let (target, fd) = proc_fd_target(self.vfs, ctx, pid, fd)?;
                async move { fd_ops::read_fd(&target, fd, size).await }
                    .boxed_local()
                    .await?
            }
        };
        self.vfs.touch(self.id, Touch::Access);
        Ok(data)
    }

    pub(super) async fn write(
        &self,
        ctx: &ProcessContext,
        hid: HandleId,
        pos: u64,
        bytes: &[u8],
    ) -> KResult<usize> {
        let limit = self.vfs.max_file_size;
        let op = self.io_op(|data, attr| {
            memory::write_at(data, pos, bytes, limit)?;
            attr.size = data.len() as u64;
            Ok(Vec::new())
        })?;
        let written = match op {
            IoOp::Done(result) => result.map(|_| bytes.len())?,
            IoOp::Stream(stream) => stream.write(bytes).await,
            IoOp::Master(ptmx) => ptmx.write(hid, bytes).await?,
            IoOp::Slave(slave) => slave.write(bytes).await,
            IoOp::ProcFd { pid, fd } => {
                let (target, fd) = proc_fd_target(self.vfs, ctx, pid, fd)?;
                let bytes = bytes.to_vec();
                async move { fd_ops::write_fd(&target, fd, &bytes).await }
                    .boxed_local()
                    .await?
            }
        };
        self.vfs.touch(self.id, Touch::Modify);
        Ok(written)
    }

    pub(super) fn poll(
        &self,
        hid: HandleId,
        flag: PollFlag,
        on_ready: PollHook,
    ) -> KResult<bool> {
        let op = self.io_op(|_, _| Ok(Vec::new()))?;
        match op {
            IoOp::Done(_) | IoOp::ProcFd { .. } => Ok(true),
            IoOp::Stream(stream) => Ok(stream.poll(flag, on_ready)),
            IoOp::Master(ptmx) => ptmx.poll(hid, flag, on_ready),
            IoOp::Slave(slave) => Ok(slave.poll(flag, on_ready)),
        }
    }

    pub(super) fn set_size(&self, len: u64) -> KResult<()> {
        let limit = self.vfs.max_file_size;
        self.vfs
            .with_node_mut(self.id, |node| memory::resize(node, len, limit))??;
        self.vfs.touch(self.id, Touch::Modify);
        Ok(())
    }
}

// ============================================================================
// Symlinks
// ============================================================================

pub(super) struct SymlinkRef<'a> {
    vfs: &'a Vfs,
    id: InodeId,
}

impl<'a> SymlinkRef<'a> {
    pub(super) fn new(vfs: &'a Vfs, id: InodeId) -> Self {
        Self { vfs, id }
    }

    pub(super) fn target(&self, ctx: &ProcessContext) -> KResult<String> {
        self.vfs.with_node(self.id, |node| match &node.kind {
            InodeKind::Symlink(SymlinkKind::Target(target)) => Ok(target.clone()),
            InodeKind::Symlink(SymlinkKind::ProcSelf) => Ok(format!("/proc/{}", ctx.pid.0)),
            _ => Err(KernelError::InvalidArgument("not a symlink".into())),
        })?
    }
}
