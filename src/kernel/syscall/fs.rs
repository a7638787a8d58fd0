//! Descriptor and path syscalls
//!
//! Descriptors index the calling process's file table; the handle behind
//! each one is shared across dup2 and spawn, so cursor moves made through
//! one descriptor are seen through every other.
//!
//! Relative paths resolve against the caller's cwd.

use super::SysValue;
use crate::error::{KResult, KernelError};
use crate::kernel::ProcessContext;
use crate::kernel::ipc::Completion;
use crate::kernel::process::{Fd, OpenFlags};
use crate::kernel::stream::{PollFlag, PollHook, Stream};
use crate::vfs::{path, HandleId, Inode, Stat};
use futures::future::{self, Either, FutureExt};
use std::rc::Rc;

/// Mode of both pipe inodes
const PIPE_MODE: u32 = 0o777;

fn handle_of(ctx: &ProcessContext, fd: Fd) -> KResult<HandleId> {
    ctx.with_process(|p| p.files.handle(fd))?
}

/// Install `hid` at the caller's lowest free descriptor, releasing it on
/// failure
fn install_fd(ctx: &ProcessContext, hid: HandleId) -> KResult<Fd> {
    match ctx.with_process_mut(|p| p.files.alloc(hid))? {
        Ok(fd) => Ok(fd),
        Err(e) => {
            ctx.kernel.vfs().release(ctx, hid)?;
            Err(e)
        }
    }
}

// ========== Descriptors ==========

pub fn open(ctx: &ProcessContext, path: &str, flags: OpenFlags, mode: Option<u32>) -> KResult<Fd> {
    let path = ctx.resolve(path)?;
    let hid = ctx.kernel.vfs().open(ctx, &path, flags, mode)?;
    install_fd(ctx, hid)
}

pub fn close(ctx: &ProcessContext, fd: Fd) -> KResult<()> {
    let entry = ctx
        .with_process_mut(|p| p.files.remove(fd))?
        .ok_or_else(|| KernelError::BadFd(fd.to_string()))?;
    ctx.kernel.vfs().release(ctx, entry.handle)?;
    Ok(())
}

/// Read up to `size` bytes at the handle's cursor. Empty means EOF.
pub async fn read_fd(ctx: &ProcessContext, fd: Fd, size: usize) -> KResult<Vec<u8>> {
    let hid = handle_of(ctx, fd)?;
    ctx.kernel.vfs().read(ctx, hid, size).await
}

/// Read chunks until EOF
pub async fn read_to_end(ctx: &ProcessContext, fd: Fd) -> KResult<Vec<u8>> {
    let chunk = ctx.kernel.config().read_chunk.max(1);
    let mut out = Vec::new();
    loop {
        let data = read_fd(ctx, fd, chunk).await?;
        if data.is_empty() {
            return Ok(out);
        }
        out.extend_from_slice(&data);
    }
}

pub async fn write_fd(ctx: &ProcessContext, fd: Fd, data: &[u8]) -> KResult<usize> {
    let hid = handle_of(ctx, fd)?;
    ctx.kernel.vfs().write(ctx, hid, data).await
}

/// Next `delim`-terminated line, delimiter stripped. Bytes read past the
/// delimiter stay buffered on the descriptor for the next call.
pub async fn get_line(ctx: &ProcessContext, fd: Fd, delim: u8) -> KResult<SysValue> {
    let chunk = ctx.kernel.config().read_chunk.max(1);
    loop {
        let line = ctx.with_process_mut(|p| -> KResult<Option<Vec<u8>>> {
            let entry = p
                .files
                .get_mut(fd)
                .ok_or_else(|| KernelError::BadFd(fd.to_string()))?;
            let Some(i) = entry.line_buf.iter().position(|&b| b == delim) else {
                return Ok(None);
            };
            let mut line: Vec<u8> = entry.line_buf.drain(..=i).collect();
            line.pop();
            Ok(Some(line))
        })??;
        if let Some(line) = line {
            return Ok(SysValue::Line {
                line: String::from_utf8_lossy(&line).into_owned(),
                eof: false,
            });
        }

        let data = read_fd(ctx, fd, chunk).await?;
        let rest = ctx.with_process_mut(|p| -> KResult<Option<Vec<u8>>> {
            let entry = p
                .files
                .get_mut(fd)
                .ok_or_else(|| KernelError::BadFd(fd.to_string()))?;
            if data.is_empty() {
                return Ok(Some(std::mem::take(&mut entry.line_buf)));
            }
            entry.line_buf.extend_from_slice(&data);
            Ok(None)
        })??;
        if let Some(rest) = rest {
            return Ok(SysValue::Line {
                eof: rest.is_empty(),
                line: String::from_utf8_lossy(&rest).into_owned(),
            });
        }
    }
}

/// Write until everything is accepted or a write takes nothing
pub async fn write_all(ctx: &ProcessContext, fd: Fd, data: &[u8]) -> KResult<SysValue> {
    let mut total = 0;
    let mut eof = false;
    while total < data.len() {
        let n = write_fd(ctx, fd, &data[total..]).await?;
        if n == 0 {
            eof = true;
            break;
        }
        total += n;
    }
    Ok(SysValue::Written { total, eof })
}

/// Make `new` refer to `old`'s handle, closing whatever `new` held
pub fn dup2(ctx: &ProcessContext, old: Fd, new: Fd) -> KResult<Fd> {
    let hid = handle_of(ctx, old)?;
    if old == new {
        return Ok(new);
    }
    let vfs = ctx.kernel.vfs();
    vfs.retain(hid)?;
    let replaced = match ctx.with_process_mut(|p| p.files.insert(new, hid))? {
        Ok(replaced) => replaced,
        Err(e) => {
            vfs.release(ctx, hid)?;
            return Err(e);
        }
    };
    if let Some(entry) = replaced {
        vfs.release(ctx, entry.handle)?;
    }
    Ok(new)
}

/// Two descriptors over one stream: read end first
pub fn pipe(ctx: &ProcessContext) -> KResult<SysValue> {
    let stream = Stream::with_capacity(ctx.kernel.config().pipe_capacity);
    let vfs = ctx.kernel.vfs();
    let read_hid = vfs.open_anonymous(
        ctx,
        Inode::stream(PIPE_MODE, stream.clone()),
        OpenFlags::READ,
    )?;
    let read = install_fd(ctx, read_hid)?;
    let write_hid = match vfs.open_anonymous(ctx, Inode::stream(PIPE_MODE, stream), OpenFlags::WRITE) {
        Ok(hid) => hid,
        Err(e) => {
            close(ctx, read)?;
            return Err(e);
        }
    };
    let write = match install_fd(ctx, write_hid) {
        Ok(fd) => fd,
        Err(e) => {
            close(ctx, read)?;
            return Err(e);
        }
    };
    Ok(SysValue::Pipe { read, write })
}

/// First descriptor ready in its direction, or `None` once `timeout`
/// milliseconds pass. A non-positive timeout only checks.
pub async fn select(
    ctx: &ProcessContext,
    fds: &[(Fd, PollFlag)],
    timeout: Option<f64>,
) -> KResult<Option<Fd>> {
    let done = Completion::new();
    for &(fd, flag) in fds {
        let hid = handle_of(ctx, fd)?;
        let notify = Rc::downgrade(&done);
        let watch = notify.clone();
        let hook = PollHook::new(move || {
            if let Some(done) = notify.upgrade() {
                let _ = done.complete(fd);
            }
        })
        .while_live(move || watch.upgrade().is_some_and(|done| done.is_pending()));
        if ctx.kernel.vfs().poll(hid, flag, hook)? {
            return Ok(Some(fd));
        }
    }

    let waiter = done.wait();
    match timeout {
        None => Ok(Some(waiter.await)),
        Some(ms) => {
            let sleep = ctx.kernel.clock().sleep(ms).boxed_local();
            match future::select(waiter, sleep).await {
                Either::Left((fd, _)) => Ok(Some(fd)),
                Either::Right(_) => Ok(None),
            }
        }
    }
}

/// Entry names of a directory opened with READ | DIR
pub fn getdents(ctx: &ProcessContext, fd: Fd) -> KResult<Vec<String>> {
    let hid = handle_of(ctx, fd)?;
    ctx.kernel.vfs().list(ctx, hid)
}

// ========== Paths ==========

pub fn stat(ctx: &ProcessContext, path: &str) -> KResult<Stat> {
    ctx.kernel.vfs().stat(ctx, &ctx.resolve(path)?)
}

pub fn lstat(ctx: &ProcessContext, path: &str) -> KResult<Stat> {
    ctx.kernel.vfs().lstat(ctx, &ctx.resolve(path)?)
}

pub fn readlink(ctx: &ProcessContext, path: &str) -> KResult<String> {
    ctx.kernel.vfs().readlink(ctx, &ctx.resolve(path)?)
}

pub fn chmod(ctx: &ProcessContext, path: &str, mode: u32) -> KResult<()> {
    ctx.kernel.vfs().chmod(ctx, &ctx.resolve(path)?, mode)
}

pub fn chown(ctx: &ProcessContext, path: &str, uid: u32, gid: u32) -> KResult<()> {
    ctx.kernel.vfs().chown(ctx, &ctx.resolve(path)?, uid, gid)
}

pub fn creat(ctx: &ProcessContext, path: &str, mode: Option<u32>) -> KResult<()> {
    ctx.kernel.vfs().creat(ctx, &ctx.resolve(path)?, mode)
}

pub fn link(ctx: &ProcessContext, existing: &str, new_path: &str) -> KResult<()> {
    ctx.kernel
        .vfs()
        .link(ctx, &ctx.resolve(new_path)?, &ctx.resolve(existing)?)
}

/// `target` is stored verbatim; it resolves from the root when followed
pub fn symlink(ctx: &ProcessContext, target: &str, link_path: &str) -> KResult<()> {
    ctx.kernel
        .vfs()
        .symlink(ctx, &ctx.resolve(link_path)?, target)
}

pub fn unlink(ctx: &ProcessContext, path: &str) -> KResult<()> {
    ctx.kernel.vfs().unlink(ctx, &ctx.resolve(path)?)
}

pub fn mkdir(ctx: &ProcessContext, path: &str, mode: Option<u32>) -> KResult<()> {
    ctx.kernel.vfs().mkdir(ctx, &ctx.resolve(path)?, mode)
}

pub fn rmdir(ctx: &ProcessContext, path: &str) -> KResult<()> {
    ctx.kernel.vfs().rmdir(ctx, &ctx.resolve(path)?)
}

pub fn rename(ctx: &ProcessContext, from: &str, to: &str) -> KResult<()> {
    ctx.kernel
        .vfs()
        .rename(ctx, &ctx.resolve(from)?, &ctx.resolve(to)?)
}

pub fn truncate(ctx: &ProcessContext, path: &str, len: u64) -> KResult<()> {
    ctx.kernel.vfs().truncate(ctx, &ctx.resolve(path)?, len)
}

pub fn mount(ctx: &ProcessContext, path: &str, inode: Inode) -> KResult<()> {
    ctx.kernel.vfs().mount(ctx, &ctx.resolve(path)?, inode)?;
    Ok(())
}

pub fn unmount(ctx: &ProcessContext, path: &str) -> KResult<()> {
    ctx.kernel.vfs().unmount(ctx, &ctx.resolve(path)?)
}

/// Join `name` onto each `PATH` directory
pub(crate) fn search_path(path_var: &str, name: &str) -> Vec<String> {
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| path::join(dir, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_search_path() {
        assert_eq!(
            search_path("/usr/bin::/bin/", "ls"),
            vec!["/usr/bin/ls".to_string(), "/bin/ls".to_string()]
        );
        assert!(search_path("", "ls").is_empty());
    }

    fn stream_fd(ctx: &ProcessContext, stream: &Stream) -> Fd {
        let inode = Inode::stream(PIPE_MODE, stream.clone());
        let hid = ctx
            .kernel
            .vfs()
            .open_anonymous(ctx, inode, OpenFlags::READ)
            .unwrap();
        install_fd(ctx, hid).unwrap()
    }

    #[test]
    fn test_select_leaves_no_live_hooks_behind() {
        let kernel = crate::kernel::KernelBuilder::new().build().unwrap();
        let ctx = kernel.context();
        let idle = Stream::new();
        let busy = Stream::new();
        busy.try_write(b"x");
        let idle_fd = stream_fd(&ctx, &idle);
        let busy_fd = stream_fd(&ctx, &busy);

        for _ in 0..50 {
            let timed_out = block_on(select(&ctx, &[(idle_fd, PollFlag::Readable)], Some(0.0)));
            assert_eq!(timed_out.unwrap(), None);
            let both = [(idle_fd, PollFlag::Readable), (busy_fd, PollFlag::Readable)];
            assert_eq!(block_on(select(&ctx, &both, Some(0.0))).unwrap(), Some(busy_fd));
        }
        assert!(idle.pending_polls() <= 1);

        // Whatever is left over is dead and must not fire into a finished select
        idle.try_write(b"y");
        assert_eq!(idle.pending_polls(), 0);
    }
}
