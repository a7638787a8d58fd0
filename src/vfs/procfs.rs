//! /proc
//!
//! Directories reflecting the process table:
//!
//! ```text
//! /proc/self          -> /proc/<caller>
//! /proc/<pid>/fd/<n>  I/O through fd n of <pid>
//! ```
//!
//! Nodes are built on first lookup and cached in the directory that owns
//! them, holding one link each. Every access drops cached nodes whose
//! process (or descriptor) is gone; open handles keep a dropped node
//! alive until they are closed.

use super::{DirKind, FileKind, Inode, InodeId, InodeKind, SymlinkKind, Vfs};
use crate::error::KResult;
use crate::kernel::ProcessContext;
use crate::kernel::process::{Fd, Pid};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
enum ProcDir {
    Root,
    Pid(Pid),
    FdDir(Pid),
}

fn classify(vfs: &Vfs, dir: InodeId) -> KResult<Option<ProcDir>> {
    vfs.with_node(dir, |node| match &node.kind {
        InodeKind::Dir(DirKind::Proc { .. }) => Some(ProcDir::Root),
        InodeKind::Dir(DirKind::ProcPid { pid, .. }) => Some(ProcDir::Pid(*pid)),
        InodeKind::Dir(DirKind::ProcFdDir { pid, .. }) => Some(ProcDir::FdDir(*pid)),
        _ => None,
    })
}

/// Insert a freshly built node under a cache slot, holding one link
fn attach(vfs: &Vfs, inode: Inode) -> InodeId {
    let id = vfs.alloc(inode);
    let _ = vfs.with_node_mut(id, |node| node.attr.nlink = 1);
    id
}

fn owned_by_target(ctx: &ProcessContext, pid: Pid, inode: Inode) -> Inode {
    let (uid, gid) = ctx.kernel.process_owner(pid).unwrap_or((0, 0));
    inode.owned_by(uid, gid)
}

pub(super) fn lookup(
    vfs: &Vfs,
    ctx: &ProcessContext,
    dir: InodeId,
    name: &str,
) -> KResult<Option<InodeId>> {
    prune(vfs, ctx, dir)?;
    match classify(vfs, dir)? {
        Some(ProcDir::Root) if name == "self" => lookup_self(vfs, dir).map(Some),
        Some(ProcDir::Root) => {
            let Ok(pid) = name.parse::<u32>().map(Pid) else {
                return Ok(None);
            };
            if !ctx.kernel.process_exists(pid) {
                return Ok(None);
            }
            lookup_pid(vfs, ctx, dir, pid).map(Some)
        }
        Some(ProcDir::Pid(pid)) if name == "fd" && ctx.kernel.process_exists(pid) => {
            lookup_fd_dir(vfs, ctx, dir, pid).map(Some)
        }
        Some(ProcDir::FdDir(pid)) => {
            let Ok(fd) = name.parse::<u32>().map(Fd) else {
                return Ok(None);
            };
            let open = ctx.kernel.open_fds(pid).unwrap_or_default();
            if !open.contains(&fd) {
                return Ok(None);
            }
            lookup_fd(vfs, ctx, dir, pid, fd).map(Some)
        }
        _ => Ok(None),
    }
}

pub(super) fn list(vfs: &Vfs, ctx: &ProcessContext, dir: InodeId) -> KResult<Vec<String>> {
    prune(vfs, ctx, dir)?;
    Ok(match classify(vfs, dir)? {
        Some(ProcDir::Root) => {
            let mut names: Vec<String> =
                ctx.kernel.pids().iter().map(|pid| pid.0.to_string()).collect();
            names.push("self".to_string());
            names
        }
        Some(ProcDir::Pid(pid)) if ctx.kernel.process_exists(pid) => vec!["fd".to_string()],
        Some(ProcDir::FdDir(pid)) => ctx
            .kernel
            .open_fds(pid)
            .unwrap_or_default()
            .iter()
            .map(|fd| fd.0.to_string())
            .collect(),
        _ => Vec::new(),
    })
}

fn lookup_self(vfs: &Vfs, dir: InodeId) -> KResult<InodeId> {
    let cached = vfs.with_node(dir, |node| match &node.kind {
        InodeKind::Dir(DirKind::Proc { self_link, .. }) => *self_link,
        _ => None,
    })?;
    if let Some(id) = cached {
        return Ok(id);
    }
    let id = attach(
        vfs,
        Inode::new(0o777, InodeKind::Symlink(SymlinkKind::ProcSelf)),
    );
    vfs.with_node_mut(dir, |node| {
        if let InodeKind::Dir(DirKind::Proc { self_link, .. }) = &mut node.kind {
            *self_link = Some(id);
        }
    })?;
    Ok(id)
}

fn lookup_pid(vfs: &Vfs, ctx: &ProcessContext, dir: InodeId, pid: Pid) -> KResult<InodeId> {
    let cached = vfs.with_node(dir, |node| match &node.kind {
        InodeKind::Dir(DirKind::Proc { pids, .. }) => pids.get(&pid).copied(),
        _ => None,
    })?;
    if let Some(id) = cached {
        return Ok(id);
    }
    let inode = Inode::new(0o555, InodeKind::Dir(DirKind::ProcPid { pid, fd_dir: None }));
    let id = attach(vfs, owned_by_target(ctx, pid, inode));
    vfs.with_node_mut(dir, |node| {
        if let InodeKind::Dir(DirKind::Proc { pids, .. }) = &mut node.kind {
            pids.insert(pid, id);
        }
    })?;
    Ok(id)
}

fn lookup_fd_dir(vfs: &Vfs, ctx: &ProcessContext, dir: InodeId, pid: Pid) -> KResult<InodeId> {
    let cached = vfs.with_node(dir, |node| match &node.kind {
        InodeKind::Dir(DirKind::ProcPid { fd_dir, .. }) => *fd_dir,
        _ => None,
    })?;
    if let Some(id) = cached {
        return Ok(id);
    }
    let inode = Inode::new(
        0o555,
        InodeKind::Dir(DirKind::ProcFdDir {
            pid,
            entries: HashMap::new(),
        }),
    );
    let id = attach(vfs, owned_by_target(ctx, pid, inode));
    vfs.with_node_mut(dir, |node| {
        if let InodeKind::Dir(DirKind::ProcPid { fd_dir, .. }) = &mut node.kind {
            *fd_dir = Some(id);
        }
    })?;
    Ok(id)
}

fn lookup_fd(vfs: &Vfs, ctx: &ProcessContext, dir: InodeId, pid: Pid, fd: Fd) -> KResult<InodeId> {
    let cached = vfs.with_node(dir, |node| match &node.kind {
        InodeKind::Dir(DirKind::ProcFdDir { entries, .. }) => entries.get(&fd).copied(),
        _ => None,
    })?;
    if let Some(id) = cached {
        return Ok(id);
    }
    let inode = Inode::new(0o600, InodeKind::File(FileKind::ProcFd { pid, fd }));
    let id = attach(vfs, owned_by_target(ctx, pid, inode));
    vfs.with_node_mut(dir, |node| {
        if let InodeKind::Dir(DirKind::ProcFdDir { entries, .. }) = &mut node.kind {
            entries.insert(fd, id);
        }
    })?;
    Ok(id)
}

/// Drop cached children that no longer correspond to anything
fn prune(vfs: &Vfs, ctx: &ProcessContext, dir: InodeId) -> KResult<()> {
    let kernel = &ctx.kernel;
    let stale = vfs.with_node_mut(dir, |node| match &mut node.kind {
        InodeKind::Dir(DirKind::Proc { pids, .. }) => {
            let gone: Vec<Pid> = pids
                .keys()
                .copied()
                .filter(|pid| !kernel.process_exists(*pid))
                .collect();
            gone.iter().filter_map(|pid| pids.remove(pid)).collect()
        }
        InodeKind::Dir(DirKind::ProcPid { pid, fd_dir }) if !kernel.process_exists(*pid) => {
            fd_dir.take().into_iter().collect()
        }
        InodeKind::Dir(DirKind::ProcFdDir { pid, entries }) => {
            let open = kernel.open_fds(*pid).unwrap_or_default();
            let gone: Vec<Fd> = entries
                .keys()
                .copied()
                .filter(|fd| !open.contains(fd))
                .collect();
            gone.iter().filter_map(|fd| entries.remove(fd)).collect()
        }
        _ => Vec::new(),
    })?;
    for id in stale {
        vfs.drop_link(id);
    }
    Ok(())
}
