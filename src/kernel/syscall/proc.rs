//! Process syscalls
//!
//! - spawn / spawn_path / spawn_pty: new child in the caller's group,
//!   inheriting credentials, cwd, environment and every open descriptor
//! - exec / exec_path: swap the caller's task, keeping pid and fds
//! - waitpid: block until an eligible child is a zombie, then reap it

use super::{SysValue, WaitOptions, fs};
use crate::error::{KResult, KernelError};
use crate::kernel::ProcessContext;
use crate::kernel::process::{Environ, Fd, OpenFlags, Pgid, Pid};
use crate::kernel::pty::slave_path;
use crate::kernel::task::Program;
use futures::FutureExt;
use futures::future::select_all;

/// Resolve `name` to a program the caller may run. Names with a `/` are
/// a single cwd-relative candidate; bare names are searched along `PATH`.
pub fn find_executable(ctx: &ProcessContext, name: &str) -> KResult<Option<Program>> {
    let candidates = if name.contains('/') {
        vec![ctx.resolve(name)?]
    } else {
        let path_var = ctx.with_process(|p| p.env.get("PATH").unwrap_or_default().to_string())?;
        fs::search_path(&path_var, name)
    };
    let vfs = ctx.kernel.vfs();
    for candidate in candidates {
        match vfs.lookup_executable(ctx, &candidate) {
            Ok(program) => return Ok(Some(program)),
            Err(e) => log::trace!("{}: skipping {}: {}", ctx.pid, candidate, e),
        }
    }
    Ok(None)
}

pub fn spawn(
    ctx: &ProcessContext,
    program: Program,
    args: Vec<String>,
    env: Option<Environ>,
) -> KResult<Pid> {
    let pid = ctx.kernel.create_process(ctx, program, args, env)?;
    ctx.kernel.make_ready(pid);
    Ok(pid)
}

pub fn spawn_path(
    ctx: &ProcessContext,
    name: &str,
    args: Vec<String>,
    env: Option<Environ>,
) -> KResult<Option<Pid>> {
    match find_executable(ctx, name)? {
        Some(program) => spawn(ctx, program, args, env).map(Some),
        None => Ok(None),
    }
}

/// Spawn `program` with a fresh PTY slave as its stdin/stdout/stderr.
/// The caller gets the master descriptor.
pub async fn spawn_pty(
    ctx: &ProcessContext,
    program: Program,
    args: Vec<String>,
    env: Option<Environ>,
) -> KResult<SysValue> {
    let master = fs::open(ctx, "/dev/ptmx", OpenFlags::RDWR, None)?;
    let header = match fs::read_fd(ctx, master, 4).await {
        Ok(header) => header,
        Err(e) => {
            fs::close(ctx, master)?;
            return Err(e);
        }
    };
    let index: [u8; 4] = match header.as_slice().try_into() {
        Ok(index) => index,
        Err(_) => {
            fs::close(ctx, master)?;
            return Err(KernelError::Internal("short pty index".into()));
        }
    };
    let slave = slave_path(u32::from_le_bytes(index));

    let pid = match ctx.kernel.create_process(ctx, program, args, env) {
        Ok(pid) => pid,
        Err(e) => {
            fs::close(ctx, master)?;
            return Err(e);
        }
    };
    let child = ctx.with_pid(pid);
    if let Err(e) = attach_terminal(&child, master, &slave) {
        ctx.kernel.terminate(pid, -1);
        fs::close(ctx, master)?;
        return Err(e);
    }
    ctx.kernel.make_ready(pid);
    log::debug!("{} spawned {} on {}", ctx.pid, pid, slave);
    Ok(SysValue::Pty { pid, master })
}

/// Point the child's stdio at `slave`, dropping its inherited copy of the
/// master
fn attach_terminal(child: &ProcessContext, master: Fd, slave: &str) -> KResult<()> {
    fs::close(child, master)?;
    let input = fs::open(child, slave, OpenFlags::READ, None)?;
    let output = fs::open(child, slave, OpenFlags::WRITE, None)?;
    fs::dup2(child, input, Fd::STDIN)?;
    fs::dup2(child, output, Fd::STDOUT)?;
    fs::dup2(child, output, Fd::STDERR)?;
    for fd in [input, output] {
        if fd.0 > Fd::STDERR.0 {
            fs::close(child, fd)?;
        }
    }
    Ok(())
}

/// Replace the caller's task. The replacement starts on the next resume.
pub fn exec(ctx: &ProcessContext, program: Program, args: Vec<String>) -> KResult<()> {
    log::debug!("{} exec {}", ctx.pid, program.name());
    ctx.with_process_mut(|p| {
        p.name = program.name().to_string();
        p.task = Some(program.instantiate(args));
    })
}

pub fn exec_path(ctx: &ProcessContext, name: &str, args: Vec<String>) -> KResult<bool> {
    match find_executable(ctx, name)? {
        Some(program) => exec(ctx, program, args).map(|_| true),
        None => Ok(false),
    }
}

/// Children of the caller that `pid` selects:
/// `> 0` that child, `0` the caller's group, `< 0` group `-pid`
fn eligible_children(ctx: &ProcessContext, pid: i32) -> KResult<Vec<Pid>> {
    let own_group = ctx.with_process(|p| p.pgid)?;
    let children = ctx.kernel.children_of(ctx.pid);
    Ok(children
        .into_iter()
        .filter(|(child, pgid)| match pid {
            p if p > 0 => child.0 == p as u32,
            0 => *pgid == own_group,
            p => *pgid == Pgid(p.unsigned_abs()),
        })
        .map(|(child, _)| child)
        .collect())
}

pub async fn waitpid(ctx: &ProcessContext, pid: i32, options: WaitOptions) -> KResult<SysValue> {
    let kernel = &ctx.kernel;
    loop {
        let children = eligible_children(ctx, pid)?;
        if children.is_empty() {
            return Ok(SysValue::Wait {
                pid: Pid(0),
                code: 0,
            });
        }
        let zombie = children
            .iter()
            .copied()
            .find(|child| kernel.exit_status(*child).is_some());
        let exited = match zombie {
            Some(child) => child,
            None if options.contains(WaitOptions::NOHANG) => {
                return Ok(SysValue::Wait {
                    pid: Pid(0),
                    code: 0,
                });
            }
            None => {
                let exits = children
                    .iter()
                    .map(|child| kernel.exited(*child).boxed_local());
                select_all(exits).await.0
            }
        };
        // Another waiter may have reaped it first
        if let Some(code) = kernel.reap(exited) {
            return Ok(SysValue::Wait { pid: exited, code });
        }
    }
}

pub fn getppid(ctx: &ProcessContext) -> KResult<Pid> {
    ctx.with_process(|p| p.parent)
}

/// Group of `pid` (0 means the caller)
pub fn getpgid(ctx: &ProcessContext, pid: Pid) -> KResult<Pgid> {
    let target = if pid.0 == 0 { ctx.pid } else { pid };
    ctx.with_pid(target).with_process(|p| p.pgid)
}

/// Move `pid` (0 = caller) into group `pgid` (0 = its own pid). Only the
/// caller itself or one of its children may be moved.
pub fn setpgid(ctx: &ProcessContext, pid: Pid, pgid: Pgid) -> KResult<()> {
    let target = if pid.0 == 0 { ctx.pid } else { pid };
    let pgid = if pgid.0 == 0 { Pgid::from_pid(target) } else { pgid };
    if target != ctx.pid {
        let parent = ctx.with_pid(target).with_process(|p| p.parent)?;
        if parent != ctx.pid {
            return Err(KernelError::Perm(format!("setpgid {}", target)));
        }
    }
    ctx.kernel.set_pgid(target, pgid)
}

/// Set the caller's umask, returning the old one
pub fn umask(ctx: &ProcessContext, mask: u32) -> KResult<u32> {
    ctx.with_process_mut(|p| std::mem::replace(&mut p.cred.umask, mask & 0o777))
}

