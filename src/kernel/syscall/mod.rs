//! System call interface
//!
//! This is the boundary between user tasks and the kernel. A task never
//! touches kernel state directly: it builds a [`Syscall`] value, yields it,
//! and resumes with the [`SysValue`] (or error) the kernel produced.
//!
//! Inspired by Linux syscall architecture:
//! - Every syscall has a stable name for tracing
//! - One dispatch point (`Syscall::execute`) for every operation
//! - Errors map to errno-style codes (see [`KernelError::code`])
//!
//! Implementations are grouped by what they act on:
//! - [`fs`]: descriptors and paths
//! - [`proc`]: process lifecycle and identity
//! - [`env`]: environment and working directory
//!
//! [`KernelError::code`]: crate::error::KernelError::code

pub mod env;
pub mod fs;
pub mod proc;
mod sys;

use super::ProcessContext;
use super::process::{Environ, Fd, OpenFlags, Pgid, Pid};
use super::stream::PollFlag;
use super::task::Program;
use crate::error::{KResult, KernelError};
use crate::vfs::{Inode, Stat};
use bitflags::bitflags;
use std::collections::BTreeMap;

bitflags! {
    /// Options for `waitpid`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaitOptions: u32 {
        /// Return the no-child sentinel instead of blocking
        const NOHANG = 1;
    }
}

/// A reified kernel operation, inert until executed
#[derive(Debug)]
pub enum Syscall {
    // ========== Descriptors ==========
    Open {
        path: String,
        flags: OpenFlags,
        mode: Option<u32>,
    },
    Close {
        fd: Fd,
    },
    /// Read up to `size` bytes; `None` reads until end of stream
    Read {
        fd: Fd,
        size: Option<usize>,
    },
    GetLine {
        fd: Fd,
        delim: u8,
    },
    Write {
        fd: Fd,
        data: Vec<u8>,
    },
    WriteAll {
        fd: Fd,
        data: Vec<u8>,
    },
    Dup2 {
        old: Fd,
        new: Fd,
    },
    Pipe,
    Select {
        fds: Vec<(Fd, PollFlag)>,
        timeout: Option<f64>,
    },
    Getdents {
        fd: Fd,
    },

    // ========== Paths ==========
    Stat {
        path: String,
    },
    Lstat {
        path: String,
    },
    Readlink {
        path: String,
    },
    Chmod {
        path: String,
        mode: u32,
    },
    Chown {
        path: String,
        uid: u32,
        gid: u32,
    },
    Creat {
        path: String,
        mode: Option<u32>,
    },
    Link {
        existing: String,
        new_path: String,
    },
    Symlink {
        target: String,
        path: String,
    },
    Unlink {
        path: String,
    },
    Mkdir {
        path: String,
        mode: Option<u32>,
    },
    Rmdir {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Truncate {
        path: String,
        len: u64,
    },
    Mount {
        path: String,
        inode: Inode,
    },
    Unmount {
        path: String,
    },

    // ========== Processes ==========
    Spawn {
        program: Program,
        args: Vec<String>,
        env: Option<Environ>,
    },
    /// Spawn whatever `path` resolves to; `None` if nothing does
    SpawnPath {
        path: String,
        args: Vec<String>,
        env: Option<Environ>,
    },
    SpawnPty {
        program: Program,
        args: Vec<String>,
        env: Option<Environ>,
    },
    Exec {
        program: Program,
        args: Vec<String>,
    },
    /// Replace the caller's task; `false` if `path` resolves to nothing
    ExecPath {
        path: String,
        args: Vec<String>,
    },
    Waitpid {
        pid: i32,
        options: WaitOptions,
    },
    Getpid,
    Getppid,
    Getpgid {
        pid: Pid,
    },
    Setpgid {
        pid: Pid,
        pgid: Pgid,
    },
    Umask {
        mask: u32,
    },
    Sleep {
        ms: f64,
    },

    // ========== Environment ==========
    Getenv {
        name: String,
    },
    Setenv {
        name: String,
        value: String,
        overwrite: bool,
    },
    Unsetenv {
        name: String,
    },
    Environ,
    Getcwd,
    Chdir {
        path: String,
    },
}

impl Syscall {
    /// Get the syscall name (for tracing/debugging)
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Open { .. } => "open",
            Syscall::Close { .. } => "close",
            Syscall::Read { .. } => "read",
            Syscall::GetLine { .. } => "getline",
            Syscall::Write { .. } => "write",
            Syscall::WriteAll { .. } => "writeall",
            Syscall::Dup2 { .. } => "dup2",
            Syscall::Pipe => "pipe",
            Syscall::Select { .. } => "select",
            Syscall::Getdents { .. } => "getdents",
            Syscall::Stat { .. } => "stat",
            Syscall::Lstat { .. } => "lstat",
            Syscall::Readlink { .. } => "readlink",
            Syscall::Chmod { .. } => "chmod",
            Syscall::Chown { .. } => "chown",
            Syscall::Creat { .. } => "creat",
            Syscall::Link { .. } => "link",
            Syscall::Symlink { .. } => "symlink",
            Syscall::Unlink { .. } => "unlink",
            Syscall::Mkdir { .. } => "mkdir",
            Syscall::Rmdir { .. } => "rmdir",
            Syscall::Rename { .. } => "rename",
            Syscall::Truncate { .. } => "truncate",
            Syscall::Mount { .. } => "mount",
            Syscall::Unmount { .. } => "unmount",
            Syscall::Spawn { .. } => "spawn",
            Syscall::SpawnPath { .. } => "spawn_path",
            Syscall::SpawnPty { .. } => "spawn_pty",
            Syscall::Exec { .. } => "exec",
            Syscall::ExecPath { .. } => "exec_path",
            Syscall::Waitpid { .. } => "waitpid",
            Syscall::Getpid => "getpid",
            Syscall::Getppid => "getppid",
            Syscall::Getpgid { .. } => "getpgid",
            Syscall::Setpgid { .. } => "setpgid",
            Syscall::Umask { .. } => "umask",
            Syscall::Sleep { .. } => "sleep",
            Syscall::Getenv { .. } => "getenv",
            Syscall::Setenv { .. } => "setenv",
            Syscall::Unsetenv { .. } => "unsetenv",
            Syscall::Environ => "environ",
            Syscall::Getcwd => "getcwd",
            Syscall::Chdir { .. } => "chdir",
        }
    }

    /// Perform the operation on behalf of `ctx`'s process
    pub async fn execute(self, ctx: &ProcessContext) -> KResult<SysValue> {
        match self {
            Syscall::Open { path, flags, mode } => {
                fs::open(ctx, &path, flags, mode).map(SysValue::Fd)
            }
            Syscall::Close { fd } => fs::close(ctx, fd).map(|_| SysValue::Unit),
            Syscall::Read { fd, size: Some(size) } => {
                fs::read_fd(ctx, fd, size).await.map(SysValue::Data)
            }
            Syscall::Read { fd, size: None } => fs::read_to_end(ctx, fd).await.map(SysValue::Data),
            Syscall::GetLine { fd, delim } => fs::get_line(ctx, fd, delim).await,
            Syscall::Write { fd, data } => fs::write_fd(ctx, fd, &data).await.map(SysValue::Count),
            Syscall::WriteAll { fd, data } => fs::write_all(ctx, fd, &data).await,
            Syscall::Dup2 { old, new } => fs::dup2(ctx, old, new).map(SysValue::Fd),
            Syscall::Pipe => fs::pipe(ctx),
            Syscall::Select { fds, timeout } => {
                fs::select(ctx, &fds, timeout).await.map(SysValue::Selected)
            }
            Syscall::Getdents { fd } => fs::getdents(ctx, fd).map(SysValue::Names),

            Syscall::Stat { path } => fs::stat(ctx, &path).map(SysValue::Stat),
            Syscall::Lstat { path } => fs::lstat(ctx, &path).map(SysValue::Stat),
            Syscall::Readlink { path } => fs::readlink(ctx, &path).map(SysValue::Str),
            Syscall::Chmod { path, mode } => fs::chmod(ctx, &path, mode).map(|_| SysValue::Unit),
            Syscall::Chown { path, uid, gid } => {
                fs::chown(ctx, &path, uid, gid).map(|_| SysValue::Unit)
            }
            Syscall::Creat { path, mode } => fs::creat(ctx, &path, mode).map(|_| SysValue::Unit),
            Syscall::Link { existing, new_path } => {
                fs::link(ctx, &existing, &new_path).map(|_| SysValue::Unit)
            }
            Syscall::Symlink { target, path } => {
                fs::symlink(ctx, &target, &path).map(|_| SysValue::Unit)
            }
            Syscall::Unlink { path } => fs::unlink(ctx, &path).map(|_| SysValue::Unit),
            Syscall::Mkdir { path, mode } => fs::mkdir(ctx, &path, mode).map(|_| SysValue::Unit),
            Syscall::Rmdir { path } => fs::rmdir(ctx, &path).map(|_| SysValue::Unit),
            Syscall::Rename { from, to } => fs::rename(ctx, &from, &to).map(|_| SysValue::Unit),
            Syscall::Truncate { path, len } => {
                fs::truncate(ctx, &path, len).map(|_| SysValue::Unit)
            }
            Syscall::Mount { path, inode } => fs::mount(ctx, &path, inode).map(|_| SysValue::Unit),
            Syscall::Unmount { path } => fs::unmount(ctx, &path).map(|_| SysValue::Unit),

            Syscall::Spawn { program, args, env } => {
                proc::spawn(ctx, program, args, env).map(SysValue::Pid)
            }
            Syscall::SpawnPath { path, args, env } => {
                proc::spawn_path(ctx, &path, args, env).map(SysValue::MaybePid)
            }
            Syscall::SpawnPty { program, args, env } => {
                proc::spawn_pty(ctx, program, args, env).await
            }
            Syscall::Exec { program, args } => {
                proc::exec(ctx, program, args).map(|_| SysValue::Unit)
            }
            Syscall::ExecPath { path, args } => {
                proc::exec_path(ctx, &path, args).map(SysValue::Bool)
            }
            Syscall::Waitpid { pid, options } => proc::waitpid(ctx, pid, options).await,
            Syscall::Getpid => Ok(SysValue::Pid(ctx.pid)),
            Syscall::Getppid => proc::getppid(ctx).map(SysValue::Pid),
            Syscall::Getpgid { pid } => proc::getpgid(ctx, pid).map(SysValue::Pgid),
            Syscall::Setpgid { pid, pgid } => {
                proc::setpgid(ctx, pid, pgid).map(|_| SysValue::Unit)
            }
            Syscall::Umask { mask } => proc::umask(ctx, mask).map(SysValue::Mask),
            Syscall::Sleep { ms } => {
                ctx.kernel.clock().sleep(ms).await;
                Ok(SysValue::Unit)
            }

            Syscall::Getenv { name } => env::getenv(ctx, &name).map(SysValue::MaybeStr),
            Syscall::Setenv {
                name,
                value,
                overwrite,
            } => env::setenv(ctx, &name, &value, overwrite).map(SysValue::Bool),
            Syscall::Unsetenv { name } => env::unsetenv(ctx, &name).map(SysValue::Bool),
            Syscall::Environ => env::environ(ctx).map(SysValue::Env),
            Syscall::Getcwd => env::getcwd(ctx).map(SysValue::Str),
            Syscall::Chdir { path } => env::chdir(ctx, &path).map(|_| SysValue::Unit),
        }
    }
}

/// Result payload of a successful syscall
#[derive(Debug, Clone, PartialEq)]
pub enum SysValue {
    Unit,
    Bool(bool),
    Fd(Fd),
    Pid(Pid),
    MaybePid(Option<Pid>),
    Pgid(Pgid),
    Mask(u32),
    Count(usize),
    Data(Vec<u8>),
    Str(String),
    MaybeStr(Option<String>),
    Names(Vec<String>),
    Stat(Stat),
    Env(BTreeMap<String, String>),
    Pipe { read: Fd, write: Fd },
    Pty { pid: Pid, master: Fd },
    Line { line: String, eof: bool },
    Written { total: usize, eof: bool },
    /// `pid == Pid(0)` is the no-child sentinel
    Wait { pid: Pid, code: i32 },
    /// `None` on timeout
    Selected(Option<Fd>),
}

fn mismatch(expected: &str, got: &SysValue) -> KernelError {
    KernelError::Internal(format!("expected {} result, got {:?}", expected, got))
}

macro_rules! into_variant {
    ($($fn_name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl SysValue {
            $(
                pub fn $fn_name(self) -> KResult<$ty> {
                    match self {
                        SysValue::$variant(value) => Ok(value),
                        other => Err(mismatch(stringify!($variant), &other)),
                    }
                }
            )*
        }
    };
}

into_variant! {
    into_bool => Bool(bool),
    into_fd => Fd(Fd),
    into_pid => Pid(Pid),
    into_maybe_pid => MaybePid(Option<Pid>),
    into_pgid => Pgid(Pgid),
    into_mask => Mask(u32),
    into_count => Count(usize),
    into_data => Data(Vec<u8>),
    into_str => Str(String),
    into_maybe_str => MaybeStr(Option<String>),
    into_names => Names(Vec<String>),
    into_stat => Stat(Stat),
    into_env => Env(BTreeMap<String, String>),
    into_selected => Selected(Option<Fd>),
}

impl SysValue {
    pub fn into_unit(self) -> KResult<()> {
        match self {
            SysValue::Unit => Ok(()),
            other => Err(mismatch("Unit", &other)),
        }
    }

    pub fn into_pipe(self) -> KResult<(Fd, Fd)> {
        match self {
            SysValue::Pipe { read, write } => Ok((read, write)),
            other => Err(mismatch("Pipe", &other)),
        }
    }

    pub fn into_pty(self) -> KResult<(Pid, Fd)> {
        match self {
            SysValue::Pty { pid, master } => Ok((pid, master)),
            other => Err(mismatch("Pty", &other)),
        }
    }

    pub fn into_line(self) -> KResult<(String, bool)> {
        match self {
            SysValue::Line { line, eof } => Ok((line, eof)),
            other => Err(mismatch("Line", &other)),
        }
    }

    pub fn into_written(self) -> KResult<(usize, bool)> {
        match self {
            SysValue::Written { total, eof } => Ok((total, eof)),
            other => Err(mismatch("Written", &other)),
        }
    }

    pub fn into_wait(self) -> KResult<(Pid, i32)> {
        match self {
            SysValue::Wait { pid, code } => Ok((pid, code)),
            other => Err(mismatch("Wait", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_names() {
        assert_eq!(Syscall::Pipe.name(), "pipe");
        assert_eq!(Syscall::Close { fd: Fd(1) }.name(), "close");
        let wait = Syscall::Waitpid {
            pid: 0,
            options: WaitOptions::NOHANG,
        };
        assert_eq!(wait.name(), "waitpid");
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(SysValue::Fd(Fd(3)).into_fd().unwrap(), Fd(3));
        assert_eq!(
            SysValue::Wait {
                pid: Pid(0),
                code: 0
            }
            .into_wait()
            .unwrap(),
            (Pid(0), 0)
        );
        assert!(SysValue::Unit.into_unit().is_ok());
    }

    #[test]
    fn test_value_mismatch_is_internal() {
        let err = SysValue::Count(1).into_fd().unwrap_err();
        assert_eq!(err.code(), "EDEBUG");
    }
}
