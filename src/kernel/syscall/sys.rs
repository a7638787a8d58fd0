//! Typed syscall wrappers for program code
//!
//! Each wrapper builds the matching [`Syscall`], yields it through
//! [`Sys::call`] and unpacks the result.

use super::{Syscall, WaitOptions};
use crate::error::KResult;
use crate::kernel::process::{Environ, Fd, OpenFlags, Pgid, Pid};
use crate::kernel::stream::PollFlag;
use crate::kernel::task::{Program, Sys};
use crate::vfs::{Inode, Stat};
use std::collections::BTreeMap;

impl Sys {
    // ========== Descriptors ==========

    pub async fn open(&self, path: &str, flags: OpenFlags) -> KResult<Fd> {
        self.open_mode(path, flags, None).await
    }

    pub async fn open_mode(&self, path: &str, flags: OpenFlags, mode: Option<u32>) -> KResult<Fd> {
        self.call(Syscall::Open {
            path: path.to_string(),
            flags,
            mode,
        })
        .await?
        .into_fd()
    }

    pub async fn close(&self, fd: Fd) -> KResult<()> {
        self.call(Syscall::Close { fd }).await?.into_unit()
    }

    pub async fn read(&self, fd: Fd, size: usize) -> KResult<Vec<u8>> {
        self.call(Syscall::Read {
            fd,
            size: Some(size),
        })
        .await?
        .into_data()
    }

    pub async fn read_to_end(&self, fd: Fd) -> KResult<Vec<u8>> {
        self.call(Syscall::Read { fd, size: None }).await?.into_data()
    }

    /// Next newline-terminated line as `(line, eof)`
    pub async fn get_line(&self, fd: Fd) -> KResult<(String, bool)> {
        self.get_line_until(fd, b'\n').await
    }

    pub async fn get_line_until(&self, fd: Fd, delim: u8) -> KResult<(String, bool)> {
        self.call(Syscall::GetLine { fd, delim }).await?.into_line()
    }

    pub async fn write(&self, fd: Fd, data: &[u8]) -> KResult<usize> {
        self.call(Syscall::Write {
            fd,
            data: data.to_vec(),
        })
        .await?
        .into_count()
    }

    /// Write everything; returns `(total, eof)`
    pub async fn write_all(&self, fd: Fd, data: &[u8]) -> KResult<(usize, bool)> {
        self.call(Syscall::WriteAll {
            fd,
            data: data.to_vec(),
        })
        .await?
        .into_written()
    }

    /// `write_all` of `text` to stdout
    pub async fn print(&self, text: &str) -> KResult<()> {
        self.write_all(Fd::STDOUT, text.as_bytes()).await.map(|_| ())
    }

    pub async fn dup2(&self, old: Fd, new: Fd) -> KResult<Fd> {
        self.call(Syscall::Dup2 { old, new }).await?.into_fd()
    }

    /// `(read end, write end)`
    pub async fn pipe(&self) -> KResult<(Fd, Fd)> {
        self.call(Syscall::Pipe).await?.into_pipe()
    }

    /// First ready descriptor; `None` on timeout
    pub async fn select(
        &self,
        fds: Vec<(Fd, PollFlag)>,
        timeout: Option<f64>,
    ) -> KResult<Option<Fd>> {
        self.call(Syscall::Select { fds, timeout })
            .await?
            .into_selected()
    }

    pub async fn getdents(&self, fd: Fd) -> KResult<Vec<String>> {
        self.call(Syscall::Getdents { fd }).await?.into_names()
    }

    // ========== Paths ==========

    pub async fn stat(&self, path: &str) -> KResult<Stat> {
        self.call(Syscall::Stat {
            path: path.to_string(),
        })
        .await?
        .into_stat()
    }

    pub async fn lstat(&self, path: &str) -> KResult<Stat> {
        self.call(Syscall::Lstat {
            path: path.to_string(),
        })
        .await?
        .into_stat()
    }

    pub async fn readlink(&self, path: &str) -> KResult<String> {
        self.call(Syscall::Readlink {
            path: path.to_string(),
        })
        .await?
        .into_str()
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> KResult<()> {
        self.call(Syscall::Chmod {
            path: path.to_string(),
            mode,
        })
        .await?
        .into_unit()
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> KResult<()> {
        self.call(Syscall::Chown {
            path: path.to_string(),
            uid,
            gid,
        })
        .await?
        .into_unit()
    }

    pub async fn creat(&self, path: &str, mode: Option<u32>) -> KResult<()> {
        self.call(Syscall::Creat {
            path: path.to_string(),
            mode,
        })
        .await?
        .into_unit()
    }

    pub async fn link(&self, existing: &str, new_path: &str) -> KResult<()> {
        self.call(Syscall::Link {
            existing: existing.to_string(),
            new_path: new_path.to_string(),
        })
        .await?
        .into_unit()
    }

    pub async fn symlink(&self, target: &str, path: &str) -> KResult<()> {
        self.call(Syscall::Symlink {
            target: target.to_string(),
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }

    pub async fn unlink(&self, path: &str) -> KResult<()> {
        self.call(Syscall::Unlink {
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }

    pub async fn mkdir(&self, path: &str, mode: Option<u32>) -> KResult<()> {
        self.call(Syscall::Mkdir {
            path: path.to_string(),
            mode,
        })
        .await?
        .into_unit()
    }

    pub async fn rmdir(&self, path: &str) -> KResult<()> {
        self.call(Syscall::Rmdir {
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }

    pub async fn rename(&self, from: &str, to: &str) -> KResult<()> {
        self.call(Syscall::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await?
        .into_unit()
    }

    pub async fn truncate(&self, path: &str, len: u64) -> KResult<()> {
        self.call(Syscall::Truncate {
            path: path.to_string(),
            len,
        })
        .await?
        .into_unit()
    }

    pub async fn mount(&self, path: &str, inode: Inode) -> KResult<()> {
        self.call(Syscall::Mount {
            path: path.to_string(),
            inode,
        })
        .await?
        .into_unit()
    }

    pub async fn unmount(&self, path: &str) -> KResult<()> {
        self.call(Syscall::Unmount {
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }

    // ========== Processes ==========

    pub async fn spawn(&self, program: Program, args: Vec<String>) -> KResult<Pid> {
        self.call(Syscall::Spawn {
            program,
            args,
            env: None,
        })
        .await?
        .into_pid()
    }

    pub async fn spawn_with_env(
        &self,
        program: Program,
        args: Vec<String>,
        env: Environ,
    ) -> KResult<Pid> {
        self.call(Syscall::Spawn {
            program,
            args,
            env: Some(env),
        })
        .await?
        .into_pid()
    }

    /// `None` when `path` names no runnable program
    pub async fn spawn_path(&self, path: &str, args: Vec<String>) -> KResult<Option<Pid>> {
        self.call(Syscall::SpawnPath {
            path: path.to_string(),
            args,
            env: None,
        })
        .await?
        .into_maybe_pid()
    }

    /// `(child pid, master fd)`
    pub async fn spawn_pty(&self, program: Program, args: Vec<String>) -> KResult<(Pid, Fd)> {
        self.call(Syscall::SpawnPty {
            program,
            args,
            env: None,
        })
        .await?
        .into_pty()
    }

    /// On success the caller's task is replaced and this never resumes
    pub async fn exec(&self, program: Program, args: Vec<String>) -> KResult<()> {
        self.call(Syscall::Exec { program, args }).await?.into_unit()
    }

    /// `false` when `path` names no runnable program
    pub async fn exec_path(&self, path: &str, args: Vec<String>) -> KResult<bool> {
        self.call(Syscall::ExecPath {
            path: path.to_string(),
            args,
        })
        .await?
        .into_bool()
    }

    /// `(pid, exit code)`; `(Pid(0), 0)` when there is nothing to wait for
    pub async fn waitpid(&self, pid: i32, options: WaitOptions) -> KResult<(Pid, i32)> {
        self.call(Syscall::Waitpid { pid, options })
            .await?
            .into_wait()
    }

    pub async fn getpid(&self) -> KResult<Pid> {
        self.call(Syscall::Getpid).await?.into_pid()
    }

    pub async fn getppid(&self) -> KResult<Pid> {
        self.call(Syscall::Getppid).await?.into_pid()
    }

    pub async fn getpgid(&self, pid: Pid) -> KResult<Pgid> {
        self.call(Syscall::Getpgid { pid }).await?.into_pgid()
    }

    pub async fn setpgid(&self, pid: Pid, pgid: Pgid) -> KResult<()> {
        self.call(Syscall::Setpgid { pid, pgid })
            .await?
            .into_unit()
    }

    pub async fn umask(&self, mask: u32) -> KResult<u32> {
        self.call(Syscall::Umask { mask }).await?.into_mask()
    }

    pub async fn sleep(&self, ms: f64) -> KResult<()> {
        self.call(Syscall::Sleep { ms }).await?.into_unit()
    }

    // ========== Environment ==========

    pub async fn getenv(&self, name: &str) -> KResult<Option<String>> {
        self.call(Syscall::Getenv {
            name: name.to_string(),
        })
        .await?
        .into_maybe_str()
    }

    pub async fn setenv(&self, name: &str, value: &str, overwrite: bool) -> KResult<bool> {
        self.call(Syscall::Setenv {
            name: name.to_string(),
            value: value.to_string(),
            overwrite,
        })
        .await?
        .into_bool()
    }

    pub async fn unsetenv(&self, name: &str) -> KResult<bool> {
        self.call(Syscall::Unsetenv {
            name: name.to_string(),
        })
        .await?
        .into_bool()
    }

    pub async fn environ(&self) -> KResult<BTreeMap<String, String>> {
        self.call(Syscall::Environ).await?.into_env()
    }

    pub async fn getcwd(&self) -> KResult<String> {
        self.call(Syscall::Getcwd).await?.into_str()
    }

    pub async fn chdir(&self, path: &str) -> KResult<()> {
        self.call(Syscall::Chdir {
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }
}
