//! Process abstraction
//!
//! A process is the schedulable unit of the kernel. Each process has its
//! own file descriptor table, working directory, environment and
//! credentials, and wraps a resumable [`Task`].
//!
//! Modelled on the Unix process:
//! - Process groups (pgid) for group-targeted waitpid
//! - Environment variables (inherited on spawn)
//! - Parent/child relationships
//! - Wait/reap semantics for zombie processes

use super::task::Task;
use crate::error::{KResult, KernelError};
use crate::vfs::HandleId;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::task::Waker;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The kernel's own context
    pub const KERNEL: Pid = Pid(0);
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Process group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pgid(pub u32);

impl Pgid {
    /// Group led by `pid`
    pub fn from_pid(pid: Pid) -> Self {
        Pgid(pid.0)
    }
}

impl std::fmt::Display for Pgid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pgid:{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Queued for its next resumption
    Ready,
    /// Its task is being driven right now
    Running,
    /// Waiting for its pending syscall to settle
    Blocked,
    /// Reserved; nothing transitions here today
    Stopped,
    /// Task completed with this exit code, not yet reaped
    Zombie(i32),
}

impl ProcessState {
    pub fn is_zombie(&self) -> bool {
        matches!(self, ProcessState::Zombie(_))
    }
}

/// File descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub u32);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Flags for `open`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 2;
        const CREAT = 4;
        const DIR = 8;
        const TRUNC = 16;
        const APPEND = 32;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Identity a process acts with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    /// Primary group first
    pub gids: Vec<u32>,
    pub umask: u32,
}

impl Credentials {
    pub fn root(umask: u32) -> Self {
        Self {
            uid: 0,
            gids: vec![0],
            umask,
        }
    }

    pub fn primary_gid(&self) -> u32 {
        self.gids.first().copied().unwrap_or(0)
    }
}

// ========== Environment ==========

/// Environment variables, kept sorted for stable listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
}

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Entry for `name`, created empty if unset
    pub fn get_or_insert(&mut self, name: &str) -> &mut String {
        self.vars.entry(name.to_string()).or_default()
    }

    /// Set `name`; with `overwrite == false` an existing value is kept.
    /// Returns whether the value was written.
    pub fn set(&mut self, name: &str, value: &str, overwrite: bool) -> KResult<bool> {
        if name.is_empty() || name.contains('=') {
            return Err(KernelError::InvalidArgument(format!(
                "invalid variable name {:?}",
                name
            )));
        }
        if !overwrite && self.vars.contains_key(name) {
            return Ok(false);
        }
        self.vars.insert(name.to_string(), value.to_string());
        Ok(true)
    }

    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.vars.clone()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl From<BTreeMap<String, String>> for Environ {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Environ {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

// ========== File descriptor table ==========

/// One open descriptor
#[derive(Debug, Clone)]
pub struct FdEntry {
    pub handle: HandleId,
    /// Bytes read past the last delimiter by getLine
    pub line_buf: Vec<u8>,
}

impl FdEntry {
    pub fn new(handle: HandleId) -> Self {
        Self {
            handle,
            line_buf: Vec::new(),
        }
    }
}

/// Per-process descriptor table. New descriptors take the lowest free slot.
#[derive(Debug, Clone)]
pub struct FileTable {
    slots: Vec<Option<FdEntry>>,
    max_fds: usize,
}

impl FileTable {
    pub fn with_limit(max_fds: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_fds,
        }
    }

    /// Install `handle` at the lowest free descriptor
    pub fn alloc(&mut self, handle: HandleId) -> KResult<Fd> {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None if self.slots.len() < self.max_fds => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(KernelError::TooManyFiles),
        };
        self.slots[slot] = Some(FdEntry::new(handle));
        Ok(Fd(slot as u32))
    }

    /// Install `handle` at exactly `fd`, returning whatever was there
    pub fn insert(&mut self, fd: Fd, handle: HandleId) -> KResult<Option<FdEntry>> {
        let slot = fd.0 as usize;
        if slot >= self.max_fds {
            return Err(KernelError::BadFd(fd.to_string()));
        }
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        Ok(self.slots[slot].replace(FdEntry::new(handle)))
    }

    pub fn get(&self, fd: Fd) -> Option<&FdEntry> {
        self.slots.get(fd.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut FdEntry> {
        self.slots.get_mut(fd.0 as usize).and_then(Option::as_mut)
    }

    pub fn handle(&self, fd: Fd) -> KResult<HandleId> {
        self.get(fd)
            .map(|entry| entry.handle)
            .ok_or_else(|| KernelError::BadFd(fd.to_string()))
    }

    pub fn remove(&mut self, fd: Fd) -> Option<FdEntry> {
        let entry = self.slots.get_mut(fd.0 as usize)?.take();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        entry
    }

    /// Open descriptors in ascending order
    pub fn fds(&self) -> Vec<Fd> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| Fd(i as u32))
            .collect()
    }

    /// Copy for a child: same handles, fresh line buffers. The caller owns
    /// bumping the handles' reference counts.
    pub fn clone_for_spawn(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|slot| slot.as_ref().map(|entry| FdEntry::new(entry.handle)))
                .collect(),
            max_fds: self.max_fds,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ========== Process ==========

pub struct Process {
    pub pid: Pid,
    pub pgid: Pgid,
    pub parent: Pid,
    pub name: String,
    pub state: ProcessState,
    pub files: FileTable,
    pub cred: Credentials,
    pub env: Environ,
    pub cwd: String,
    /// `None` for the kernel context and while the scheduler drives it
    pub task: Option<Task>,
    /// Waiters parked until this process becomes a zombie
    pub exit_waiters: Vec<Waker>,
}

impl Process {
    pub fn is_alive(&self) -> bool {
        !self.state.is_zombie()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            ProcessState::Zombie(code) => Some(code),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("pgid", &self.pgid)
            .field("parent", &self.parent)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("fds", &self.files.fds())
            .finish()
    }
}
