//! Inodes
//!
//! Every filesystem object is one of three capability variants (file,
//! directory, symlink) with a concrete kind underneath. Inodes live in the
//! VFS arena and are addressed by [`InodeId`]; directories store ids, never
//! owning pointers, and each inode carries an explicit link count.

use crate::kernel::process::{Credentials, Fd, Pid};
use crate::kernel::pty::{Ptmx, PtySlave};
use crate::kernel::stream::Stream;
use crate::kernel::task::Program;
use bitflags::bitflags;
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;

/// Default creation mode for files, before umask
pub const FILE_MODE: u32 = 0o666;
/// Default creation mode for directories, before umask
pub const DIR_MODE: u32 = 0o777;

/// Stable arena index of an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InodeId(pub usize);

bitflags! {
    /// Requested access, in rwx bit order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ = 4;
        const WRITE = 2;
        const EXEC = 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InodeAttr {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: f64,
    pub mtime: f64,
    pub ctime: f64,
    /// Attached with `mount` rather than created in place
    pub mounted: bool,
}

impl InodeAttr {
    pub fn new(mode: u32) -> Self {
        Self {
            size: 0,
            mode: mode & 0o7777,
            uid: 0,
            gid: 0,
            nlink: 0,
            atime: 0.0,
            mtime: 0.0,
            ctime: 0.0,
            mounted: false,
        }
    }

    /// Owner/group/other check. Root always passes; every requested bit
    /// must be granted by the one triad that applies to the caller.
    pub fn permits(&self, cred: &Credentials, access: Access) -> bool {
        if cred.uid == 0 {
            return true;
        }
        let shift = if cred.uid == self.uid {
            6
        } else if cred.gids.contains(&self.gid) {
            3
        } else {
            0
        };
        let granted = (self.mode >> shift) & 0o7;
        granted & access.bits() == access.bits()
    }

    pub(crate) fn stamp(&mut self, now: f64) {
        self.atime = now;
        self.mtime = now;
        self.ctime = now;
    }
}

/// File kinds
pub enum FileKind {
    /// Plain in-memory bytes
    Regular(Vec<u8>),
    /// Program image; spawning it runs the program
    Executable(Program),
    /// Both ends of a pipe, or a console slot
    Stream(Stream),
    /// `/dev/ptmx`
    PtyMaster(Rc<Ptmx>),
    /// `/dev/pts/<n>`
    PtySlave(PtySlave),
    /// `/proc/<pid>/fd/<n>`: I/O goes through that process's descriptor
    ProcFd { pid: Pid, fd: Fd },
}

/// Directory kinds
pub enum DirKind {
    Memory(HashMap<String, InodeId>),
    /// `/proc`: cached per-pid directories plus `self`
    Proc {
        pids: HashMap<Pid, InodeId>,
        self_link: Option<InodeId>,
    },
    /// `/proc/<pid>`
    ProcPid { pid: Pid, fd_dir: Option<InodeId> },
    /// `/proc/<pid>/fd`
    ProcFdDir {
        pid: Pid,
        entries: HashMap<Fd, InodeId>,
    },
}

impl DirKind {
    /// Ids this directory holds links to
    pub(crate) fn children(&self) -> Vec<InodeId> {
        match self {
            DirKind::Memory(map) => map.values().copied().collect(),
            DirKind::Proc { pids, self_link } => {
                pids.values().copied().chain(self_link.iter().copied()).collect()
            }
            DirKind::ProcPid { fd_dir, .. } => fd_dir.iter().copied().collect(),
            DirKind::ProcFdDir { entries, .. } => entries.values().copied().collect(),
        }
    }
}

/// Symlink kinds
pub enum SymlinkKind {
    Target(String),
    /// `/proc/self`, pointing at the reader's own pid directory
    ProcSelf,
}

pub enum InodeKind {
    File(FileKind),
    Dir(DirKind),
    Symlink(SymlinkKind),
}

impl InodeKind {
    pub fn file_type(&self) -> InodeType {
        match self {
            InodeKind::File(_) => InodeType::File,
            InodeKind::Dir(_) => InodeType::Directory,
            InodeKind::Symlink(_) => InodeType::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, InodeKind::Dir(_))
    }
}

impl std::fmt::Debug for InodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InodeKind::File(FileKind::Regular(_)) => "Regular",
            InodeKind::File(FileKind::Executable(_)) => "Executable",
            InodeKind::File(FileKind::Stream(_)) => "Stream",
            InodeKind::File(FileKind::PtyMaster(_)) => "PtyMaster",
            InodeKind::File(FileKind::PtySlave(_)) => "PtySlave",
            InodeKind::File(FileKind::ProcFd { .. }) => "ProcFd",
            InodeKind::Dir(DirKind::Memory(_)) => "Directory",
            InodeKind::Dir(DirKind::Proc { .. }) => "ProcDir",
            InodeKind::Dir(DirKind::ProcPid { .. }) => "ProcPidDir",
            InodeKind::Dir(DirKind::ProcFdDir { .. }) => "ProcFdDir",
            InodeKind::Symlink(SymlinkKind::Target(_)) => "Symlink",
            InodeKind::Symlink(SymlinkKind::ProcSelf) => "ProcSelf",
        };
        f.write_str(name)
    }
}

/// A detached inode, ready to be installed or mounted into the tree
#[derive(Debug)]
pub struct Inode {
    pub attr: InodeAttr,
    pub kind: InodeKind,
}

impl Inode {
    pub fn new(mode: u32, kind: InodeKind) -> Self {
        Self {
            attr: InodeAttr::new(mode),
            kind,
        }
    }

    pub fn file(mode: u32, data: Vec<u8>) -> Self {
        let mut inode = Self::new(mode, InodeKind::File(FileKind::Regular(Vec::new())));
        inode.attr.size = data.len() as u64;
        inode.kind = InodeKind::File(FileKind::Regular(data));
        inode
    }

    pub fn directory(mode: u32) -> Self {
        Self::new(mode, InodeKind::Dir(DirKind::Memory(HashMap::new())))
    }

    pub fn symlink(target: &str) -> Self {
        let mut inode = Self::new(
            0o777,
            InodeKind::Symlink(SymlinkKind::Target(target.to_string())),
        );
        inode.attr.size = target.len() as u64;
        inode
    }

    pub fn executable(mode: u32, program: Program) -> Self {
        Self::new(mode, InodeKind::File(FileKind::Executable(program)))
    }

    pub fn stream(mode: u32, stream: Stream) -> Self {
        Self::new(mode, InodeKind::File(FileKind::Stream(stream)))
    }

    /// The `/proc` root
    pub fn proc_root() -> Self {
        Self::new(
            0o555,
            InodeKind::Dir(DirKind::Proc {
                pids: HashMap::new(),
                self_link: None,
            }),
        )
    }

    /// A fresh PTY multiplexer for `/dev/ptmx`
    pub fn ptmx() -> Self {
        Self::new(0o666, InodeKind::File(FileKind::PtyMaster(Rc::new(Ptmx::new()))))
    }

    pub fn owned_by(mut self, uid: u32, gid: u32) -> Self {
        self.attr.uid = uid;
        self.attr.gid = gid;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeType {
    File,
    Directory,
    Symlink,
}

/// Snapshot returned by `stat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stat {
    pub ino: InodeId,
    pub kind: InodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime: f64,
    pub mtime: f64,
    pub ctime: f64,
    pub mounted: bool,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.kind == InodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == InodeType::File
    }

    /// `ls -l` style permission string, e.g. `drwxr-xr-x`
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(match self.kind {
            InodeType::File => '-',
            InodeType::Directory => 'd',
            InodeType::Symlink => 'l',
        });
        for shift in [6, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 4 != 0 { 'r' } else { '-' });
            out.push(if bits & 2 != 0 { 'w' } else { '-' });
            out.push(if bits & 1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: u32, gids: &[u32]) -> Credentials {
        Credentials {
            uid,
            gids: gids.to_vec(),
            umask: 0o022,
        }
    }

    #[test]
    fn test_root_always_permitted() {
        let attr = InodeAttr::new(0o000);
        assert!(attr.permits(&Credentials::root(0o022), Access::READ | Access::WRITE));
    }

    #[test]
    fn test_owner_group_other_triads() {
        let mut attr = InodeAttr::new(0o640);
        attr.uid = 1000;
        attr.gid = 100;

        assert!(attr.permits(&user(1000, &[1000]), Access::READ | Access::WRITE));
        assert!(attr.permits(&user(1001, &[5, 100]), Access::READ));
        assert!(!attr.permits(&user(1001, &[100]), Access::WRITE));
        assert!(!attr.permits(&user(1002, &[7]), Access::READ));
    }

    #[test]
    fn test_owner_triad_wins_over_group() {
        // Owner bits apply even when they are stricter than the group's
        let mut attr = InodeAttr::new(0o070);
        attr.uid = 1000;
        attr.gid = 100;
        assert!(!attr.permits(&user(1000, &[100]), Access::READ));
    }

    #[test]
    fn test_all_requested_bits_needed() {
        let mut attr = InodeAttr::new(0o500);
        attr.uid = 1;
        assert!(attr.permits(&user(1, &[1]), Access::READ | Access::EXEC));
        assert!(!attr.permits(&user(1, &[1]), Access::READ | Access::WRITE));
    }

    #[test]
    fn test_mode_string() {
        let stat = Stat {
            ino: InodeId(0),
            kind: InodeType::Directory,
            mode: 0o755,
            uid: 0,
            gid: 0,
            size: 0,
            nlink: 1,
            atime: 0.0,
            mtime: 0.0,
            ctime: 0.0,
            mounted: false,
        };
        assert_eq!(stat.mode_string(), "drwxr-xr-x");
    }

    #[test]
    fn test_stat_serializes() {
        let inode = Inode::symlink("/usr/bin");
        assert_eq!(inode.attr.size, 8);
        let json = serde_json::to_string(&InodeType::Symlink).unwrap();
        assert_eq!(json, "\"symlink\"");
    }
}
