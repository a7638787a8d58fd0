//! Virtual File System
//!
//! The VFS owns the inode arena and the open-file table and is the only way
//! the syscall layer touches the tree. Every operation:
//! - resolves its path(s) from the root, following symlinks up to a fixed
//!   depth and requiring EXEC on each directory walked through
//! - checks permission on the parent directory or the target
//! - delegates to the inode kind through the wrapper layer, which keeps
//!   timestamps current
//!
//! Borrow discipline: the arena and handle table sit in `RefCell`s and no
//! borrow is ever held across an `.await`.

pub mod inode;
mod memory;
pub mod path;
mod procfs;
mod wrapper;

pub use inode::{
    Access, DirKind, FileKind, Inode, InodeAttr, InodeId, InodeKind, InodeType, Stat, SymlinkKind,
    DIR_MODE, FILE_MODE,
};

use crate::error::{KResult, KernelError};
use crate::kernel::ProcessContext;
use crate::kernel::process::{Credentials, OpenFlags};
use crate::kernel::stream::{PollFlag, PollHook};
use crate::kernel::task::Program;
use crate::kernel::timer::Clock;
use serde::Serialize;
use slab::Slab;
use std::cell::{RefCell, RefMut};
use wrapper::{DirRef, FileRef, SymlinkRef, Touch};

/// Index into the open-file table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandleId(pub usize);

/// An open file: shared by every descriptor dup'd or inherited from it
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    pub inode: InodeId,
    pub pos: u64,
    pub flags: OpenFlags,
    /// Descriptors referring to this handle
    pub refs: u32,
}

/// Arena slot
pub(crate) struct Node {
    pub(crate) attr: InodeAttr,
    pub(crate) kind: InodeKind,
    /// Open handles on this inode; keeps unlinked inodes alive
    pub(crate) open_count: u32,
}

/// Result of a path walk
#[derive(Debug, Clone)]
struct Resolved {
    id: InodeId,
    parent: InodeId,
    name: String,
}

pub struct Vfs {
    nodes: RefCell<Slab<Node>>,
    handles: RefCell<Slab<FileHandle>>,
    root: InodeId,
    clock: Clock,
    max_symlink_depth: usize,
    /// Largest size a regular file may grow to
    max_file_size: u64,
}

impl Vfs {
    /// Empty tree: a root directory (0755, root-owned)
    pub fn new(clock: Clock, max_symlink_depth: usize, max_file_size: u64) -> Self {
        let mut nodes = Slab::new();
        let mut attr = InodeAttr::new(0o755);
        attr.stamp(clock.now());
        // The root references itself so it is never reclaimed
        attr.nlink = 1;
        let root = InodeId(nodes.insert(Node {
            attr,
            kind: InodeKind::Dir(DirKind::Memory(Default::default())),
            open_count: 0,
        }));
        Self {
            nodes: RefCell::new(nodes),
            handles: RefCell::new(Slab::new()),
            root,
            clock,
            max_symlink_depth,
            max_file_size,
        }
    }

    pub fn root(&self) -> InodeId {
        self.root
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Live inodes in the arena
    pub fn inode_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Open handles in the table
    pub fn handle_count(&self) -> usize {
        self.handles.borrow().len()
    }

    // ========== Arena access ==========

    pub(crate) fn with_node<R>(&self, id: InodeId, f: impl FnOnce(&Node) -> R) -> KResult<R> {
        let nodes = self.nodes.borrow();
        let node = nodes.get(id.0).ok_or_else(|| dangling(id))?;
        Ok(f(node))
    }

    pub(crate) fn with_node_mut<R>(
        &self,
        id: InodeId,
        f: impl FnOnce(&mut Node) -> R,
    ) -> KResult<R> {
        let mut nodes = self.nodes.borrow_mut();
        let node = nodes.get_mut(id.0).ok_or_else(|| dangling(id))?;
        Ok(f(node))
    }

    pub(crate) fn nodes_mut(&self) -> RefMut<'_, Slab<Node>> {
        self.nodes.borrow_mut()
    }

    /// Put a detached inode into the arena with fresh timestamps
    pub(crate) fn alloc(&self, inode: Inode) -> InodeId {
        let Inode { mut attr, kind } = inode;
        attr.stamp(self.now());
        attr.nlink = 0;
        InodeId(self.nodes.borrow_mut().insert(Node {
            attr,
            kind,
            open_count: 0,
        }))
    }

    /// Drop one directory link to `id`, reclaiming it if nothing is left
    pub(crate) fn drop_link(&self, id: InodeId) {
        let _ = self.with_node_mut(id, |node| node.attr.nlink = node.attr.nlink.saturating_sub(1));
        self.reclaim(id);
    }

    /// Free `id` once it has neither links nor open handles. Directories
    /// take their children down with them.
    pub(crate) fn reclaim(&self, id: InodeId) {
        if id == self.root {
            return;
        }
        let node = {
            let mut nodes = self.nodes.borrow_mut();
            match nodes.get(id.0) {
                Some(node) if node.attr.nlink == 0 && node.open_count == 0 => nodes.remove(id.0),
                _ => return,
            }
        };
        log::trace!("reclaimed inode {} ({:?})", id.0, node.kind);
        if let InodeKind::Dir(dir) = &node.kind {
            for child in dir.children() {
                self.drop_link(child);
            }
        }
    }

    pub fn stat_inode(&self, id: InodeId) -> KResult<Stat> {
        self.with_node(id, |node| Stat {
            ino: id,
            kind: node.kind.file_type(),
            mode: node.attr.mode,
            uid: node.attr.uid,
            gid: node.attr.gid,
            size: node.attr.size,
            nlink: node.attr.nlink,
            atime: node.attr.atime,
            mtime: node.attr.mtime,
            ctime: node.attr.ctime,
            mounted: node.attr.mounted,
        })
    }

    fn is_dir(&self, id: InodeId) -> KResult<bool> {
        self.with_node(id, |node| node.kind.is_dir())
    }

    fn require(&self, id: InodeId, cred: &Credentials, access: Access, what: &str) -> KResult<()> {
        if self.with_node(id, |node| node.attr.permits(cred, access))? {
            Ok(())
        } else {
            Err(KernelError::Access(what.to_string()))
        }
    }

    // ========== Narrowing ==========

    fn as_dir(&self, id: InodeId, what: &str) -> KResult<DirRef<'_>> {
        if self.is_dir(id)? {
            Ok(DirRef::new(self, id))
        } else {
            Err(KernelError::NotDir(what.to_string()))
        }
    }

    fn as_file(&self, id: InodeId, what: &str) -> KResult<FileRef<'_>> {
        self.with_node(id, |node| match node.kind {
            InodeKind::File(_) => Ok(FileRef::new(self, id)),
            InodeKind::Dir(_) => Err(KernelError::IsDir(what.to_string())),
            InodeKind::Symlink(_) => Err(KernelError::Unsupported(what.to_string())),
        })?
    }

    fn as_symlink(&self, id: InodeId, what: &str) -> KResult<SymlinkRef<'_>> {
        self.with_node(id, |node| match node.kind {
            InodeKind::Symlink(_) => Ok(SymlinkRef::new(self, id)),
            _ => Err(KernelError::InvalidArgument(format!("{}: not a symlink", what))),
        })?
    }

    // ========== Path resolution ==========

    /// Walk to the directory holding the last component of `path`.
    /// The root resolves to `(root, "")`.
    fn resolve_parent(
        &self,
        ctx: &ProcessContext,
        cred: &Credentials,
        path: &str,
        depth: usize,
    ) -> KResult<(InodeId, String)> {
        let parts = path::components(path);
        let Some((last, dirs)) = parts.split_last() else {
            return Ok((self.root, String::new()));
        };
        let mut cur = self.root;
        for part in dirs {
            let dir = self.as_dir(cur, path)?;
            self.require(cur, cred, Access::EXEC, path)?;
            let child = dir
                .lookup(ctx, part)?
                .ok_or_else(|| KernelError::NoEntry(path.to_string()))?;
            let child = self.follow(ctx, cred, child, path, depth)?;
            if !self.is_dir(child)? {
                return Err(KernelError::NotDir(path.to_string()));
            }
            cur = child;
        }
        self.as_dir(cur, path)?;
        self.require(cur, cred, Access::EXEC, path)?;
        Ok((cur, last.to_string()))
    }

    /// Expand `id` if it is a symlink
    fn follow(
        &self,
        ctx: &ProcessContext,
        cred: &Credentials,
        id: InodeId,
        path: &str,
        depth: usize,
    ) -> KResult<InodeId> {
        let is_link = self.with_node(id, |node| matches!(node.kind, InodeKind::Symlink(_)))?;
        if !is_link {
            return Ok(id);
        }
        if depth + 1 >= self.max_symlink_depth {
            return Err(KernelError::Loop(path.to_string()));
        }
        let target = SymlinkRef::new(self, id).target(ctx)?;
        Ok(self.resolve(ctx, cred, &target, true, depth + 1)?.id)
    }

    fn resolve(
        &self,
        ctx: &ProcessContext,
        cred: &Credentials,
        path: &str,
        follow_final: bool,
        depth: usize,
    ) -> KResult<Resolved> {
        let (parent, name) = self.resolve_parent(ctx, cred, path, depth)?;
        if name.is_empty() {
            return Ok(Resolved {
                id: self.root,
                parent: self.root,
                name,
            });
        }
        let id = DirRef::new(self, parent)
            .lookup(ctx, &name)?
            .ok_or_else(|| KernelError::NoEntry(path.to_string()))?;
        let id = if follow_final {
            self.follow(ctx, cred, id, path, depth)?
        } else {
            id
        };
        Ok(Resolved { id, parent, name })
    }

    /// Resolve `path` to an inode, following a final symlink
    pub fn lookup(&self, ctx: &ProcessContext, path: &str) -> KResult<InodeId> {
        let cred = ctx.cred()?;
        Ok(self.resolve(ctx, &cred, path, true, 0)?.id)
    }

    // ========== Handles ==========

    pub fn handle(&self, hid: HandleId) -> KResult<FileHandle> {
        self.handles
            .borrow()
            .get(hid.0)
            .cloned()
            .ok_or_else(|| KernelError::BadFd(format!("handle {}", hid.0)))
    }

    /// One more descriptor refers to `hid`
    pub fn retain(&self, hid: HandleId) -> KResult<()> {
        let mut handles = self.handles.borrow_mut();
        let handle = handles
            .get_mut(hid.0)
            .ok_or_else(|| KernelError::BadFd(format!("handle {}", hid.0)))?;
        handle.refs += 1;
        Ok(())
    }

    /// One descriptor fewer. At zero the handle goes away and the inode's
    /// release hook runs. Returns whether that happened.
    pub fn release(&self, ctx: &ProcessContext, hid: HandleId) -> KResult<bool> {
        let released = {
            let mut handles = self.handles.borrow_mut();
            let handle = handles
                .get_mut(hid.0)
                .ok_or_else(|| KernelError::BadFd(format!("handle {}", hid.0)))?;
            handle.refs = handle.refs.saturating_sub(1);
            if handle.refs > 0 {
                return Ok(false);
            }
            handles.remove(hid.0)
        };
        let id = released.inode;
        let hook = self.with_node_mut(id, |node| {
            node.open_count = node.open_count.saturating_sub(1);
            FileRef::release_hook(&node.kind)
        })?;
        hook.run(ctx, hid);
        self.reclaim(id);
        Ok(true)
    }

    fn open_node(&self, ctx: &ProcessContext, id: InodeId, flags: OpenFlags) -> KResult<HandleId> {
        let hid = HandleId(self.handles.borrow_mut().insert(FileHandle {
            inode: id,
            pos: 0,
            flags,
            refs: 1,
        }));
        self.with_node_mut(id, |node| node.open_count += 1)?;
        if let Err(e) = FileRef::new(self, id).open_hook(ctx, hid) {
            self.handles.borrow_mut().remove(hid.0);
            let _ = self.with_node_mut(id, |node| node.open_count -= 1);
            self.reclaim(id);
            return Err(e);
        }
        Ok(hid)
    }

    fn set_pos(&self, hid: HandleId, pos: u64) {
        if let Some(handle) = self.handles.borrow_mut().get_mut(hid.0) {
            handle.pos = pos;
        }
    }

    // ========== File operations ==========

    /// Open `path`. With `CREAT`, a missing file is created owned by the
    /// caller with `mode & !umask`; an existing one keeps its mode.
    pub fn open(
        &self,
        ctx: &ProcessContext,
        path: &str,
        flags: OpenFlags,
        mode: Option<u32>,
    ) -> KResult<HandleId> {
        let cred = ctx.cred()?;
        let mut created = false;
        let id = if flags.contains(OpenFlags::CREAT) {
            let (parent, name) = self.resolve_parent(ctx, &cred, path, 0)?;
            if name.is_empty() {
                self.root
            } else {
                let dir = DirRef::new(self, parent);
                match dir.lookup(ctx, &name)? {
                    Some(id) => self.follow(ctx, &cred, id, path, 0)?,
                    None => {
                        self.require(parent, &cred, Access::WRITE, path)?;
                        let mode = mode.unwrap_or(FILE_MODE) & !cred.umask;
                        let inode =
                            Inode::file(mode, Vec::new()).owned_by(cred.uid, cred.primary_gid());
                        created = true;
                        dir.create(&name, inode, path)?
                    }
                }
            }
        } else {
            self.resolve(ctx, &cred, path, true, 0)?.id
        };

        let is_dir = self.is_dir(id)?;
        if is_dir && !flags.contains(OpenFlags::DIR) {
            return Err(KernelError::IsDir(path.to_string()));
        }
        if !is_dir && flags.contains(OpenFlags::DIR) {
            return Err(KernelError::NotDir(path.to_string()));
        }
        if !created {
            self.require(id, &cred, access_for(flags), path)?;
        }
        if !is_dir && flags.contains(OpenFlags::TRUNC | OpenFlags::WRITE) {
            let file = FileRef::new(self, id);
            if file.is_regular()? {
                file.set_size(0)?;
            }
        }
        self.open_node(ctx, id, flags)
    }

    /// Open a detached inode that lives only as long as its handles
    pub fn open_anonymous(
        &self,
        ctx: &ProcessContext,
        inode: Inode,
        flags: OpenFlags,
    ) -> KResult<HandleId> {
        let id = self.alloc(inode);
        self.open_node(ctx, id, flags)
    }

    pub async fn read(&self, ctx: &ProcessContext, hid: HandleId, size: usize) -> KResult<Vec<u8>> {
        let handle = self.handle(hid)?;
        if !handle.flags.contains(OpenFlags::READ) {
            return Err(KernelError::BadFd("not open for reading".into()));
        }
        let what = format!("inode {}", handle.inode.0);
        let cred = ctx.cred()?;
        self.require(handle.inode, &cred, Access::READ, &what)?;
        let data = self
            .as_file(handle.inode, &what)?
            .read(ctx, hid, handle.pos, size)
            .await?;
        self.set_pos(hid, handle.pos + data.len() as u64);
        Ok(data)
    }

    pub async fn write(&self, ctx: &ProcessContext, hid: HandleId, data: &[u8]) -> KResult<usize> {
        let handle = self.handle(hid)?;
        if !handle.flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::BadFd("not open for writing".into()));
        }
        let what = format!("inode {}", handle.inode.0);
        let cred = ctx.cred()?;
        self.require(handle.inode, &cred, Access::WRITE, &what)?;
        let pos = if handle.flags.contains(OpenFlags::APPEND) {
            self.with_node(handle.inode, |node| node.attr.size)?
        } else {
            handle.pos
        };
        let written = self
            .as_file(handle.inode, &what)?
            .write(ctx, hid, pos, data)
            .await?;
        self.set_pos(hid, pos + written as u64);
        Ok(written)
    }

    /// Entry names of an open directory
    pub fn list(&self, ctx: &ProcessContext, hid: HandleId) -> KResult<Vec<String>> {
        let handle = self.handle(hid)?;
        if !handle.flags.contains(OpenFlags::READ | OpenFlags::DIR) {
            return Err(KernelError::BadFd("not open as a readable directory".into()));
        }
        let what = format!("inode {}", handle.inode.0);
        let cred = ctx.cred()?;
        self.require(handle.inode, &cred, Access::READ, &what)?;
        self.as_dir(handle.inode, &what)?.list(ctx)
    }

    /// Register `on_ready` for readiness of an open file
    pub fn poll(
        &self,
        hid: HandleId,
        flag: PollFlag,
        on_ready: PollHook,
    ) -> KResult<bool> {
        let handle = self.handle(hid)?;
        let what = format!("inode {}", handle.inode.0);
        self.as_file(handle.inode, &what)?.poll(hid, flag, on_ready)
    }

    // ========== Path operations ==========

    pub fn stat(&self, ctx: &ProcessContext, path: &str) -> KResult<Stat> {
        let cred = ctx.cred()?;
        self.stat_inode(self.resolve(ctx, &cred, path, true, 0)?.id)
    }

    /// Like `stat` but a final symlink is reported, not followed
    pub fn lstat(&self, ctx: &ProcessContext, path: &str) -> KResult<Stat> {
        let cred = ctx.cred()?;
        self.stat_inode(self.resolve(ctx, &cred, path, false, 0)?.id)
    }

    pub fn readlink(&self, ctx: &ProcessContext, path: &str) -> KResult<String> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, false, 0)?.id;
        self.as_symlink(id, path)?.target(ctx)
    }

    /// Owner or root only
    pub fn chmod(&self, ctx: &ProcessContext, path: &str, mode: u32) -> KResult<()> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, true, 0)?.id;
        let owner = self.with_node(id, |node| node.attr.uid)?;
        if cred.uid != 0 && cred.uid != owner {
            return Err(KernelError::Perm(path.to_string()));
        }
        self.with_node_mut(id, |node| node.attr.mode = mode & 0o7777)?;
        self.touch(id, Touch::Change);
        Ok(())
    }

    /// Root only
    pub fn chown(&self, ctx: &ProcessContext, path: &str, uid: u32, gid: u32) -> KResult<()> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, true, 0)?.id;
        if cred.uid != 0 {
            return Err(KernelError::Perm(path.to_string()));
        }
        self.with_node_mut(id, |node| {
            node.attr.uid = uid;
            node.attr.gid = gid;
        })?;
        self.touch(id, Touch::Change);
        Ok(())
    }

    /// Create or truncate a regular file
    pub fn creat(&self, ctx: &ProcessContext, path: &str, mode: Option<u32>) -> KResult<()> {
        let flags = OpenFlags::CREAT | OpenFlags::WRITE | OpenFlags::TRUNC;
        let hid = self.open(ctx, path, flags, mode)?;
        self.release(ctx, hid)?;
        Ok(())
    }

    /// Hard link: `new_path` becomes another name for `existing`
    pub fn link(&self, ctx: &ProcessContext, new_path: &str, existing: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let source = self.resolve(ctx, &cred, existing, true, 0)?.id;
        if self.is_dir(source)? {
            return Err(KernelError::IsDir(existing.to_string()));
        }
        self.require(source, &cred, Access::READ, existing)?;
        let (parent, name) = self.resolve_parent(ctx, &cred, new_path, 0)?;
        if name.is_empty() {
            return Err(KernelError::Exists(new_path.to_string()));
        }
        self.require(parent, &cred, Access::WRITE, new_path)?;
        DirRef::new(self, parent).link(ctx, &name, source, new_path)
    }

    /// Create a symlink at `link_path` pointing to `target`
    pub fn symlink(&self, ctx: &ProcessContext, link_path: &str, target: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let (parent, name) = self.resolve_parent(ctx, &cred, link_path, 0)?;
        if name.is_empty() {
            return Err(KernelError::Exists(link_path.to_string()));
        }
        self.require(parent, &cred, Access::WRITE, link_path)?;
        let inode = Inode::symlink(target).owned_by(cred.uid, cred.primary_gid());
        DirRef::new(self, parent).create(&name, inode, link_path)?;
        Ok(())
    }

    /// Remove a non-directory name
    pub fn unlink(&self, ctx: &ProcessContext, path: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let target = self.resolve(ctx, &cred, path, false, 0)?;
        if target.name.is_empty() || self.is_dir(target.id)? {
            return Err(KernelError::IsDir(path.to_string()));
        }
        self.require(target.parent, &cred, Access::WRITE, path)?;
        let id = DirRef::new(self, target.parent).unlink(&target.name, path)?;
        self.reclaim(id);
        Ok(())
    }

    pub fn mkdir(&self, ctx: &ProcessContext, path: &str, mode: Option<u32>) -> KResult<()> {
        let cred = ctx.cred()?;
        let (parent, name) = self.resolve_parent(ctx, &cred, path, 0)?;
        if name.is_empty() {
            return Err(KernelError::Exists(path.to_string()));
        }
        self.require(parent, &cred, Access::WRITE, path)?;
        let mode = mode.unwrap_or(DIR_MODE) & !cred.umask;
        let inode = Inode::directory(mode).owned_by(cred.uid, cred.primary_gid());
        DirRef::new(self, parent).create(&name, inode, path)?;
        Ok(())
    }

    /// Remove an empty in-memory directory
    pub fn rmdir(&self, ctx: &ProcessContext, path: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let target = self.resolve(ctx, &cred, path, false, 0)?;
        if target.name.is_empty() {
            return Err(KernelError::Perm(path.to_string()));
        }
        let dir = self.as_dir(target.id, path)?;
        if !dir.is_empty()? {
            return Err(KernelError::NotEmpty(path.to_string()));
        }
        self.require(target.parent, &cred, Access::WRITE, path)?;
        let id = DirRef::new(self, target.parent).unlink(&target.name, path)?;
        self.reclaim(id);
        Ok(())
    }

    /// Move the entry at `from` to `to`. Fails with EEXIST if `to` is
    /// taken; nothing changes unless the whole move succeeds.
    pub fn rename(&self, ctx: &ProcessContext, from: &str, to: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let source = self.resolve(ctx, &cred, from, false, 0)?;
        if source.name.is_empty() {
            return Err(KernelError::InvalidArgument(format!("cannot rename {}", from)));
        }
        let (to_parent, to_name) = self.resolve_parent(ctx, &cred, to, 0)?;
        if to_name.is_empty() {
            return Err(KernelError::Exists(to.to_string()));
        }
        if to_parent == source.parent && to_name == source.name {
            return Ok(());
        }
        self.require(source.parent, &cred, Access::WRITE, from)?;
        self.require(source.id, &cred, Access::WRITE, from)?;
        self.require(to_parent, &cred, Access::WRITE, to)?;
        let dest = DirRef::new(self, to_parent);
        if dest.lookup(ctx, &to_name)?.is_some() {
            return Err(KernelError::Exists(to.to_string()));
        }
        if self.is_dir(source.id)? && memory::contains(self, source.id, to_parent) {
            return Err(KernelError::InvalidArgument(format!(
                "cannot move {} into itself",
                from
            )));
        }
        DirRef::new(self, source.parent).relink(&source.name, &dest, &to_name, from)
    }

    pub fn truncate(&self, ctx: &ProcessContext, path: &str, len: u64) -> KResult<()> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, true, 0)?.id;
        let file = self.as_file(id, path)?;
        self.require(id, &cred, Access::WRITE, path)?;
        file.set_size(len)
    }

    /// Attach a detached inode at `path`, marked as a mount
    pub fn mount(&self, ctx: &ProcessContext, path: &str, mut inode: Inode) -> KResult<InodeId> {
        inode.attr.mounted = true;
        self.install(ctx, path, inode)
    }

    /// Detach a mounted inode
    pub fn unmount(&self, ctx: &ProcessContext, path: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let target = self.resolve(ctx, &cred, path, false, 0)?;
        let mounted = self.with_node(target.id, |node| node.attr.mounted)?;
        if target.name.is_empty() || !mounted {
            return Err(KernelError::NotMounted(path.to_string()));
        }
        self.require(target.parent, &cred, Access::WRITE, path)?;
        let id = DirRef::new(self, target.parent).unlink(&target.name, path)?;
        self.reclaim(id);
        Ok(())
    }

    /// Attach a detached inode at `path` as an ordinary entry
    pub fn install(&self, ctx: &ProcessContext, path: &str, inode: Inode) -> KResult<InodeId> {
        let cred = ctx.cred()?;
        let (parent, name) = self.resolve_parent(ctx, &cred, path, 0)?;
        if name.is_empty() {
            return Err(KernelError::Exists(path.to_string()));
        }
        self.require(parent, &cred, Access::WRITE, path)?;
        DirRef::new(self, parent).create(&name, inode, path)
    }

    /// The program behind an executable file the caller may run
    pub fn lookup_executable(&self, ctx: &ProcessContext, path: &str) -> KResult<Program> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, true, 0)?.id;
        let program = self.with_node(id, |node| match &node.kind {
            InodeKind::File(FileKind::Executable(program)) => Some(program.clone()),
            _ => None,
        })?;
        let program = program.ok_or_else(|| KernelError::Access(path.to_string()))?;
        self.require(id, &cred, Access::EXEC, path)?;
        self.touch(id, Touch::Access);
        Ok(program)
    }

    /// Check that `path` is a directory the caller may enter
    pub fn chdir_target(&self, ctx: &ProcessContext, path: &str) -> KResult<()> {
        let cred = ctx.cred()?;
        let id = self.resolve(ctx, &cred, path, true, 0)?.id;
        self.as_dir(id, path)?;
        self.require(id, &cred, Access::EXEC, path)
    }

    fn touch(&self, id: InodeId, touch: Touch) {
        let now = self.now();
        let _ = self.with_node_mut(id, |node| touch.apply(&mut node.attr, now));
    }
}

fn access_for(flags: OpenFlags) -> Access {
    let mut access = Access::empty();
    if flags.contains(OpenFlags::READ) {
        access |= Access::READ;
    }
    if flags.contains(OpenFlags::WRITE) {
        access |= Access::WRITE;
    }
    access
}

fn dangling(id: InodeId) -> KernelError {
    KernelError::Internal(format!("dangling inode {}", id.0))
}
