//! In-memory inode kinds
//!
//! Raw operations on plain directories and regular files. Nothing here
//! checks permissions or touches timestamps; the wrapper layer does that.

use super::{DirKind, FileKind, InodeId, InodeKind, Node, Vfs};
use crate::error::{KResult, KernelError};
use slab::Slab;
use std::collections::HashMap;

fn memory_dir<'a>(
    nodes: &'a mut Slab<Node>,
    dir: InodeId,
    what: &str,
) -> KResult<&'a mut HashMap<String, InodeId>> {
    let node = nodes
        .get_mut(dir.0)
        .ok_or_else(|| KernelError::Internal(format!("dangling inode {}", dir.0)))?;
    match &mut node.kind {
        InodeKind::Dir(DirKind::Memory(entries)) => Ok(entries),
        InodeKind::Dir(_) => Err(KernelError::Unsupported(what.to_string())),
        _ => Err(KernelError::NotDir(what.to_string())),
    }
}

/// Whether `dir` accepts new entries
pub(super) fn is_memory_dir(vfs: &Vfs, dir: InodeId) -> KResult<bool> {
    vfs.with_node(dir, |node| {
        matches!(node.kind, InodeKind::Dir(DirKind::Memory(_)))
    })
}

/// Add `name -> child`, taking a link on `child`
pub(super) fn insert_entry(
    vfs: &Vfs,
    dir: InodeId,
    name: &str,
    child: InodeId,
    what: &str,
) -> KResult<()> {
    let mut nodes = vfs.nodes_mut();
    let entries = memory_dir(&mut nodes, dir, what)?;
    if entries.contains_key(name) {
        return Err(KernelError::Exists(what.to_string()));
    }
    entries.insert(name.to_string(), child);
    let child = nodes
        .get_mut(child.0)
        .ok_or_else(|| KernelError::Internal(format!("dangling inode {}", child.0)))?;
    child.attr.nlink += 1;
    Ok(())
}

/// Drop `name`, releasing its link. The caller reclaims the inode.
pub(super) fn remove_entry(vfs: &Vfs, dir: InodeId, name: &str, what: &str) -> KResult<InodeId> {
    let mut nodes = vfs.nodes_mut();
    let entries = memory_dir(&mut nodes, dir, what)?;
    let child = entries
        .remove(name)
        .ok_or_else(|| KernelError::NoEntry(what.to_string()))?;
    if let Some(node) = nodes.get_mut(child.0) {
        node.attr.nlink = node.attr.nlink.saturating_sub(1);
    }
    Ok(child)
}

pub(super) fn entry(entries: &HashMap<String, InodeId>, name: &str) -> Option<InodeId> {
    entries.get(name).copied()
}

/// Entry names, sorted
pub(super) fn names(entries: &HashMap<String, InodeId>) -> Vec<String> {
    let mut names: Vec<String> = entries.keys().cloned().collect();
    names.sort();
    names
}

/// Whether `target` is `ancestor` or sits somewhere below it
pub(super) fn contains(vfs: &Vfs, ancestor: InodeId, target: InodeId) -> bool {
    let mut stack = vec![ancestor];
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        let children = vfs.with_node(id, |node| match &node.kind {
            InodeKind::Dir(DirKind::Memory(entries)) => entries.values().copied().collect(),
            _ => Vec::new(),
        });
        stack.extend(children.unwrap_or_default());
    }
    false
}

// ========== Regular files ==========

pub(super) fn read_at(data: &[u8], pos: u64, size: usize) -> Vec<u8> {
    let start = (pos as usize).min(data.len());
    let end = start.saturating_add(size).min(data.len());
    data[start..end].to_vec()
}

/// Size a write or truncate would leave the file at, if `limit` allows it
fn checked_end(end: Option<u64>, limit: u64) -> KResult<usize> {
    end.filter(|&end| end <= limit)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(|| KernelError::TooLarge(format!("limit is {} bytes", limit)))
}

/// Write at `pos`, zero-filling any gap past the end
pub(super) fn write_at(data: &mut Vec<u8>, pos: u64, bytes: &[u8], limit: u64) -> KResult<usize> {
    let end = checked_end(pos.checked_add(bytes.len() as u64), limit)?;
    let start = end - bytes.len();
    if data.len() < end {
        data.resize(end, 0);
    }
    data[start..end].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Grow or shrink the contents of a regular file node
pub(super) fn resize(node: &mut Node, len: u64, limit: u64) -> KResult<()> {
    match &mut node.kind {
        InodeKind::File(FileKind::Regular(data)) => {
            data.resize(checked_end(Some(len), limit)?, 0);
            node.attr.size = len;
            Ok(())
        }
        _ => Err(KernelError::Unsupported("truncate".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::InodeAttr;

    #[test]
    fn test_read_at_bounds() {
        let data = b"hello world";
        assert_eq!(read_at(data, 6, 64), b"world");
        assert_eq!(read_at(data, 0, 5), b"hello");
        assert!(read_at(data, 100, 4).is_empty());
    }

    #[test]
    fn test_write_at_fills_gap() {
        let mut data = b"ab".to_vec();
        assert_eq!(write_at(&mut data, 4, b"z", 64), Ok(1));
        assert_eq!(data, b"ab\0\0z");

        assert_eq!(write_at(&mut data, 0, b"AB", 64), Ok(2));
        assert_eq!(data, b"AB\0\0z");
    }

    #[test]
    fn test_size_limit() {
        let mut data = Vec::new();
        assert_eq!(write_at(&mut data, 0, b"abcd", 4), Ok(4));
        let err = write_at(&mut data, 4, b"e", 4).unwrap_err();
        assert_eq!(err.code(), "EFBIG");
        let err = write_at(&mut data, u64::MAX, b"e", u64::MAX).unwrap_err();
        assert_eq!(err.code(), "EFBIG");
        assert_eq!(data, b"abcd");

        let mut node = Node {
            attr: InodeAttr::new(0o644),
            kind: InodeKind::File(FileKind::Regular(data)),
            open_count: 0,
        };
        assert_eq!(resize(&mut node, u64::MAX, 1024).unwrap_err().code(), "EFBIG");
        assert_eq!(node.attr.size, 0);
        resize(&mut node, 2, 1024).unwrap();
        assert_eq!(node.attr.size, 2);
    }

    #[test]
    fn test_names_sorted() {
        let mut entries = HashMap::new();
        entries.insert("b".to_string(), InodeId(2));
        entries.insert("a".to_string(), InodeId(1));
        assert_eq!(names(&entries), vec!["a", "b"]);
        assert_eq!(entry(&entries, "a"), Some(InodeId(1)));
        assert_eq!(entry(&entries, "c"), None);
    }
}
