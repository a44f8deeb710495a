//! File metadata records exchanged between walker, wire and disk writer.

use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Metadata for a single filesystem entry.
///
/// `path` is slash-separated and relative to the walk root. `linkname`
/// carries the symlink target, or for a regular file the path of a
/// previously seen hardlink peer (in which case `size` is zero).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mod_time_ns: i64,
    pub linkname: String,
    pub devmajor: u64,
    pub devminor: u64,
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl Stat {
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == S_IFIFO
    }

    pub fn is_device(&self) -> bool {
        matches!(self.file_type(), S_IFBLK | S_IFCHR)
    }

    /// Regular file, including hardlink records. Only these entries are
    /// assigned transfer ids.
    pub fn is_reg(&self) -> bool {
        self.file_type() == S_IFREG
    }

    /// Regular file whose payload travels on the wire (hardlink records
    /// are materialized with `link(2)` instead).
    pub fn is_hardlink(&self) -> bool {
        self.is_reg() && !self.linkname.is_empty()
    }

    pub fn mod_time_secs(&self) -> i64 {
        self.mod_time_ns.div_euclid(1_000_000_000)
    }

    pub fn mod_time_subsec_nanos(&self) -> u32 {
        self.mod_time_ns.rem_euclid(1_000_000_000) as u32
    }
}

/// Validates a wire-supplied relative path: non-empty, no leading
/// separator, no `.`/`..` components, no backslashes.
pub fn check_rel_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SyncError::invalid_path(path, "empty path"));
    }
    if path.starts_with('/') {
        return Err(SyncError::invalid_path(path, "absolute path"));
    }
    if path.contains('\\') {
        return Err(SyncError::invalid_path(path, "backslash in path"));
    }
    for comp in path.split('/') {
        match comp {
            "" => return Err(SyncError::invalid_path(path, "empty path component")),
            "." | ".." => return Err(SyncError::invalid_path(path, "relative path component")),
            _ => {}
        }
    }
    Ok(())
}

/// Lexically removes `.` and resolves `..` in a slash-separated relative
/// path. Used when chasing symlink targets during follow-path resolution;
/// a target that climbs above the root collapses to the root itself.
pub fn clean_rel_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }
    parts.join("/")
}
