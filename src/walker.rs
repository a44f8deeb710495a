//! Ordered, filtered directory walker.
//!
//! Produces one [`Stat`] per surviving entry in depth-first order with
//! siblings sorted by byte value. The walk order is the canonical order
//! the diff engine relies on. The root itself is never reported.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::matcher::{ExcludeSet, Pattern};
use crate::stat::{clean_rel_path, Stat, S_IFBLK, S_IFCHR, S_IFLNK, S_IFMT, S_IFREG};

/// Per-entry filter callback: may rewrite the stat (typically the path)
/// or drop the entry by returning `false`.
pub type MapFn = Arc<dyn Fn(&mut Stat) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct WalkOpt {
    /// Entries are retained iff they match at least one pattern (or are
    /// an ancestor needed to reach a match). Empty means everything.
    pub include_patterns: Vec<String>,
    /// Gitignore-style exclusions; a leading `!` re-includes.
    pub exclude_patterns: Vec<String>,
    /// Symlinks whose targets are pre-resolved into the include set.
    pub follow_paths: Vec<String>,
    pub map: Option<MapFn>,
}

struct DirFrame {
    fs_path: PathBuf,
    rel: String,
    entries: Vec<OsString>,
    idx: usize,
    /// This directory (or an ancestor) fully matched an include pattern,
    /// so everything below is retained.
    include_matched: bool,
    /// Directory stat not yet reported; emitted lazily when a descendant
    /// survives the filters.
    pending: Option<Stat>,
}

impl DirFrame {
    fn open(fs_path: PathBuf, rel: String, include_matched: bool, pending: Option<Stat>) -> Result<Self> {
        let mut entries = Vec::new();
        let iter = fs::read_dir(&fs_path)
            .map_err(|e| SyncError::io("failed to read dir", fs_path.clone(), e))?;
        for entry in iter {
            let entry =
                entry.map_err(|e| SyncError::io("failed to read dir entry", fs_path.clone(), e))?;
            entries.push(entry.file_name());
        }
        entries.sort();
        Ok(Self {
            fs_path,
            rel,
            entries,
            idx: 0,
            include_matched,
            pending,
        })
    }

    fn next_name(&mut self) -> Option<OsString> {
        let name = self.entries.get(self.idx)?.clone();
        self.idx += 1;
        Some(name)
    }
}

/// Walks `root`, invoking `visitor` once per surviving entry.
pub fn walk<F>(root: &Path, opt: &WalkOpt, cancel: &CancellationToken, visitor: &mut F) -> Result<()>
where
    F: FnMut(&Stat) -> Result<()>,
{
    let root = fs::canonicalize(root)
        .map_err(|e| SyncError::io("failed to resolve walk root", root.to_path_buf(), e))?;
    let meta = fs::metadata(&root)
        .map_err(|e| SyncError::io("failed to stat walk root", root.clone(), e))?;
    if !meta.is_dir() {
        return Err(SyncError::NotDirectory(root));
    }

    let includes = build_includes(&root, opt)?;
    let excludes = ExcludeSet::new(&opt.exclude_patterns)?;

    let mut stack = vec![DirFrame::open(root, String::new(), false, None)?];
    // First path seen per (device, inode) for entries with nlink > 1.
    let mut hardlinks: HashMap<(u64, u64), String> = HashMap::new();

    while let Some(frame) = stack.last_mut() {
        let name = match frame.next_name() {
            Some(name) => name,
            None => {
                stack.pop();
                continue;
            }
        };
        if cancel.is_cancelled() {
            return Err(SyncError::Canceled);
        }

        let rel = if frame.rel.is_empty() {
            name.to_string_lossy().into_owned()
        } else {
            format!("{}/{}", frame.rel, name.to_string_lossy())
        };
        let full = frame.fs_path.join(&name);
        let parent_matched = frame.include_matched;

        let meta = fs::symlink_metadata(&full)
            .map_err(|e| SyncError::io("failed to stat", full.clone(), e))?;
        let is_dir = meta.file_type().is_dir();

        let (inc_matched, inc_partial) = match (&includes, parent_matched) {
            (_, true) => (true, false),
            (None, _) => (true, false),
            (Some(patterns), _) => {
                let mut matched = false;
                let mut partial = false;
                for pattern in patterns {
                    let (m, p) = pattern.matches(&rel);
                    matched |= m;
                    partial |= p;
                }
                (matched, partial)
            }
        };

        let mut excluded = false;
        if !excludes.is_empty() {
            excluded = excludes.excluded(&rel);
            if excluded {
                if !is_dir {
                    continue;
                }
                if excludes.prunable(&rel) {
                    continue;
                }
            }
        }

        if !is_dir {
            if !inc_matched {
                continue;
            }
        } else if !inc_matched && !inc_partial {
            continue;
        }

        let mut stat = stat_from_metadata(&rel, &meta, &full)?;
        let mut emit = inc_matched && !excluded;
        let mut map_dropped = false;
        if let Some(map) = &opt.map {
            if !map(&mut stat) {
                emit = false;
                map_dropped = true;
            }
        }
        if emit && stat.file_type() == S_IFREG && meta.nlink() > 1 {
            let key = (meta.dev(), meta.ino());
            match hardlinks.get(&key) {
                Some(first) => {
                    stat.linkname = first.clone();
                    stat.size = 0;
                }
                None => {
                    hardlinks.insert(key, stat.path.clone());
                }
            }
        }

        if is_dir {
            let pending = if emit {
                flush_pending(&mut stack, visitor)?;
                visitor(&stat)?;
                None
            } else if map_dropped {
                // Dropped entries never surface, even as parents.
                None
            } else {
                // Held back; surfaces only if a descendant is emitted.
                Some(stat)
            };
            let child = DirFrame::open(full, rel, inc_matched, pending)?;
            stack.push(child);
        } else if emit {
            flush_pending(&mut stack, visitor)?;
            visitor(&stat)?;
        }
    }

    Ok(())
}

fn flush_pending<F>(stack: &mut [DirFrame], visitor: &mut F) -> Result<()>
where
    F: FnMut(&Stat) -> Result<()>,
{
    for frame in stack.iter_mut() {
        if let Some(stat) = frame.pending.take() {
            visitor(&stat)?;
        }
    }
    Ok(())
}

fn build_includes(root: &Path, opt: &WalkOpt) -> Result<Option<Vec<Pattern>>> {
    let mut raw: Vec<String> = opt.include_patterns.clone();
    if !opt.follow_paths.is_empty() {
        match resolve_follow_paths(root, &opt.follow_paths)? {
            Some(resolved) => raw.extend(resolved),
            // A link resolved to the root itself: no filtering at all.
            None => return Ok(None),
        }
    }
    raw.retain(|p| !p.is_empty());
    raw.sort();
    raw.dedup();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(raw.iter().map(|p| Pattern::new(p)).collect()))
}

fn has_wildcard(s: &str) -> bool {
    s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

/// Resolves follow patterns to the set of additional include paths:
/// the patterns themselves plus every symlink target reachable from
/// them (chains included). Returns `None` when a chain reaches the walk
/// root, meaning the whole tree is included.
fn resolve_follow_paths(root: &Path, follow: &[String]) -> Result<Option<Vec<String>>> {
    let mut out: Vec<String> = follow
        .iter()
        .map(|p| p.trim_matches('/').to_owned())
        .collect();
    let mut queue: VecDeque<String> = out.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(pattern) = queue.pop_front() {
        if !seen.insert(pattern.clone()) {
            continue;
        }
        let (dir, base) = match pattern.rsplit_once('/') {
            Some((d, b)) => (d, b),
            None => ("", pattern.as_str()),
        };
        if has_wildcard(base) && !has_wildcard(dir) {
            let scan = if dir.is_empty() {
                root.to_path_buf()
            } else {
                root.join(dir)
            };
            let Ok(iter) = fs::read_dir(&scan) else {
                continue;
            };
            let matcher = Pattern::new(base);
            for entry in iter.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if matcher.matches(&name).0 {
                    let rel = if dir.is_empty() {
                        name
                    } else {
                        format!("{dir}/{name}")
                    };
                    if chase_link(root, &rel, &mut out, &mut queue)? {
                        return Ok(None);
                    }
                }
            }
        } else if !has_wildcard(&pattern) && chase_link(root, &pattern, &mut out, &mut queue)? {
            return Ok(None);
        }
    }

    Ok(Some(out))
}

/// If `rel` is a symlink, records its normalized target and queues it for
/// further chasing. Returns `true` when the target collapses to the root.
fn chase_link(
    root: &Path,
    rel: &str,
    out: &mut Vec<String>,
    queue: &mut VecDeque<String>,
) -> Result<bool> {
    let full = root.join(rel);
    let Ok(meta) = fs::symlink_metadata(&full) else {
        // Missing follow targets are tolerated; the include pattern
        // simply matches nothing.
        return Ok(false);
    };
    if !meta.file_type().is_symlink() {
        return Ok(false);
    }
    let target = fs::read_link(&full)
        .map_err(|e| SyncError::io("failed to read link", full.clone(), e))?;
    let target = target.to_string_lossy();
    let resolved = if let Some(abs) = target.strip_prefix('/') {
        // Absolute targets are reinterpreted relative to the walk root.
        clean_rel_path(abs)
    } else {
        let parent = match rel.rsplit_once('/') {
            Some((d, _)) => d,
            None => "",
        };
        if parent.is_empty() {
            clean_rel_path(&target)
        } else {
            clean_rel_path(&format!("{parent}/{target}"))
        }
    };
    if resolved.is_empty() {
        return Ok(true);
    }
    out.push(resolved.clone());
    queue.push_back(resolved);
    Ok(false)
}

fn stat_from_metadata(rel: &str, meta: &fs::Metadata, full: &Path) -> Result<Stat> {
    let mode = meta.mode();
    let file_type = mode & S_IFMT;
    let mut stat = Stat {
        path: rel.to_owned(),
        mode,
        uid: meta.uid(),
        gid: meta.gid(),
        size: if file_type == S_IFREG { meta.size() } else { 0 },
        mod_time_ns: meta.mtime().wrapping_mul(1_000_000_000) + meta.mtime_nsec(),
        ..Default::default()
    };

    if file_type == S_IFLNK {
        let target = fs::read_link(full)
            .map_err(|e| SyncError::io("failed to read link", full.to_path_buf(), e))?;
        stat.linkname = target.to_string_lossy().into_owned();
    }
    if file_type == S_IFBLK || file_type == S_IFCHR {
        let rdev = meta.rdev();
        stat.devmajor = u64::from(rustix::fs::major(rdev));
        stat.devminor = u64::from(rustix::fs::minor(rdev));
    }
    load_xattrs(full, &mut stat);
    Ok(stat)
}

/// Extended attributes ride along for hashing and the capability-aware
/// identity test. Unsupported filesystems are silently skipped.
fn load_xattrs(path: &Path, stat: &mut Stat) {
    let Ok(names) = xattr::list(path) else {
        return;
    };
    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => {
                stat.xattrs
                    .insert(name.to_string_lossy().into_owned(), value);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(path = %path.display(), xattr = %name.to_string_lossy(), %err, "skipping unreadable xattr");
            }
        }
    }
}
