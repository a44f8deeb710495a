//! Double-walk diff: merges two ordered stat streams into change events.

use std::cmp::Ordering;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::stat::Stat;

const COMPARE_CHUNK_SIZE: usize = 32 * 1024;

/// Capability xattr compared during the identity test.
const CAPABILITY_XATTR: &str = "security.capability";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// One entry of a walk in flight through the diff. `full_path` is set for
/// locally walked sides and enables the content-comparison fallback.
#[derive(Debug, Clone)]
pub struct CurrentPath {
    pub stat: Stat,
    pub full_path: Option<PathBuf>,
}

impl CurrentPath {
    pub fn local(stat: Stat, full_path: PathBuf) -> Self {
        Self {
            stat,
            full_path: Some(full_path),
        }
    }

    pub fn remote(stat: Stat) -> Self {
        Self {
            stat,
            full_path: None,
        }
    }
}

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle_change(&self, kind: ChangeKind, path: &str, stat: Option<&Stat>)
        -> Result<()>;
}

/// Orders paths the way the walker emits them: component by component,
/// bytewise. A plain string comparison would disagree with walk order for
/// siblings sorting around `/` (e.g. `foo-x` vs `foo/bar`).
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    let mut left = a.split('/');
    let mut right = b.split('/');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => match l.as_bytes().cmp(r.as_bytes()) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Merges the `local` and `remote` streams (both in canonical walk order)
/// and emits the change events that make local match remote.
pub async fn double_walk_diff<H>(
    mut local: mpsc::Receiver<CurrentPath>,
    mut remote: mpsc::Receiver<CurrentPath>,
    handler: &H,
    cancel: &CancellationToken,
) -> Result<()>
where
    H: ChangeHandler + ?Sized,
{
    let mut local_open = true;
    let mut remote_open = true;
    let mut f1: Option<CurrentPath> = None;
    let mut f2: Option<CurrentPath> = None;
    // Directory whose recursive removal swallows the deletes below it.
    let mut rmdir: Option<String> = None;

    loop {
        if f1.is_none() && local_open {
            f1 = next_path(&mut local, cancel).await?;
            if f1.is_none() {
                local_open = false;
            }
        }
        if f2.is_none() && remote_open {
            f2 = next_path(&mut remote, cancel).await?;
            if f2.is_none() {
                remote_open = false;
            }
        }
        let (Some(l), Some(r)) = (&f1, &f2) else {
            if let Some(l) = f1.take() {
                emit_delete(&mut rmdir, l, handler).await?;
                continue;
            }
            if let Some(r) = f2.take() {
                rmdir = None;
                handler
                    .handle_change(ChangeKind::Add, &r.stat.path, Some(&r.stat))
                    .await?;
                continue;
            }
            break;
        };

        match compare_paths(&l.stat.path, &r.stat.path) {
            Ordering::Less => {
                let l = f1.take().expect("local lookahead");
                emit_delete(&mut rmdir, l, handler).await?;
            }
            Ordering::Greater => {
                rmdir = None;
                let r = f2.take().expect("remote lookahead");
                handler
                    .handle_change(ChangeKind::Add, &r.stat.path, Some(&r.stat))
                    .await?;
            }
            Ordering::Equal => {
                let same = same_file(l, r).await?;
                if l.stat.is_dir() && !r.stat.is_dir() {
                    // Type change: one recursive removal covers the
                    // local subtree, so skip its delete events.
                    rmdir = Some(format!("{}/", l.stat.path));
                } else {
                    rmdir = None;
                }
                f1 = None;
                let r = f2.take().expect("remote lookahead");
                if !same {
                    handler
                        .handle_change(ChangeKind::Modify, &r.stat.path, Some(&r.stat))
                        .await?;
                }
            }
        }
    }

    Ok(())
}

async fn next_path(
    rx: &mut mpsc::Receiver<CurrentPath>,
    cancel: &CancellationToken,
) -> Result<Option<CurrentPath>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Canceled),
        p = rx.recv() => Ok(p),
    }
}

async fn emit_delete<H>(rmdir: &mut Option<String>, l: CurrentPath, handler: &H) -> Result<()>
where
    H: ChangeHandler + ?Sized,
{
    if let Some(dir) = rmdir.as_deref() {
        if l.stat.path.starts_with(dir) {
            return Ok(());
        }
    }
    if rmdir.is_none() && l.stat.is_dir() {
        *rmdir = Some(format!("{}/", l.stat.path));
    } else if rmdir.is_some() {
        *rmdir = None;
    }
    handler
        .handle_change(ChangeKind::Delete, &l.stat.path, None)
        .await
}

/// Identity test behind the Modify-skip: same type and metadata, same
/// mtime to the nanosecond. When either side carries a truncated (zero
/// nanosecond) timestamp the payloads are compared directly, provided
/// both sides are on local disk.
async fn same_file(a: &CurrentPath, b: &CurrentPath) -> Result<bool> {
    let (sa, sb) = (&a.stat, &b.stat);
    if sa.mode != sb.mode
        || sa.uid != sb.uid
        || sa.gid != sb.gid
        || sa.devmajor != sb.devmajor
        || sa.devminor != sb.devminor
    {
        return Ok(false);
    }
    if sa.xattrs.get(CAPABILITY_XATTR) != sb.xattrs.get(CAPABILITY_XATTR) {
        return Ok(false);
    }
    if sa.is_dir() {
        return Ok(true);
    }
    if sa.size != sb.size {
        return Ok(false);
    }
    if sa.mod_time_secs() != sb.mod_time_secs() {
        return Ok(false);
    }
    let (na, nb) = (sa.mod_time_subsec_nanos(), sb.mod_time_subsec_nanos());
    if na == 0 || nb == 0 {
        if sa.size > 0 {
            if let (Some(pa), Some(pb)) = (&a.full_path, &b.full_path) {
                return compare_file_content(pa.clone(), pb.clone()).await;
            }
        }
        return Ok(true);
    }
    Ok(na == nb)
}

/// Byte-wise comparison of two equally sized files.
async fn compare_file_content(p1: PathBuf, p2: PathBuf) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut f1 = std::fs::File::open(&p1).map_err(|e| SyncError::io("failed to open", &p1, e))?;
        let mut f2 = std::fs::File::open(&p2).map_err(|e| SyncError::io("failed to open", &p2, e))?;
        let mut b1 = vec![0u8; COMPARE_CHUNK_SIZE];
        let mut b2 = vec![0u8; COMPARE_CHUNK_SIZE];
        loop {
            let n1 = f1.read(&mut b1).map_err(|e| SyncError::io("failed to read", &p1, e))?;
            let n2 = f2.read(&mut b2).map_err(|e| SyncError::io("failed to read", &p2, e))?;
            if n1 != n2 || b1[..n1] != b2[..n2] {
                return Ok(false);
            }
            if n1 == 0 {
                return Ok(true);
            }
        }
    })
    .await?
}
