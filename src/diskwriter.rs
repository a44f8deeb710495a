//! Applies change events to one or more destination roots.
//!
//! Regular files are staged under a temporary name and renamed into
//! place after their metadata is rewritten, so a crash never leaves a
//! partially-written file at its final path. File contents come from
//! either a synchronous callback (invoked inline) or an asynchronous
//! data source (a deferred task per file, fed through an SPSC pipe).

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use filetime::FileTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::diff::{ChangeHandler, ChangeKind};
use crate::error::{ErrorSlot, Result, SyncError};
use crate::hasher::HasherFn;
use crate::stat::{check_rel_path, Stat, S_IFCHR, S_IFIFO, S_IFMT};

/// Invoked once per applied change with the entry's stat and, when
/// hashing is enabled, the hex content digest.
pub type NotifyFn =
    Arc<dyn Fn(ChangeKind, &str, Option<&Stat>, Option<&str>) -> Result<()> + Send + Sync>;

/// Drops changes before they touch disk. Returning `false` rejects the
/// entry silently.
pub type FilterFn = Arc<dyn Fn(&Stat) -> bool + Send + Sync>;

/// Synchronous data callback: writes the payload for `path` into the
/// provided sink before the change is considered applied.
pub type SyncDataFn = Arc<dyn Fn(&str, &mut dyn io::Write) -> Result<()> + Send + Sync>;

/// Asynchronous data source: streams the payload of `path` into `tx`.
/// Dropping the sender marks end of file. Implemented by the receiver as
/// a handle onto the wire session.
#[async_trait]
pub trait FileDataSource: Send + Sync {
    async fn write_to(&self, path: &str, tx: mpsc::Sender<Bytes>) -> Result<()>;
}

#[derive(Clone)]
pub enum DataSource {
    Sync(SyncDataFn),
    Async(Arc<dyn FileDataSource>),
}

pub struct DiskWriterOpt {
    pub dests: Vec<PathBuf>,
    pub source: DataSource,
    pub notify: Option<NotifyFn>,
    pub filter: Option<FilterFn>,
    pub hasher: Option<HasherFn>,
}

#[derive(Clone)]
pub struct DiskWriter {
    inner: Arc<Inner>,
}

struct Inner {
    dests: Vec<PathBuf>,
    source: DataSource,
    notify: Option<NotifyFn>,
    filter: Option<FilterFn>,
    hasher: Option<HasherFn>,
    cancel: CancellationToken,
    jobs: Mutex<JoinSet<()>>,
    err: ErrorSlot,
}

struct Staged {
    dest_path: PathBuf,
    staging: PathBuf,
    rename: bool,
    type_change: bool,
    file: Option<fs::File>,
}

impl DiskWriter {
    pub fn new(opt: DiskWriterOpt, cancel: CancellationToken) -> Result<Self> {
        if opt.dests.is_empty() {
            return Err(SyncError::protocol("disk writer needs a destination"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                dests: opt.dests,
                source: opt.source,
                notify: opt.notify,
                filter: opt.filter,
                hasher: opt.hasher,
                cancel,
                jobs: Mutex::new(JoinSet::new()),
                err: ErrorSlot::default(),
            }),
        })
    }

    /// Waits for all deferred file writes and reports the first failure.
    pub async fn wait(&self) -> Result<()> {
        let mut jobs = std::mem::take(&mut *self.inner.jobs.lock().unwrap());
        while let Some(res) = jobs.join_next().await {
            if let Err(err) = res {
                self.inner.err.record(err.into());
            }
        }
        self.inner.err.into_result()
    }

    async fn apply(&self, kind: ChangeKind, path: &str, stat: Option<&Stat>) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::Canceled);
        }
        check_rel_path(path)?;

        if kind == ChangeKind::Delete {
            for dest in &self.inner.dests {
                remove_all(&dest.join(path)).await?;
            }
            return self.notify(kind, path, None, None);
        }

        let stat = stat.ok_or_else(|| {
            SyncError::protocol(format!("{path}: change without stat information"))
        })?;
        if let Some(filter) = &self.inner.filter {
            if !filter(stat) {
                return Ok(());
            }
        }
        self.apply_write(kind, path, stat).await
    }

    async fn apply_write(&self, kind: ChangeKind, path: &str, stat: &Stat) -> Result<()> {
        let mut staged: Vec<Staged> = Vec::with_capacity(self.inner.dests.len());

        for dest_root in &self.inner.dests {
            let dest_path = dest_root.join(path);
            let old = match fs::symlink_metadata(&dest_path) {
                Ok(meta) => Some(meta),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(SyncError::io("failed to stat", dest_path, e)),
            };
            if old.is_none() && kind != ChangeKind::Add {
                return Err(SyncError::protocol(format!(
                    "invalid modification of missing entry {path}"
                )));
            }
            if let Some(old) = &old {
                // Directory over directory: only the metadata changes.
                if old.is_dir() && stat.is_dir() {
                    rewrite_metadata(&dest_path, stat)?;
                    continue;
                }
            }

            let rename = old.is_some();
            let type_change = old
                .map(|o| o.mode() & S_IFMT != stat.file_type())
                .unwrap_or(false);
            let staging = if rename {
                let parent = dest_path.parent().unwrap_or(dest_root);
                parent.join(format!(".tmp.{}", next_suffix()))
            } else {
                dest_path.clone()
            };

            let mut file = None;
            let perms = stat.mode & 0o7777;
            if stat.is_dir() {
                fs::DirBuilder::new()
                    .mode(perms)
                    .create(&staging)
                    .map_err(|e| SyncError::io("failed to create dir", &staging, e))?;
            } else if stat.is_device() || stat.is_fifo() {
                make_node(&staging, stat)?;
            } else if stat.is_symlink() {
                std::os::unix::fs::symlink(&stat.linkname, &staging)
                    .map_err(|e| SyncError::io("failed to symlink", &staging, e))?;
            } else if stat.is_hardlink() {
                check_rel_path(&stat.linkname)?;
                fs::hard_link(dest_root.join(&stat.linkname), &staging)
                    .map_err(|e| SyncError::io("failed to link", &staging, e))?;
            } else {
                let f = fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(perms)
                    .open(&staging)
                    .map_err(|e| SyncError::io("failed to create", &staging, e))?;
                file = Some(f);
            }

            staged.push(Staged {
                dest_path,
                staging,
                rename,
                type_change,
                file,
            });
        }

        if staged.is_empty() {
            // Every destination was a directory metadata rewrite.
            return Ok(());
        }

        let needs_data = stat.is_reg() && !stat.is_hardlink();
        let mut digest: Option<String> = None;
        let mut deferred = false;

        if needs_data {
            match &self.inner.source {
                DataSource::Sync(cb) => {
                    digest = self.write_sync(cb.clone(), path, stat, &mut staged).await?;
                }
                DataSource::Async(_) => {
                    for s in &mut staged {
                        s.file = None;
                    }
                    deferred = true;
                }
            }
        } else if self.inner.hasher.is_some() {
            digest = self.header_digest(stat);
        }

        for s in &staged {
            rewrite_metadata(&s.staging, stat)?;
            if s.rename {
                if s.type_change {
                    remove_all(&s.dest_path).await?;
                }
                fs::rename(&s.staging, &s.dest_path)
                    .map_err(|e| SyncError::io("failed to rename", &s.dest_path, e))?;
            }
        }

        if deferred {
            let dest_paths = staged.iter().map(|s| s.dest_path.clone()).collect();
            self.spawn_async_fill(kind, path.to_owned(), stat.clone(), dest_paths);
            return Ok(());
        }

        self.notify(kind, path, Some(stat), digest.as_deref())
    }

    /// Runs the synchronous data callback against a tee over every
    /// staged file, hashing along the way when configured.
    async fn write_sync(
        &self,
        cb: SyncDataFn,
        path: &str,
        stat: &Stat,
        staged: &mut [Staged],
    ) -> Result<Option<String>> {
        let files: Vec<fs::File> = staged.iter_mut().filter_map(|s| s.file.take()).collect();
        let hasher = self.inner.hasher.as_ref().map(|h| h(stat));
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut tee = TeeWriter { files, hasher };
            cb(&path, &mut tee)?;
            io::Write::flush(&mut tee)
                .map_err(|e| SyncError::io("failed to flush", PathBuf::from(&path), e))?;
            Ok(tee.hasher.map(|h| h.finish()))
        })
        .await?
    }

    fn header_digest(&self, stat: &Stat) -> Option<String> {
        self.inner.hasher.as_ref().map(|h| h(stat).finish())
    }

    fn spawn_async_fill(&self, kind: ChangeKind, path: String, stat: Stat, dests: Vec<PathBuf>) {
        let DataSource::Async(source) = &self.inner.source else {
            return;
        };
        let source = source.clone();
        let inner = self.inner.clone();
        self.inner.jobs.lock().unwrap().spawn(async move {
            if let Err(err) = fill_file(&inner, source, kind, &path, &stat, &dests).await {
                // Note: a mid-stream failure leaves the partially
                // written destination file in place.
                if !err.is_canceled() {
                    tracing::error!(%path, error = %err, "async file write failed");
                }
                inner.err.record(err);
                inner.cancel.cancel();
            }
        });
    }

    fn notify(
        &self,
        kind: ChangeKind,
        path: &str,
        stat: Option<&Stat>,
        digest: Option<&str>,
    ) -> Result<()> {
        match &self.inner.notify {
            Some(cb) => cb(kind, path, stat, digest),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChangeHandler for DiskWriter {
    async fn handle_change(
        &self,
        kind: ChangeKind,
        path: &str,
        stat: Option<&Stat>,
    ) -> Result<()> {
        match self.apply(kind, path, stat).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Fatal for the session: stop the other tasks too.
                self.inner.cancel.cancel();
                Err(err)
            }
        }
    }
}

/// Pulls one file's payload out of the async source and broadcasts it to
/// every destination, then fixes up the timestamps the write disturbed.
async fn fill_file(
    inner: &Inner,
    source: Arc<dyn FileDataSource>,
    kind: ChangeKind,
    path: &str,
    stat: &Stat,
    dests: &[PathBuf],
) -> Result<()> {
    if inner.cancel.is_cancelled() {
        return Err(SyncError::Canceled);
    }
    let (tx, mut rx) = mpsc::channel::<Bytes>(1);
    let mut hasher = inner.hasher.as_ref().map(|h| h(stat));
    let mut writers: Vec<LazyFileWriter> =
        dests.iter().map(|d| LazyFileWriter::new(d.clone())).collect();

    let producer = source.write_to(path, tx);
    let consumer = async {
        while let Some(chunk) = rx.recv().await {
            for w in &mut writers {
                w.write_all(&chunk).await?;
            }
            if let Some(h) = &mut hasher {
                h.write(&chunk);
            }
        }
        for w in &mut writers {
            w.close().await?;
        }
        Ok::<(), SyncError>(())
    };
    tokio::select! {
        _ = inner.cancel.cancelled() => return Err(SyncError::Canceled),
        res = async { tokio::try_join!(producer, consumer) } => {
            res?;
        }
    }

    let t = FileTime::from_unix_time(stat.mod_time_secs(), stat.mod_time_subsec_nanos());
    for dest in dests {
        filetime::set_symlink_file_times(dest, t, t)
            .map_err(|e| SyncError::io("failed to set times", dest, e))?;
    }

    if let Some(cb) = &inner.notify {
        let digest = hasher.map(|h| h.finish());
        cb(kind, path, Some(stat), digest.as_deref())?;
    }
    Ok(())
}

/// Destination writer that defers the open until the first byte. Files
/// created without owner write permission are widened for the duration
/// of the write and restored on close.
struct LazyFileWriter {
    dest: PathBuf,
    file: Option<tokio::fs::File>,
    restore_mode: Option<u32>,
}

impl LazyFileWriter {
    fn new(dest: PathBuf) -> Self {
        Self {
            dest,
            file: None,
            restore_mode: None,
        }
    }

    async fn ensure_open(&mut self) -> Result<&mut tokio::fs::File> {
        if self.file.is_none() {
            let open = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&self.dest)
                .await;
            let file = match open {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    let meta = tokio::fs::symlink_metadata(&self.dest)
                        .await
                        .map_err(|e| SyncError::io("failed to stat", &self.dest, e))?;
                    let mode = meta.permissions().mode() & 0o7777;
                    tokio::fs::set_permissions(
                        &self.dest,
                        fs::Permissions::from_mode(mode | 0o200),
                    )
                    .await
                    .map_err(|e| SyncError::io("failed to chmod", &self.dest, e))?;
                    self.restore_mode = Some(mode);
                    tokio::fs::OpenOptions::new()
                        .write(true)
                        .open(&self.dest)
                        .await
                        .map_err(|e| SyncError::io("failed to open", &self.dest, e))?
                }
                Err(e) => return Err(SyncError::io("failed to open", &self.dest, e)),
            };
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("file just opened"))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let dest = self.dest.clone();
        self.ensure_open()
            .await?
            .write_all(buf)
            .await
            .map_err(|e| SyncError::io("failed to write", dest, e))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| SyncError::io("failed to flush", &self.dest, e))?;
        }
        if let Some(mode) = self.restore_mode.take() {
            tokio::fs::set_permissions(&self.dest, fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| SyncError::io("failed to restore mode", &self.dest, e))?;
        }
        Ok(())
    }
}

struct TeeWriter {
    files: Vec<fs::File>,
    hasher: Option<crate::hasher::ContentHasher>,
}

impl io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for f in &mut self.files {
            io::Write::write_all(f, buf)?;
        }
        if let Some(h) = &mut self.hasher {
            h.write(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for f in &mut self.files {
            io::Write::flush(f)?;
        }
        Ok(())
    }
}

/// Removes a path of any type, tolerating its absence.
pub async fn remove_all(path: &Path) -> Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SyncError::io("failed to stat", path, e)),
    };
    let res = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io("failed to remove", path, e)),
    }
}

fn make_node(path: &Path, stat: &Stat) -> Result<()> {
    use rustix::fs::{makedev, mknodat, FileType, Mode, CWD};

    let node_type = match stat.file_type() {
        S_IFCHR => FileType::CharacterDevice,
        S_IFIFO => FileType::Fifo,
        _ => FileType::BlockDevice,
    };
    let mode = Mode::from_bits_truncate((stat.mode & 0o7777) as rustix::fs::RawMode);
    let dev = makedev(stat.devmajor as u32, stat.devminor as u32);
    mknodat(CWD, path, node_type, mode, dev)
        .map_err(|e| SyncError::io("failed to mknod", path, io::Error::from(e)))
}

const fn uid_from_raw(raw: u32) -> rustix::fs::Uid {
    unsafe { rustix::fs::Uid::from_raw(raw) }
}

const fn gid_from_raw(raw: u32) -> rustix::fs::Gid {
    unsafe { rustix::fs::Gid::from_raw(raw) }
}

/// Rewrites metadata on a staged object: xattrs (best effort), owner,
/// mode (skipped for symlinks) and modification time (never follows
/// symlinks).
pub fn rewrite_metadata(path: &Path, stat: &Stat) -> Result<()> {
    for (key, value) in &stat.xattrs {
        if let Err(err) = xattr::set(path, key, value) {
            // ENOTSUP / EPERM and friends downgrade to a warning.
            tracing::warn!(path = %path.display(), xattr = %key, %err, "failed to set xattr");
        }
    }

    rustix::fs::chownat(
        rustix::fs::CWD,
        path,
        Some(uid_from_raw(stat.uid)),
        Some(gid_from_raw(stat.gid)),
        rustix::fs::AtFlags::SYMLINK_NOFOLLOW,
    )
    .map_err(|e| SyncError::io("failed to lchown", path, io::Error::from(e)))?;

    if !stat.is_symlink() {
        fs::set_permissions(path, fs::Permissions::from_mode(stat.mode & 0o7777))
            .map_err(|e| SyncError::io("failed to chmod", path, e))?;
    }

    let t = FileTime::from_unix_time(stat.mod_time_secs(), stat.mod_time_subsec_nanos());
    filetime::set_symlink_file_times(path, t, t)
        .map_err(|e| SyncError::io("failed to set times", path, e))
}

// Random staging suffixes. The LCG keeps collisions unlikely without
// pulling in an RNG for nine digits of noise.
static STAGING_RAND: AtomicU32 = AtomicU32::new(0);

fn next_suffix() -> String {
    let mut r = STAGING_RAND.load(Ordering::Relaxed);
    if r == 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        r = now.subsec_nanos() ^ std::process::id();
    }
    r = r.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    STAGING_RAND.store(r, Ordering::Relaxed);
    format!("{:09}", r % 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::default_hasher;
    use crate::stat::{S_IFDIR, S_IFLNK, S_IFREG};
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn sync_source(contents: &'static [(&'static str, &'static str)]) -> DataSource {
        let map: HashMap<&str, &str> = contents.iter().copied().collect();
        DataSource::Sync(Arc::new(move |path, w| {
            let data = map.get(path).copied().unwrap_or("");
            w.write_all(data.as_bytes())
                .map_err(|e| SyncError::io("write", PathBuf::from(path), e))?;
            Ok(())
        }))
    }

    fn writer(dests: Vec<PathBuf>, source: DataSource) -> DiskWriter {
        DiskWriter::new(
            DiskWriterOpt {
                dests,
                source,
                notify: None,
                filter: None,
                hasher: Some(default_hasher()),
            },
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn file_stat(path: &str, size: u64) -> Stat {
        Stat {
            path: path.into(),
            mode: S_IFREG | 0o644,
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
            size,
            mod_time_ns: 1_700_000_000_123_456_789,
            ..Default::default()
        }
    }

    fn dir_stat(path: &str) -> Stat {
        Stat {
            mode: S_IFDIR | 0o755,
            ..file_stat(path, 0)
        }
    }

    #[tokio::test]
    async fn writes_files_and_dirs() {
        let tmp = TempDir::new().unwrap();
        let dw = writer(
            vec![tmp.path().to_path_buf()],
            sync_source(&[("d/f", "hello")]),
        );
        dw.handle_change(ChangeKind::Add, "d", Some(&dir_stat("d")))
            .await
            .unwrap();
        dw.handle_change(ChangeKind::Add, "d/f", Some(&file_stat("d/f", 5)))
            .await
            .unwrap();
        dw.wait().await.unwrap();

        assert_eq!(fs::read_to_string(tmp.path().join("d/f")).unwrap(), "hello");
        let meta = fs::metadata(tmp.path().join("d/f")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o644);
        assert_eq!(meta.mtime(), 1_700_000_000);
        assert_eq!(meta.mtime_nsec(), 123_456_789);
    }

    #[tokio::test]
    async fn delete_removes_subtrees() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("gone/deep")).unwrap();
        fs::write(tmp.path().join("gone/deep/f"), "x").unwrap();
        let dw = writer(vec![tmp.path().to_path_buf()], sync_source(&[]));
        dw.handle_change(ChangeKind::Delete, "gone", None)
            .await
            .unwrap();
        assert!(!tmp.path().join("gone").exists());
        // Deleting a missing path is fine.
        dw.handle_change(ChangeKind::Delete, "gone", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn type_change_replaces_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("p/inner")).unwrap();
        let dw = writer(vec![tmp.path().to_path_buf()], sync_source(&[("p", "now a file")]));
        dw.handle_change(ChangeKind::Modify, "p", Some(&file_stat("p", 10)))
            .await
            .unwrap();
        let meta = fs::symlink_metadata(tmp.path().join("p")).unwrap();
        assert!(meta.is_file());
        assert_eq!(
            fs::read_to_string(tmp.path().join("p")).unwrap(),
            "now a file"
        );
    }

    #[tokio::test]
    async fn symlinks_and_hardlinks() {
        let tmp = TempDir::new().unwrap();
        let dw = writer(
            vec![tmp.path().to_path_buf()],
            sync_source(&[("a", "data")]),
        );
        dw.handle_change(ChangeKind::Add, "a", Some(&file_stat("a", 4)))
            .await
            .unwrap();

        let mut link = file_stat("b", 0);
        link.linkname = "a".into();
        dw.handle_change(ChangeKind::Add, "b", Some(&link))
            .await
            .unwrap();

        let mut sym = file_stat("s", 0);
        sym.mode = S_IFLNK | 0o777;
        sym.linkname = "../target".into();
        dw.handle_change(ChangeKind::Add, "s", Some(&sym))
            .await
            .unwrap();

        let a = fs::metadata(tmp.path().join("a")).unwrap();
        let b = fs::metadata(tmp.path().join("b")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(
            fs::read_link(tmp.path().join("s")).unwrap(),
            PathBuf::from("../target")
        );
    }

    #[tokio::test]
    async fn fans_out_to_multiple_destinations() {
        let tmp = TempDir::new().unwrap();
        let d1 = tmp.path().join("one");
        let d2 = tmp.path().join("two");
        fs::create_dir_all(&d1).unwrap();
        fs::create_dir_all(&d2).unwrap();
        let dw = writer(vec![d1.clone(), d2.clone()], sync_source(&[("f", "fan")]));
        dw.handle_change(ChangeKind::Add, "f", Some(&file_stat("f", 3)))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(d1.join("f")).unwrap(), "fan");
        assert_eq!(fs::read_to_string(d2.join("f")).unwrap(), "fan");
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let dw = writer(vec![tmp.path().to_path_buf()], sync_source(&[]));
        let err = dw
            .handle_change(ChangeKind::Delete, "../outside", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPath { .. }));
    }

    #[test]
    fn staging_suffixes_are_nine_digits() {
        let a = next_suffix();
        let b = next_suffix();
        assert_eq!(a.len(), 9);
        assert_eq!(b.len(), 9);
        assert_ne!(a, b);
    }
}
