//! Content hashing for transferred entries.
//!
//! The digest covers a deterministic header (base name, mode bits, uid,
//! gid, size, typeflag, linkname, devmajor, devminor, sorted xattrs)
//! followed by the payload bytes. Modification time and the path prefix
//! are deliberately excluded so logically equivalent files hash the same
//! wherever and whenever they land.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::stat::{Stat, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG};

/// Builds a hasher per entry; the disk writer feeds it payload bytes.
pub type HasherFn = Arc<dyn Fn(&Stat) -> ContentHasher + Send + Sync>;

/// Returns the default hasher factory.
pub fn default_hasher() -> HasherFn {
    Arc::new(ContentHasher::for_stat)
}

pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn for_stat(stat: &Stat) -> Self {
        let mut inner = Sha256::new();
        for (key, value) in header_fields(stat) {
            inner.update(key.as_bytes());
            inner.update(&value);
        }
        Self { inner }
    }

    pub fn write(&mut self, payload: &[u8]) {
        self.inner.update(payload);
    }

    pub fn finish(self) -> String {
        let digest = self.inner.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

fn typeflag(stat: &Stat) -> u8 {
    match stat.mode & crate::stat::S_IFMT {
        S_IFREG => b'0',
        S_IFLNK => b'2',
        S_IFCHR => b'3',
        S_IFBLK => b'4',
        S_IFDIR => b'5',
        S_IFIFO => b'6',
        _ => b'0',
    }
}

fn header_fields(stat: &Stat) -> Vec<(&'static str, Vec<u8>)> {
    let base = stat.path.rsplit('/').next().unwrap_or(&stat.path);
    let name = if stat.is_dir() {
        format!("{base}/")
    } else {
        base.to_owned()
    };

    let mut fields: Vec<(&'static str, Vec<u8>)> = vec![
        ("name", name.into_bytes()),
        ("mode", (stat.mode & 0o7777).to_string().into_bytes()),
        ("uid", stat.uid.to_string().into_bytes()),
        ("gid", stat.gid.to_string().into_bytes()),
        ("size", stat.size.to_string().into_bytes()),
        ("typeflag", vec![typeflag(stat)]),
        ("linkname", stat.linkname.clone().into_bytes()),
        ("devmajor", stat.devmajor.to_string().into_bytes()),
        ("devminor", stat.devminor.to_string().into_bytes()),
    ];
    // BTreeMap iteration keeps xattr keys bytewise sorted.
    for (key, value) in &stat.xattrs {
        fields.push(("xattr", {
            let mut v = key.clone().into_bytes();
            v.extend_from_slice(value);
            v
        }));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::S_IFREG;

    fn file_stat(path: &str, mtime: i64) -> Stat {
        Stat {
            path: path.into(),
            mode: S_IFREG | 0o644,
            uid: 1,
            gid: 1,
            size: 5,
            mod_time_ns: mtime,
            ..Default::default()
        }
    }

    #[test]
    fn mtime_does_not_change_digest() {
        let mut a = ContentHasher::for_stat(&file_stat("dir/f", 1_000));
        a.write(b"data3");
        let mut b = ContentHasher::for_stat(&file_stat("dir/f", 2_000_000_000));
        b.write(b"data3");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn path_prefix_does_not_change_digest() {
        let mut a = ContentHasher::for_stat(&file_stat("zzz/aa", 0));
        a.write(b"data3");
        let mut b = ContentHasher::for_stat(&file_stat("other/nested/aa", 0));
        b.write(b"data3");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn payload_and_mode_change_digest() {
        let mut a = ContentHasher::for_stat(&file_stat("f", 0));
        a.write(b"one");
        let mut b = ContentHasher::for_stat(&file_stat("f", 0));
        b.write(b"two");
        assert_ne!(a.finish(), b.finish());

        let mut stat = file_stat("f", 0);
        stat.mode = S_IFREG | 0o600;
        let mut c = ContentHasher::for_stat(&stat);
        c.write(b"one");
        let mut d = ContentHasher::for_stat(&file_stat("f", 0));
        d.write(b"one");
        assert_ne!(c.finish(), d.finish());
    }

    #[test]
    fn xattrs_are_ordered() {
        let mut s1 = file_stat("f", 0);
        s1.xattrs.insert("user.b".into(), b"2".to_vec());
        s1.xattrs.insert("user.a".into(), b"1".to_vec());
        let mut s2 = file_stat("f", 0);
        s2.xattrs.insert("user.a".into(), b"1".to_vec());
        s2.xattrs.insert("user.b".into(), b"2".to_vec());
        assert_eq!(
            ContentHasher::for_stat(&s1).finish(),
            ContentHasher::for_stat(&s2).finish()
        );
    }
}
