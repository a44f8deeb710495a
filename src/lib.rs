//! Differential, demand-driven directory transfer.
//!
//! One session mirrors a source tree onto a destination over a single
//! bidirectional byte stream. The sender walks the tree and streams
//! metadata for every entry; the receiver diffs that stream against a
//! walk of its local destination and requests contents only for entries
//! that are new or changed. Many file transfers are multiplexed over the
//! same pipe, disk writes are staged and renamed atomically, and the
//! only rate limiter is the transport itself.
//!
//! ```text
//! sender                                    receiver
//!  walker → STAT ───────── wire ─────────→ diff ← walker(dest)
//!    ↑                                       ↓
//!    │← REQ ───────────── wire ←──────── disk writer
//!  file I/O → DATA ─────── wire ─────────→ per-id pipe
//! ```

pub mod diff;
pub mod diskwriter;
pub mod error;
pub mod hasher;
pub mod matcher;
pub mod receiver;
pub mod sender;
pub mod stat;
pub mod walker;
pub mod wire;

pub use diff::{compare_paths, double_walk_diff, ChangeHandler, ChangeKind, CurrentPath};
pub use diskwriter::{
    DataSource, DiskWriter, DiskWriterOpt, FileDataSource, FilterFn, NotifyFn, SyncDataFn,
};
pub use error::{Result, SyncError};
pub use hasher::{default_hasher, ContentHasher, HasherFn};
pub use receiver::{receive, ReceiveOpt};
pub use sender::send;
pub use stat::Stat;
pub use walker::{walk, MapFn, WalkOpt};
pub use wire::{Packet, PacketKind, WireWriter, DATA_CHUNK_SIZE, MAX_FRAME_SIZE};
