//! Error taxonomy for the transfer engine.
//!
//! Fatal errors abort the session; permission problems on xattrs and
//! symlink chmod are downgraded to warnings at the call site and never
//! reach this type.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Unknown packet kind, DATA for an unregistered id, STAT after the
    /// terminator, or a malformed frame.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A wire path that is empty, absolute, or contains `..`.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Filesystem failure on a named path.
    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on the underlying stream.
    #[error("wire {context}: {source}")]
    Wire {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// Walk root exists but is not a directory.
    #[error("{0:?} is not a directory")]
    NotDirectory(PathBuf),

    /// External cancellation or a peer task going away.
    #[error("operation canceled")]
    Canceled,

    /// A spawned task panicked or was torn down unexpectedly.
    #[error("task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn wire(context: &'static str, source: io::Error) -> Self {
        SyncError::Wire { context, source }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        SyncError::Protocol(msg.into())
    }

    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        SyncError::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, SyncError::Canceled)
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            SyncError::Canceled
        } else {
            SyncError::Task(err.to_string())
        }
    }
}

/// First-error slot shared between the tasks of one session. Keeps the
/// first real failure; a `Canceled` already in the slot is replaced by a
/// later non-cancellation error so the session reports the root cause.
#[derive(Debug, Default)]
pub struct ErrorSlot(std::sync::Mutex<Option<SyncError>>);

impl ErrorSlot {
    pub fn record(&self, err: SyncError) {
        let mut slot = self.0.lock().unwrap();
        match slot.as_ref() {
            None => *slot = Some(err),
            Some(prev) if prev.is_canceled() && !err.is_canceled() => *slot = Some(err),
            Some(_) => {}
        }
    }

    pub fn take(&self) -> Option<SyncError> {
        self.0.lock().unwrap().take()
    }

    pub fn into_result(&self) -> Result<()> {
        match self.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
