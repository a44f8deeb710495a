//! Sending side of a session: streams metadata for the whole tree and
//! serves file contents on demand.
//!
//! Two halves share the outbound wire through its send lock: the emit
//! task drives the walker and assigns transfer ids in walk order, while
//! the serve loop answers REQ packets by spawning one job per file.
//! Each id is served at most once; a repeated or unknown id aborts the
//! session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorSlot, Result, SyncError};
use crate::stat::Stat;
use crate::walker::{walk, WalkOpt};
use crate::wire::{read_packet, Packet, WireWriter, DATA_CHUNK_SIZE};

/// Stats queued between the walker thread and the emit task.
const STAT_CHANNEL_SIZE: usize = 128;

/// Runs the sending side over `reader`/`writer` until the receiver
/// completes the FIN handshake.
pub async fn send<R, W>(
    mut reader: R,
    writer: W,
    root: impl Into<PathBuf>,
    opt: WalkOpt,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let root = root.into();
    let cancel = cancel.child_token();
    let wire = Arc::new(WireWriter::new(writer));
    let files: Arc<Mutex<HashMap<u32, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let errors = Arc::new(ErrorSlot::default());

    let emit = {
        let wire = wire.clone();
        let files = files.clone();
        let errors = errors.clone();
        let cancel = cancel.clone();
        let root = root.clone();
        tokio::spawn(async move {
            if let Err(err) = emit_stats(&wire, &files, &root, opt, &cancel).await {
                errors.record(err);
                cancel.cancel();
            }
        })
    };

    let mut jobs: JoinSet<()> = JoinSet::new();
    let result = serve_loop(&mut reader, &wire, &files, &errors, &mut jobs, &root, &cancel).await;

    if result.is_err() {
        cancel.cancel();
    }
    jobs.shutdown().await;
    emit.await?;

    match result {
        Ok(()) => errors.into_result(),
        Err(err) => {
            errors.record(err);
            Err(errors.take().expect("recorded error"))
        }
    }
}

async fn serve_loop<R, W>(
    reader: &mut R,
    wire: &Arc<WireWriter<W>>,
    files: &Arc<Mutex<HashMap<u32, String>>>,
    errors: &Arc<ErrorSlot>,
    jobs: &mut JoinSet<()>,
    root: &PathBuf,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Canceled),
            packet = read_packet(reader) => packet?,
        };
        match packet {
            Packet::Req { id } => {
                let path = files.lock().unwrap().remove(&id);
                let Some(path) = path else {
                    let msg = format!("invalid file request {id}");
                    let _ = wire.send(&Packet::Err { message: msg.clone() }).await;
                    return Err(SyncError::protocol(msg));
                };
                let wire = wire.clone();
                let errors = errors.clone();
                let cancel = cancel.clone();
                let full = root.join(&path);
                jobs.spawn(async move {
                    if let Err(err) = send_file(&wire, id, &full, &cancel).await {
                        errors.record(err);
                        cancel.cancel();
                    }
                });
            }
            Packet::Fin => {
                wire.send(&Packet::Fin).await?;
                return Ok(());
            }
            Packet::Err { message } => {
                tracing::error!(%message, "remote error");
                return Err(SyncError::protocol(format!("remote error: {message}")));
            }
            other => {
                return Err(SyncError::protocol(format!(
                    "unexpected {:?} packet on sender",
                    other.kind()
                )));
            }
        }
    }
}

/// Walks the tree and streams one STAT per entry, ending with the null
/// terminator. Ids are handed out to regular-file stats in walk order;
/// the receiver derives the identical mapping on its side.
async fn emit_stats<W>(
    wire: &WireWriter<W>,
    files: &Mutex<HashMap<u32, String>>,
    root: &PathBuf,
    opt: WalkOpt,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let (tx, mut rx) = mpsc::channel::<Stat>(STAT_CHANNEL_SIZE);
    let walk_root = root.clone();
    let walk_cancel = cancel.clone();
    let walker = tokio::task::spawn_blocking(move || {
        walk(&walk_root, &opt, &walk_cancel, &mut |stat: &Stat| {
            tx.blocking_send(stat.clone())
                .map_err(|_| SyncError::Canceled)
        })
    });

    let mut next_id: u32 = 0;
    while let Some(stat) = rx.recv().await {
        if stat.is_reg() {
            files.lock().unwrap().insert(next_id, stat.path.clone());
            next_id += 1;
        }
        wire.send(&Packet::Stat(Some(stat))).await?;
    }
    walker.await??;
    wire.send(&Packet::Stat(None)).await
}

/// Streams one file as DATA chunks, closing the id with an empty DATA.
/// An unreadable file still gets its terminator so the receiver is never
/// left waiting; the zero-byte result is authoritative for its hash.
async fn send_file<W>(
    wire: &WireWriter<W>,
    id: u32,
    path: &PathBuf,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    match tokio::fs::File::open(path).await {
        Ok(mut file) => {
            let mut buf = vec![0u8; DATA_CHUNK_SIZE];
            loop {
                if cancel.is_cancelled() {
                    return Err(SyncError::Canceled);
                }
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| SyncError::io("failed to read", path.clone(), e))?;
                if n == 0 {
                    break;
                }
                wire.send(&Packet::Data {
                    id,
                    data: Bytes::copy_from_slice(&buf[..n]),
                })
                .await?;
            }
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to open requested file");
        }
    }
    wire.send(&Packet::Data {
        id,
        data: Bytes::new(),
    })
    .await
}
