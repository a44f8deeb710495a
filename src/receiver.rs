//! Receiving side of a session: owns the wire, feeds the diff engine
//! and routes file data into per-id pipes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::diff::{double_walk_diff, CurrentPath};
use crate::diskwriter::{
    DataSource, DiskWriter, DiskWriterOpt, FileDataSource, FilterFn, NotifyFn,
};
use crate::error::{Result, SyncError};
use crate::hasher::HasherFn;
use crate::stat::check_rel_path;
use crate::walker::{walk, WalkOpt};
use crate::wire::{read_packet, Packet, WireWriter};

/// Remote stats queued into the diff engine. When full, the receive loop
/// stalls and the transport's backpressure slows the sender down.
const DIFF_CHANNEL_SIZE: usize = 128;

#[derive(Default)]
pub struct ReceiveOpt {
    pub notify: Option<NotifyFn>,
    pub filter: Option<FilterFn>,
    pub hasher: Option<HasherFn>,
}

/// Shared wire-session state: the path→id assignments made while stats
/// streamed in, and the pipe writer registered per requested id. Handed
/// to the disk writer as its async data source.
struct Session<W> {
    wire: WireWriter<W>,
    files: Mutex<HashMap<String, u32>>,
    pipes: Mutex<HashMap<u32, mpsc::Sender<Bytes>>>,
}

#[async_trait]
impl<W> FileDataSource for Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Requests one file by its assigned id and forwards the pipe into
    /// `tx` until the sender closes the stream. Each id is requested at
    /// most once; asking again is a protocol violation.
    async fn write_to(&self, path: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        let id = self
            .files
            .lock()
            .unwrap()
            .remove(path)
            .ok_or_else(|| SyncError::protocol(format!("invalid file request {path}")))?;

        let (pipe_tx, mut pipe_rx) = mpsc::channel::<Bytes>(1);
        self.pipes.lock().unwrap().insert(id, pipe_tx);
        self.wire.send(&Packet::Req { id }).await?;

        while let Some(chunk) = pipe_rx.recv().await {
            if tx.send(chunk).await.is_err() {
                return Err(SyncError::Canceled);
            }
        }
        Ok(())
    }
}

/// Runs the receiving side over `reader`/`writer`, mirroring the remote
/// tree into `dest`. Returns after the FIN handshake once the disk
/// writer has finished all deferred work.
pub async fn receive<R, W>(
    mut reader: R,
    writer: W,
    dest: impl Into<PathBuf>,
    opt: ReceiveOpt,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dest = dest.into();
    let cancel = cancel.child_token();
    tokio::fs::create_dir_all(&dest)
        .await
        .map_err(|e| SyncError::io("failed to create dest", dest.clone(), e))?;

    let session = Arc::new(Session {
        wire: WireWriter::new(writer),
        files: Mutex::new(HashMap::new()),
        pipes: Mutex::new(HashMap::new()),
    });
    let source: Arc<dyn FileDataSource> = session.clone();
    let writer = DiskWriter::new(
        DiskWriterOpt {
            dests: vec![dest.clone()],
            source: DataSource::Async(source),
            notify: opt.notify,
            filter: opt.filter,
            hasher: opt.hasher,
        },
        cancel.clone(),
    )?;

    // Local side of the diff: a walk of the destination as it is now.
    let (local_tx, local_rx) = mpsc::channel::<CurrentPath>(DIFF_CHANNEL_SIZE);
    let walk_dest = dest.clone();
    let walk_cancel = cancel.clone();
    let local_walker = tokio::task::spawn_blocking(move || {
        walk(
            &walk_dest,
            &WalkOpt::default(),
            &walk_cancel,
            &mut |stat| {
                let full = walk_dest.join(&stat.path);
                local_tx
                    .blocking_send(CurrentPath::local(stat.clone(), full))
                    .map_err(|_| SyncError::Canceled)
            },
        )
    });

    let (remote_tx, remote_rx) = mpsc::channel::<CurrentPath>(DIFF_CHANNEL_SIZE);
    let diff_writer = writer.clone();
    let diff_cancel = cancel.clone();
    let mut diff_task: Option<JoinHandle<Result<()>>> = Some(tokio::spawn(async move {
        double_walk_diff(local_rx, remote_rx, &diff_writer, &diff_cancel).await
    }));

    let mut remote_tx = Some(remote_tx);
    let mut next_id: u32 = 0;
    let mut fin_task: Option<JoinHandle<Result<()>>> = None;

    let run = async {
        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Canceled),
                packet = read_packet(&mut reader) => packet?,
            };
            match packet {
                Packet::Stat(Some(stat)) => {
                    check_rel_path(&stat.path)?;
                    let tx = remote_tx
                        .as_ref()
                        .ok_or_else(|| SyncError::protocol("stat after end of tree"))?;
                    if stat.is_reg() {
                        session
                            .files
                            .lock()
                            .unwrap()
                            .insert(stat.path.clone(), next_id);
                        next_id += 1;
                    }
                    if tx.send(CurrentPath::remote(stat)).await.is_err() {
                        // The diff task is gone; surface its error below.
                        return Err(SyncError::Canceled);
                    }
                }
                Packet::Stat(None) => {
                    // End of tree: let the diff drain, then finish the
                    // writer and send FIN from a separate task so DATA
                    // keeps flowing through this loop meanwhile.
                    drop(remote_tx.take());
                    if let Some(task) = diff_task.take() {
                        task.await??;
                    }
                    let session = session.clone();
                    let writer = writer.clone();
                    fin_task = Some(tokio::spawn(async move {
                        writer.wait().await?;
                        session.wire.send(&Packet::Fin).await
                    }));
                }
                Packet::Data { id, data } => {
                    if data.is_empty() {
                        let removed = session.pipes.lock().unwrap().remove(&id);
                        if removed.is_none() {
                            return Err(SyncError::protocol(format!("invalid data id {id}")));
                        }
                        // Dropping the sender closes the pipe.
                    } else {
                        let pipe = session.pipes.lock().unwrap().get(&id).cloned();
                        let Some(pipe) = pipe else {
                            return Err(SyncError::protocol(format!("invalid data id {id}")));
                        };
                        if pipe.send(data).await.is_err() {
                            // Consumer died; its error is in the writer.
                            return Err(SyncError::Canceled);
                        }
                    }
                }
                Packet::Fin => {
                    if let Some(task) = fin_task.take() {
                        task.await??;
                    }
                    return Ok(());
                }
                Packet::Err { message } => {
                    tracing::error!(%message, "remote error");
                    return Err(SyncError::protocol(format!("remote error: {message}")));
                }
                Packet::Req { .. } => {
                    return Err(SyncError::protocol("unexpected REQ packet on receiver"));
                }
            }
        }
    };

    let result = run.await;
    if result.is_err() {
        cancel.cancel();
    }

    // Prefer the first real failure over cascade cancellations. The FIN
    // task owns the writer drain once it exists; draining through it
    // avoids two racing `wait` calls.
    let result = match result {
        Err(err) if err.is_canceled() => {
            let drained = match fin_task.take() {
                Some(task) => match task.await {
                    Ok(res) => res,
                    Err(join) => Err(join.into()),
                },
                None => writer.wait().await,
            };
            match drained {
                Err(real) if !real.is_canceled() => Err(real),
                _ => {
                    if let Some(task) = diff_task.take() {
                        match task.await {
                            Ok(Err(real)) if !real.is_canceled() => Err(real),
                            _ => Err(err),
                        }
                    } else {
                        Err(err)
                    }
                }
            }
        }
        other => other,
    };

    match local_walker.await? {
        Ok(()) => result,
        Err(walk_err) => match result {
            Ok(()) => Err(walk_err),
            Err(err) => Err(err),
        },
    }
}
