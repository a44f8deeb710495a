//! Wire protocol: five packet kinds over length-delimited frames.
//!
//! Frame format: `len:u32 | kind:u8 | payload[len]`, all integers
//! big-endian. Stat payloads are a sequence of tagged fields
//! (`tag:u8 | len:u32 | value`) so a decoder skips tags it does not know.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SyncError};
use crate::stat::Stat;

/// Upper bound on a single frame payload. DATA chunks are half this by
/// contract, leaving room for stat records with extended attributes.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Chunk size used when streaming file contents.
pub const DATA_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Stat = 0,
    Req = 1,
    Data = 2,
    Fin = 3,
    Err = 4,
}

impl PacketKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stat),
            1 => Some(Self::Req),
            2 => Some(Self::Data),
            3 => Some(Self::Fin),
            4 => Some(Self::Err),
            _ => None,
        }
    }
}

/// One wire frame. A `Stat(None)` marks end-of-tree; a `Data` with empty
/// bytes closes the stream for that id.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Stat(Option<Stat>),
    Req { id: u32 },
    Data { id: u32, data: Bytes },
    Fin,
    Err { message: String },
}

// Stat field tags. New fields must take fresh tags; decoders skip
// anything they do not recognize.
const TAG_PATH: u8 = 1;
const TAG_MODE: u8 = 2;
const TAG_UID: u8 = 3;
const TAG_GID: u8 = 4;
const TAG_SIZE: u8 = 5;
const TAG_MOD_TIME: u8 = 6;
const TAG_LINKNAME: u8 = 7;
const TAG_DEVMAJOR: u8 = 8;
const TAG_DEVMINOR: u8 = 9;
const TAG_XATTR: u8 = 10;

fn put_field(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    buf.put_u8(tag);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn encode_stat(buf: &mut BytesMut, stat: &Stat) {
    put_field(buf, TAG_PATH, stat.path.as_bytes());
    put_field(buf, TAG_MODE, &stat.mode.to_be_bytes());
    put_field(buf, TAG_UID, &stat.uid.to_be_bytes());
    put_field(buf, TAG_GID, &stat.gid.to_be_bytes());
    put_field(buf, TAG_SIZE, &stat.size.to_be_bytes());
    put_field(buf, TAG_MOD_TIME, &stat.mod_time_ns.to_be_bytes());
    if !stat.linkname.is_empty() {
        put_field(buf, TAG_LINKNAME, stat.linkname.as_bytes());
    }
    if stat.devmajor != 0 || stat.devminor != 0 {
        put_field(buf, TAG_DEVMAJOR, &stat.devmajor.to_be_bytes());
        put_field(buf, TAG_DEVMINOR, &stat.devminor.to_be_bytes());
    }
    for (key, value) in &stat.xattrs {
        let mut entry = BytesMut::with_capacity(2 + key.len() + value.len());
        entry.put_u16(key.len() as u16);
        entry.put_slice(key.as_bytes());
        entry.put_slice(value);
        put_field(buf, TAG_XATTR, &entry);
    }
}

fn get_str(value: Bytes, what: &'static str) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| SyncError::protocol(format!("invalid UTF-8 in {what}")))
}

fn get_u32(value: &[u8], what: &'static str) -> Result<u32> {
    let arr: [u8; 4] = value
        .try_into()
        .map_err(|_| SyncError::protocol(format!("bad length for {what}")))?;
    Ok(u32::from_be_bytes(arr))
}

fn get_u64(value: &[u8], what: &'static str) -> Result<u64> {
    let arr: [u8; 8] = value
        .try_into()
        .map_err(|_| SyncError::protocol(format!("bad length for {what}")))?;
    Ok(u64::from_be_bytes(arr))
}

fn decode_stat(mut payload: Bytes) -> Result<Stat> {
    let mut stat = Stat::default();
    while payload.has_remaining() {
        if payload.remaining() < 5 {
            return Err(SyncError::protocol("truncated stat field header"));
        }
        let tag = payload.get_u8();
        let len = payload.get_u32() as usize;
        if payload.remaining() < len {
            return Err(SyncError::protocol(format!(
                "stat field {tag} truncated: want {len} bytes, have {}",
                payload.remaining()
            )));
        }
        let value = payload.copy_to_bytes(len);
        match tag {
            TAG_PATH => stat.path = get_str(value, "stat path")?,
            TAG_MODE => stat.mode = get_u32(&value, "stat mode")?,
            TAG_UID => stat.uid = get_u32(&value, "stat uid")?,
            TAG_GID => stat.gid = get_u32(&value, "stat gid")?,
            TAG_SIZE => stat.size = get_u64(&value, "stat size")?,
            TAG_MOD_TIME => stat.mod_time_ns = get_u64(&value, "stat mtime")? as i64,
            TAG_LINKNAME => stat.linkname = get_str(value, "stat linkname")?,
            TAG_DEVMAJOR => stat.devmajor = get_u64(&value, "stat devmajor")?,
            TAG_DEVMINOR => stat.devminor = get_u64(&value, "stat devminor")?,
            TAG_XATTR => {
                let mut entry = value;
                if entry.remaining() < 2 {
                    return Err(SyncError::protocol("xattr entry truncated"));
                }
                let key_len = entry.get_u16() as usize;
                if entry.remaining() < key_len {
                    return Err(SyncError::protocol("xattr key truncated"));
                }
                let key = get_str(entry.copy_to_bytes(key_len), "xattr key")?;
                stat.xattrs.insert(key, entry.to_vec());
            }
            // Unknown trailing field from a newer peer.
            _ => {}
        }
    }
    Ok(stat)
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Stat(_) => PacketKind::Stat,
            Packet::Req { .. } => PacketKind::Req,
            Packet::Data { .. } => PacketKind::Data,
            Packet::Fin => PacketKind::Fin,
            Packet::Err { .. } => PacketKind::Err,
        }
    }

    /// Encodes the full frame, header included.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::new();
        match self {
            Packet::Stat(stat) => {
                payload.put_u8(stat.is_some() as u8);
                if let Some(stat) = stat {
                    encode_stat(&mut payload, stat);
                }
            }
            Packet::Req { id } => payload.put_u32(*id),
            Packet::Data { id, data } => {
                payload.put_u32(*id);
                payload.put_slice(data);
            }
            Packet::Fin => {}
            Packet::Err { message } => payload.put_slice(message.as_bytes()),
        }

        let mut frame = BytesMut::with_capacity(5 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_u8(self.kind() as u8);
        frame.put_slice(&payload);
        frame.freeze()
    }

    pub fn decode(kind: PacketKind, mut payload: Bytes) -> Result<Self> {
        match kind {
            PacketKind::Stat => {
                if payload.remaining() < 1 {
                    return Err(SyncError::protocol("stat packet too short"));
                }
                match payload.get_u8() {
                    0 => Ok(Packet::Stat(None)),
                    _ => Ok(Packet::Stat(Some(decode_stat(payload)?))),
                }
            }
            PacketKind::Req => {
                if payload.remaining() < 4 {
                    return Err(SyncError::protocol("req packet too short"));
                }
                Ok(Packet::Req {
                    id: payload.get_u32(),
                })
            }
            PacketKind::Data => {
                if payload.remaining() < 4 {
                    return Err(SyncError::protocol("data packet too short"));
                }
                let id = payload.get_u32();
                Ok(Packet::Data { id, data: payload })
            }
            PacketKind::Fin => Ok(Packet::Fin),
            PacketKind::Err => Ok(Packet::Err {
                message: get_str(payload, "error message")?,
            }),
        }
    }
}

/// Reads one packet. Never buffers more than a single frame and refuses
/// frames above [`MAX_FRAME_SIZE`] before allocating.
pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Result<Packet> {
    let len = r
        .read_u32()
        .await
        .map_err(|e| SyncError::wire("read frame length", e))?;
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::protocol(format!(
            "frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }
    let kind = r
        .read_u8()
        .await
        .map_err(|e| SyncError::wire("read frame kind", e))?;
    let kind = PacketKind::from_u8(kind)
        .ok_or_else(|| SyncError::protocol(format!("unknown packet kind {kind}")))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| SyncError::wire("read frame payload", e))?;
    Packet::decode(kind, Bytes::from(payload))
}

/// Outbound half of the stream. The mutex keeps frames atomic when the
/// emit loop and concurrent file-send jobs share one pipe.
pub struct WireWriter<W> {
    inner: tokio::sync::Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> WireWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(writer),
        }
    }

    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let frame = packet.encode();
        let mut w = self.inner.lock().await;
        w.write_all(&frame)
            .await
            .map_err(|e| SyncError::wire("write frame", e))?;
        w.flush().await.map_err(|e| SyncError::wire("flush", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::S_IFREG;

    fn roundtrip(p: &Packet) -> Packet {
        let frame = p.encode();
        let mut buf = &frame[..];
        let len = buf.get_u32() as usize;
        let kind = PacketKind::from_u8(buf.get_u8()).unwrap();
        assert_eq!(buf.remaining(), len);
        Packet::decode(kind, Bytes::copy_from_slice(buf)).unwrap()
    }

    #[test]
    fn stat_roundtrip() {
        let mut stat = Stat {
            path: "zzz/aa".into(),
            mode: S_IFREG | 0o644,
            uid: 1000,
            gid: 1000,
            size: 5,
            mod_time_ns: 1_234_567_890_123_456_789,
            ..Default::default()
        };
        stat.xattrs
            .insert("user.comment".into(), b"hello".to_vec());
        let decoded = roundtrip(&Packet::Stat(Some(stat.clone())));
        assert_eq!(decoded, Packet::Stat(Some(stat)));
    }

    #[test]
    fn terminator_roundtrip() {
        assert_eq!(roundtrip(&Packet::Stat(None)), Packet::Stat(None));
    }

    #[test]
    fn req_data_fin_roundtrip() {
        assert_eq!(roundtrip(&Packet::Req { id: 7 }), Packet::Req { id: 7 });
        let data = Packet::Data {
            id: 0,
            data: Bytes::from_static(b"chunk"),
        };
        assert_eq!(roundtrip(&data), data);
        let eof = Packet::Data {
            id: 3,
            data: Bytes::new(),
        };
        assert_eq!(roundtrip(&eof), eof);
        assert_eq!(roundtrip(&Packet::Fin), Packet::Fin);
    }

    #[test]
    fn unknown_stat_fields_are_skipped() {
        let stat = Stat {
            path: "f".into(),
            mode: S_IFREG | 0o600,
            size: 1,
            ..Default::default()
        };
        let frame = Packet::Stat(Some(stat.clone())).encode();
        // Rebuild the payload with an extra unknown trailing field.
        let mut payload = BytesMut::from(&frame[5..]);
        payload.put_u8(200);
        payload.put_u32(3);
        payload.put_slice(b"xyz");
        let decoded = Packet::decode(PacketKind::Stat, payload.freeze()).unwrap();
        assert_eq!(decoded, Packet::Stat(Some(stat)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut frame = BytesMut::new();
        frame.put_u32(MAX_FRAME_SIZE + 1);
        frame.put_u8(PacketKind::Data as u8);
        let mut cursor = std::io::Cursor::new(frame.freeze().to_vec());
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn stream_roundtrip() {
        let packets = vec![
            Packet::Stat(Some(Stat {
                path: "a".into(),
                mode: S_IFREG | 0o644,
                ..Default::default()
            })),
            Packet::Stat(None),
            Packet::Req { id: 0 },
            Packet::Data {
                id: 0,
                data: Bytes::from_static(b"data"),
            },
            Packet::Fin,
        ];
        let mut buf = Vec::new();
        for p in &packets {
            buf.extend_from_slice(&p.encode());
        }
        let mut cursor = std::io::Cursor::new(buf);
        for want in &packets {
            let got = read_packet(&mut cursor).await.unwrap();
            assert_eq!(&got, want);
        }
    }
}
