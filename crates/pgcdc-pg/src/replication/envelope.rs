//! The `COPY BOTH` frame envelope, one layer above the pgoutput wire codec.
//!
//! `tokio_postgres::copy_both_simple` already strips the outer CopyData
//! framing, handing back each frame's payload directly. What's left is the
//! single-byte discriminator PostgreSQL puts at the front of every
//! replication-protocol frame: `'w'`/`'k'` inbound, `'r'` outbound.
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-replication.html>

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use pgcdc_core::ProtocolError;

/// Seconds between the Unix epoch and the PostgreSQL epoch (2000-01-01),
/// the reference point for every clock field in the replication protocol.
pub const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Microseconds since the process started, relative to the PG epoch, used
/// to stamp outbound standby-status frames.
pub fn pg_epoch_micros_now() -> i64 {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (unix.as_micros() as i64) - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// A frame received from the server over `COPY BOTH`.
#[derive(Debug)]
pub enum ServerFrame {
    /// `'w'`: one pgoutput message, plus the LSN header the server stamped
    /// it with.
    WalData {
        start_lsn: u64,
        end_lsn: u64,
        server_clock: i64,
        payload: Bytes,
    },
    /// `'k'`: primary keepalive.
    PrimaryKeepalive {
        server_wal_end: u64,
        server_clock: i64,
        reply_requested: bool,
    },
}

/// Parse one `COPY BOTH` payload into a [`ServerFrame`].
pub fn parse_server_frame(data: &Bytes) -> Result<ServerFrame, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Malformed("empty replication frame".into()));
    }

    let tag = data[0];
    let mut cursor = Cursor::new(&data[1..]);

    match tag {
        b'w' => {
            let start_lsn = read_u64(&mut cursor)?;
            let end_lsn = read_u64(&mut cursor)?;
            let server_clock = read_i64(&mut cursor)?;
            let payload_start = 1 + 8 + 8 + 8;
            Ok(ServerFrame::WalData {
                start_lsn,
                end_lsn,
                server_clock,
                payload: data.slice(payload_start..),
            })
        }
        b'k' => {
            let server_wal_end = read_u64(&mut cursor)?;
            let server_clock = read_i64(&mut cursor)?;
            let reply_requested = read_u8(&mut cursor)? == 1;
            Ok(ServerFrame::PrimaryKeepalive {
                server_wal_end,
                server_clock,
                reply_requested,
            })
        }
        other => Err(ProtocolError::Unknown(other)),
    }
}

/// Build an outbound `'r'` StandbyStatus frame. `write`, `flush` and
/// `apply` are all set to the same LSN being confirmed, per the protocol's
/// usual single-position usage; `reply_requested` is `false` for periodic
/// sends and `true` only when responding to an urgent keepalive.
pub fn build_standby_status(lsn: u64, reply_requested: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8 * 4 + 1);
    let mut writer = (&mut buf).writer();

    writer.write_u8(b'r').unwrap();
    writer.write_u64::<BigEndian>(lsn).unwrap();
    writer.write_u64::<BigEndian>(lsn).unwrap();
    writer.write_u64::<BigEndian>(lsn).unwrap();
    writer.write_i64::<BigEndian>(pg_epoch_micros_now()).unwrap();
    writer.write_u8(reply_requested as u8).unwrap();

    buf.freeze()
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, ProtocolError> {
    cursor
        .read_u64::<BigEndian>()
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    cursor
        .read_i64::<BigEndian>()
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    cursor
        .read_u8()
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}
