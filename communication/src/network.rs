//! Wire framing and socket setup between processes.
//!
//! Each process binds one TCP listener on its communication port and dials
//! every peer once; a connection opens with a `u32` handshake naming the
//! dialing process. Frames are a `u32` event tag followed by the tag's
//! fields, all native-endian.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use lockstep_bytes::BinStream;

use crate::{MAILBOX_EVENT_DESTROY, MAILBOX_EVENT_RECV_COMM, MAILBOX_EVENT_RECV_COMM_END};

/// One unit of inter-process traffic.
#[derive(Debug)]
pub enum Frame {
    /// A payload for a specific worker's mailbox.
    Payload {
        /// Destination global worker id.
        dst_tid: usize,
        /// Channel the payload belongs to.
        channel_id: u32,
        /// Progress the payload belongs to.
        progress: u32,
        /// The serialized messages.
        payload: BinStream,
    },
    /// End-of-progress notification from one sender process.
    Complete {
        /// Channel the notification belongs to.
        channel_id: u32,
        /// Progress the notification belongs to.
        progress: u32,
        /// How many processes sent on this tag in total.
        num_sender_processes: u32,
    },
    /// Clean shutdown of the sending peer's stream.
    Goodbye,
}

impl Frame {
    /// Writes the frame onto a stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Frame::Payload { dst_tid, channel_id, progress, payload } => {
                writer.write_u32::<NativeEndian>(MAILBOX_EVENT_RECV_COMM)?;
                writer.write_u32::<NativeEndian>(*dst_tid as u32)?;
                writer.write_u32::<NativeEndian>(*channel_id)?;
                writer.write_u32::<NativeEndian>(*progress)?;
                writer.write_u64::<NativeEndian>(payload.size() as u64)?;
                writer.write_all(payload.remaining())?;
            }
            Frame::Complete { channel_id, progress, num_sender_processes } => {
                writer.write_u32::<NativeEndian>(MAILBOX_EVENT_RECV_COMM_END)?;
                writer.write_u32::<NativeEndian>(*channel_id)?;
                writer.write_u32::<NativeEndian>(*progress)?;
                writer.write_u32::<NativeEndian>(*num_sender_processes)?;
            }
            Frame::Goodbye => {
                writer.write_u32::<NativeEndian>(MAILBOX_EVENT_DESTROY)?;
            }
        }
        Ok(())
    }

    /// Reads one frame; errors on a truncated stream or an unknown tag.
    pub fn read_from<R: Read>(reader: &mut R) -> crate::Result<Frame> {
        let tag = reader.read_u32::<NativeEndian>().context("reading frame tag")?;
        match tag {
            MAILBOX_EVENT_RECV_COMM => {
                let dst_tid = reader.read_u32::<NativeEndian>()? as usize;
                let channel_id = reader.read_u32::<NativeEndian>()?;
                let progress = reader.read_u32::<NativeEndian>()?;
                let length = reader.read_u64::<NativeEndian>()? as usize;
                let mut buffer = vec![0u8; length];
                reader.read_exact(&mut buffer).context("reading frame payload")?;
                Ok(Frame::Payload { dst_tid, channel_id, progress, payload: BinStream::from_vec(buffer) })
            }
            MAILBOX_EVENT_RECV_COMM_END => {
                let channel_id = reader.read_u32::<NativeEndian>()?;
                let progress = reader.read_u32::<NativeEndian>()?;
                let num_sender_processes = reader.read_u32::<NativeEndian>()?;
                Ok(Frame::Complete { channel_id, progress, num_sender_processes })
            }
            MAILBOX_EVENT_DESTROY => Ok(Frame::Goodbye),
            other => bail!("unknown frame tag {:#x}", other),
        }
    }
}

/// Dials a peer's communication port, retrying until it is listening, and
/// identifies this process with a handshake.
pub fn connect_to_peer(addr: &str, my_process_id: usize) -> crate::Result<TcpStream> {
    loop {
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                stream.set_nodelay(true).context("set_nodelay failed")?;
                stream
                    .write_u32::<NativeEndian>(my_process_id as u32)
                    .context("sending process id handshake")?;
                return Ok(stream);
            }
            Err(error) => {
                log::debug!("process {}: error connecting to {}: {}; retrying", my_process_id, addr, error);
                sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Accepts `expected` peer connections, reading each one's handshake.
pub fn await_peers(listener: &TcpListener, expected: usize) -> crate::Result<Vec<(usize, TcpStream)>> {
    let mut peers = Vec::with_capacity(expected);
    for _ in 0..expected {
        let (mut stream, _) = listener.accept().context("accepting peer connection")?;
        stream.set_nodelay(true).context("set_nodelay failed")?;
        let peer_id = stream
            .read_u32::<NativeEndian>()
            .context("reading process id handshake")? as usize;
        peers.push((peer_id, stream));
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let mut payload = BinStream::new();
        payload.push(&419u32);

        let mut wire = Vec::new();
        Frame::Payload { dst_tid: 3, channel_id: 7, progress: 2, payload }
            .write_to(&mut wire)
            .unwrap();
        Frame::Complete { channel_id: 7, progress: 2, num_sender_processes: 4 }
            .write_to(&mut wire)
            .unwrap();
        Frame::Goodbye.write_to(&mut wire).unwrap();

        let mut reader = &wire[..];
        match Frame::read_from(&mut reader).unwrap() {
            Frame::Payload { dst_tid, channel_id, progress, mut payload } => {
                assert_eq!((dst_tid, channel_id, progress), (3, 7, 2));
                assert_eq!(payload.pop::<u32>(), 419);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        match Frame::read_from(&mut reader).unwrap() {
            Frame::Complete { channel_id, progress, num_sender_processes } => {
                assert_eq!((channel_id, progress, num_sender_processes), (7, 2, 4));
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(matches!(Frame::read_from(&mut reader).unwrap(), Frame::Goodbye));
        assert!(reader.is_empty());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0xdead_beefu32.to_ne_bytes());
        assert!(Frame::read_from(&mut &wire[..]).is_err());
    }
}
