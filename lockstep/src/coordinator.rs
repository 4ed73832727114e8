//! The worker side of the control plane.
//!
//! One mutex-guarded TCP connection per process against the master.
//! Request frames are `u32 message_type`, `u64 length`, payload; replies
//! mirror the layout. Notifications carry no reply.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use anyhow::Context;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use lockstep_bytes::BinStream;

/// A connection to the master's control endpoint, shared by the local
/// workers.
pub struct Coordinator {
    stream: Mutex<TcpStream>,
}

impl Coordinator {
    /// Connects to the master.
    pub fn connect(master_host: &str, master_port: u16) -> crate::Result<Coordinator> {
        let stream = TcpStream::connect((master_host, master_port))
            .with_context(|| format!("connecting to master {}:{}", master_host, master_port))?;
        stream.set_nodelay(true).context("set_nodelay failed")?;
        Ok(Coordinator { stream: Mutex::new(stream) })
    }

    /// Sends a request and waits for the reply `(type, body)`.
    pub fn ask_master(&self, question: &BinStream, msg_type: u32) -> crate::Result<(u32, BinStream)> {
        let mut stream = self.stream.lock().expect("coordinator poisoned");
        write_frame(&mut *stream, msg_type, question)?;
        read_frame(&mut *stream)
    }

    /// Sends a notification; the master does not reply.
    pub fn notify_master(&self, message: &BinStream, msg_type: u32) -> crate::Result<()> {
        let mut stream = self.stream.lock().expect("coordinator poisoned");
        write_frame(&mut *stream, msg_type, message)
    }
}

pub(crate) fn write_frame<W: Write>(writer: &mut W, msg_type: u32, body: &BinStream) -> crate::Result<()> {
    writer.write_u32::<NativeEndian>(msg_type).context("writing message type")?;
    writer.write_u64::<NativeEndian>(body.size() as u64).context("writing message length")?;
    writer.write_all(body.remaining()).context("writing message body")?;
    writer.flush().context("flushing control message")?;
    Ok(())
}

pub(crate) fn read_frame<R: Read>(reader: &mut R) -> crate::Result<(u32, BinStream)> {
    let msg_type = reader.read_u32::<NativeEndian>().context("reading message type")?;
    let length = reader.read_u64::<NativeEndian>().context("reading message length")? as usize;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).context("reading message body")?;
    Ok((msg_type, BinStream::from_vec(body)))
}
