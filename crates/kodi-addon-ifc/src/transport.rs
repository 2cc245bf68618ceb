//! IPC transport layer
//!
//! Length-prefixed bincode envelopes over Unix sockets. Used by the host
//! channel pumps and by the child-side runner.

use crate::error::{InterfaceError, Result};
use crate::protocol::{Envelope, MAX_FRAME_LEN};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(envelope)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(InterfaceError::Protocol(format!(
            "envelope of {} bytes exceeds limit",
            data.len()
        )));
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(InterfaceError::Protocol(format!(
            "announced envelope of {len} bytes exceeds limit"
        )));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(bincode::deserialize(&data)?)
}

/// Message transport for IPC
pub struct MessageTransport {
    stream: UnixStream,
}

impl MessageTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        write_envelope(&mut self.stream, envelope).await
    }

    pub async fn recv(&mut self) -> Result<Envelope> {
        read_envelope(&mut self.stream).await
    }

    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// Listening endpoint for one channel.
///
/// Bound synchronously so bind errors reach the caller before any thread is
/// spawned; accepting happens inside the channel's runtime.
pub struct TransportListener {
    listener: std::os::unix::net::UnixListener,
    path: PathBuf,
}

impl TransportListener {
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = std::os::unix::net::UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Must be called from within a tokio runtime.
    pub async fn accept(&self) -> Result<MessageTransport> {
        let listener = tokio::net::UnixListener::from_std(self.listener.try_clone()?)?;
        let (stream, _) = listener.accept().await?;
        Ok(MessageTransport::new(stream))
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
