//! Buffers raw bytes off an `AsyncRead` into complete [`Frame`]s, and writes
//! frames out an `AsyncWrite` half. Generic over the halves so tests can
//! drive it over an in-memory duplex instead of a real TLS socket.

use crate::error::{Error, Result};
use crate::frame::{decode, encode, Decoded, Frame, OpCode, MAX_PAYLOAD_SIZE};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_payload(inner, MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(inner: R, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(1024),
            max_payload,
        }
    }

    /// Reads until a full frame has been decoded. Waiting for the *next*
    /// frame to start is unbounded -- idle gaps between frames are normal
    /// and detecting a genuinely stale peer is the sender loop's job. Once a
    /// frame has started arriving (the buffer already holds bytes for it),
    /// a bounded read timeout guards against a peer that completes the
    /// header but never finishes the payload.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match decode(&self.buf, self.max_payload)? {
                Decoded::Message(frame, consumed) => {
                    let _ = self.buf.split_to(consumed);
                    return Ok(frame);
                }
                Decoded::NeedMore => {}
            }

            let mut chunk = [0u8; 4096];
            let n = if self.buf.is_empty() {
                self.inner.read(&mut chunk).await?
            } else {
                match timeout(PAYLOAD_READ_TIMEOUT, self.inner.read(&mut chunk)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(Error::IOError {
                            source: std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "timed out reading frame payload",
                            ),
                        })
                    }
                }
            };
            if n == 0 {
                return Err(Error::IOError {
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    ),
                });
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_text(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(OpCode::Text, payload).await
    }

    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let bytes = encode(opcode, payload)?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.write_frame(OpCode::Close, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn writer_then_reader_round_trip() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut writer = FrameWriter::new(client_write);
        let mut reader = FrameReader::new(server_read);
        let _unused = client_read;

        writer.write_text(b"hello world").await.unwrap();
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hello world");
    }

    #[tokio::test]
    async fn reader_accumulates_across_partial_writes() {
        let (client, server) = duplex(4096);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let encoded = encode(OpCode::Text, b"split me").unwrap();
        let mut writer = client_write;
        let (first, second) = encoded.split_at(encoded.len() / 2);
        writer.write_all(first).await.unwrap();
        writer.flush().await.unwrap();

        let mut reader = FrameReader::new(server_read);
        let read_fut = reader.read_frame();
        tokio::pin!(read_fut);

        // give the reader a chance to observe the partial write, then finish it
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write_all(second).await.unwrap();
        writer.flush().await.unwrap();

        let frame = read_fut.await.unwrap();
        assert_eq!(frame.payload, b"split me");
    }
}
