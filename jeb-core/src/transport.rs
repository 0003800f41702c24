//! # Framed Transport
//!
//! Moves whole kRPC messages over a byte stream.
//!
//! Every message on the wire is a Protocol Buffers varint holding the payload length,
//! immediately followed by that many payload bytes:
//!
//! ```text
//! [varint length] [payload]
//! ```
//!
//! A single socket read can return half a length prefix, a fraction of a payload, or
//! several messages at once. [`FramedTransport`] buffers whatever the stream hands it and
//! only yields complete payloads; bytes read past the end of a message stay buffered for
//! the next call to [`FramedTransport::read_message`].
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{encode_varint, encoded_len_varint};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest possible encoding of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Default upper bound for a single message payload (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Errors raised while moving messages over the connection.
///
/// All of these are fatal for the connection that produced them: once a read or write
/// fails, the position of the stream relative to message boundaries is unknown.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O failure on the connection: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Stream closed in the middle of a message ({received} bytes buffered)")]
    Truncated { received: usize },
    #[error("Connection is closed")]
    Closed,
    #[error("Message length prefix is not a valid varint")]
    MalformedLength,
    #[error("Message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: u64, limit: usize },
    #[error("Failed to decode message envelope: '{0}'")]
    Envelope(#[from] prost::DecodeError),
    #[error("No response from the server within {0:?}")]
    TimedOut(Duration),
    #[error("Connection lost track of message boundaries: a previous call was abandoned mid-flight")]
    Desynchronized,
}

/// Length-prefixed message framing over an async byte stream.
pub struct FramedTransport<S> {
    stream: S,
    buffer: BytesMut,
    max_message_size: usize,
}

impl<S> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Rejects incoming messages whose declared length exceeds `limit`.
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Number of bytes read from the stream but not yet returned as part of a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Direct access to the stream. Bytes written here bypass the framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Splits the next complete message off the front of the buffer, if there is one.
    fn next_buffered_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        let Some((length, prefix_len)) = peek_length(&self.buffer)? else {
            return Ok(None);
        };

        if length > self.max_message_size as u64 {
            return Err(TransportError::MessageTooLarge {
                size: length,
                limit: self.max_message_size,
            });
        }

        let frame_len = prefix_len + length as usize;
        if self.buffer.len() < frame_len {
            self.buffer.reserve(frame_len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(prefix_len);
        Ok(Some(self.buffer.split_to(length as usize).freeze()))
    }
}

impl<S: AsyncRead + Unpin> FramedTransport<S> {
    /// Reads exactly one message payload, waiting for more bytes as needed.
    ///
    /// # Returns
    ///
    /// * `Ok(payload)` - A complete message, without its length prefix.
    /// * `Err(TransportError::Closed)` - The peer closed the stream on a message boundary.
    /// * `Err(TransportError::Truncated)` - The peer closed the stream mid-message.
    pub async fn read_message(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if let Some(message) = self.next_buffered_message()? {
                return Ok(message);
            }

            if self.buffer.capacity() == self.buffer.len() {
                self.buffer.reserve(READ_CHUNK);
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(if self.buffer.is_empty() {
                    TransportError::Closed
                } else {
                    TransportError::Truncated {
                        received: self.buffer.len(),
                    }
                });
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> FramedTransport<S> {
    /// Writes `payload` preceded by its varint length and flushes the stream.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let length = payload.len() as u64;
        let mut frame = BytesMut::with_capacity(encoded_len_varint(length) + payload.len());
        encode_varint(length, &mut frame);
        frame.put_slice(payload);

        // write_all reports a short write as `ErrorKind::WriteZero`.
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Decodes a varint length prefix from the start of `buf` without consuming it.
///
/// Returns `Ok(None)` while the prefix is still incomplete, and the decoded value together
/// with the prefix length once its final byte has arrived.
fn peek_length(buf: &[u8]) -> Result<Option<(u64, usize)>, TransportError> {
    let mut value: u64 = 0;

    for (index, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte may only carry the single remaining bit of a u64.
        if index == MAX_VARINT_LEN - 1 && *byte > 0x01 {
            return Err(TransportError::MalformedLength);
        }

        value |= u64::from(byte & 0x7f) << (7 * index);

        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }

    if buf.len() >= MAX_VARINT_LEN {
        Err(TransportError::MalformedLength)
    } else {
        Ok(None)
    }
}
