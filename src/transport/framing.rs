use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chat message accepted by the chat room server.
pub const CHAT_MAX_MESSAGE_LEN: usize = 10_000;

/// Largest message accepted by the todo (shared resource) server.
pub const TODO_MAX_MESSAGE_LEN: usize = 100_000;

const PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The length prefix was negative or above the configured maximum.
    #[error("invalid frame length {len} (allowed 0..={max})")]
    ProtocolViolation { len: i64, max: usize },

    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed in the middle of a frame")]
    UnexpectedEndOfStream,

    /// The outgoing payload does not fit in a signed 32-bit length prefix.
    #[error("message too large to frame: {0} bytes")]
    Oversized(usize),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Frame format: 4-byte signed length prefix (big-endian) + UTF-8 payload
///
/// The codec only enforces the maximum on the read side. Callers that need a
/// semantic limit on what they send check it themselves.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_len: usize,
}

impl FrameCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn chat() -> Self {
        Self::new(CHAT_MAX_MESSAGE_LEN)
    }

    pub fn todo() -> Self {
        Self::new(TODO_MAX_MESSAGE_LEN)
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encodes a message into its on-the-wire bytes
    pub fn encode(text: &str) -> Result<Vec<u8>, FrameError> {
        let bytes = text.as_bytes();
        let len = i32::try_from(bytes.len()).map_err(|_| FrameError::Oversized(bytes.len()))?;

        let mut out = Vec::with_capacity(PREFIX_LEN + bytes.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(bytes);
        Ok(out)
    }

    /// Writes a length-prefixed frame to the writer and flushes it
    pub async fn write_frame<W>(&self, writer: &mut W, text: &str) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Self::encode(text)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one length-prefixed frame from the reader
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
    /// boundary. A prefix outside `0..=max_len` fails before any payload byte
    /// is consumed.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<String>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_bytes = [0u8; PREFIX_LEN];
        let mut filled = 0;
        while filled < PREFIX_LEN {
            let n = reader.read(&mut len_bytes[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEndOfStream);
            }
            filled += n;
        }

        let len = self.check_len(i32::from_be_bytes(len_bytes))?;

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::UnexpectedEndOfStream);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
    }

    /// Decodes one frame from the front of `buf`
    ///
    /// Returns the message and the number of bytes it occupied, or `Ok(None)`
    /// while `buf` does not yet hold a whole frame.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(String, usize)>, FrameError> {
        let Some(prefix) = buf.get(..PREFIX_LEN) else {
            return Ok(None);
        };
        let prefix = [prefix[0], prefix[1], prefix[2], prefix[3]];
        let len = self.check_len(i32::from_be_bytes(prefix))?;

        let end = PREFIX_LEN + len;
        Ok(buf
            .get(PREFIX_LEN..end)
            .map(|payload| (String::from_utf8_lossy(payload).into_owned(), end)))
    }

    fn check_len(&self, len: i32) -> Result<usize, FrameError> {
        if len < 0 || len as usize > self.max_len {
            return Err(FrameError::ProtocolViolation {
                len: len as i64,
                max: self.max_len,
            });
        }
        Ok(len as usize)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::todo()
    }
}
