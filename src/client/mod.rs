use crate::transport::framing::{FrameCodec, FrameError, TODO_MAX_MESSAGE_LEN};
use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Parser, Debug, Clone)]
pub struct ClientArgs {
    /// Server address like 127.0.0.1:5555
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    pub addr: String,

    /// Frames to send, in order
    #[arg(short, long = "message")]
    pub messages: Vec<String>,

    /// How long to wait for server frames before each send and after the last
    #[arg(short, long, default_value_t = 300)]
    pub wait_ms: u64,
}

/// Minimal framed client used by the CLI and the integration tests
///
/// Incoming bytes are buffered until a whole frame is present, so a receive
/// abandoned by a timeout never loses part of a frame.
pub struct FrameClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    codec: FrameCodec,
    buf: Vec<u8>,
}

impl FrameClient {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            codec: FrameCodec::new(TODO_MAX_MESSAGE_LEN),
            buf: Vec::new(),
        })
    }

    pub async fn send(&mut self, text: &str) -> Result<(), FrameError> {
        self.codec.write_frame(&mut self.writer, text).await
    }

    /// Next frame, or `None` if the server closed the connection
    ///
    /// Cancel safe: bytes read so far stay buffered for the next call.
    pub async fn recv(&mut self) -> Result<Option<String>, FrameError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((frame, used)) = self.codec.decode(&self.buf)? {
                self.buf.drain(..used);
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEndOfStream);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Like [`FrameClient::recv`] but gives up after `wait`
    pub async fn recv_timeout(
        &mut self,
        wait: Duration,
    ) -> Option<Result<Option<String>, FrameError>> {
        tokio::time::timeout(wait, self.recv()).await.ok()
    }

    /// Frames that arrive before the server stays quiet for `wait`
    pub async fn drain(&mut self, wait: Duration) -> anyhow::Result<Vec<String>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv_timeout(wait).await {
            match frame? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }
}

pub async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let mut client = FrameClient::connect(&args.addr).await?;
    let wait = Duration::from_millis(args.wait_ms);

    for message in &args.messages {
        for frame in client.drain(wait).await? {
            println!("<< {}", frame);
        }
        client.send(message).await?;
        println!(">> {}", message);
    }

    for frame in client.drain(wait).await? {
        println!("<< {}", frame);
    }

    Ok(())
}
