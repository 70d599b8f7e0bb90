//! MCP transport layer implementations.
//!
//! Every transport here is newline-delimited JSON over an ordered byte
//! stream: stdio, a TCP connection, or an in-memory duplex pipe.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::mcp::codec;
use crate::mcp::protocol::RequestId;

pub use crate::mcp::codec::Message;

/// Largest accepted frame, in bytes.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Channel depth between the socket tasks and the session loop.
const CHANNEL_CAPACITY: usize = 100;

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// The frame could not be decoded; `id` is recovered when possible.
    Malformed { id: Option<RequestId>, error: Error },
}

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send {
    /// Start the transport, returning channels for messages.
    async fn start(&mut self) -> Result<(mpsc::Receiver<Inbound>, mpsc::Sender<Message>)>;

    /// Stop the transport.
    async fn stop(&mut self) -> Result<()>;
}

/// Newline-delimited JSON transport over any async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Stdio transport for MCP.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

/// TCP connection transport.
pub type TcpTransport = LineTransport<OwnedReadHalf, OwnedWriteHalf>;

/// One end of an in-memory transport pair.
pub type MemoryTransport = LineTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            reader_task: None,
            writer_task: None,
        }
    }
}

impl StdioTransport {
    /// Create a new stdio transport.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl TcpTransport {
    /// Create a transport over an accepted or connected TCP stream.
    pub fn tcp(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self::new(read, write)
    }
}

impl MemoryTransport {
    /// Two connected in-memory transports.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (Self::new(a_read, a_write), Self::new(b_read, b_write))
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<(mpsc::Receiver<Inbound>, mpsc::Sender<Message>)> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| Error::Transport("transport already started".to_string()))?;
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Transport("transport already started".to_string()))?;

        // Channel for incoming messages
        let (incoming_tx, incoming_rx) = mpsc::channel::<Inbound>(CHANNEL_CAPACITY);
        // Channel for outgoing messages
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);

        let reader_task = tokio::spawn(async move {
            let mut frames =
                FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));

            while let Some(frame) = frames.next().await {
                let inbound = match frame {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!("Received: {}", trimmed);
                        match codec::decode(trimmed) {
                            Ok(msg) => Inbound::Message(msg),
                            Err(error) => Inbound::Malformed {
                                id: codec::recover_id(trimmed),
                                error,
                            },
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => Inbound::Malformed {
                        id: None,
                        error: Error::MalformedMessage(format!(
                            "frame exceeds {} bytes",
                            MAX_FRAME_LENGTH
                        )),
                    },
                    Err(LinesCodecError::Io(e)) => {
                        error!("Error reading transport: {}", e);
                        break;
                    }
                };

                if incoming_tx.send(inbound).await.is_err() {
                    break;
                }
            }
            debug!("EOF on transport, stopping reader");
        });

        let shutdown = CancellationToken::new();
        let writer_shutdown = shutdown.clone();
        let writer_task = tokio::spawn(async move {
            let mut frames = FramedWrite::new(writer, LinesCodec::new());

            loop {
                let msg = tokio::select! {
                    msg = outgoing_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = writer_shutdown.cancelled() => {
                        // Write whatever was queued before the stop.
                        outgoing_rx.close();
                        while let Some(msg) = outgoing_rx.recv().await {
                            if write_frame(&mut frames, &msg).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                };
                if write_frame(&mut frames, &msg).await.is_err() {
                    break;
                }
            }
            if let Err(e) = SinkExt::<String>::close(&mut frames).await {
                debug!("Error closing transport writer: {}", e);
            }
        });

        self.reader_task = Some(reader_task);
        self.writer_task = Some((shutdown, writer_task));
        Ok((incoming_rx, outgoing_tx))
    }

    /// Stops reading at once; messages already queued are still written.
    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some((shutdown, task)) = self.writer_task.take() {
            shutdown.cancel();
            task.await
                .map_err(|e| Error::Transport(format!("writer task failed: {}", e)))?;
        }
        Ok(())
    }
}

async fn write_frame<W>(frames: &mut FramedWrite<W, LinesCodec>, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match codec::encode(msg) {
        Ok(frame) => {
            trace!("Sending: {}", frame);
            frames.send(frame).await.map_err(|e| {
                error!("Error writing transport: {}", e);
                Error::Transport(e.to_string())
            })
        }
        Err(e) => {
            // One bad message does not end the stream.
            error!("Error serializing message: {}", e);
            Ok(())
        }
    }
}
