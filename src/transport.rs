// ABOUTME: Serial transport seam between the modem client and the byte-stream collaborator
// ABOUTME: Defines the write-half trait and the decoded line/open/error event stream

use std::future::Future;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Events produced by the serial collaborator.
///
/// The core never parses raw bytes: the transport side is expected to frame
/// the byte stream into delimited text lines (typically `\r\n`) and feed them
/// here, along with the open and failure signals of the underlying port.
#[derive(Debug)]
pub enum SerialEvent {
    /// The underlying port finished opening and is ready for traffic.
    Opened,
    /// One decoded text line, delimiter stripped.
    Line(String),
    /// The transport failed; the session surfaces this as an error event.
    Failed(io::Error),
}

/// Write half of the serial link.
///
/// The engine is the only writer: it owns the link exclusively and arbitrates
/// access so that only the head command of the queue ever touches the wire.
pub trait SerialLink: Send + 'static {
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Adapter turning any `AsyncWrite` half into a [`SerialLink`].
///
/// Works with the write half of a serial port stream, a TCP bridge, or an
/// in-memory duplex in tests.
pub struct IoLink<W>(pub W);

impl<W> SerialLink for IoLink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            self.0.write_all(bytes).await?;
            self.0.flush().await
        }
    }
}
