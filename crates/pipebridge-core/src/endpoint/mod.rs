//! Transport endpoints.
//!
//! An [`Endpoint`] is a readable half plus a writable half over exactly one
//! OS handle: a socket connection, a named-pipe connection, or the stdio pair
//! of a carrier process. Reads report end-of-stream and deadline expiry as
//! [`ReadOutcome`] values rather than errors; hard failures surface as
//! [`EndpointError`]. Closing is idempotent, and any read or write after a
//! close fails with [`EndpointError::Closed`].

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The OS handle an endpoint half wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Dialed or accepted socket connection.
    Socket,
    /// Listened or opened named-pipe connection.
    NamedPipe,
    /// Standard input of a carrier process.
    CarrierStdin,
    /// Standard output of a carrier process.
    CarrierStdout,
}

impl EndpointKind {
    /// Whether reads on this kind can carry an idle deadline.
    ///
    /// Subprocess pipes have no deadline primitive; they end when the
    /// carrier exits or closes its output.
    pub const fn supports_deadline(self) -> bool {
        matches!(self, Self::Socket | Self::NamedPipe)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::NamedPipe => "named-pipe",
            Self::CarrierStdin => "carrier-stdin",
            Self::CarrierStdout => "carrier-stdout",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were placed at the start of the buffer.
    Data(usize),
    /// The peer closed its side of the stream.
    EndOfStream,
    /// The read deadline expired with no data available.
    TimedOut,
}

/// What a direction should do when its read deadline expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Treat the silence as the end of the exchange and stop the session.
    #[default]
    EndSession,
    /// Keep waiting for more data.
    KeepWaiting,
}

/// Per-read idle deadline, re-armed on every read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDeadline {
    pub after: Duration,
    pub on_expiry: IdlePolicy,
}

impl ReadDeadline {
    pub const fn end_session_after(after: Duration) -> Self {
        Self {
            after,
            on_expiry: IdlePolicy::EndSession,
        }
    }
}

/// Errors from endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Endpoint is closed")]
    Closed,

    #[error("Read deadlines are not supported on {0} endpoints")]
    DeadlineUnsupported(EndpointKind),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Readable half of an endpoint.
pub struct EndpointReader {
    kind: EndpointKind,
    inner: Option<BoxedReader>,
    deadline: Option<ReadDeadline>,
}

impl EndpointReader {
    pub fn new<R>(kind: EndpointKind, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            kind,
            inner: Some(Box::new(reader)),
            deadline: None,
        }
    }

    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub const fn read_deadline(&self) -> Option<ReadDeadline> {
        self.deadline
    }

    /// Arm (or clear, with `None`) the idle deadline applied to every read.
    pub fn set_read_deadline(
        &mut self,
        deadline: Option<ReadDeadline>,
    ) -> Result<(), EndpointError> {
        if deadline.is_some() && !self.kind.supports_deadline() {
            return Err(EndpointError::DeadlineUnsupported(self.kind));
        }
        self.deadline = deadline;
        Ok(())
    }

    /// Read into `buf`, honouring the armed deadline.
    ///
    /// Cancel-safe: dropping the future before completion loses no data.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, EndpointError> {
        let reader = self.inner.as_mut().ok_or(EndpointError::Closed)?;
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let result = match self.deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline.after, reader.read(buf)).await {
                    Ok(result) => result,
                    Err(_) => return Ok(ReadOutcome::TimedOut),
                }
            }
            None => reader.read(buf).await,
        };

        match result {
            Ok(0) => Ok(ReadOutcome::EndOfStream),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) => Err(EndpointError::Io(e)),
        }
    }

    /// Release the handle. Returns `true` only for the call that closed it.
    pub fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }

    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for EndpointReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointReader")
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Writable half of an endpoint.
pub struct EndpointWriter {
    kind: EndpointKind,
    inner: Option<BoxedWriter>,
}

impl EndpointWriter {
    pub fn new<W>(kind: EndpointKind, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            kind,
            inner: Some(Box::new(writer)),
        }
    }

    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Write the whole buffer, retrying short writes until it is flushed.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), EndpointError> {
        let writer = self.inner.as_mut().ok_or(EndpointError::Closed)?;
        let mut written = 0;
        while written < buf.len() {
            let n = writer.write(&buf[written..]).await?;
            if n == 0 {
                return Err(EndpointError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("{} accepted zero bytes", self.kind),
                )));
            }
            written += n;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Shut down and release the handle. Returns `true` only for the call
    /// that closed it; later calls are no-ops.
    pub async fn close(&mut self) -> Result<bool, EndpointError> {
        let Some(mut writer) = self.inner.take() else {
            return Ok(false);
        };
        match writer.shutdown().await {
            Ok(()) => Ok(true),
            // The peer may already be gone; the handle is released either way.
            Err(e) if is_disconnect(&e) => Ok(true),
            Err(e) => Err(EndpointError::Io(e)),
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for EndpointWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointWriter")
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionReset
    )
}

/// A duplex transport endpoint.
#[derive(Debug)]
pub struct Endpoint {
    reader: EndpointReader,
    writer: EndpointWriter,
}

impl Endpoint {
    pub const fn from_parts(reader: EndpointReader, writer: EndpointWriter) -> Self {
        Self { reader, writer }
    }

    /// Wrap any duplex stream (named pipes, in-memory streams).
    pub fn from_stream<S>(kind: EndpointKind, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(
            EndpointReader::new(kind, read_half),
            EndpointWriter::new(kind, write_half),
        )
    }

    /// Wrap a connected Unix socket.
    #[cfg(unix)]
    pub fn from_unix_stream(stream: tokio::net::UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(
            EndpointReader::new(EndpointKind::Socket, read_half),
            EndpointWriter::new(EndpointKind::Socket, write_half),
        )
    }

    /// Wrap a carrier's stdio pair: reads come from its stdout, writes go to
    /// its stdin.
    pub fn from_carrier_stdio(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::from_parts(
            EndpointReader::new(EndpointKind::CarrierStdout, stdout),
            EndpointWriter::new(EndpointKind::CarrierStdin, stdin),
        )
    }

    pub const fn reader_kind(&self) -> EndpointKind {
        self.reader.kind()
    }

    pub const fn writer_kind(&self) -> EndpointKind {
        self.writer.kind()
    }

    pub fn set_read_deadline(
        &mut self,
        deadline: Option<ReadDeadline>,
    ) -> Result<(), EndpointError> {
        self.reader.set_read_deadline(deadline)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, EndpointError> {
        self.reader.read(buf).await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), EndpointError> {
        self.writer.write_all(buf).await
    }

    /// Borrow both halves at once so two directions can run concurrently.
    pub fn halves_mut(&mut self) -> (&mut EndpointReader, &mut EndpointWriter) {
        (&mut self.reader, &mut self.writer)
    }

    /// Close both halves. Returns `true` if this call released anything.
    pub async fn close(&mut self) -> Result<bool, EndpointError> {
        let read_closed = self.reader.close();
        let write_closed = self.writer.close().await?;
        Ok(read_closed || write_closed)
    }

    pub const fn is_closed(&self) -> bool {
        self.reader.is_closed() && self.writer.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn memory_pair(kind: EndpointKind) -> (Endpoint, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64);
        (Endpoint::from_stream(kind, ours), theirs)
    }

    #[tokio::test]
    async fn read_reports_data_then_end_of_stream() {
        let (mut endpoint, mut peer) = memory_pair(EndpointKind::Socket);
        peer.write_all(b"hello").await.unwrap();
        drop(peer);

        let mut buf = [0u8; 16];
        assert_eq!(endpoint.read(&mut buf).await.unwrap(), ReadOutcome::Data(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(
            endpoint.read(&mut buf).await.unwrap(),
            ReadOutcome::EndOfStream
        );
    }

    #[tokio::test]
    async fn deadline_expiry_is_not_an_error() {
        let (mut endpoint, _peer) = memory_pair(EndpointKind::Socket);
        endpoint
            .set_read_deadline(Some(ReadDeadline::end_session_after(
                Duration::from_millis(20),
            )))
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            endpoint.read(&mut buf).await.unwrap(),
            ReadOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn carrier_stdout_rejects_deadlines() {
        let (ours, _theirs) = tokio::io::duplex(8);
        let mut reader = EndpointReader::new(EndpointKind::CarrierStdout, ours);
        let err = reader
            .set_read_deadline(Some(ReadDeadline::end_session_after(Duration::from_secs(1))))
            .unwrap_err();
        assert!(matches!(
            err,
            EndpointError::DeadlineUnsupported(EndpointKind::CarrierStdout)
        ));
        reader.set_read_deadline(None).unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_later_io_fails() {
        let (mut endpoint, _peer) = memory_pair(EndpointKind::NamedPipe);

        assert!(endpoint.close().await.unwrap());
        assert!(!endpoint.close().await.unwrap());
        assert!(endpoint.is_closed());

        let mut buf = [0u8; 4];
        assert!(matches!(
            endpoint.read(&mut buf).await,
            Err(EndpointError::Closed)
        ));
        assert!(matches!(
            endpoint.write_all(b"x").await,
            Err(EndpointError::Closed)
        ));
    }

    #[tokio::test]
    async fn write_all_flushes_larger_than_pipe_capacity() {
        let (mut endpoint, mut peer) = memory_pair(EndpointKind::Socket);
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

        let expected = payload.clone();
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 100];
            while received.len() < expected.len() {
                let n = peer.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        endpoint.write_all(&payload).await.unwrap();
        assert_eq!(reader.await.unwrap(), payload);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_stream_close_signals_peer_eof() {
        let (ours, mut theirs) = tokio::net::UnixStream::pair().unwrap();
        let mut endpoint = Endpoint::from_unix_stream(ours);
        assert_eq!(endpoint.reader_kind(), EndpointKind::Socket);

        endpoint.write_all(b"bye").await.unwrap();
        endpoint.close().await.unwrap();

        let mut received = Vec::new();
        theirs.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
    }
}
