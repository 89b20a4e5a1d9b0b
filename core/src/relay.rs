//! Stream relays: concurrent tasks moving bytes between child pipes and
//! the configured destinations.
//!
//! One relay task runs per wired stream: a stdin feeder and a drainer for
//! each of stdout and stderr. The drainers run concurrently with the
//! controller's wait on the child; OS pipes have finite kernel buffer
//! capacity, so a child producing more than that capacity would deadlock
//! if nothing drained while the parent waited for exit.

use crate::capture::{CaptureBuffer, StreamOutput};
use crate::spec::{CaptureLimit, StreamSettings};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RELAY_CHUNK: usize = 8 * 1024;

/// Which of the parent's own standard streams a relay echoes to
#[derive(Debug, Clone, Copy)]
pub(crate) enum ConsoleStream {
    Stdout,
    Stderr,
}

/// The destination set for one output stream: capture buffer, optional
/// mirror file, optional console echo.
///
/// Shared behind a mutex because `redirect_error_stream` routes the stderr
/// drainer into the stdout destinations, in which case two relays feed the
/// same sink.
#[derive(Debug)]
pub(crate) struct StreamSink {
    capture: CaptureBuffer,
    file: Option<File>,
    echo: Option<ConsoleStream>,
    io_error: Option<String>,
}

pub(crate) type SharedSink = Arc<Mutex<StreamSink>>;

impl StreamSink {
    /// Open the destination set for one stream. The mirror file is created
    /// (truncating any previous contents) at relay start; a file that
    /// cannot be created is recorded and skipped so draining still happens.
    pub(crate) async fn open(settings: &StreamSettings, console: ConsoleStream) -> SharedSink {
        let mut io_error = None;
        let file = match &settings.output_file {
            Some(path) => match File::create(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Failed to create mirror file {}: {}", path.display(), e);
                    io_error = Some(e.to_string());
                    None
                }
            },
            None => None,
        };

        Arc::new(Mutex::new(Self {
            capture: CaptureBuffer::new(settings.capture),
            file,
            echo: settings.echo_to_console.then_some(console),
            io_error,
        }))
    }

    /// Forward one chunk to every viable destination. A destination that
    /// fails is dropped and the first failure recorded; draining continues
    /// and the child is never aborted.
    pub(crate) async fn write(&mut self, chunk: &[u8]) {
        self.capture.append(chunk);

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(chunk).await {
                warn!("Mirror file write failed, dropping destination: {}", e);
                self.record_error(&e);
                self.file = None;
            }
        }

        if let Some(console) = self.echo {
            if let Err(e) = echo_chunk(console, chunk).await {
                warn!("Console echo failed, dropping destination: {}", e);
                self.record_error(&e);
                self.echo = None;
            }
        }
    }

    /// Keep the first stream I/O failure for the final [`StreamOutput`].
    pub(crate) fn record_error(&mut self, e: &std::io::Error) {
        if self.io_error.is_none() {
            self.io_error = Some(e.to_string());
        }
    }

    /// Flush and close the destinations, yielding the final stream result.
    /// Must only be called after every relay feeding this sink has joined.
    pub(crate) async fn finish(&mut self) -> StreamOutput {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!("Mirror file flush failed: {}", e);
                self.record_error(&e);
            }
        }
        let capture = std::mem::replace(&mut self.capture, CaptureBuffer::new(CaptureLimit::Bytes(0)));
        capture.into_output(self.io_error.take())
    }
}

async fn echo_chunk(console: ConsoleStream, chunk: &[u8]) -> std::io::Result<()> {
    match console {
        ConsoleStream::Stdout => {
            let mut out = tokio::io::stdout();
            out.write_all(chunk).await?;
            out.flush().await
        }
        ConsoleStream::Stderr => {
            let mut err = tokio::io::stderr();
            err.write_all(chunk).await?;
            err.flush().await
        }
    }
}

/// Spawn a drainer task that reads `reader` to end-of-stream, forwarding
/// every chunk into `sink` before requesting the next one.
pub(crate) fn spawn_drainer<R>(mut reader: R, sink: SharedSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; RELAY_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().await.write(&chunk[..n]).await,
                Err(e) => {
                    // The pipe closing underneath us ends the relay, not the
                    // run; the failure still shows up in the stream result.
                    debug!("Pipe read ended with error: {}", e);
                    sink.lock().await.record_error(&e);
                    break;
                }
            }
        }
    })
}

/// Input for the stdin feeder, resolved by the controller before launch:
/// either the bytes to write or an already-opened file to stream.
#[derive(Debug)]
pub(crate) enum StdinFeed {
    Buffer(Vec<u8>),
    File(File),
}

/// Spawn the stdin feeder: write the configured input bytes to the child's
/// stdin, then close the pipe so the child observes end-of-input. The pipe
/// is closed even when zero bytes are written.
pub(crate) fn spawn_feeder(mut stdin: ChildStdin, feed: StdinFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = match feed {
            StdinFeed::Buffer(bytes) => stdin.write_all(&bytes).await,
            StdinFeed::File(mut file) => tokio::io::copy(&mut file, &mut stdin).await.map(|_| ()),
        };
        if let Err(e) = result {
            // A child that exits without reading its stdin breaks the pipe;
            // that is an expected end of the relay.
            debug!("Stdin feeder stopped early: {}", e);
        }
        if let Err(e) = stdin.shutdown().await {
            debug!("Closing child stdin failed: {}", e);
        }
        // Dropping the handle closes the pipe.
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CaptureLimit;

    #[tokio::test]
    async fn test_drainer_captures_to_eof() {
        let settings = StreamSettings {
            capture: CaptureLimit::Unbounded,
            ..Default::default()
        };
        let sink = StreamSink::open(&settings, ConsoleStream::Stdout).await;

        let task = spawn_drainer(&b"hello world"[..], sink.clone());
        task.await.unwrap();

        let output = sink.lock().await.finish().await;
        assert_eq!(output.bytes(), b"hello world");
        assert_eq!(output.produced(), 11);
        assert!(!output.truncated());
        assert!(output.io_error().is_none());
    }

    #[tokio::test]
    async fn test_mirror_file_receives_untruncated_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("mirror.log");

        let settings = StreamSettings {
            capture: CaptureLimit::Bytes(3),
            output_file: Some(mirror.clone()),
            echo_to_console: false,
        };
        let sink = StreamSink::open(&settings, ConsoleStream::Stdout).await;

        let task = spawn_drainer(&b"abcdef"[..], sink.clone());
        task.await.unwrap();

        let output = sink.lock().await.finish().await;
        assert_eq!(output.bytes(), b"abc");
        assert!(output.truncated());

        let mirrored = std::fs::read(&mirror).unwrap();
        assert_eq!(mirrored, b"abcdef");
    }

    #[tokio::test]
    async fn test_two_relays_share_a_sink() {
        let settings = StreamSettings {
            capture: CaptureLimit::Unbounded,
            ..Default::default()
        };
        let sink = StreamSink::open(&settings, ConsoleStream::Stdout).await;

        let a = spawn_drainer(&b"aaaa"[..], sink.clone());
        let b = spawn_drainer(&b"bbbb"[..], sink.clone());
        a.await.unwrap();
        b.await.unwrap();

        let output = sink.lock().await.finish().await;
        assert_eq!(output.produced(), 8);
        assert_eq!(output.bytes().len(), 8);
    }

    #[tokio::test]
    async fn test_read_error_is_recorded_in_stream_result() {
        use std::pin::Pin;
        use std::task::{Context, Poll};
        use tokio::io::ReadBuf;

        // Yields one chunk, then fails the way a reset pipe does.
        struct FailingReader {
            sent: bool,
        }

        impl AsyncRead for FailingReader {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                let this = self.get_mut();
                if this.sent {
                    Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "pipe reset",
                    )))
                } else {
                    this.sent = true;
                    buf.put_slice(b"partial");
                    Poll::Ready(Ok(()))
                }
            }
        }

        let settings = StreamSettings {
            capture: CaptureLimit::Unbounded,
            ..Default::default()
        };
        let sink = StreamSink::open(&settings, ConsoleStream::Stdout).await;

        let task = spawn_drainer(FailingReader { sent: false }, sink.clone());
        task.await.unwrap();

        let output = sink.lock().await.finish().await;
        assert_eq!(output.bytes(), b"partial");
        assert_eq!(
            output.io_error().map(|e| e.contains("pipe reset")),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_unwritable_mirror_file_is_recorded_not_fatal() {
        let settings = StreamSettings {
            capture: CaptureLimit::Unbounded,
            output_file: Some("/nonexistent-dir/mirror.log".into()),
            echo_to_console: false,
        };
        let sink = StreamSink::open(&settings, ConsoleStream::Stdout).await;

        let task = spawn_drainer(&b"still captured"[..], sink.clone());
        task.await.unwrap();

        let output = sink.lock().await.finish().await;
        assert_eq!(output.bytes(), b"still captured");
        assert!(output.io_error().is_some());
    }
}
