//! Concurrent drain of a child's stdout and stderr.
//!
//! One reader task per pipe feeds a shared unbounded channel with
//! `(line, stream)` items followed by a single `Done` marker. The
//! consuming side logs each non-blank line at the stream's level and
//! returns once both markers have arrived.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::log::{Level, Logger};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn level(self) -> Level {
        match self {
            Stream::Stdout => Level::Stdout,
            Stream::Stderr => Level::Stderr,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

enum Intake {
    Line(Vec<u8>, Stream),
    Done(Stream),
}

/// Line counts of what was logged (blank lines excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

/// Drain both pipes into `logger` until each reaches end-of-stream.
///
/// A missing pipe counts as already closed. Invalid UTF-8 is replaced
/// with U+FFFD rather than dropping the line.
pub async fn capture<O, E>(stdout: Option<O>, stderr: Option<E>, logger: &Logger) -> CaptureStats
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut open = 0;

    if let Some(pipe) = stdout {
        spawn_reader(pipe, Stream::Stdout, tx.clone());
        open += 1;
    }
    if let Some(pipe) = stderr {
        spawn_reader(pipe, Stream::Stderr, tx.clone());
        open += 1;
    }
    // Only the readers hold senders from here on.
    drop(tx);

    let mut stats = CaptureStats::default();
    while open > 0 {
        match rx.recv().await {
            Some(Intake::Line(bytes, stream)) => {
                let decoded = String::from_utf8_lossy(&bytes);
                let line = decoded.trim();
                if line.is_empty() {
                    continue;
                }
                logger.log(stream.level(), line);
                match stream {
                    Stream::Stdout => stats.stdout_lines += 1,
                    Stream::Stderr => stats.stderr_lines += 1,
                }
            }
            Some(Intake::Done(stream)) => {
                debug!(stream = stream.as_str(), "stream closed");
                open -= 1;
            }
            // Every reader is gone (e.g. a task panicked); nothing more can arrive.
            None => break,
        }
    }
    stats
}

fn spawn_reader<R>(pipe: R, stream: Stream, tx: mpsc::UnboundedSender<Intake>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Intake::Line(buf.clone(), stream)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream = stream.as_str(), error = %e, "pipe read failed, closing reader");
                    break;
                }
            }
        }
        let _ = tx.send(Intake::Done(stream));
    });
}
