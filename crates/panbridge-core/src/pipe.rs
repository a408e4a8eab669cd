//! Line-delimited JSON link to a worker running in another process.
//!
//! Each queued [`Command`](crate::message::Command) is written as one JSON
//! object per line; each line read back is decoded as an
//! [`Event`] and pushed onto the inbound queue. Lines that do not decode,
//! invalid UTF-8 included, are logged and skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::ShutdownSignal;
use crate::message::Event;
use crate::queue::WorkerEndpoint;

/// Errors from the worker pipe.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("worker pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Counters reported when the pipe closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub commands_written: u64,
    pub events_read: u64,
    pub lines_skipped: u64,
}

pub struct JsonLinesWorker<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> JsonLinesWorker<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Shuttle messages until shutdown, worker EOF, or the bridge dropping
    /// its command sender.
    pub async fn run(
        self,
        mut endpoint: WorkerEndpoint,
        mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<PipeStats, PipeError> {
        let Self { reader, mut writer } = self;
        let mut stats = PipeStats::default();
        let mut segments = reader.split(b'\n');

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Worker pipe shutting down");
                    break;
                }
                command = endpoint.commands.recv() => {
                    let Some(command) = command else {
                        debug!("Command queue closed");
                        break;
                    };
                    let mut line = serde_json::to_string(&command)?;
                    line.push('\n');
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await?;
                    stats.commands_written += 1;
                }
                segment = segments.next_segment() => {
                    let Some(segment) = segment? else {
                        info!("Worker closed its output");
                        break;
                    };
                    if segment.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match Event::from_slice(&segment) {
                        Ok(event) => {
                            endpoint.events.send(event);
                            stats.events_read += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed worker line");
                            stats.lines_skipped += 1;
                        }
                    }
                }
            }
        }

        info!(
            commands = stats.commands_written,
            events = stats.events_read,
            skipped = stats.lines_skipped,
            "Worker pipe closed"
        );
        Ok(stats)
    }
}
