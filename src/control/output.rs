//! Live forwarding of the managed server's output streams

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::install::core::ProgressReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Event prefix identifying the stream
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Stdout => "📤 [STDOUT]",
            Self::Stderr => "🔴 [STDERR]",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Forward every line of `reader` as a `Progress` event until the stream
/// closes, the consumer goes away or `cancel` fires.
///
/// The reader is dropped when the task returns, closing our end of the pipe.
pub fn spawn_line_forwarder<R>(
    reader: R,
    stream: OutputStream,
    reporter: ProgressReporter,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let prefix = stream.prefix();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} forwarder cancelled", stream.label());
                    break;
                }
                next = lines.next_line() => next,
            };

            match next {
                Ok(Some(line)) => {
                    if !reporter.forward(format!("{prefix} {line}")).await {
                        break;
                    }
                }
                Ok(None) => {
                    reporter.forward(format!("{prefix} Stream ended")).await;
                    break;
                }
                Err(e) => {
                    reporter
                        .forward(format!("❌ Error reading {}: {}", stream.label(), e))
                        .await;
                    break;
                }
            }
        }
    })
}
