//! Output channel
//!
//! Responses and pushes from any task go through one unbounded mpsc channel
//! to a single writer, so lines never interleave mid-object.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::protocol::Response;

#[derive(Debug)]
pub enum Outbound {
    Message(Response),
    /// Acknowledged once everything queued before it has been written
    Flush(oneshot::Sender<()>),
}

pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Cloneable handle for queueing output lines
///
/// Sending never blocks; after the writer is gone messages are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl EventSink {
    pub fn channel() -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue one message. False if the writer has stopped.
    pub fn send(&self, response: Response) -> bool {
        self.sender.send(Outbound::Message(response)).is_ok()
    }

    /// Wait until everything queued so far has been written
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Outbound::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Write each message as one JSON line, flushing after every line.
/// Runs until every `EventSink` is dropped or a write fails.
pub async fn write_lines<W>(mut receiver: OutboundReceiver, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = receiver.recv().await {
        match outbound {
            Outbound::Message(response) => {
                let mut line = match serde_json::to_string(&response) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_line(&mut writer, line.as_bytes()).await {
                    error!(error = %e, "Output closed");
                    break;
                }
            }
            Outbound::Flush(ack) => {
                if let Err(e) = writer.flush().await {
                    error!(error = %e, "Failed to flush output");
                }
                let _ = ack.send(());
            }
        }
    }
    debug!("Output writer stopped");
}

async fn write_line<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}
