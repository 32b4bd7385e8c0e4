//! Command Queue - bounded ingress in front of the single writer
//!
//! [`spawn_processor`] moves a [`CommandProcessor`] into its own tokio task
//! together with the only `mpsc::Receiver` of a bounded channel. Producers
//! hold cloneable [`CommandQueue`] handles; each submission carries a
//! `oneshot` sender on which the task replies once the command has been
//! applied (or rejected).
//!
//! The task processes messages strictly in arrival order. It exits when every
//! handle is dropped, when [`CommandQueue::shutdown`] is called (after
//! draining what was already accepted), or after a fatal error. In the last
//! case the channel is closed and every later submission fails with
//! [`OutlineError::ProcessorStopped`].

use crate::operations::commands::{CommandEnvelope, CommandOutcome};
use crate::operations::error::OutlineError;
use crate::operations::processor::CommandProcessor;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

type CommandResult = Result<CommandOutcome, OutlineError>;

/// Messages sent from `CommandQueue` to the processor task
enum QueueMessage {
    Submit {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<CommandResult>,
    },

    /// Stop accepting; apply what is already queued, then exit
    Shutdown,
}

/// Start the processor task
///
/// Returns the producer handle and the task's join handle.
pub fn spawn_processor(
    processor: CommandProcessor,
    capacity: usize,
) -> (CommandQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run_processor(processor, rx));
    (CommandQueue { tx }, handle)
}

/// Cloneable handle for submitting commands
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<QueueMessage>,
}

impl CommandQueue {
    /// Submit and wait for the result, suspending while the queue is full
    pub async fn submit(&self, envelope: CommandEnvelope) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueMessage::Submit { envelope, reply })
            .await
            .map_err(|_| OutlineError::ProcessorStopped)?;
        PendingCommand { rx }.await
    }

    /// Enqueue without waiting for capacity
    ///
    /// Fails with `QueueSaturated` when the queue is full. Once accepted the
    /// command is applied even if the returned future is dropped.
    pub fn try_submit(&self, envelope: CommandEnvelope) -> Result<PendingCommand, OutlineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(QueueMessage::Submit { envelope, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => OutlineError::QueueSaturated,
                mpsc::error::TrySendError::Closed(_) => OutlineError::ProcessorStopped,
            })?;
        Ok(PendingCommand { rx })
    }

    /// Ask the processor to exit once the commands queued so far are applied
    pub async fn shutdown(&self) -> Result<(), OutlineError> {
        self.tx
            .send(QueueMessage::Shutdown)
            .await
            .map_err(|_| OutlineError::ProcessorStopped)
    }

    /// Whether the processor task is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of an accepted command, resolved once the processor replies
pub struct PendingCommand {
    rx: oneshot::Receiver<CommandResult>,
}

impl Future for PendingCommand {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(OutlineError::ProcessorStopped)))
    }
}

/// The consumer loop
async fn run_processor(processor: CommandProcessor, mut rx: mpsc::Receiver<QueueMessage>) {
    tracing::info!("command processor started");

    while let Some(message) = rx.recv().await {
        match message {
            QueueMessage::Submit { envelope, reply } => {
                let span = tracing::debug_span!(
                    "command",
                    event_id = %envelope.event_id,
                    command = envelope.command.name(),
                );

                let result = processor.process(&envelope).instrument(span.clone()).await;
                let fatal = span.in_scope(|| match &result {
                    Ok(CommandOutcome::Applied(events)) => {
                        tracing::debug!(events = events.len(), "command applied");
                        false
                    }
                    Ok(CommandOutcome::Noop) => {
                        tracing::debug!("command had nothing to do");
                        false
                    }
                    Ok(CommandOutcome::Duplicate) => {
                        tracing::debug!("command already applied");
                        false
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!(user_id = %envelope.user_id, "fatal error, halting processor: {}", e);
                        true
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %envelope.user_id, "command rejected: {}", e);
                        false
                    }
                });

                // The caller may have stopped waiting; the command stands either way
                let _ = reply.send(result);

                if fatal {
                    break;
                }
            }
            QueueMessage::Shutdown => {
                rx.close();
            }
        }
    }

    // Anything still buffered after a fatal halt is answered, never applied
    rx.close();
    while let Ok(message) = rx.try_recv() {
        if let QueueMessage::Submit { reply, .. } = message {
            let _ = reply.send(Err(OutlineError::ProcessorStopped));
        }
    }

    tracing::info!("command processor stopped");
}
