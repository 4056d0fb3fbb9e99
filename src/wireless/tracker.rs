//! Bounded queue correlating outstanding publishes with completion outcomes

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::WirelessError;

/// Depth of the completion queue
pub const COMPLETION_QUEUE_DEPTH: usize = 10;

/// How long the producer side waits on a full queue before dropping a result
pub const ENQUEUE_WAIT: Duration = Duration::from_secs(10);

/// Outcome of a single publish, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Success,
    Failure,
}

/// Completion record for one publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishResult {
    pub message_id: u16,
    pub outcome: PublishOutcome,
}

/// FIFO of publish completions
///
/// Producer is the coordinator task applying transport events; consumer is
/// any task awaiting confirmation. Results are matched in arrival order
/// only, never by message id: acknowledgements are ordered per connection,
/// so a single waiting caller always receives its own outcome, but with
/// publishes in flight from several tasks the dequeued result may belong to
/// another caller.
pub struct PublishTracker {
    tx: mpsc::Sender<PublishResult>,
    rx: Mutex<mpsc::Receiver<PublishResult>>,
}

impl PublishTracker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(COMPLETION_QUEUE_DEPTH);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue a completion, waiting up to `wait` if the queue is full
    ///
    /// On timeout the result is dropped and `QueueFull` reported; the
    /// original publisher is never notified.
    pub(crate) async fn record(
        &self,
        result: PublishResult,
        wait: Duration,
    ) -> Result<(), WirelessError> {
        debug!(
            "Recording publish completion: id={} outcome={:?}",
            result.message_id, result.outcome
        );
        self.tx
            .send_timeout(result, wait)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => WirelessError::QueueFull,
                SendTimeoutError::Closed(_) => {
                    WirelessError::Driver("completion queue closed".to_string())
                }
            })
    }

    /// Dequeue the next available completion or time out
    ///
    /// The result's `message_id` is the transport's wire packet id, which
    /// lives in a different id space than the counter value `publish`
    /// returned; match completions to publishes by arrival order, never by
    /// comparing the two ids.
    pub async fn wait_for_publish(&self, timeout: Duration) -> Result<PublishResult, WirelessError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(WirelessError::Driver(
                "completion queue closed".to_string(),
            )),
            Err(_) => Err(WirelessError::PublishTimeout(timeout)),
        }
    }
}

impl Default for PublishTracker {
    fn default() -> Self {
        Self::new()
    }
}
