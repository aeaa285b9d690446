//! Prompt delivery to the paired device.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::PermissionError;

use super::types::PermissionPrompt;

/// Publishes permission prompts onto the paired device's event stream.
///
/// The transport behind it (SSE, WebSocket, push) is the gateway shell's
/// business; the bridge only needs fire-and-forget delivery.
#[async_trait]
pub trait PromptPublisher: Send + Sync {
    async fn publish(&self, prompt: PermissionPrompt) -> Result<(), PermissionError>;
}

/// Default publisher: a broadcast channel every connected event stream
/// subscribes to.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PermissionPrompt>,
}

impl BroadcastPublisher {
    /// Channel capacity bounds how many unconsumed prompts a slow subscriber
    /// can lag behind before it starts missing them.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe a new event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PermissionPrompt> {
        self.tx.subscribe()
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl PromptPublisher for BroadcastPublisher {
    async fn publish(&self, prompt: PermissionPrompt) -> Result<(), PermissionError> {
        // No subscriber is not an error: the bridge still waits out its
        // timeout, and a device that connects mid-wait can answer via the
        // pending request id.
        if let Err(e) = self.tx.send(prompt) {
            tracing::debug!(error = %e, "permission prompt published with no subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::types::{PermissionPrompt, PermissionRequest};

    fn prompt() -> PermissionPrompt {
        let req = PermissionRequest::new(
            "toolu_1".to_string(),
            "s1".to_string(),
            None,
            "Bash".to_string(),
            serde_json::json!({"command": "ls"}),
        );
        PermissionPrompt::from_request(&req, std::time::Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let publisher = BroadcastPublisher::default();
        let mut rx = publisher.subscribe();

        publisher.publish(prompt()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.request_id, "toolu_1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(prompt()).await.unwrap();
    }
}
