//! The permission bridge state machine.
//!
//! One pending entry per tool-use correlation id, holding the producer half
//! of a capacity-one rendezvous. Exactly one write is expected; whichever of
//! response-delivery and timeout removes the entry first wins, and the loser
//! becomes a no-op. A late response can therefore never block, corrupt
//! state, or be observed by the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, oneshot};

use super::events::PromptPublisher;
use super::pattern::{DecisionMemory, input_shape};
use super::types::{
    DecisionScope, PermissionDecision, PermissionPrompt, PermissionReply, PermissionRequest,
    PermissionResponse,
};

/// Default wait for a device decision.
const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// Correlates blocking permission requests with device decisions.
///
/// Cheap to clone; clones share the pending table and collaborators.
#[derive(Clone)]
pub struct PermissionBridge {
    pending: Arc<RwLock<HashMap<String, oneshot::Sender<PermissionResponse>>>>,
    memory: Option<Arc<dyn DecisionMemory>>,
    publisher: Option<Arc<dyn PromptPublisher>>,
    wait: Duration,
}

impl PermissionBridge {
    /// Bridge with no collaborators: every request answers `ask`.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            memory: None,
            publisher: None,
            wait: DEFAULT_WAIT,
        }
    }

    /// Attach a pattern memory for fast-path decisions.
    pub fn with_memory(mut self, memory: Arc<dyn DecisionMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach the prompt publisher that reaches the paired device.
    pub fn with_publisher(mut self, publisher: Arc<dyn PromptPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Override how long to wait for a device decision.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Resolve a permission request.
    ///
    /// Blocks the calling task until a remembered pattern matches, the
    /// paired device answers, or the wait elapses. Timeout is not an error:
    /// the reply is `ask`, handing the decision back to the local prompt.
    pub async fn request(&self, request: PermissionRequest) -> PermissionReply {
        // Fast path: a remembered pattern resolves without a round trip.
        if let Some(memory) = &self.memory
            && let Some(decision) = memory
                .lookup(&request.session_id, &request.tool_name, &request.tool_input)
                .await
        {
            tracing::debug!(
                request_id = %request.id,
                tool = %request.tool_name,
                ?decision,
                "permission resolved from pattern memory"
            );
            return PermissionReply::remembered(decision);
        }

        let Some(publisher) = &self.publisher else {
            tracing::warn!(
                request_id = %request.id,
                "no permission publisher configured, falling back to local prompt"
            );
            return PermissionReply::ask("permission_manager_not_configured");
        };

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(request.id.clone(), tx);

        let prompt = PermissionPrompt::from_request(&request, self.wait);
        if let Err(e) = publisher.publish(prompt).await {
            self.pending.write().await.remove(&request.id);
            tracing::warn!(request_id = %request.id, error = %e, "failed to publish permission prompt");
            return PermissionReply::ask("permission_manager_not_configured");
        }

        tracing::info!(
            request_id = %request.id,
            tool = %request.tool_name,
            "waiting for remote permission decision"
        );

        match tokio::time::timeout(self.wait, rx).await {
            Ok(Ok(response)) => {
                self.persist_session_pattern(&request, &response).await;
                PermissionReply::from(response)
            }
            // Producer dropped without sending; nothing left to wait for.
            Ok(Err(_)) => {
                self.pending.write().await.remove(&request.id);
                PermissionReply::ask("timeout")
            }
            Err(_) => {
                // The receiver is already dropped. A racing response either
                // took the slot and its send was a no-op, or finds nothing
                // once this remove lands; neither outcome is observable.
                self.pending.write().await.remove(&request.id);
                tracing::info!(request_id = %request.id, "permission request timed out");
                PermissionReply::ask("timeout")
            }
        }
    }

    /// Deliver a device decision for a pending request.
    ///
    /// Returns `false` when the request is unknown, already resolved, or
    /// already timed out; the response is dropped silently in that case.
    pub async fn respond(&self, request_id: &str, response: PermissionResponse) -> bool {
        let Some(tx) = self.pending.write().await.remove(request_id) else {
            tracing::debug!(request_id, "permission response for unknown or finished request");
            return false;
        };
        // The receiver may have been dropped by a timeout that lost the
        // removal race; send degenerates to a no-op then.
        tx.send(response).is_ok()
    }

    /// Number of requests currently waiting for a decision.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn persist_session_pattern(
        &self,
        request: &PermissionRequest,
        response: &PermissionResponse,
    ) {
        if response.scope != Some(DecisionScope::Session)
            || response.decision == PermissionDecision::Ask
        {
            return;
        }
        let Some(memory) = &self.memory else { return };
        let pattern = response
            .pattern
            .clone()
            .unwrap_or_else(|| input_shape(&request.tool_input));
        memory
            .remember(
                &request.session_id,
                &request.tool_name,
                &pattern,
                response.decision,
            )
            .await;
    }
}

impl Default for PermissionBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::events::BroadcastPublisher;
    use crate::permission::pattern::InMemoryDecisionMemory;

    fn request(id: &str, command: &str) -> PermissionRequest {
        PermissionRequest::new(
            id.to_string(),
            "session-1".to_string(),
            None,
            "Bash".to_string(),
            serde_json::json!({ "command": command }),
        )
    }

    fn allow_for_session(pattern: Option<&str>) -> PermissionResponse {
        PermissionResponse {
            decision: PermissionDecision::Allow,
            scope: Some(DecisionScope::Session),
            pattern: pattern.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_bridge_asks() {
        let bridge = PermissionBridge::new();
        let reply = bridge.request(request("r1", "ls")).await;
        assert_eq!(reply.decision, PermissionDecision::Ask);
        assert_eq!(
            reply.message.as_deref(),
            Some("permission_manager_not_configured")
        );
    }

    #[tokio::test]
    async fn test_memory_hit_skips_round_trip() {
        let memory = Arc::new(InMemoryDecisionMemory::new());
        memory
            .remember("session-1", "Bash", "git *", PermissionDecision::Allow)
            .await;
        // No publisher and a long wait: only the fast path can answer quickly.
        let bridge = PermissionBridge::new().with_memory(memory);

        let reply = bridge.request(request("r1", "git status")).await;
        assert_eq!(reply.decision, PermissionDecision::Allow);
        assert_eq!(reply.scope, Some(DecisionScope::Session));
    }

    #[tokio::test]
    async fn test_response_resolves_waiting_request() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_publisher(publisher.clone())
            .with_wait(Duration::from_secs(5));

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request("r1", "ls")).await })
        };

        // Wait until the request is registered, then answer it.
        while bridge.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let delivered = bridge
            .respond(
                "r1",
                PermissionResponse {
                    decision: PermissionDecision::Allow,
                    scope: Some(DecisionScope::Once),
                    pattern: None,
                },
            )
            .await;
        assert!(delivered);

        let reply = waiter.await.unwrap();
        assert_eq!(reply.decision, PermissionDecision::Allow);
        assert_eq!(reply.scope, Some(DecisionScope::Once));
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_ask() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_publisher(publisher)
            .with_wait(Duration::from_millis(50));

        let reply = bridge.request(request("r1", "ls")).await;
        assert_eq!(reply.decision, PermissionDecision::Ask);
        assert_eq!(reply.message.as_deref(), Some("timeout"));
        // The pending entry is gone and a late response is not observable.
        assert_eq!(bridge.pending_count().await, 0);
        let delivered = bridge
            .respond("r1", allow_for_session(None))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_session_scope_persists_pattern() {
        let memory = Arc::new(InMemoryDecisionMemory::new());
        let publisher = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_memory(memory)
            .with_publisher(publisher)
            .with_wait(Duration::from_secs(5));

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request("r1", "git push")).await })
        };
        while bridge.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bridge.respond("r1", allow_for_session(Some("git *"))).await;
        waiter.await.unwrap();

        // The next matching invocation resolves from memory.
        let reply = bridge.request(request("r2", "git pull")).await;
        assert_eq!(reply.decision, PermissionDecision::Allow);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_once_scope_is_not_persisted() {
        let memory = Arc::new(InMemoryDecisionMemory::new());
        let publisher = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_memory(memory)
            .with_publisher(publisher)
            .with_wait(Duration::from_millis(50));

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request("r1", "ls")).await })
        };
        while bridge.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bridge
            .respond(
                "r1",
                PermissionResponse {
                    decision: PermissionDecision::Allow,
                    scope: Some(DecisionScope::Once),
                    pattern: None,
                },
            )
            .await;
        waiter.await.unwrap();

        // Same command again: no memory entry, so this times out to ask.
        let reply = bridge.request(request("r2", "ls")).await;
        assert_eq!(reply.decision, PermissionDecision::Ask);
    }

    #[tokio::test]
    async fn test_second_response_is_dropped() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_publisher(publisher)
            .with_wait(Duration::from_secs(5));

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request("r1", "ls")).await })
        };
        while bridge.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let first = bridge.respond("r1", allow_for_session(None)).await;
        let second = bridge
            .respond(
                "r1",
                PermissionResponse {
                    decision: PermissionDecision::Deny,
                    scope: None,
                    pattern: None,
                },
            )
            .await;
        assert!(first);
        assert!(!second);

        // The first write is the one the caller observes.
        let reply = waiter.await.unwrap();
        assert_eq!(reply.decision, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn test_prompt_is_published_to_event_stream() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut rx = publisher.subscribe();
        let bridge = PermissionBridge::new()
            .with_publisher(publisher)
            .with_wait(Duration::from_millis(50));

        let _ = bridge.request(request("r1", "cargo build")).await;
        let prompt = rx.recv().await.unwrap();
        assert_eq!(prompt.request_id, "r1");
        assert_eq!(prompt.tool_name, "Bash");
        assert_eq!(prompt.target, Some("cargo build".to_string()));
    }
}
