//! Human approval gate for pairing-token redemption.
//!
//! When gating is enabled, a pairing token cannot be redeemed until the
//! operator approves it. Each pairing nonce moves through
//! `absent -> pending -> approved | rejected`; the decision persists until
//! the token is redeemed or expires, then the record is cleared.
//!
//! Operator-facing endpoints address approvals by request id, so the nonce
//! never leaves the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ApprovalError;

/// Decision state of a pairing approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

/// A pending or decided approval for one pairing nonce.
#[derive(Debug, Clone, Serialize)]
pub struct PairingApproval {
    /// Stable id the operator uses to approve or reject.
    pub request_id: Uuid,
    /// Pairing-token nonce this approval gates. Not serialized: operators
    /// see the request id only.
    #[serde(skip)]
    pub nonce: Uuid,
    /// Peer address of the exchange attempt.
    pub remote_addr: String,
    /// User agent of the exchange attempt, when sent.
    pub user_agent: Option<String>,
    /// When the approval record was created.
    pub created_at: DateTime<Utc>,
    /// Mirrors the pairing token's expiry; the record is useless after it.
    pub expires_at: DateTime<Utc>,
    /// Current decision.
    pub decision: ApprovalDecision,
}

impl PairingApproval {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Default)]
struct ApprovalState {
    by_nonce: HashMap<Uuid, PairingApproval>,
    /// request id -> nonce, for the operator endpoints.
    by_request: HashMap<Uuid, Uuid>,
}

/// Tracks pairing approvals keyed by nonce.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct PairingApprovalManager {
    state: Arc<RwLock<ApprovalState>>,
}

impl PairingApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending approval for a nonce, or return the existing record.
    ///
    /// Idempotent: repeated exchange attempts for the same token keep one
    /// record with a stable request id. The expiry is refreshed so it always
    /// mirrors the token's.
    pub async fn ensure_pending(
        &self,
        nonce: Uuid,
        remote_addr: String,
        user_agent: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> PairingApproval {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_nonce.get_mut(&nonce) {
            existing.expires_at = expires_at;
            return existing.clone();
        }

        let approval = PairingApproval {
            request_id: Uuid::new_v4(),
            nonce,
            remote_addr,
            user_agent,
            created_at: Utc::now(),
            expires_at,
            decision: ApprovalDecision::Pending,
        };
        state.by_request.insert(approval.request_id, nonce);
        state.by_nonce.insert(nonce, approval.clone());
        tracing::info!(request_id = %approval.request_id, "pairing approval requested");
        approval
    }

    /// Current decision for a nonce. `None` means absent (never requested,
    /// already cleared, or expired).
    pub async fn status(&self, nonce: Uuid) -> Option<ApprovalDecision> {
        let state = self.state.read().await;
        state
            .by_nonce
            .get(&nonce)
            .filter(|a| !a.is_expired())
            .map(|a| a.decision)
    }

    /// Approve a pending nonce. Idempotent once decided: the first decision
    /// sticks and re-approving a decided record returns it unchanged.
    pub async fn approve(&self, nonce: Uuid) -> Result<PairingApproval, ApprovalError> {
        self.decide(nonce, ApprovalDecision::Approved).await
    }

    /// Reject a pending nonce. Same idempotency as [`approve`](Self::approve).
    pub async fn reject(&self, nonce: Uuid) -> Result<PairingApproval, ApprovalError> {
        self.decide(nonce, ApprovalDecision::Rejected).await
    }

    /// Approve by operator-facing request id.
    pub async fn approve_request(
        &self,
        request_id: Uuid,
    ) -> Result<PairingApproval, ApprovalError> {
        let nonce = self.nonce_for(request_id).await?;
        self.approve(nonce).await
    }

    /// Reject by operator-facing request id.
    pub async fn reject_request(&self, request_id: Uuid) -> Result<PairingApproval, ApprovalError> {
        let nonce = self.nonce_for(request_id).await?;
        self.reject(nonce).await
    }

    /// Drop the record for a nonce once its token is redeemed or no longer
    /// relevant.
    pub async fn clear(&self, nonce: Uuid) {
        let mut state = self.state.write().await;
        if let Some(approval) = state.by_nonce.remove(&nonce) {
            state.by_request.remove(&approval.request_id);
        }
    }

    /// Pending, unexpired approvals ordered by creation time. For the
    /// operator-facing local endpoint.
    pub async fn list_pending(&self) -> Vec<PairingApproval> {
        let state = self.state.read().await;
        let mut pending: Vec<PairingApproval> = state
            .by_nonce
            .values()
            .filter(|a| a.decision == ApprovalDecision::Pending && !a.is_expired())
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    /// Drop expired records. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<(Uuid, Uuid)> = state
            .by_nonce
            .values()
            .filter(|a| a.is_expired())
            .map(|a| (a.nonce, a.request_id))
            .collect();
        for (nonce, request_id) in &expired {
            state.by_nonce.remove(nonce);
            state.by_request.remove(request_id);
        }
        expired.len()
    }

    async fn nonce_for(&self, request_id: Uuid) -> Result<Uuid, ApprovalError> {
        self.state
            .read()
            .await
            .by_request
            .get(&request_id)
            .copied()
            .ok_or(ApprovalError::RequestNotFound { request_id })
    }

    async fn decide(
        &self,
        nonce: Uuid,
        decision: ApprovalDecision,
    ) -> Result<PairingApproval, ApprovalError> {
        let mut state = self.state.write().await;
        let approval = state
            .by_nonce
            .get_mut(&nonce)
            .ok_or(ApprovalError::NonceNotFound { nonce })?;
        if approval.decision == ApprovalDecision::Pending {
            approval.decision = decision;
            tracing::info!(
                request_id = %approval.request_id,
                decision = ?decision,
                "pairing approval decided"
            );
        }
        Ok(approval.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn expiry() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(5)
    }

    async fn pending(mgr: &PairingApprovalManager) -> (Uuid, PairingApproval) {
        let nonce = Uuid::new_v4();
        let approval = mgr
            .ensure_pending(nonce, "127.0.0.1:9000".to_string(), None, expiry())
            .await;
        (nonce, approval)
    }

    #[tokio::test]
    async fn test_absent_then_pending() {
        let mgr = PairingApprovalManager::new();
        let nonce = Uuid::new_v4();
        assert_eq!(mgr.status(nonce).await, None);

        mgr.ensure_pending(nonce, "10.0.0.2:1".to_string(), None, expiry())
            .await;
        assert_eq!(mgr.status(nonce).await, Some(ApprovalDecision::Pending));
    }

    #[tokio::test]
    async fn test_ensure_pending_is_idempotent() {
        let mgr = PairingApprovalManager::new();
        let (nonce, first) = pending(&mgr).await;

        let second = mgr
            .ensure_pending(nonce, "other".to_string(), None, expiry())
            .await;
        assert_eq!(second.request_id, first.request_id);
        // The original requester metadata is kept.
        assert_eq!(second.remote_addr, "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_approve_transitions_and_sticks() {
        let mgr = PairingApprovalManager::new();
        let (nonce, _) = pending(&mgr).await;

        let approved = mgr.approve(nonce).await.unwrap();
        assert_eq!(approved.decision, ApprovalDecision::Approved);

        // Re-deciding is idempotent; the first decision wins.
        let still = mgr.reject(nonce).await.unwrap();
        assert_eq!(still.decision, ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn test_reject_by_request_id() {
        let mgr = PairingApprovalManager::new();
        let (nonce, approval) = pending(&mgr).await;

        mgr.reject_request(approval.request_id).await.unwrap();
        assert_eq!(mgr.status(nonce).await, Some(ApprovalDecision::Rejected));
    }

    #[tokio::test]
    async fn test_unknown_request_id_fails() {
        let mgr = PairingApprovalManager::new();
        let err = mgr.approve_request(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApprovalError::RequestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_decide_unknown_nonce_fails() {
        let mgr = PairingApprovalManager::new();
        let err = mgr.approve(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NonceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_clear_removes_record_and_index() {
        let mgr = PairingApprovalManager::new();
        let (nonce, approval) = pending(&mgr).await;

        mgr.clear(nonce).await;
        assert_eq!(mgr.status(nonce).await, None);
        let err = mgr.approve_request(approval.request_id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::RequestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_expired_record_reads_absent() {
        let mgr = PairingApprovalManager::new();
        let nonce = Uuid::new_v4();
        mgr.ensure_pending(
            nonce,
            "127.0.0.1:9000".to_string(),
            None,
            Utc::now() - Duration::seconds(1),
        )
        .await;

        assert_eq!(mgr.status(nonce).await, None);
        assert!(mgr.list_pending().await.is_empty());
        assert_eq!(mgr.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_list_pending_ordered_and_filtered() {
        let mgr = PairingApprovalManager::new();
        let (first, _) = pending(&mgr).await;
        let (second, _) = pending(&mgr).await;
        let (decided, _) = pending(&mgr).await;
        mgr.approve(decided).await.unwrap();

        let listed = mgr.list_pending().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].nonce, first);
        assert_eq!(listed[1].nonce, second);
        assert!(listed[0].created_at <= listed[1].created_at);
    }
}
