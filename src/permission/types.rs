//! Permission request, decision, and prompt types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Decision on a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Let the tool run.
    Allow,
    /// Block the tool.
    Deny,
    /// No remote decision; fall back to the local interactive prompt.
    Ask,
}

/// How long a decision holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionScope {
    /// This invocation only.
    Once,
    /// Every matching invocation for the rest of the session.
    Session,
}

/// A blocking permission request from the local agent.
///
/// Exists only for the duration of one call into the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Tool-use correlation id; responses are addressed to it.
    pub id: String,
    /// Agent session the tool runs in.
    pub session_id: String,
    /// Workspace the tool targets, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Name of the tool about to run.
    pub tool_name: String,
    /// Raw tool input.
    pub tool_input: serde_json::Value,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

impl PermissionRequest {
    pub fn new(
        id: String,
        session_id: String,
        workspace_id: Option<String>,
        tool_name: String,
        tool_input: serde_json::Value,
    ) -> Self {
        Self {
            id,
            session_id,
            workspace_id,
            tool_name,
            tool_input,
            created_at: Utc::now(),
        }
    }

    /// The input field a human would want to see first: the command, path,
    /// or URL the tool is about to touch.
    pub fn primary_target(&self) -> Option<String> {
        let obj = self.tool_input.as_object()?;
        for key in ["command", "path", "file_path", "url", "pattern"] {
            if let Some(value) = obj.get(key).and_then(|v| v.as_str()) {
                return Some(value.to_string());
            }
        }
        obj.values()
            .find_map(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// The device's answer to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub decision: PermissionDecision,
    /// Defaults to once when the device omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<DecisionScope>,
    /// Pattern to remember for session-scoped decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Option set presented with every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOption {
    AllowOnce,
    AllowForSession,
    Deny,
}

/// Prompt published to the paired device's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionPrompt {
    /// Mirrors the request's tool-use correlation id.
    pub request_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub tool_name: String,
    /// Human-readable one-liner, e.g. "Run Bash".
    pub description: String,
    /// The command/path/URL the tool is about to touch, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Compact preview of the raw input.
    pub preview: String,
    /// Fixed option set the device renders.
    pub options: Vec<PromptOption>,
    /// When the gateway stops waiting for an answer.
    pub expires_at: DateTime<Utc>,
}

/// Longest preview sent to the device; tool inputs can be arbitrarily large.
const PREVIEW_MAX_CHARS: usize = 400;

impl PermissionPrompt {
    /// Build the prompt for a request, given how long the bridge will wait.
    pub fn from_request(request: &PermissionRequest, wait: std::time::Duration) -> Self {
        let preview = match serde_json::to_string(&request.tool_input) {
            Ok(json) => truncate(&json, PREVIEW_MAX_CHARS),
            Err(_) => String::new(),
        };
        Self {
            request_id: request.id.clone(),
            session_id: request.session_id.clone(),
            workspace_id: request.workspace_id.clone(),
            tool_name: request.tool_name.clone(),
            description: format!("Run {}", request.tool_name),
            target: request.primary_target(),
            preview,
            options: vec![
                PromptOption::AllowOnce,
                PromptOption::AllowForSession,
                PromptOption::Deny,
            ],
            expires_at: Utc::now()
                + Duration::from_std(wait).unwrap_or_else(|_| Duration::seconds(60)),
        }
    }
}

/// What the agent's hook call gets back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionReply {
    pub decision: PermissionDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<DecisionScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Why the decision is `ask`, when it is a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PermissionReply {
    /// Fallback reply: hand the decision back to the local prompt.
    pub fn ask(message: &str) -> Self {
        Self {
            decision: PermissionDecision::Ask,
            scope: None,
            pattern: None,
            message: Some(message.to_string()),
        }
    }

    /// A remembered decision, resolved without a round trip.
    pub fn remembered(decision: PermissionDecision) -> Self {
        Self {
            decision,
            scope: Some(DecisionScope::Session),
            pattern: None,
            message: None,
        }
    }
}

impl From<PermissionResponse> for PermissionReply {
    fn from(response: PermissionResponse) -> Self {
        Self {
            decision: response.decision,
            scope: response.scope,
            pattern: response.pattern,
            message: None,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(input: serde_json::Value) -> PermissionRequest {
        PermissionRequest::new(
            "toolu_1".to_string(),
            "session-1".to_string(),
            Some("ws-1".to_string()),
            "Bash".to_string(),
            input,
        )
    }

    #[test]
    fn test_primary_target_prefers_command() {
        let req = request(serde_json::json!({"description": "x", "command": "git status"}));
        assert_eq!(req.primary_target(), Some("git status".to_string()));
    }

    #[test]
    fn test_primary_target_falls_back_to_any_string() {
        let req = request(serde_json::json!({"count": 3, "query": "needle"}));
        assert_eq!(req.primary_target(), Some("needle".to_string()));

        let req = request(serde_json::json!({"count": 3}));
        assert_eq!(req.primary_target(), None);
    }

    #[test]
    fn test_prompt_carries_fixed_options() {
        let req = request(serde_json::json!({"command": "ls"}));
        let prompt = PermissionPrompt::from_request(&req, std::time::Duration::from_secs(60));
        assert_eq!(
            prompt.options,
            vec![
                PromptOption::AllowOnce,
                PromptOption::AllowForSession,
                PromptOption::Deny,
            ]
        );
        assert_eq!(prompt.request_id, "toolu_1");
        assert_eq!(prompt.target, Some("ls".to_string()));
        assert!(prompt.expires_at > Utc::now());
    }

    #[test]
    fn test_prompt_preview_is_bounded() {
        let big = "x".repeat(5_000);
        let req = request(serde_json::json!({"command": big}));
        let prompt = PermissionPrompt::from_request(&req, std::time::Duration::from_secs(60));
        assert!(prompt.preview.chars().count() <= PREVIEW_MAX_CHARS + 1);
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PermissionDecision::Ask).unwrap(),
            "\"ask\""
        );
        assert_eq!(
            serde_json::to_string(&DecisionScope::Session).unwrap(),
            "\"session\""
        );
    }

    #[test]
    fn test_reply_ask_shape() {
        let reply = PermissionReply::ask("timeout");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["decision"], "ask");
        assert_eq!(value["message"], "timeout");
        assert!(value.get("scope").is_none());
    }
}
