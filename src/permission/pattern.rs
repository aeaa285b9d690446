//! Pattern memory for remembered permission decisions.
//!
//! Session-scoped decisions are stored against a pattern and replayed on
//! later invocations of the same tool, skipping the device round trip. A
//! pattern is either an exact input-shape key or contains `*` wildcards,
//! compiled to an anchored regex (`git *` matches any git command).

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;

use super::types::PermissionDecision;

/// Store of previously decided tool-invocation patterns.
///
/// Consumed, not owned, by the bridge: implementations may persist wherever
/// they like.
#[async_trait]
pub trait DecisionMemory: Send + Sync {
    /// A remembered decision matching this invocation, if any.
    async fn lookup(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Option<PermissionDecision>;

    /// Remember a decision for a pattern within a session.
    async fn remember(
        &self,
        session_id: &str,
        tool_name: &str,
        pattern: &str,
        decision: PermissionDecision,
    );
}

/// Derive the shape key for a tool input: the primary string field when one
/// exists, otherwise the sorted field list. Two invocations with the same
/// shape are candidates for the same remembered decision.
pub fn input_shape(tool_input: &serde_json::Value) -> String {
    if let Some(obj) = tool_input.as_object() {
        for key in ["command", "path", "file_path", "url", "pattern"] {
            if let Some(value) = obj.get(key).and_then(|v| v.as_str()) {
                return value.to_string();
            }
        }
        if let Some(s) = obj.values().find_map(|v| v.as_str()) {
            return s.to_string();
        }
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        return format!("{{{}}}", keys.join(","));
    }
    tool_input.to_string()
}

struct StoredPattern {
    pattern: String,
    /// Compiled form for wildcard patterns; `None` means exact match.
    matcher: Option<Regex>,
    decision: PermissionDecision,
}

impl StoredPattern {
    fn matches(&self, shape: &str) -> bool {
        match &self.matcher {
            Some(re) => re.is_match(shape),
            None => self.pattern == shape,
        }
    }
}

/// In-memory pattern store, scoped to the gateway process lifetime.
#[derive(Default)]
pub struct InMemoryDecisionMemory {
    /// (session id, tool name) -> stored patterns, newest last.
    entries: RwLock<HashMap<(String, String), Vec<StoredPattern>>>,
}

impl InMemoryDecisionMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionMemory for InMemoryDecisionMemory {
    async fn lookup(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Option<PermissionDecision> {
        let shape = input_shape(tool_input);
        let entries = self.entries.read().await;
        let stored = entries.get(&(session_id.to_string(), tool_name.to_string()))?;
        // Newest pattern wins when several match.
        stored
            .iter()
            .rev()
            .find(|p| p.matches(&shape))
            .map(|p| p.decision)
    }

    async fn remember(
        &self,
        session_id: &str,
        tool_name: &str,
        pattern: &str,
        decision: PermissionDecision,
    ) {
        let matcher = compile_pattern(pattern);
        let mut entries = self.entries.write().await;
        let stored = entries
            .entry((session_id.to_string(), tool_name.to_string()))
            .or_default();
        stored.retain(|p| p.pattern != pattern);
        stored.push(StoredPattern {
            pattern: pattern.to_string(),
            matcher,
            decision,
        });
        tracing::debug!(session_id, tool_name, pattern, "permission pattern remembered");
    }
}

/// Compile a wildcard pattern to an anchored regex. Patterns without `*`
/// stay exact string matches.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    if !pattern.contains('*') {
        return None;
    }
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let source = format!("^{}$", escaped.join(".*"));
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(e) => {
            // Unmatchable rather than over-matching if compilation fails.
            tracing::warn!(pattern, error = %e, "failed to compile permission pattern");
            None
        }
    }
}
