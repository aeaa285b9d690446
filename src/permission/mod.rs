//! Human-in-the-loop permission bridge.
//!
//! Correlates a blocking tool-permission request from the local agent with
//! an asynchronous decision from the paired device. Remembered patterns
//! short-circuit the round trip; an unanswered prompt falls back to the
//! local interactive prompt (`ask`) rather than denying, because the tool
//! invocation must still proceed somehow.

mod bridge;
mod events;
mod pattern;
mod types;

pub use bridge::PermissionBridge;
pub use events::{BroadcastPublisher, PromptPublisher};
pub use pattern::{DecisionMemory, InMemoryDecisionMemory, input_shape};
pub use types::{
    DecisionScope, PermissionDecision, PermissionPrompt, PermissionReply, PermissionRequest,
    PermissionResponse, PromptOption,
};
