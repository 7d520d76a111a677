use thiserror::Error;

use crate::registry::RegistryError;

/// Failure modes of one invocation-loop turn.
///
/// Configuration and capability errors are raised before any external call.
/// `ToolLoopExceeded` and `ModelCall` are fatal for the turn and never
/// retried here; tool execution failures are not represented — they are
/// folded back into the conversation as tool-role messages so the model can
/// react to them.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("image input supplied but model `{model}` is not vision-capable")]
    CapabilityMismatch { model: String },
    #[error("tool loop exceeded {rounds} rounds without a final reply")]
    ToolLoopExceeded { rounds: u32 },
    #[error("model call failed: {0}")]
    ModelCall(anyhow::Error),
    #[error("model returned neither text nor tool calls")]
    EmptyResponse,
}

impl InvocationError {
    /// True when the failure was detected before any external call was made.
    pub fn is_pre_call(&self) -> bool {
        matches!(self, Self::Registry(_) | Self::CapabilityMismatch { .. })
    }
}
