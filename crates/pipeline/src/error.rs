use thiserror::Error;

/// Failures raised by the engine itself.
///
/// Handler failures are not wrapped: they reach the caller as the exact
/// `anyhow::Error` the handler returned, so callers can `downcast_ref` to
/// their own error types.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every outgoing handler declined the message and none failed.
    #[error("unhandled outgoing message (operation {operation_id})")]
    UnhandledOutgoing { operation_id: String },
}

impl PipelineError {
    #[must_use]
    pub fn unhandled(operation_id: impl Into<String>) -> Self {
        Self::UnhandledOutgoing {
            operation_id: operation_id.into(),
        }
    }
}
