use thiserror::Error;

/// Typed errors for the transcription-and-analysis pipeline.
///
/// Recoverable faults (connection loss, failed model calls, failed writes)
/// are retried with backoff inside the component that hit them and only
/// surface here once retries are exhausted. Unrecoverable faults degrade the
/// component's output without stopping the rest of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transcription backend unreachable or credentials rejected.
    #[error("transcription backend connection failed: {0}")]
    Connection(String),

    /// Operation on a channel that has been closed or errored out.
    #[error("transcription channel is closed")]
    ChannelClosed,

    /// Backend sent an out-of-order or otherwise invalid segment.
    #[error("transcription protocol violation: {0}")]
    Protocol(String),

    /// A language-model call failed or timed out.
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// A durable write failed after retries.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A control action was requested that the session state does not allow.
    /// Rejected synchronously, no side effects.
    #[error("cannot {action} a session in state {from}")]
    InvalidStateTransition { from: String, action: &'static str },
}
