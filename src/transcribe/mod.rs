//! Streaming transcription channel
//!
//! One streaming session per active classroom session. The backend's wire
//! protocol is out of scope; implementations normalize vendor messages into
//! [`BackendEvent`]s and the channel turns those into bus publications.

mod channel;

pub use channel::{AudioSender, ChannelConfig, TranscriptionChannel};

use crate::audio::AudioFrame;
use crate::error::PipelineError;

/// Parameters for one streaming session against the backend.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub session_id: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A vendor-normalized transcript message.
#[derive(Debug, Clone)]
pub struct BackendEvent {
    /// Segment id, stable across partial updates of the same utterance.
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub is_final: bool,
    pub language: Option<String>,
}

/// Factory for streaming sessions against a transcription backend.
#[async_trait::async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Open one bidirectional streaming session. Fails with
    /// [`PipelineError::Connection`] when the backend is unreachable or
    /// credentials are invalid.
    async fn connect(
        &self,
        config: &StreamConfig,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn SegmentStream>), PipelineError>;
}

/// Outbound half of a streaming session.
#[async_trait::async_trait]
pub trait AudioSink: Send {
    async fn send(&mut self, frame: &AudioFrame) -> Result<(), PipelineError>;

    /// Graceful shutdown; the backend may still deliver in-flight results
    /// on the receive half afterwards.
    async fn close(&mut self) -> Result<(), PipelineError>;
}

/// Inbound half of a streaming session.
///
/// `Ok(None)` means the backend ended the stream; the channel treats that
/// like a transient loss and re-dials.
#[async_trait::async_trait]
pub trait SegmentStream: Send {
    async fn next_event(&mut self) -> Result<Option<BackendEvent>, PipelineError>;
}
