//! Audio source abstraction
//!
//! Device enumeration and raw capture mechanics live outside this crate; the
//! pipeline consumes any [`AudioSource`] that yields fixed-size PCM frames.

mod wav;

pub use wav::WavFileSource;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fixed-size PCM audio frame (16-bit interleaved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Raw samples (i16 PCM, interleaved).
    pub samples: Vec<i16>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of channels.
    pub channels: u16,

    /// Monotonic frame sequence number.
    pub sequence: u64,

    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
}

impl AudioFrame {
    /// Frame duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// A device-agnostic supplier of audio frames.
///
/// Returning `Ok(None)` signals end of stream.
#[async_trait::async_trait]
pub trait AudioSource: Send {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>>;
}
