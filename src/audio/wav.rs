use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use super::{AudioFrame, AudioSource};

/// Audio source backed by a WAV file, sliced into fixed-duration frames.
///
/// Used for offline runs and tests. With `paced` set, frames are released in
/// real time so the pipeline sees live-capture timing.
pub struct WavFileSource {
    frames: VecDeque<Vec<i16>>,
    sample_rate: u32,
    channels: u16,
    frame_ms: u64,
    paced: bool,
    sequence: u64,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, frame_ms: u64, paced: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
        let spec = reader.spec();

        let samples: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .collect::<std::result::Result<_, _>>()
                .context("Failed to read WAV samples")?,
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<_, _>>()
                .context("Failed to read WAV samples")?,
        };

        let samples_per_frame =
            (spec.sample_rate as u64 * frame_ms / 1000) as usize * spec.channels as usize;
        let frames = samples
            .chunks(samples_per_frame.max(1))
            .map(|c| c.to_vec())
            .collect();

        Ok(Self {
            frames,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            frame_ms,
            paced,
            sequence: 0,
        })
    }

    pub fn remaining_frames(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait::async_trait]
impl AudioSource for WavFileSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        let Some(samples) = self.frames.pop_front() else {
            return Ok(None);
        };

        if self.paced {
            tokio::time::sleep(Duration::from_millis(self.frame_ms)).await;
        }

        let frame = AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            sequence: self.sequence,
            captured_at: Utc::now(),
        };
        self.sequence += 1;

        Ok(Some(frame))
    }
}
