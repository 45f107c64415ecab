use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub transcription: TranscriptionConfig,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each session gets its own subdirectory.
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frame duration handed to the backend.
    pub frame_ms: u64,
    pub reconnect: ReconnectConfig,
    /// Frames buffered locally while the backend is unreachable; oldest
    /// frames are dropped beyond this cap.
    pub buffer_cap_frames: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay.
    pub base_ms: u64,
    /// Delay ceiling for exponential backoff.
    pub cap_ms: u64,
    /// Attempts before the channel declares itself degraded.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider selection: "openai" or "custom" (any OpenAI-compatible
    /// endpoint reachable at `base_url`).
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Cadence of the periodic summarizer.
    pub summary_interval_secs: u64,
    /// Final segments in the question-detection window.
    pub question_window_segments: usize,
    /// Detections below this confidence are discarded.
    pub question_confidence_min: f32,
    /// Model-call retries for answer generation before falling back.
    pub answer_retries: u32,
    /// Base delay between answer retries.
    pub answer_retry_base_ms: u64,
    /// Upper bound on any single model call.
    pub llm_timeout_secs: u64,
    /// Grace period for in-flight analyzer calls at session end.
    pub shutdown_grace_secs: u64,
    pub enable_question_detection: bool,
    pub enable_periodic_summary: bool,
    /// Language for generated artifacts.
    pub output_language: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./lecture_data".to_string(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_ms: 100,
            reconnect: ReconnectConfig::default(),
            buffer_cap_frames: 600, // one minute at 100ms frames
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            summary_interval_secs: 600,
            question_window_segments: 5,
            question_confidence_min: 0.7,
            answer_retries: 3,
            answer_retry_base_ms: 500,
            llm_timeout_secs: 30,
            shutdown_grace_secs: 10,
            enable_question_detection: true,
            enable_periodic_summary: true,
            output_language: "English".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            transcription: TranscriptionConfig::default(),
            llm: LlmConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a named file (any format the config crate
    /// recognizes), falling back to defaults for missing sections.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
