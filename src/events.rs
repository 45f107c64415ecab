//! Event data model shared by every pipeline component.
//!
//! All events are immutable once published. The bus distributes clones;
//! the session store owns the durable copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;

/// One unit of transcribed speech with a time range.
///
/// A partial segment (`is_final == false`) may be superseded by a later
/// segment carrying the same `id`; a final segment is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Backend-assigned segment identifier, stable across partial updates.
    pub id: String,

    /// Start of the spoken range, milliseconds since session start.
    pub start_ms: u64,

    /// End of the spoken range, milliseconds since session start.
    pub end_ms: u64,

    /// Transcribed text.
    pub text: String,

    /// Whether this segment is final (immutable) or an interim result.
    pub is_final: bool,

    /// Detected language code, if the backend reports one.
    pub language: Option<String>,
}

/// Classification of a detected question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Direct question expecting an answer from the audience.
    Direct,
    /// Rhetorical question, no answer expected.
    Rhetorical,
    /// Implicit or guiding question embedded in the lecture flow.
    Implicit,
}

/// A question detected in the transcript window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionEvent {
    /// Unique event id, referenced by the matching [`AnswerEvent`].
    pub id: String,

    /// Ids of the final segments the detection window covered.
    pub segment_ids: Vec<String>,

    /// The question as asked.
    pub question_text: String,

    pub detected_at: DateTime<Utc>,

    /// Detector confidence, 0.0 to 1.0.
    pub confidence: f32,

    pub kind: QuestionKind,
}

/// A generated answer. At most one live answer per question; a retry
/// replacement supersedes the prior one rather than appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEvent {
    /// Id of the [`QuestionEvent`] this answers.
    pub question_event_id: String,

    pub answer_text: String,

    pub generated_at: DateTime<Utc>,

    /// Wall time of the model call that produced this answer.
    pub model_latency_ms: u64,
}

/// A periodic summary covering one non-overlapping transcript window.
///
/// Consecutive summaries stitch exactly: each window starts where the
/// previous one ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    /// Window start, milliseconds since session start (inclusive).
    pub window_start_ms: u64,

    /// Window end, milliseconds since session start (exclusive).
    pub window_end_ms: u64,

    pub text: String,

    pub generated_at: DateTime<Utc>,
}

/// A suggested question the listener could raise, produced on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionEvent {
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

/// Ideas and follow-up study directions, produced on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaEvent {
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

/// Session lifecycle phase, published on `session.lifecycle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LifecyclePhase {
    Started,
    Paused,
    Resumed,
    /// A component lost a capability (backend unreachable, writes failing)
    /// but the session keeps running.
    Degraded { reason: String },
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub session_id: String,
    pub phase: LifecyclePhase,
    pub at: DateTime<Utc>,
}

/// Typed failure artifact emitted when an analyzer gives up on a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisErrorEvent {
    /// Analyzer name, e.g. "question-detector".
    pub analyzer: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bus topics. Ordering is guaranteed within a topic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Topic {
    AudioFrame = 0,
    TranscriptSegment = 1,
    QuestionDetected = 2,
    AnswerGenerated = 3,
    SummaryGenerated = 4,
    SuggestionGenerated = 5,
    IdeaGenerated = 6,
    SessionLifecycle = 7,
    AnalysisError = 8,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::AudioFrame,
        Topic::TranscriptSegment,
        Topic::QuestionDetected,
        Topic::AnswerGenerated,
        Topic::SummaryGenerated,
        Topic::SuggestionGenerated,
        Topic::IdeaGenerated,
        Topic::SessionLifecycle,
        Topic::AnalysisError,
    ];

    /// Subject-style name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::AudioFrame => "audio.frame",
            Topic::TranscriptSegment => "transcript.segment",
            Topic::QuestionDetected => "question.detected",
            Topic::AnswerGenerated => "answer.generated",
            Topic::SummaryGenerated => "summary.generated",
            Topic::SuggestionGenerated => "suggestion.generated",
            Topic::IdeaGenerated => "idea.generated",
            Topic::SessionLifecycle => "session.lifecycle",
            Topic::AnalysisError => "analysis.error",
        }
    }
}

/// Milliseconds since session start as MM:SS or HH:MM:SS.
pub fn format_clock(ms: u64) -> String {
    let total_secs = ms / 1000;
    let (h, rem) = (total_secs / 3600, total_secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Envelope distributed by the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Audio(AudioFrame),
    Transcript(TranscriptSegment),
    Question(QuestionEvent),
    Answer(AnswerEvent),
    Summary(SummaryEvent),
    Suggestion(SuggestionEvent),
    Idea(IdeaEvent),
    Lifecycle(LifecycleEvent),
    AnalysisError(AnalysisErrorEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Audio(_) => Topic::AudioFrame,
            Event::Transcript(_) => Topic::TranscriptSegment,
            Event::Question(_) => Topic::QuestionDetected,
            Event::Answer(_) => Topic::AnswerGenerated,
            Event::Summary(_) => Topic::SummaryGenerated,
            Event::Suggestion(_) => Topic::SuggestionGenerated,
            Event::Idea(_) => Topic::IdeaGenerated,
            Event::Lifecycle(_) => Topic::SessionLifecycle,
            Event::AnalysisError(_) => Topic::AnalysisError,
        }
    }
}
