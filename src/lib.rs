pub mod analysis;
pub mod audio;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod materials;
pub mod session;
pub mod store;
pub mod transcribe;

pub use audio::{AudioFrame, AudioSource, WavFileSource};
pub use bus::EventBus;
pub use config::Config;
pub use engine::Engine;
pub use error::PipelineError;
pub use events::{
    AnswerEvent, Event, IdeaEvent, LifecycleEvent, LifecyclePhase, QuestionEvent, QuestionKind,
    SuggestionEvent, SummaryEvent, Topic, TranscriptSegment,
};
pub use llm::{create_language_model, CompletionRequest, LanguageModel};
pub use materials::{MaterialDoc, MaterialSet};
pub use session::{Session, SessionAction, SessionState};
pub use store::{SessionMeta, SessionStore, StoreHandle};
pub use transcribe::{
    AudioSender, AudioSink, BackendEvent, ChannelConfig, SegmentStream, StreamConfig,
    TranscriptionBackend, TranscriptionChannel,
};
