//! Language-model-backed analyzers
//!
//! Each analyzer is an independent task with its own trigger policy and a
//! concurrency limit of one in-flight model call. Analyzer failures become
//! `analysis.error` events plus a log line; they never stop sibling
//! analyzers or the orchestrator.

mod answer;
mod context;
mod ondemand;
mod prompt;
mod question;
mod summarizer;

pub use answer::spawn_answer_generator;
pub use ondemand::{spawn_on_demand_generator, RequestKind};
pub use question::spawn_question_detector;
pub use summarizer::{spawn_summarizer, SummarizerCommand};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::error::PipelineError;
use crate::events::{AnalysisErrorEvent, Event};
use crate::llm::{CompletionRequest, LanguageModel};

/// Run one model call under the configured time bound.
async fn complete_bounded(
    llm: &Arc<dyn LanguageModel>,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<String, PipelineError> {
    match tokio::time::timeout(timeout, llm.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Analysis(format!(
            "model call timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Publish a typed failure artifact for an analyzer that gave up.
fn report_failure(bus: &EventBus, analyzer: &str, error: &PipelineError) {
    tracing::error!(analyzer, "analysis failed: {error}");
    bus.publish(Event::AnalysisError(AnalysisErrorEvent {
        analyzer: analyzer.to_string(),
        message: error.to_string(),
        at: Utc::now(),
    }));
}
