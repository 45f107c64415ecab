use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::context::RollingContext;
use super::{complete_bounded, prompt, report_failure};
use crate::bus::EventBus;
use crate::config::AnalysisConfig;
use crate::events::{Event, IdeaEvent, SuggestionEvent, Topic};
use crate::llm::{CompletionRequest, LanguageModel};

/// Transcript segments kept for on-demand generation.
const CONTEXT_SEGMENTS: usize = 60;

/// Which on-demand artifact this generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Suggestion,
    Ideas,
}

impl RequestKind {
    fn analyzer(&self) -> &'static str {
        match self {
            RequestKind::Suggestion => "suggestion-generator",
            RequestKind::Ideas => "idea-generator",
        }
    }
}

/// Spawn a generator that fires only on explicit user request.
///
/// Requests arriving while a model call is in flight coalesce into one
/// follow-up run.
pub fn spawn_on_demand_generator(
    kind: RequestKind,
    bus: Arc<EventBus>,
    llm: Arc<dyn LanguageModel>,
    materials_context: String,
    config: AnalysisConfig,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Subscribe before the task is scheduled so no segment published after
    // this call can be missed.
    let mut segments = bus.subscribe(Topic::TranscriptSegment);
    tokio::spawn(async move {
        let mut context = RollingContext::new(CONTEXT_SEGMENTS);
        info!(analyzer = kind.analyzer(), "on-demand generator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                msg = segments.recv() => match msg {
                    Ok(Event::Transcript(segment)) if segment.is_final => {
                        context.push(segment);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(analyzer = kind.analyzer(), "lagged, {n} segments skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                trigger = triggers.recv() => match trigger {
                    Some(()) => {
                        // Coalesce queued requests into this run.
                        while triggers.try_recv().is_ok() {}
                        generate(kind, &bus, &llm, &context, &materials_context, &config).await;
                    }
                    None => break,
                },
            }
        }

        info!(analyzer = kind.analyzer(), "on-demand generator stopped");
    })
}

async fn generate(
    kind: RequestKind,
    bus: &EventBus,
    llm: &Arc<dyn LanguageModel>,
    context: &RollingContext,
    materials_context: &str,
    config: &AnalysisConfig,
) {
    if context.is_empty() && materials_context.is_empty() {
        warn!(analyzer = kind.analyzer(), "nothing to analyze yet");
        return;
    }

    let transcript = context.all_text();
    let request = CompletionRequest {
        system: prompt::system_prompt(&config.output_language),
        prompt: match kind {
            RequestKind::Suggestion => prompt::suggestion(&transcript, materials_context),
            RequestKind::Ideas => prompt::ideas(&transcript, materials_context),
        },
        temperature: 0.8,
        max_tokens: 1024,
    };

    let timeout = Duration::from_secs(config.llm_timeout_secs);
    match complete_bounded(llm, &request, timeout).await {
        Ok(reply) => {
            let text = reply.trim().to_string();
            let event = match kind {
                RequestKind::Suggestion => Event::Suggestion(SuggestionEvent {
                    text,
                    generated_at: Utc::now(),
                }),
                RequestKind::Ideas => Event::Idea(IdeaEvent {
                    text,
                    generated_at: Utc::now(),
                }),
            };
            bus.publish(event);
        }
        Err(e) => report_failure(bus, kind.analyzer(), &e),
    }
}
