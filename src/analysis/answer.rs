use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::context::RollingContext;
use super::{complete_bounded, prompt, report_failure};
use crate::bus::EventBus;
use crate::config::AnalysisConfig;
use crate::events::{AnswerEvent, Event, QuestionEvent, Topic};
use crate::llm::{CompletionRequest, LanguageModel};

const ANALYZER: &str = "answer-generator";

/// Transcript segments kept as answer context.
const CONTEXT_SEGMENTS: usize = 30;

/// Fallback text when every retry fails; the question is never left
/// unanswered.
pub const ANSWER_UNAVAILABLE: &str = "answer unavailable";

/// Spawn the answer generator.
///
/// One model call in flight at a time; questions queue FIFO behind it
/// (oldest wins — every question gets an answer). Each question is retried
/// with backoff up to the configured bound, then answered with a fallback
/// artifact. Answers are matched to questions by id, so answering question
/// N may race with detection of question N+1.
pub fn spawn_answer_generator(
    bus: Arc<EventBus>,
    llm: Arc<dyn LanguageModel>,
    materials_context: String,
    config: AnalysisConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Subscribe before the task is scheduled so nothing published after
    // this call can be missed.
    let mut questions = bus.subscribe(Topic::QuestionDetected);
    let mut segments = bus.subscribe(Topic::TranscriptSegment);
    tokio::spawn(async move {
        let mut context = RollingContext::new(CONTEXT_SEGMENTS);
        info!("answer generator started");

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
                        warn!("answer context lagged, {n} segments skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                msg = questions.recv() => match msg {
                    Ok(Event::Question(question)) => {
                        answer_question(&bus, &llm, &context, &materials_context, &config, question)
                            .await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("answer queue overflowed, {n} questions dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("answer generator stopped");
    })
}

async fn answer_question(
    bus: &EventBus,
    llm: &Arc<dyn LanguageModel>,
    context: &RollingContext,
    materials_context: &str,
    config: &AnalysisConfig,
    question: QuestionEvent,
) {
    let request = CompletionRequest {
        system: prompt::system_prompt(&config.output_language),
        prompt: prompt::answer(
            &question.question_text,
            &context.recent_text(CONTEXT_SEGMENTS),
            materials_context,
        ),
        temperature: 0.3,
        max_tokens: 1024,
    };

    let timeout = Duration::from_secs(config.llm_timeout_secs);
    let attempts = config.answer_retries.max(1);
    let mut delay = Duration::from_millis(config.answer_retry_base_ms);

    for attempt in 1..=attempts {
        let started = Instant::now();
        match complete_bounded(llm, &request, timeout).await {
            Ok(text) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                info!(
                    question_id = %question.id,
                    latency_ms,
                    "answer generated"
                );
                bus.publish(Event::Answer(AnswerEvent {
                    question_event_id: question.id,
                    answer_text: text.trim().to_string(),
                    generated_at: Utc::now(),
                    model_latency_ms: latency_ms,
                }));
                return;
            }
            Err(e) => {
                warn!(attempt, "answer attempt failed: {e}");
                if attempt == attempts {
                    report_failure(bus, ANALYZER, &e);
                } else {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    // Best-effort fallback so the question is not left unanswered.
    bus.publish(Event::Answer(AnswerEvent {
        question_event_id: question.id,
        answer_text: ANSWER_UNAVAILABLE.to_string(),
        generated_at: Utc::now(),
        model_latency_ms: 0,
    }));
}
