use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{complete_bounded, prompt, report_failure};
use crate::bus::EventBus;
use crate::config::AnalysisConfig;
use crate::events::{Event, QuestionEvent, QuestionKind, Topic, TranscriptSegment};
use crate::llm::{extract_json, CompletionRequest, LanguageModel};

const ANALYZER: &str = "question-detector";

/// Spawn the question detector.
///
/// Evaluates a rolling window of recent final segments after each arrival.
/// One model call in flight at a time; triggers that queue up behind a call
/// are coalesced into the next window (newest wins). Duplicate segment ids
/// and repeated question text never produce a second [`QuestionEvent`], and
/// the window is consumed once a question is emitted so overlapping windows
/// cannot re-detect it.
pub fn spawn_question_detector(
    bus: Arc<EventBus>,
    llm: Arc<dyn LanguageModel>,
    config: AnalysisConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Subscribe before the task is scheduled so no segment published after
    // this call can be missed.
    let mut segments = bus.subscribe(Topic::TranscriptSegment);
    tokio::spawn(async move {
        let mut detector = Detector::new(config);
        info!("question detector started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                msg = segments.recv() => match msg {
                    Ok(Event::Transcript(segment)) => {
                        if !detector.admit(segment) {
                            continue;
                        }
                        // Coalesce whatever else is already queued so one
                        // detection covers the freshest window.
                        drain_pending(&mut segments, &mut detector);
                        detector.detect(&bus, &llm).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("question detector lagged, {n} segments skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("question detector stopped");
    })
}

fn drain_pending(rx: &mut broadcast::Receiver<Event>, detector: &mut Detector) {
    loop {
        match rx.try_recv() {
            Ok(Event::Transcript(segment)) => {
                detector.admit(segment);
            }
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("question detector lagged, {n} segments skipped");
            }
            Err(_) => break,
        }
    }
}

struct Detector {
    config: AnalysisConfig,
    window: VecDeque<TranscriptSegment>,
    seen_ids: HashSet<String>,
    last_question_text: String,
}

impl Detector {
    fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            seen_ids: HashSet::new(),
            last_question_text: String::new(),
        }
    }

    /// Add a final segment to the window. Returns false for partials and
    /// for duplicate deliveries of an already-seen final id.
    fn admit(&mut self, segment: TranscriptSegment) -> bool {
        if !segment.is_final || segment.text.trim().is_empty() {
            return false;
        }
        if !self.seen_ids.insert(segment.id.clone()) {
            debug!(id = %segment.id, "duplicate final segment delivery ignored");
            return false;
        }
        if self.window.len() >= self.config.question_window_segments {
            self.window.pop_front();
        }
        self.window.push_back(segment);
        true
    }

    async fn detect(&mut self, bus: &EventBus, llm: &Arc<dyn LanguageModel>) {
        if self.window.is_empty() {
            return;
        }
        let transcript: Vec<&str> = self.window.iter().map(|s| s.text.as_str()).collect();
        let request = CompletionRequest {
            system: prompt::system_prompt(&self.config.output_language),
            prompt: prompt::question_detection(&transcript.join("\n")),
            temperature: 0.2,
            max_tokens: 512,
        };

        let timeout = Duration::from_secs(self.config.llm_timeout_secs);
        let reply = match complete_bounded(llm, &request, timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                report_failure(bus, ANALYZER, &e);
                return;
            }
        };

        let Some(parsed) = extract_json(&reply) else {
            debug!("detector reply was not JSON, skipping window");
            return;
        };

        if !parsed["is_question"].as_bool().unwrap_or(false) {
            return;
        }
        let confidence = parsed["confidence"].as_f64().unwrap_or(0.0) as f32;
        if confidence < self.config.question_confidence_min {
            debug!(confidence, "question below confidence threshold");
            return;
        }
        let question_text = parsed["question_text"].as_str().unwrap_or("").trim().to_string();
        if question_text.is_empty() || question_text == self.last_question_text {
            debug!("skipping repeated question");
            return;
        }

        let kind = match parsed["kind"].as_str().unwrap_or("direct") {
            "rhetorical" => QuestionKind::Rhetorical,
            "implicit" => QuestionKind::Implicit,
            _ => QuestionKind::Direct,
        };

        let event = QuestionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            segment_ids: self.window.iter().map(|s| s.id.clone()).collect(),
            question_text: question_text.clone(),
            detected_at: Utc::now(),
            confidence,
            kind,
        };
        info!(question = %question_text, confidence, "question detected");

        self.last_question_text = question_text;
        // The window's segments are consumed; overlapping windows must not
        // re-detect the same question.
        self.window.clear();

        bus.publish(Event::Question(event));
    }
}
