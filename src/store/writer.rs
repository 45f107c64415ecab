use anyhow::Context;
use chrono::Utc;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{write_json_atomic, QuestionRecord, SessionStore};
use crate::bus::EventBus;
use crate::error::PipelineError;
use crate::events::{
    format_clock, AnswerEvent, Event, IdeaEvent, LifecycleEvent, LifecyclePhase, SuggestionEvent,
    SummaryEvent, Topic, TranscriptSegment,
};

/// Per-record write retries before the store declares itself degraded.
const WRITE_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Control handle for the writer task.
pub struct StoreHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl StoreHandle {
    /// Drain pending events, flush all buffers, write the consolidated
    /// transcript, and stop the writer.
    pub async fn finalize(self) -> Result<(), PipelineError> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Persistence(format!(
                "store writer task failed: {e}"
            ))),
        }
    }
}

pub(super) fn spawn(store: SessionStore, bus: Arc<EventBus>) -> Result<StoreHandle, PipelineError> {
    let realtime_path = store.transcripts_dir.join("realtime.jsonl");
    let realtime = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&realtime_path)
        .with_context(|| format!("Failed to open {}", realtime_path.display()))
        .map_err(super::persistence)?;

    let mut transcripts = bus.subscribe(Topic::TranscriptSegment);
    let mut questions = bus.subscribe(Topic::QuestionDetected);
    let mut answers = bus.subscribe(Topic::AnswerGenerated);
    let mut summaries = bus.subscribe(Topic::SummaryGenerated);
    let mut suggestions = bus.subscribe(Topic::SuggestionGenerated);
    let mut ideas = bus.subscribe(Topic::IdeaGenerated);

    let mut writer = Writer {
        store,
        bus,
        realtime,
        transcript: Vec::new(),
        questions: Vec::new(),
        orphan_answers: Vec::new(),
        summaries: Vec::new(),
        suggestions: Vec::new(),
        ideas: Vec::new(),
        degraded_reported: false,
    };

    let (shutdown_tx, mut shutdown) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!("store writer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                msg = transcripts.recv() => writer.on_recv(msg).await,
                msg = questions.recv() => writer.on_recv(msg).await,
                msg = answers.recv() => writer.on_recv(msg).await,
                msg = summaries.recv() => writer.on_recv(msg).await,
                msg = suggestions.recv() => writer.on_recv(msg).await,
                msg = ideas.recv() => writer.on_recv(msg).await,
            }
        }

        // Drain whatever was published before shutdown was signalled; no
        // already-finalized artifact may be lost.
        for rx in [
            &mut transcripts,
            &mut questions,
            &mut answers,
            &mut summaries,
            &mut suggestions,
            &mut ideas,
        ] {
            loop {
                match rx.try_recv() {
                    Ok(event) => writer.handle(event).await,
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("store writer lagged, {n} events lost");
                    }
                    Err(_) => break,
                }
            }
        }

        writer.finalize().await;
        info!("store writer stopped");
        Ok(())
    });

    Ok(StoreHandle {
        shutdown: shutdown_tx,
        task,
    })
}

struct Writer {
    store: SessionStore,
    bus: Arc<EventBus>,
    realtime: std::fs::File,
    transcript: Vec<TranscriptSegment>,
    questions: Vec<QuestionRecord>,
    orphan_answers: Vec<AnswerEvent>,
    summaries: Vec<SummaryEvent>,
    suggestions: Vec<SuggestionEvent>,
    ideas: Vec<IdeaEvent>,
    degraded_reported: bool,
}

impl Writer {
    async fn on_recv(&mut self, msg: Result<Event, broadcast::error::RecvError>) {
        match msg {
            Ok(event) => self.handle(event).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("store writer lagged, {n} events lost");
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Transcript(segment) if segment.is_final => {
                self.append_segment(segment).await;
            }
            Event::Transcript(_) => {} // partials are not persisted
            Event::Question(question) => {
                let mut record = QuestionRecord {
                    question,
                    answer: None,
                };
                // Cross-topic delivery order is not guaranteed; the answer
                // may have been observed first.
                if let Some(pos) = self
                    .orphan_answers
                    .iter()
                    .position(|a| a.question_event_id == record.question.id)
                {
                    record.answer = Some(self.orphan_answers.swap_remove(pos));
                }
                self.questions.push(record);
                self.save_questions().await;
            }
            Event::Answer(answer) => {
                match self
                    .questions
                    .iter_mut()
                    .find(|r| r.question.id == answer.question_event_id)
                {
                    // Replacement supersedes, never appends.
                    Some(record) => record.answer = Some(answer),
                    None => self.orphan_answers.push(answer),
                }
                self.save_questions().await;
            }
            Event::Summary(summary) => {
                self.summaries.push(summary);
                let records = self.summaries.clone();
                self.save(self.store.analysis_dir.join("summaries.json"), &records)
                    .await;
            }
            Event::Suggestion(suggestion) => {
                self.suggestions.push(suggestion);
                let records = self.suggestions.clone();
                self.save(self.store.analysis_dir.join("suggestions.json"), &records)
                    .await;
            }
            Event::Idea(idea) => {
                self.ideas.push(idea);
                let records = self.ideas.clone();
                self.save(self.store.analysis_dir.join("ideas.json"), &records)
                    .await;
            }
            _ => {}
        }
    }

    /// Append one JSONL record; each record is written and flushed whole,
    /// so a crash cannot corrupt previously committed lines.
    async fn append_segment(&mut self, segment: TranscriptSegment) {
        let line = match serde_json::to_string(&segment) {
            Ok(line) => line,
            Err(e) => {
                error!("unserializable segment dropped: {e}");
                return;
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .realtime
                .write_all(line.as_bytes())
                .and_then(|_| self.realtime.write_all(b"\n"))
                .and_then(|_| self.realtime.flush());
            match result {
                Ok(()) => break,
                Err(e) if attempt < WRITE_RETRIES => {
                    warn!(attempt, "transcript append failed, retrying: {e}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    self.report_degraded(&format!("transcript log write failed: {e}"));
                    break;
                }
            }
        }

        self.transcript.push(segment);
    }

    async fn save_questions(&mut self) {
        let records = self.questions.clone();
        self.save(self.store.analysis_dir.join("questions.json"), &records)
            .await;
    }

    /// Retried atomic rewrite of one analysis category file.
    async fn save<T: serde::Serialize>(&mut self, path: std::path::PathBuf, records: &T) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match write_json_atomic(&path, records) {
                Ok(()) => return,
                Err(e) if attempt < WRITE_RETRIES => {
                    warn!(attempt, "analysis write failed, retrying: {e:#}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    self.report_degraded(&format!("analysis write failed: {e:#}"));
                    return;
                }
            }
        }
    }

    /// Losing a write must not stop the live session: log, warn once on the
    /// bus, keep capturing.
    fn report_degraded(&mut self, reason: &str) {
        error!("{reason}");
        if self.degraded_reported {
            return;
        }
        self.degraded_reported = true;
        self.bus.publish(Event::Lifecycle(LifecycleEvent {
            session_id: self.store.session_id.clone(),
            phase: LifecyclePhase::Degraded {
                reason: reason.to_string(),
            },
            at: Utc::now(),
        }));
    }

    async fn finalize(&mut self) {
        if let Err(e) = self.realtime.flush() {
            error!("final transcript flush failed: {e}");
        }

        let path = self.store.transcripts_dir.join("full_transcript.txt");
        let mut body = String::new();
        for segment in &self.transcript {
            body.push_str(&format!(
                "[{}] {}\n",
                format_clock(segment.start_ms),
                segment.text
            ));
        }
        if let Err(e) = std::fs::write(&path, body) {
            error!("failed to write consolidated transcript: {e}");
        } else {
            info!("consolidated transcript saved: {}", path.display());
        }
    }
}
