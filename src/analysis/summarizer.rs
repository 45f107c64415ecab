use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{complete_bounded, prompt, report_failure};
use crate::bus::EventBus;
use crate::config::AnalysisConfig;
use crate::events::{Event, SummaryEvent, Topic, TranscriptSegment};
use crate::llm::{CompletionRequest, LanguageModel};

const ANALYZER: &str = "summarizer";

/// Emitted when a window had no usable transcript or the model call failed
/// after its bound; the window is still covered so summaries stitch.
pub const SUMMARY_UNAVAILABLE: &str = "summary unavailable";
const NO_SPEECH: &str = "(no speech in this window)";

#[derive(Debug, Clone, Copy)]
pub enum SummarizerCommand {
    /// Periodic trigger: emit every complete interval window.
    Tick,
    /// Explicit request / end-of-session flush: also cover the residual
    /// partial window up to the latest segment.
    Flush,
}

/// Spawn the summarizer.
///
/// Windows are cursor-based over segment timestamps: each summary covers
/// `[cursor, cursor + interval)` and advances the cursor, so consecutive
/// windows stitch exactly with no gap and no overlap. On shutdown the
/// residual window is flushed before the task exits.
pub fn spawn_summarizer(
    bus: Arc<EventBus>,
    llm: Arc<dyn LanguageModel>,
    materials_context: String,
    config: AnalysisConfig,
    mut commands: mpsc::Receiver<SummarizerCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Subscribe before the task is scheduled so no segment published after
    // this call can be missed.
    let mut segments = bus.subscribe(Topic::TranscriptSegment);
    tokio::spawn(async move {
        let mut windows = SummaryWindows::new(config.summary_interval_secs * 1000);
        info!("summarizer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                msg = segments.recv() => match msg {
                    Ok(Event::Transcript(segment)) if segment.is_final => {
                        windows.observe(segment);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("summarizer lagged, {n} segments skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                cmd = commands.recv() => match cmd {
                    Some(SummarizerCommand::Tick) => {
                        for window in windows.complete_windows() {
                            summarize(&bus, &llm, &materials_context, &config, window).await;
                        }
                    }
                    Some(SummarizerCommand::Flush) => {
                        flush(&bus, &llm, &materials_context, &config, &mut windows).await;
                    }
                    None => break,
                },
            }
        }

        // Drain segments published before shutdown was signalled, then cover
        // whatever rests beyond the last complete window.
        loop {
            match segments.try_recv() {
                Ok(Event::Transcript(segment)) if segment.is_final => {
                    windows.observe(segment);
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("summarizer lagged, {n} segments skipped");
                }
                Err(_) => break,
            }
        }
        flush(&bus, &llm, &materials_context, &config, &mut windows).await;
        info!("summarizer stopped");
    })
}

async fn flush(
    bus: &EventBus,
    llm: &Arc<dyn LanguageModel>,
    materials_context: &str,
    config: &AnalysisConfig,
    windows: &mut SummaryWindows,
) {
    for window in windows.complete_windows() {
        summarize(bus, llm, materials_context, config, window).await;
    }
    if let Some(window) = windows.flush_residual() {
        summarize(bus, llm, materials_context, config, window).await;
    }
}

async fn summarize(
    bus: &EventBus,
    llm: &Arc<dyn LanguageModel>,
    materials_context: &str,
    config: &AnalysisConfig,
    window: Window,
) {
    let text = if window.segments.is_empty() {
        NO_SPEECH.to_string()
    } else {
        let transcript: Vec<&str> = window.segments.iter().map(|s| s.text.as_str()).collect();
        let request = CompletionRequest {
            system: prompt::system_prompt(&config.output_language),
            prompt: prompt::summary(
                &transcript.join("\n"),
                materials_context,
                window.start_ms,
                window.end_ms,
            ),
            temperature: 0.5,
            max_tokens: 1024,
        };
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        match complete_bounded(llm, &request, timeout).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                report_failure(bus, ANALYZER, &e);
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    };

    info!(
        window_start_ms = window.start_ms,
        window_end_ms = window.end_ms,
        "summary window complete"
    );
    bus.publish(Event::Summary(SummaryEvent {
        window_start_ms: window.start_ms,
        window_end_ms: window.end_ms,
        text,
        generated_at: Utc::now(),
    }));
}

struct Window {
    start_ms: u64,
    end_ms: u64,
    segments: Vec<TranscriptSegment>,
}

/// Cursor-based window bookkeeping over segment timestamps.
///
/// Invariant: the union of all produced windows is exactly
/// `[first_segment_start, last_segment_end]` — no segment double-counted,
/// no gap. A segment belongs to the window containing its start time.
struct SummaryWindows {
    interval_ms: u64,
    cursor: Option<u64>,
    pending: Vec<TranscriptSegment>,
}

impl SummaryWindows {
    fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            cursor: None,
            pending: Vec::new(),
        }
    }

    fn observe(&mut self, segment: TranscriptSegment) {
        if self.cursor.is_none() {
            self.cursor = Some(segment.start_ms);
        }
        self.pending.push(segment);
    }

    /// Every full interval window covered by observed segments.
    fn complete_windows(&mut self) -> Vec<Window> {
        let Some(mut cursor) = self.cursor else {
            return Vec::new();
        };
        let Some(max_end) = self.pending.iter().map(|s| s.end_ms).max() else {
            return Vec::new();
        };

        let mut windows = Vec::new();
        while cursor + self.interval_ms <= max_end {
            let end = cursor + self.interval_ms;
            let segments = take_starting_before(&mut self.pending, end);
            windows.push(Window {
                start_ms: cursor,
                end_ms: end,
                segments,
            });
            cursor = end;
        }
        self.cursor = Some(cursor);
        windows
    }

    /// The partial window from the cursor to the latest observed segment.
    fn flush_residual(&mut self) -> Option<Window> {
        let cursor = self.cursor?;
        let max_end = self.pending.iter().map(|s| s.end_ms).max()?;
        let segments = std::mem::take(&mut self.pending);
        self.cursor = Some(max_end);
        Some(Window {
            start_ms: cursor,
            end_ms: max_end,
            segments,
        })
    }
}

fn take_starting_before(pending: &mut Vec<TranscriptSegment>, end_ms: u64) -> Vec<TranscriptSegment> {
    let mut taken = Vec::new();
    let mut rest = Vec::new();
    for segment in pending.drain(..) {
        if segment.start_ms < end_ms {
            taken.push(segment);
        } else {
            rest.push(segment);
        }
    }
    *pending = rest;
    taken
}
