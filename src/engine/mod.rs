//! Session orchestrator.
//!
//! Owns the lifecycle of one lecture session at a time: wires the audio
//! source into the transcription channel, fans transcript segments out to
//! the analyzers over the event bus, and tears everything down in an order
//! that loses no finalized artifact.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::analysis::{
    spawn_answer_generator, spawn_on_demand_generator, spawn_question_detector, spawn_summarizer,
    RequestKind, SummarizerCommand,
};
use crate::audio::AudioSource;
use crate::bus::EventBus;
use crate::config::Config;
use crate::error::PipelineError;
use crate::events::{Event, LifecycleEvent, LifecyclePhase, Topic};
use crate::llm::LanguageModel;
use crate::materials::MaterialSet;
use crate::session::{Session, SessionAction, SessionState};
use crate::store::{SessionStore, StoreHandle};
use crate::transcribe::{
    AudioSender, ChannelConfig, StreamConfig, TranscriptionBackend, TranscriptionChannel,
};

/// Character cap on the merged materials excerpt handed to the analyzers.
const MATERIALS_CONTEXT_CAP: usize = 8000;

/// Everything that lives only while a session is running.
struct Running {
    channel: TranscriptionChannel,
    store: StoreHandle,
    session_root: PathBuf,
    shutdown: watch::Sender<bool>,
    analyzers: Vec<JoinHandle<()>>,
    pump: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    paused: Arc<AtomicBool>,
    summary_tx: mpsc::Sender<SummarizerCommand>,
    suggestion_tx: mpsc::Sender<()>,
    ideas_tx: mpsc::Sender<()>,
}

pub struct Engine {
    config: Config,
    bus: Arc<EventBus>,
    backend: Arc<dyn TranscriptionBackend>,
    llm: Arc<dyn LanguageModel>,
    session: Option<Session>,
    running: Option<Running>,
}

impl Engine {
    pub fn new(
        config: Config,
        backend: Arc<dyn TranscriptionBackend>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            config,
            bus: Arc::new(EventBus::default()),
            backend,
            llm,
            session: None,
            running: None,
        }
    }

    /// Shared bus handle, for subscribers outside the pipeline (UIs, tests).
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Start a new session.
    ///
    /// The transcription backend must be reachable up front: a failed
    /// initial connection aborts the start and leaves the engine idle.
    pub async fn start(
        &mut self,
        name: &str,
        source: Box<dyn AudioSource>,
        materials: MaterialSet,
    ) -> Result<(), PipelineError> {
        if let Some(session) = &self.session {
            if session.state != SessionState::Ended {
                return Err(PipelineError::InvalidStateTransition {
                    from: session.state.to_string(),
                    action: "start",
                });
            }
        }

        let mut session = Session::new(name, materials.refs());

        let channel = TranscriptionChannel::open(
            Arc::clone(&self.backend),
            Arc::clone(&self.bus),
            ChannelConfig {
                stream: StreamConfig {
                    session_id: session.id.clone(),
                    sample_rate: self.config.transcription.sample_rate,
                    channels: self.config.transcription.channels,
                },
                reconnect: self.config.transcription.reconnect.clone(),
                buffer_cap_frames: self.config.transcription.buffer_cap_frames,
            },
        )
        .await?;

        let store = SessionStore::create(
            &self.config.storage.data_dir,
            &session,
            self.config.analysis.summary_interval_secs,
        )?;
        let session_root = store.root().to_path_buf();
        let store = store.spawn_writer(Arc::clone(&self.bus))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let materials_context = materials.context(MATERIALS_CONTEXT_CAP);
        let analysis = self.config.analysis.clone();

        let mut analyzers = Vec::new();
        if analysis.enable_question_detection {
            analyzers.push(spawn_question_detector(
                Arc::clone(&self.bus),
                Arc::clone(&self.llm),
                analysis.clone(),
                shutdown_rx.clone(),
            ));
            analyzers.push(spawn_answer_generator(
                Arc::clone(&self.bus),
                Arc::clone(&self.llm),
                materials_context.clone(),
                analysis.clone(),
                shutdown_rx.clone(),
            ));
        }

        // The summarizer always runs so explicit flush requests work even
        // with the periodic cadence turned off.
        let (summary_tx, summary_rx) = mpsc::channel(8);
        analyzers.push(spawn_summarizer(
            Arc::clone(&self.bus),
            Arc::clone(&self.llm),
            materials_context.clone(),
            analysis.clone(),
            summary_rx,
            shutdown_rx.clone(),
        ));

        let (suggestion_tx, suggestion_rx) = mpsc::channel(8);
        analyzers.push(spawn_on_demand_generator(
            RequestKind::Suggestion,
            Arc::clone(&self.bus),
            Arc::clone(&self.llm),
            materials_context.clone(),
            analysis.clone(),
            suggestion_rx,
            shutdown_rx.clone(),
        ));

        let (ideas_tx, ideas_rx) = mpsc::channel(8);
        analyzers.push(spawn_on_demand_generator(
            RequestKind::Ideas,
            Arc::clone(&self.bus),
            Arc::clone(&self.llm),
            materials_context,
            analysis,
            ideas_rx,
            shutdown_rx.clone(),
        ));

        let ticker = if self.config.analysis.enable_periodic_summary {
            Some(spawn_summary_ticker(
                self.config.analysis.summary_interval_secs,
                summary_tx.clone(),
            ))
        } else {
            None
        };

        let paused = Arc::new(AtomicBool::new(false));
        let pump = spawn_audio_pump(
            source,
            channel.sender(),
            Arc::clone(&self.bus),
            Arc::clone(&paused),
        );

        session.transition(SessionAction::Start)?;
        self.publish_lifecycle(&session, LifecyclePhase::Started);
        info!(session = %session.id, name, "session started");

        self.running = Some(Running {
            channel,
            store,
            session_root,
            shutdown: shutdown_tx,
            analyzers,
            pump,
            ticker,
            paused,
            summary_tx,
            suggestion_tx,
            ideas_tx,
        });
        self.session = Some(session);
        Ok(())
    }

    /// Suspend audio intake. Analyzers stay subscribed; already captured
    /// speech keeps flowing through the pipeline.
    pub fn pause(&mut self) -> Result<(), PipelineError> {
        let session = self.require_session("pause")?;
        session.transition(SessionAction::Pause)?;
        let snapshot = session.clone();
        if let Some(running) = &self.running {
            running.paused.store(true, Ordering::Relaxed);
        }
        self.publish_lifecycle(&snapshot, LifecyclePhase::Paused);
        info!(session = %snapshot.id, "session paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PipelineError> {
        let session = self.require_session("resume")?;
        session.transition(SessionAction::Resume)?;
        let snapshot = session.clone();
        if let Some(running) = &self.running {
            running.paused.store(false, Ordering::Relaxed);
        }
        self.publish_lifecycle(&snapshot, LifecyclePhase::Resumed);
        info!(session = %snapshot.id, "session resumed");
        Ok(())
    }

    /// End the session and return its storage directory.
    ///
    /// Teardown order matters: stop the audio intake, let the backend
    /// flush trailing results, flush the analyzers, and finalize the store
    /// last so every published artifact lands on disk.
    pub async fn end(&mut self) -> Result<PathBuf, PipelineError> {
        let session = self.require_session("end")?;
        session.transition(SessionAction::End)?;
        let snapshot = session.clone();

        let running = match self.running.take() {
            Some(running) => running,
            None => {
                return Err(PipelineError::InvalidStateTransition {
                    from: "none".to_string(),
                    action: "end",
                })
            }
        };

        running.pump.abort();
        if let Some(ticker) = running.ticker {
            ticker.abort();
        }

        // Trailing backend results for already sent audio are published
        // during the channel drain.
        running.channel.close().await?;

        let _ = running.shutdown.send(true);
        let grace = Duration::from_secs(self.config.analysis.shutdown_grace_secs);
        for task in running.analyzers {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("analyzer task panicked: {e}"),
                Err(_) => warn!("analyzer did not stop within grace period, abandoning it"),
            }
        }

        self.publish_lifecycle(&snapshot, LifecyclePhase::Ended);

        running.store.finalize().await?;
        info!(session = %snapshot.id, root = %running.session_root.display(), "session ended");
        Ok(running.session_root)
    }

    /// Summarize everything since the last summary window, now.
    pub async fn request_summary(&self) -> Result<(), PipelineError> {
        let running = self.require_running("summarize")?;
        running
            .summary_tx
            .send(SummarizerCommand::Flush)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    pub async fn request_suggestion(&self) -> Result<(), PipelineError> {
        let running = self.require_running("suggest")?;
        running
            .suggestion_tx
            .send(())
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    pub async fn request_ideas(&self) -> Result<(), PipelineError> {
        let running = self.require_running("ideas")?;
        running
            .ideas_tx
            .send(())
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    fn require_session(&mut self, action: &'static str) -> Result<&mut Session, PipelineError> {
        self.session
            .as_mut()
            .ok_or(PipelineError::InvalidStateTransition {
                from: "none".to_string(),
                action,
            })
    }

    fn require_running(&self, action: &'static str) -> Result<&Running, PipelineError> {
        self.running
            .as_ref()
            .ok_or(PipelineError::InvalidStateTransition {
                from: self
                    .session
                    .as_ref()
                    .map(|s| s.state.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                action,
            })
    }

    fn publish_lifecycle(&self, session: &Session, phase: LifecyclePhase) {
        self.bus.publish(Event::Lifecycle(LifecycleEvent {
            session_id: session.id.clone(),
            phase,
            at: Utc::now(),
        }));
    }
}

/// Forward frames from the audio source into the transcription channel,
/// mirroring them on the bus for live subscribers. While paused, frames are
/// read and discarded so the source keeps real-time pace.
fn spawn_audio_pump(
    mut source: Box<dyn AudioSource>,
    sender: AudioSender,
    bus: Arc<EventBus>,
    paused: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.next_frame().await {
                Ok(Some(frame)) => {
                    if paused.load(Ordering::Relaxed) {
                        continue;
                    }
                    if bus.subscriber_count(Topic::AudioFrame) > 0 {
                        bus.publish(Event::Audio(frame.clone()));
                    }
                    if sender.send(frame).await.is_err() {
                        warn!("transcription channel closed, audio pump stopping");
                        break;
                    }
                }
                Ok(None) => {
                    info!("audio source exhausted");
                    break;
                }
                Err(e) => {
                    error!("audio capture failed: {e:#}");
                    break;
                }
            }
        }
    })
}

fn spawn_summary_ticker(
    interval_secs: u64,
    commands: mpsc::Sender<SummarizerCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        // The first tick of tokio's interval fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if commands.send(SummarizerCommand::Tick).await.is_err() {
                break;
            }
        }
    })
}
