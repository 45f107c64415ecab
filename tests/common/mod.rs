// Shared test doubles: a scripted transcription backend and a
// programmable language model.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lectern::{
    AudioFrame, AudioSink, AudioSource, BackendEvent, CompletionRequest, LanguageModel,
    PipelineError, SegmentStream, StreamConfig, TranscriptSegment, TranscriptionBackend,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Language model that replays queued responses, then answers "mock reply"
/// once the queue is empty.
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn push_ok(&self, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(PipelineError::Analysis(message)),
            None => Ok("mock reply".to_string()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// What one `connect` call on the scripted backend should do.
pub enum ConnectScript {
    /// Connection refused.
    Fail(String),
    /// A live session that delivers the given events in order, then either
    /// stays open until the sink is closed or drops the connection.
    Session(Vec<BackendEvent>, AfterEvents),
}

#[derive(Clone, Copy)]
pub enum AfterEvents {
    /// Wait for a graceful close, then end the stream.
    StayOpen,
    /// Simulate the backend dropping the connection.
    Drop,
}

/// Transcription backend driven by a per-connection script.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<ConnectScript>>,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<u64>>>,
    audio_seen_tx: watch::Sender<bool>,
    audio_seen_rx: watch::Receiver<bool>,
    gated: bool,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<ConnectScript>) -> Arc<Self> {
        Self::build(scripts, false)
    }

    /// Like [`new`], but streams hold their scripted events back until the
    /// first audio frame arrives, the way a real backend only transcribes
    /// audio it was sent.
    ///
    /// [`new`]: ScriptedBackend::new
    pub fn gated(scripts: Vec<ConnectScript>) -> Arc<Self> {
        Self::build(scripts, true)
    }

    fn build(scripts: Vec<ConnectScript>, gated: bool) -> Arc<Self> {
        let (audio_seen_tx, audio_seen_rx) = watch::channel(false);
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            audio_seen_tx,
            audio_seen_rx,
            gated,
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sequence numbers of every frame delivered to any sink, in order.
    pub fn sent_sequences(&self) -> Vec<u64> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedBackend {
    async fn connect(
        &self,
        _config: &StreamConfig,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn SegmentStream>), PipelineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectScript::Session(Vec::new(), AfterEvents::StayOpen));

        match script {
            ConnectScript::Fail(message) => Err(PipelineError::Connection(message)),
            ConnectScript::Session(events, after) => {
                let (closed_tx, closed_rx) = watch::channel(false);
                let sink = ScriptedSink {
                    sent: Arc::clone(&self.sent),
                    audio_seen: self.audio_seen_tx.clone(),
                    closed: closed_tx,
                };
                let stream = ScriptedStream {
                    events: events.into(),
                    after,
                    gate: self.gated.then(|| self.audio_seen_rx.clone()),
                    closed: closed_rx,
                };
                Ok((Box::new(sink), Box::new(stream)))
            }
        }
    }
}

struct ScriptedSink {
    sent: Arc<Mutex<Vec<u64>>>,
    audio_seen: watch::Sender<bool>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl AudioSink for ScriptedSink {
    async fn send(&mut self, frame: &AudioFrame) -> Result<(), PipelineError> {
        self.sent.lock().unwrap().push(frame.sequence);
        let _ = self.audio_seen.send(true);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        let _ = self.closed.send(true);
        Ok(())
    }
}

struct ScriptedStream {
    events: VecDeque<BackendEvent>,
    after: AfterEvents,
    gate: Option<watch::Receiver<bool>>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl SegmentStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<BackendEvent>, PipelineError> {
        if let Some(gate) = &mut self.gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        match self.after {
            AfterEvents::Drop => Ok(None),
            AfterEvents::StayOpen => {
                while !*self.closed.borrow() {
                    if self.closed.changed().await.is_err() {
                        break;
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Audio source that yields a fixed number of silent frames, then ends.
pub struct SilenceSource {
    remaining: u64,
    sequence: u64,
}

impl SilenceSource {
    pub fn new(frames: u64) -> Box<Self> {
        Box::new(Self {
            remaining: frames,
            sequence: 0,
        })
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<AudioFrame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let frame = AudioFrame {
            samples: vec![0i16; 1600],
            sample_rate: 16000,
            channels: 1,
            sequence: self.sequence,
            captured_at: Utc::now(),
        };
        self.sequence += 1;
        // Pace roughly like a live capture without slowing the tests down.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        Ok(Some(frame))
    }
}

pub fn final_segment(id: &str, start_ms: u64, end_ms: u64, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        id: id.to_string(),
        start_ms,
        end_ms,
        text: text.to_string(),
        is_final: true,
        language: None,
    }
}

pub fn backend_final(id: &str, start_ms: u64, end_ms: u64, text: &str) -> BackendEvent {
    BackendEvent {
        id: id.to_string(),
        start_ms,
        end_ms,
        text: text.to_string(),
        is_final: true,
        language: None,
    }
}

pub fn backend_partial(id: &str, start_ms: u64, text: &str) -> BackendEvent {
    BackendEvent {
        id: id.to_string(),
        start_ms,
        end_ms: start_ms,
        text: text.to_string(),
        is_final: false,
        language: None,
    }
}
