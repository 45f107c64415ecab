use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AudioSink, BackendEvent, SegmentStream, StreamConfig, TranscriptionBackend};
use crate::audio::AudioFrame;
use crate::bus::EventBus;
use crate::config::ReconnectConfig;
use crate::error::PipelineError;
use crate::events::{Event, LifecycleEvent, LifecyclePhase, TranscriptSegment};

/// How long to wait for trailing backend results after a graceful close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub stream: StreamConfig,
    pub reconnect: ReconnectConfig,
    /// Audio frames held locally during an outage; oldest are dropped
    /// beyond this cap. Losing audio beats unbounded growth or blocking
    /// capture.
    pub buffer_cap_frames: usize,
}

/// Handle to one streaming transcription session.
///
/// Audio goes in through [`send_audio`]; normalized [`TranscriptSegment`]s
/// come out on the `transcript.segment` topic. On transient backend failure
/// the channel re-dials with bounded exponential backoff, buffering audio in
/// a capped queue meanwhile; when attempts are exhausted it publishes a
/// degraded lifecycle event and keeps draining audio until closed.
///
/// [`send_audio`]: TranscriptionChannel::send_audio
pub struct TranscriptionChannel {
    audio_tx: mpsc::Sender<AudioFrame>,
    task: JoinHandle<()>,
}

impl TranscriptionChannel {
    /// Open the channel. The initial connection must succeed; a backend
    /// that is unreachable at open time aborts session start.
    pub async fn open(
        backend: Arc<dyn TranscriptionBackend>,
        bus: Arc<EventBus>,
        config: ChannelConfig,
    ) -> Result<Self, PipelineError> {
        let (sink, stream) = backend.connect(&config.stream).await?;
        info!(session = %config.stream.session_id, "transcription channel open");

        let (audio_tx, audio_rx) = mpsc::channel(64);
        let task = tokio::spawn(run(backend, bus, config, audio_rx, sink, stream));

        Ok(Self { audio_tx, task })
    }

    /// Queue one audio frame for the backend. Never blocks on backend I/O
    /// beyond the small send queue.
    pub async fn send_audio(&self, frame: AudioFrame) -> Result<(), PipelineError> {
        self.audio_tx
            .send(frame)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Clonable ingress for a pump task that outlives borrows of the
    /// channel handle. All sender clones must be dropped before [`close`]
    /// can finish draining.
    ///
    /// [`close`]: TranscriptionChannel::close
    pub fn sender(&self) -> AudioSender {
        AudioSender {
            tx: self.audio_tx.clone(),
        }
    }

    /// Graceful shutdown: stops accepting audio, lets the backend flush
    /// in-flight results, then tears the session down.
    pub async fn close(self) -> Result<(), PipelineError> {
        drop(self.audio_tx);
        if let Err(e) = self.task.await {
            error!("transcription channel task panicked: {e}");
        }
        Ok(())
    }
}

/// Clonable handle for feeding audio into a [`TranscriptionChannel`].
#[derive(Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<AudioFrame>,
}

impl AudioSender {
    pub async fn send(&self, frame: AudioFrame) -> Result<(), PipelineError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }
}

/// Rejects out-of-order finals and de-duplicates re-delivered final ids
/// after a reconnect.
struct OrderingGuard {
    last_final_start_ms: u64,
    seen_final_ids: HashSet<String>,
}

impl OrderingGuard {
    fn new() -> Self {
        Self {
            last_final_start_ms: 0,
            seen_final_ids: HashSet::new(),
        }
    }

    /// Decide whether a final segment may pass. `Err` carries the protocol
    /// violation; a duplicate id returns `Ok(false)` (silently skipped).
    fn admit_final(&mut self, event: &BackendEvent) -> Result<bool, PipelineError> {
        if self.seen_final_ids.contains(&event.id) {
            return Ok(false);
        }
        if event.start_ms < self.last_final_start_ms {
            return Err(PipelineError::Protocol(format!(
                "final segment {} starts at {}ms, before last accepted {}ms",
                event.id, event.start_ms, self.last_final_start_ms
            )));
        }
        self.seen_final_ids.insert(event.id.clone());
        self.last_final_start_ms = event.start_ms;
        Ok(true)
    }
}

enum ConnectedOutcome {
    /// Caller closed the audio side; drain and stop.
    Closed,
    /// Backend connection failed; try to re-dial.
    Lost,
}

enum Redial {
    Connected(Box<dyn AudioSink>, Box<dyn SegmentStream>),
    Exhausted,
    ChannelClosed,
}

async fn run(
    backend: Arc<dyn TranscriptionBackend>,
    bus: Arc<EventBus>,
    config: ChannelConfig,
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    sink: Box<dyn AudioSink>,
    stream: Box<dyn SegmentStream>,
) {
    let mut guard = OrderingGuard::new();
    let mut buffer: VecDeque<AudioFrame> = VecDeque::new();
    let mut conn = Some((sink, stream));

    while let Some((mut sink, mut stream)) = conn.take() {
        match run_connected(
            &mut sink,
            &mut stream,
            &mut audio_rx,
            &mut buffer,
            &bus,
            &mut guard,
            config.buffer_cap_frames,
        )
        .await
        {
            ConnectedOutcome::Closed => {
                if let Err(e) = sink.close().await {
                    debug!("sink close failed: {e}");
                }
                drain_trailing(&mut stream, &bus, &mut guard).await;
                info!(session = %config.stream.session_id, "transcription channel closed");
                return;
            }
            ConnectedOutcome::Lost => {
                match redial(&*backend, &config, &mut audio_rx, &mut buffer).await {
                    Redial::Connected(s, r) => conn = Some((s, r)),
                    Redial::ChannelClosed => return,
                    Redial::Exhausted => break,
                }
            }
        }
    }

    // Backoff exhausted: announce degraded state, keep accepting audio into
    // the capped buffer so capture is never blocked.
    warn!(
        session = %config.stream.session_id,
        "reconnect attempts exhausted, channel degraded"
    );
    bus.publish(Event::Lifecycle(LifecycleEvent {
        session_id: config.stream.session_id.clone(),
        phase: LifecyclePhase::Degraded {
            reason: "transcription backend unreachable".to_string(),
        },
        at: Utc::now(),
    }));

    while let Some(frame) = audio_rx.recv().await {
        push_capped(&mut buffer, frame, config.buffer_cap_frames);
    }
}

async fn run_connected(
    sink: &mut Box<dyn AudioSink>,
    stream: &mut Box<dyn SegmentStream>,
    audio_rx: &mut mpsc::Receiver<AudioFrame>,
    buffer: &mut VecDeque<AudioFrame>,
    bus: &EventBus,
    guard: &mut OrderingGuard,
    buffer_cap: usize,
) -> ConnectedOutcome {
    // Flush frames buffered during an outage before live ones.
    while let Some(frame) = buffer.pop_front() {
        if let Err(e) = sink.send(&frame).await {
            warn!("send failed while flushing buffer: {e}");
            buffer.push_front(frame);
            return ConnectedOutcome::Lost;
        }
    }

    loop {
        tokio::select! {
            maybe_frame = audio_rx.recv() => match maybe_frame {
                Some(frame) => {
                    if let Err(e) = sink.send(&frame).await {
                        warn!("audio send failed: {e}");
                        push_capped(buffer, frame, buffer_cap);
                        return ConnectedOutcome::Lost;
                    }
                }
                None => return ConnectedOutcome::Closed,
            },
            event = stream.next_event() => match event {
                Ok(Some(event)) => handle_event(event, guard, bus),
                Ok(None) => {
                    warn!("backend ended the stream");
                    return ConnectedOutcome::Lost;
                }
                Err(e) => {
                    warn!("receive failed: {e}");
                    return ConnectedOutcome::Lost;
                }
            },
        }
    }
}

/// Normalize one backend event and publish it. Out-of-order finals are
/// dropped and logged; the pipeline continues.
fn handle_event(event: BackendEvent, guard: &mut OrderingGuard, bus: &EventBus) {
    if event.is_final {
        match guard.admit_final(&event) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %event.id, "skipping re-delivered final segment");
                return;
            }
            Err(e) => {
                warn!("dropping segment: {e}");
                return;
            }
        }
    }

    bus.publish(Event::Transcript(TranscriptSegment {
        id: event.id,
        start_ms: event.start_ms,
        end_ms: event.end_ms,
        text: event.text,
        is_final: event.is_final,
        language: event.language,
    }));
}

/// After a graceful close, give the backend a bounded window to deliver
/// results for frames already sent.
async fn drain_trailing(
    stream: &mut Box<dyn SegmentStream>,
    bus: &EventBus,
    guard: &mut OrderingGuard,
) {
    loop {
        match tokio::time::timeout(DRAIN_TIMEOUT, stream.next_event()).await {
            Ok(Ok(Some(event))) => handle_event(event, guard, bus),
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!("stream ended during drain: {e}");
                return;
            }
            Err(_) => {
                debug!("drain window elapsed");
                return;
            }
        }
    }
}

/// Bounded exponential backoff re-dial. Audio arriving during the outage is
/// buffered (capped, oldest dropped) so capture never blocks.
async fn redial(
    backend: &dyn TranscriptionBackend,
    config: &ChannelConfig,
    audio_rx: &mut mpsc::Receiver<AudioFrame>,
    buffer: &mut VecDeque<AudioFrame>,
) -> Redial {
    let mut delay = Duration::from_millis(config.reconnect.base_ms);
    let cap = Duration::from_millis(config.reconnect.cap_ms);

    for attempt in 1..=config.reconnect.max_attempts {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                maybe_frame = audio_rx.recv() => match maybe_frame {
                    Some(frame) => push_capped(buffer, frame, config.buffer_cap_frames),
                    None => return Redial::ChannelClosed,
                },
            }
        }

        match backend.connect(&config.stream).await {
            Ok((sink, stream)) => {
                info!(attempt, "transcription backend reconnected");
                return Redial::Connected(sink, stream);
            }
            Err(e) => warn!(attempt, "reconnect failed: {e}"),
        }

        delay = (delay * 2).min(cap);
    }

    Redial::Exhausted
}

fn push_capped(buffer: &mut VecDeque<AudioFrame>, frame: AudioFrame, cap: usize) {
    while buffer.len() >= cap.max(1) {
        buffer.pop_front();
    }
    buffer.push_back(frame);
}
