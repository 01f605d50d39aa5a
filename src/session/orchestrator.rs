use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::context::ConversationContext;
use super::events::SessionEvent;
use super::state::{Session, SessionState};
use super::stats::{SessionCounters, SessionStats, Speaker, Transcript, TranscriptEntry};
use crate::audio::{AudioCapture, AudioFrame, AudioOutput, Microphone, PlaybackPipeline};
use crate::credential::CredentialProvider;
use crate::error::{GuardianError, GuardianResult};
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Owns the voice session and everything attached to it
///
/// Cheap to clone; all clones drive the same session. Create one per
/// application and hand it to whatever needs it.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    config: SessionConfig,
    transports: Arc<dyn TransportFactory>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,
    counters: Arc<SessionCounters>,
    /// Serializes microphone toggles across the unlocked device acquire
    toggle: Mutex<()>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: SessionState,
    /// Bumped on every connect and teardown; background work tagged with an
    /// older value is stale
    generation: u64,
    session: Option<Session>,
    transport: Option<Arc<dyn Transport>>,
    capture: Option<AudioCapture>,
    uplink: Option<JoinHandle<()>>,
    playback: Option<PlaybackPipeline>,
    pump: Option<JoinHandle<()>>,
    greeting: Option<JoinHandle<()>>,
    transcript: Transcript,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    /// Drops from capture runs that already ended
    dropped_before: u64,
}

/// Everything a session holds, detached from the orchestrator for release
#[derive(Default)]
struct Resources {
    transport: Option<Arc<dyn Transport>>,
    capture: Option<AudioCapture>,
    uplink: Option<JoinHandle<()>>,
    playback: Option<PlaybackPipeline>,
    pump: Option<JoinHandle<()>>,
    greeting: Option<JoinHandle<()>>,
}

impl Resources {
    /// `from_pump` is set when the event pump itself is tearing down; it must
    /// not abort the task it is running on.
    async fn release(self, from_pump: bool) {
        if let Some(mut capture) = self.capture {
            capture.stop();
        }
        if let Some(uplink) = self.uplink {
            uplink.abort();
        }
        if let Some(greeting) = self.greeting {
            greeting.abort();
        }
        if let Some(pump) = self.pump {
            if !from_pump {
                pump.abort();
            }
        }
        if let Some(playback) = self.playback {
            playback.shutdown();
        }
        if let Some(transport) = self.transport {
            transport.close().await;
        }
    }
}

/// Deliver a terminal event once the session's resources are released
fn notify(events: &Option<mpsc::UnboundedSender<SessionEvent>>, event: SessionEvent) {
    if let Some(events) = events {
        if events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        notify(&self.events, event);
    }

    fn microphone_active(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| c.is_active())
    }

    fn stop_capture(&mut self) {
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            self.dropped_before += capture.frames_dropped();
        }
    }

    /// End the current session: invalidate background work, detach resources
    /// and move to `state`
    fn teardown(&mut self, state: SessionState) -> Resources {
        self.generation += 1;
        self.state = state;
        self.session = None;
        if let Some(capture) = &self.capture {
            self.dropped_before += capture.frames_dropped();
        }
        self.transcript.close_turn();

        Resources {
            transport: self.transport.take(),
            capture: self.capture.take(),
            uplink: self.uplink.take(),
            playback: self.playback.take(),
            pump: self.pump.take(),
            greeting: self.greeting.take(),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in [self.uplink.take(), self.pump.take(), self.greeting.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        transports: Arc<dyn TransportFactory>,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transports,
                microphone,
                output,
                counters: Arc::new(SessionCounters::default()),
                toggle: Mutex::new(()),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    generation: 0,
                    session: None,
                    transport: None,
                    capture: None,
                    uplink: None,
                    playback: None,
                    pump: None,
                    greeting: None,
                    transcript: Transcript::default(),
                    events: None,
                    dropped_before: 0,
                }),
            }),
        }
    }

    /// Open a new session
    ///
    /// A no-op while a session is connecting or connected. Failures are
    /// returned and also reported as `SessionEvent::Error`. An attempt cut
    /// short by `disconnect()` returns `Ok` and leaves the state alone.
    pub async fn connect(
        &self,
        credentials: Arc<dyn CredentialProvider>,
        context: ConversationContext,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> GuardianResult<()> {
        let shared = &self.shared;

        let (generation, transport) = {
            let mut inner = shared.inner.lock().await;
            if !inner.state.can_connect() {
                debug!("connect() ignored: session is {}", inner.state);
                return Ok(());
            }

            inner.generation += 1;
            let session = Session::new(context.clone());
            info!("Connecting session {}", session.id);

            inner.session = Some(session);
            inner.state = SessionState::Connecting;
            inner.transcript.clear();
            inner.dropped_before = 0;
            shared.counters.reset();
            inner.events = Some(events);

            let transport = shared.transports.create();
            inner.transport = Some(Arc::clone(&transport));
            (inner.generation, transport)
        };

        let token = match credentials.request_token().await {
            Ok(token) => token,
            Err(e) => {
                if !shared.fail(generation, e.clone()).await {
                    return Ok(());
                }
                error!("Failed to obtain session token: {}", e);
                return Err(e);
            }
        };

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        if let Err(e) = transport.open(&token, &context, transport_tx).await {
            transport.close().await;
            if !shared.fail(generation, e.clone()).await {
                // Closed by a disconnect while the handshake was in flight
                return Ok(());
            }
            error!("Failed to open transport: {}", e);
            return Err(e);
        }

        let mut inner = shared.inner.lock().await;
        if inner.generation != generation || inner.state != SessionState::Connecting {
            // Torn down while the handshake was in flight
            drop(inner);
            info!("Session superseded during connect, closing transport");
            transport.close().await;
            return Ok(());
        }

        inner.state = SessionState::Connected;
        if let Some(session) = inner.session.as_mut() {
            session.state = SessionState::Connected;
        }
        inner.playback = Some(PlaybackPipeline::spawn(
            Arc::clone(&shared.output),
            shared.config.playback_sample_rate,
        ));
        inner.pump = Some(tokio::spawn(pump_events(
            Arc::downgrade(shared),
            generation,
            transport_rx,
        )));
        inner.greeting = Some(tokio::spawn(send_greeting(
            Arc::downgrade(shared),
            generation,
        )));
        inner.emit(SessionEvent::Connected);

        info!("Session connected");
        Ok(())
    }

    /// Release everything; safe to call in any state and repeatedly
    pub async fn disconnect(&self) {
        let (resources, events, had_session) = {
            let mut inner = self.shared.inner.lock().await;
            let had_session = inner.session.is_some();
            let next = if had_session {
                SessionState::Disconnected
            } else {
                inner.state
            };
            let resources = inner.teardown(next);
            inner.transcript.clear();
            (resources, inner.events.take(), had_session)
        };

        resources.release(false).await;
        if had_session {
            info!("Session disconnected");
            notify(&events, SessionEvent::Disconnected);
        }
    }

    /// Start or stop streaming the microphone; returns whether it is now on
    ///
    /// The device is acquired without holding the session lock, so inbound
    /// audio and interrupts keep flowing while a permission prompt is up.
    pub async fn toggle_microphone(&self) -> GuardianResult<bool> {
        let shared = &self.shared;
        let _toggling = shared.toggle.lock().await;

        let (generation, transport) = {
            let mut inner = shared.inner.lock().await;
            if inner.state != SessionState::Connected {
                return Err(GuardianError::NotConnected);
            }

            if inner.microphone_active() {
                inner.stop_capture();
                info!("Microphone off");
                return Ok(false);
            }

            let Some(transport) = inner.transport.clone() else {
                return Err(GuardianError::NotConnected);
            };
            (inner.generation, transport)
        };

        let (sink, mut uplink_rx) = mpsc::channel::<AudioFrame>(shared.config.uplink_capacity);
        let mut capture =
            AudioCapture::new(Arc::clone(&shared.microphone), shared.config.capture.clone());
        let started = capture.start(sink).await;

        let mut inner = shared.inner.lock().await;
        if inner.generation != generation || inner.state != SessionState::Connected {
            // Session ended while the device was being acquired
            capture.stop();
            return match started {
                Ok(()) => Err(GuardianError::NotConnected),
                Err(e) => Err(e),
            };
        }

        if let Err(e) = started {
            error!("Microphone unavailable: {}", e);
            let resources = inner.teardown(SessionState::Error);
            let events = inner.events.clone();
            drop(inner);
            resources.release(false).await;
            notify(&events, SessionEvent::Error(e.clone()));
            return Err(e);
        }

        let counters = Arc::clone(&shared.counters);
        inner.uplink = Some(tokio::spawn(async move {
            while let Some(frame) = uplink_rx.recv().await {
                transport.send_audio_frame(frame);
                counters.frames_sent.fetch_add(1, Ordering::SeqCst);
            }
            debug!("Uplink task stopped");
        }));
        inner.capture = Some(capture);

        info!("Microphone on");
        Ok(true)
    }

    /// Send a typed user turn
    pub async fn send_text(&self, text: &str) -> GuardianResult<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != SessionState::Connected {
            return Err(GuardianError::NotConnected);
        }
        let transport = inner.transport.clone().ok_or(GuardianError::NotConnected)?;

        transport.send_text(text, true)?;
        inner.transcript.push_turn(Speaker::User, text);
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Current session, if one is connecting or connected
    pub async fn session(&self) -> Option<Session> {
        self.shared.inner.lock().await.session.clone()
    }

    /// Entries of the current session, or of the last one until the next
    /// `connect()` when it ended by remote close or error. `disconnect()`
    /// clears it.
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.inner.lock().await.transcript.entries().to_vec()
    }

    pub async fn is_microphone_active(&self) -> bool {
        self.shared.inner.lock().await.microphone_active()
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock().await;
        let counters = &self.shared.counters;

        let started_at = inner.session.as_ref().map(|s| s.created_at);
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let live_dropped = inner
            .capture
            .as_ref()
            .map(|c| c.frames_dropped())
            .unwrap_or(0);

        SessionStats {
            session_id: inner.session.as_ref().map(|s| s.id.to_string()),
            state: inner.state,
            started_at,
            duration_secs,
            frames_sent: counters.frames_sent.load(Ordering::SeqCst),
            frames_received: counters.frames_received.load(Ordering::SeqCst),
            frames_dropped: inner.dropped_before + live_dropped,
            interruptions: counters.interruptions.load(Ordering::SeqCst),
            transcript_entries_count: inner.transcript.entries().len(),
        }
    }
}

impl Shared {
    /// Record a connect failure; false if the attempt was already superseded
    async fn fail(&self, generation: u64, error: GuardianError) -> bool {
        let (resources, events) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                debug!("Ignoring failure from superseded connect: {}", error);
                return false;
            }
            (inner.teardown(SessionState::Error), inner.events.clone())
        };
        resources.release(false).await;
        notify(&events, SessionEvent::Error(error));
        true
    }

    /// Apply one transport event; returns false once the session is over
    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return false;
        }

        match event {
            TransportEvent::Opened => {
                debug!("Transport opened");
            }
            TransportEvent::Text(text) => {
                inner.transcript.append(Speaker::Assistant, &text);
                inner.emit(SessionEvent::TextReceived(text));
            }
            TransportEvent::InputTranscript(text) => {
                inner.transcript.append(Speaker::User, &text);
            }
            TransportEvent::Audio(frame) => {
                self.counters.frames_received.fetch_add(1, Ordering::SeqCst);
                if let Some(playback) = &inner.playback {
                    playback.enqueue(frame.clone());
                }
                inner.emit(SessionEvent::AudioReceived(frame));
            }
            TransportEvent::Interrupted => {
                self.counters.interruptions.fetch_add(1, Ordering::SeqCst);
                inner.transcript.close_turn();
                if let Some(playback) = &inner.playback {
                    let discarded = playback.interrupt().await;
                    debug!("Interrupted, discarded {} frames", discarded);
                }
                inner.emit(SessionEvent::Interrupted);
            }
            TransportEvent::TurnComplete => {
                inner.transcript.close_turn();
                inner.emit(SessionEvent::TurnComplete);
            }
            TransportEvent::Closed => {
                info!("Remote closed the session");
                let resources = inner.teardown(SessionState::Disconnected);
                let events = inner.events.clone();
                drop(inner);
                resources.release(true).await;
                notify(&events, SessionEvent::Disconnected);
                return false;
            }
            TransportEvent::Error(message) => {
                error!("Transport error: {}", message);
                let resources = inner.teardown(SessionState::Error);
                let events = inner.events.clone();
                drop(inner);
                resources.release(true).await;
                notify(&events, SessionEvent::Error(GuardianError::Connection(message)));
                return false;
            }
        }

        true
    }
}

/// Feed transport events into the orchestrator until the session ends
async fn pump_events(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        // A transport that vanished without a close frame counts as closed
        let event = events.recv().await.unwrap_or(TransportEvent::Closed);

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.handle_transport_event(generation, event).await {
            break;
        }
    }
    debug!("Event pump stopped");
}

async fn send_greeting(shared: Weak<Shared>, generation: u64) {
    let Some(delay) = shared.upgrade().map(|s| s.config.greeting_delay) else {
        return;
    };
    tokio::time::sleep(delay).await;

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let inner = shared.inner.lock().await;
    if inner.generation != generation || inner.state != SessionState::Connected {
        return;
    }
    if let Some(transport) = &inner.transport {
        debug!("Sending greeting");
        if let Err(e) = transport.send_text(&shared.config.greeting, true) {
            warn!("Failed to send greeting: {}", e);
        }
    }
}
