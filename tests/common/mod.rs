// Test doubles for the session's collaborators
//
// Each integration test binary pulls in what it needs.
#![allow(dead_code)]

use guardian_live::audio::{
    AudioFrame, AudioOutput, CaptureConstraints, CaptureStream, Microphone, MicrophoneGuard,
};
use guardian_live::credential::{CredentialProvider, Token};
use guardian_live::session::ConversationContext;
use guardian_live::transport::{Transport, TransportEvent, TransportFactory};
use guardian_live::{GuardianError, GuardianResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn token() -> Token {
    Token::new("test-token", chrono::Utc::now() + chrono::Duration::minutes(30))
}

/// Credentials that always hand out a valid token
pub struct FakeCredentials {
    pub requests: AtomicUsize,
    pub fail: bool,
}

impl FakeCredentials {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            fail: true,
        })
    }
}

#[async_trait::async_trait]
impl CredentialProvider for FakeCredentials {
    async fn request_token(&self) -> GuardianResult<Token> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GuardianError::Credential("credential endpoint returned 500".to_string()));
        }
        Ok(token())
    }
}

/// In-memory transport; tests drive inbound events through `emit`
#[derive(Default)]
pub struct FakeTransport {
    pub open_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub sent_audio: Mutex<Vec<AudioFrame>>,
    pub sent_text: Mutex<Vec<(String, bool)>>,
    pub context: Mutex<Option<ConversationContext>>,
    open: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    fail_open: Option<GuardianError>,
    open_delay: Option<Duration>,
}

impl FakeTransport {
    /// Deliver an inbound event as if it came off the wire
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_open_flag(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent_text.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        _token: &Token,
        context: &ConversationContext,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> GuardianResult<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.fail_open {
            return Err(err.clone());
        }
        *self.context.lock() = Some(context.clone());
        let _ = events.send(TransportEvent::Opened);
        *self.events.lock() = Some(events);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_audio_frame(&self, frame: AudioFrame) {
        if self.open.load(Ordering::SeqCst) {
            self.sent_audio.lock().push(frame);
        }
    }

    fn send_text(&self, text: &str, turn_complete: bool) -> GuardianResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(GuardianError::NotConnected);
        }
        self.sent_text.lock().push((text.to_string(), turn_complete));
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.events.lock().take();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Hands out `FakeTransport`s and keeps them for inspection
#[derive(Default)]
pub struct FakeTransportFactory {
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
    pub fail_open: Option<GuardianError>,
    pub open_delay: Option<Duration>,
}

impl FakeTransportFactory {
    pub fn latest(&self) -> Arc<FakeTransport> {
        Arc::clone(self.created.lock().last().expect("no transport created"))
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        let transport = Arc::new(FakeTransport {
            fail_open: self.fail_open.clone(),
            open_delay: self.open_delay,
            ..Default::default()
        });
        self.created.lock().push(Arc::clone(&transport));
        transport
    }
}

/// Microphone fed by the test
pub struct FakeMicrophone {
    pub sample_rate: u32,
    pub channels: u16,
    pub acquire_calls: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    deny: bool,
    /// Time spent in `acquire`, like a permission prompt
    acquire_delay: Option<Duration>,
    feed: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

impl FakeMicrophone {
    pub fn new(sample_rate: u32, channels: u16) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            channels,
            acquire_calls: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            deny: false,
            acquire_delay: None,
            feed: Mutex::new(None),
        })
    }

    /// 16kHz mono microphone that takes `delay` to hand out a stream
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            sample_rate: 16000,
            channels: 1,
            acquire_calls: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            deny: false,
            acquire_delay: Some(delay),
            feed: Mutex::new(None),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            sample_rate: 16000,
            channels: 1,
            acquire_calls: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            deny: true,
            acquire_delay: None,
            feed: Mutex::new(None),
        })
    }

    /// Push one device buffer; false once nobody is listening
    pub async fn push(&self, buffer: Vec<f32>) -> bool {
        let feed = self.feed.lock().clone();
        match feed {
            Some(feed) => feed.send(buffer).await.is_ok(),
            None => false,
        }
    }

    pub fn released(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Microphone for FakeMicrophone {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> GuardianResult<CaptureStream> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            return Err(GuardianError::PermissionDenied(
                "microphone access denied".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock() = Some(tx);
        let releases = Arc::clone(&self.releases);

        Ok(CaptureStream {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffers: rx,
            guard: MicrophoneGuard::new(move || {
                releases.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }

    fn name(&self) -> &str {
        "fake-mic"
    }
}

/// Output that "plays" each frame for its real duration and records what happened
#[derive(Default)]
pub struct RecordingOutput {
    pub started: Mutex<Vec<AudioFrame>>,
    pub finished: Mutex<Vec<AudioFrame>>,
    pub stop_calls: AtomicUsize,
    /// Frames with this many samples fail to play
    pub fail_len: Option<usize>,
}

impl RecordingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// First sample of each finished frame, used as a frame id
    pub fn finished_ids(&self) -> Vec<i16> {
        self.finished.lock().iter().map(|f| f.samples[0]).collect()
    }
}

#[async_trait::async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&self, frame: AudioFrame) -> GuardianResult<()> {
        self.started.lock().push(frame.clone());
        if self.fail_len == Some(frame.samples.len()) {
            return Err(GuardianError::Device("output rejected frame".to_string()));
        }
        tokio::time::sleep(frame.duration()).await;
        self.finished.lock().push(frame);
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "recording-output"
    }
}

/// Inbound frame whose first sample identifies it
pub fn inbound_frame(id: i16, samples: usize) -> AudioFrame {
    let mut data = vec![0i16; samples];
    data[0] = id;
    AudioFrame::new(24000, data, guardian_live::audio::Direction::Inbound)
}

/// Receive the next event, failing the test after a generous timeout
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
