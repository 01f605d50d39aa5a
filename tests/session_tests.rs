// Integration tests for the session orchestrator
//
// The transport, microphone and speaker are replaced by in-memory doubles so
// every lifecycle path can be driven directly.

mod common;

use common::{
    inbound_frame, next_event, FakeCredentials, FakeMicrophone, FakeTransportFactory,
    RecordingOutput,
};
use guardian_live::session::{
    ConversationContext, SessionConfig, SessionEvent, SessionOrchestrator, SessionState, Speaker,
};
use guardian_live::transport::TransportEvent;
use guardian_live::GuardianError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    orchestrator: SessionOrchestrator,
    transports: Arc<FakeTransportFactory>,
    mic: Arc<FakeMicrophone>,
    output: Arc<RecordingOutput>,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeTransportFactory::default(), FakeMicrophone::new(16000, 1))
    }

    fn with(transports: FakeTransportFactory, mic: Arc<FakeMicrophone>) -> Self {
        let transports = Arc::new(transports);
        let output = RecordingOutput::new();
        let orchestrator = SessionOrchestrator::new(
            SessionConfig::default(),
            transports.clone(),
            mic.clone(),
            output.clone(),
        );
        Self {
            orchestrator,
            transports,
            mic,
            output,
        }
    }

    async fn connect(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.orchestrator
            .connect(FakeCredentials::ok(), context(), tx)
            .await
            .expect("connect failed");
        assert_eq!(next_event(&mut rx).await, SessionEvent::Connected);
        rx
    }
}

fn context() -> ConversationContext {
    ConversationContext::new("Austin")
        .with_alert("Tornado Warning: Travis County until 9 PM")
        .with_household_size(3)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_transport_and_greets_after_delay() {
    let harness = Harness::new();
    let _events = harness.connect().await;

    assert_eq!(harness.orchestrator.state().await, SessionState::Connected);
    let transport = harness.transports.latest();
    assert_eq!(transport.open_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.context.lock().clone(), Some(context()));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(transport.texts().is_empty(), "greeting sent too early");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        *transport.sent_text.lock(),
        vec![("Hello Guardian, I need your help.".to_string(), true)]
    );
}

#[tokio::test]
async fn test_connect_while_connected_is_noop() {
    let harness = Harness::new();
    let _events = harness.connect().await;
    let first = harness.orchestrator.session().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let credentials = FakeCredentials::ok();
    harness
        .orchestrator
        .connect(credentials.clone(), context(), tx)
        .await
        .unwrap();

    assert_eq!(harness.transports.count(), 1);
    assert_eq!(credentials.requests.load(Ordering::SeqCst), 0);
    assert_eq!(harness.orchestrator.session().await.unwrap().id, first.id);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_connects_open_one_session() {
    let transports = FakeTransportFactory {
        open_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let harness = Harness::with(transports, FakeMicrophone::new(16000, 1));

    let mut attempts = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..5 {
        let (tx, rx) = mpsc::unbounded_channel();
        receivers.push(rx);
        let orchestrator = harness.orchestrator.clone();
        attempts.push(tokio::spawn(async move {
            orchestrator.connect(FakeCredentials::ok(), context(), tx).await
        }));
    }
    for attempt in attempts {
        assert_eq!(attempt.await.unwrap(), Ok(()));
    }

    assert_eq!(harness.transports.count(), 1);
    assert_eq!(harness.transports.latest().open_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.orchestrator.state().await, SessionState::Connected);

    // Only the attempt that won hears about the session
    let connected = receivers
        .iter_mut()
        .map(|rx| rx.try_recv())
        .filter(|recv| matches!(recv, Ok(SessionEvent::Connected)))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_credential_failure_reports_error_and_allows_retry() {
    let harness = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = harness
        .orchestrator
        .connect(FakeCredentials::failing(), context(), tx)
        .await
        .unwrap_err();
    assert!(matches!(err, GuardianError::Credential(_)));
    assert!(err.is_retryable());
    assert_eq!(harness.orchestrator.state().await, SessionState::Error);
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Error(GuardianError::Credential(_))
    ));
    assert_eq!(harness.transports.latest().open_calls.load(Ordering::SeqCst), 0);

    // Error is not terminal for the orchestrator
    let _events = harness.connect().await;
    assert_eq!(harness.orchestrator.state().await, SessionState::Connected);
}

#[tokio::test]
async fn test_transport_open_failure_closes_transport() {
    let transports = FakeTransportFactory {
        fail_open: Some(GuardianError::Connection("connection refused".to_string())),
        ..Default::default()
    };
    let harness = Harness::with(transports, FakeMicrophone::new(16000, 1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = harness
        .orchestrator
        .connect(FakeCredentials::ok(), context(), tx)
        .await
        .unwrap_err();
    assert_eq!(err, GuardianError::Connection("connection refused".to_string()));
    assert_eq!(harness.orchestrator.state().await, SessionState::Error);
    assert!(harness.orchestrator.session().await.is_none());
    assert!(harness.transports.latest().close_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        next_event(&mut rx).await,
        SessionEvent::Error(GuardianError::Connection("connection refused".to_string()))
    );
}

#[tokio::test]
async fn test_disconnect_before_connect_stays_idle() {
    let harness = Harness::new();
    harness.orchestrator.disconnect().await;
    harness.orchestrator.disconnect().await;
    assert_eq!(harness.orchestrator.state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_releases_everything() {
    let harness = Harness::new();
    let mut events = harness.connect().await;
    assert!(harness.orchestrator.toggle_microphone().await.unwrap());

    harness.orchestrator.disconnect().await;
    harness.orchestrator.disconnect().await;

    assert_eq!(harness.orchestrator.state().await, SessionState::Disconnected);
    assert!(harness.orchestrator.session().await.is_none());
    assert!(!harness.orchestrator.is_microphone_active().await);
    assert_eq!(harness.mic.released(), 1);

    let transport = harness.transports.latest();
    assert!(!transport.is_open_flag());
    assert!(transport.close_calls.load(Ordering::SeqCst) >= 1);

    assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
    // The sender is dropped after the one Disconnected event
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_toggle_microphone_requires_connection() {
    let harness = Harness::new();

    let err = harness.orchestrator.toggle_microphone().await.unwrap_err();
    assert_eq!(err, GuardianError::NotConnected);
    assert_eq!(harness.mic.acquire_calls.load(Ordering::SeqCst), 0);

    let err = harness.orchestrator.send_text("hello").await.unwrap_err();
    assert_eq!(err, GuardianError::NotConnected);
}

#[tokio::test]
async fn test_microphone_streams_frames_to_transport() {
    let harness = Harness::new();
    let _events = harness.connect().await;
    let transport = harness.transports.latest();

    assert!(harness.orchestrator.toggle_microphone().await.unwrap());
    assert!(harness.orchestrator.is_microphone_active().await);

    harness.mic.push(vec![0.2; 3200]).await;
    wait_until(|| transport.sent_audio.lock().len() == 2).await;
    for frame in transport.sent_audio.lock().iter() {
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.samples.len(), 1600);
    }

    assert!(!harness.orchestrator.toggle_microphone().await.unwrap());
    assert!(!harness.orchestrator.is_microphone_active().await);
    assert_eq!(harness.mic.released(), 1);

    let stats = harness.orchestrator.stats().await;
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.frames_dropped, 0);

    // The session survives a mic toggle
    assert_eq!(harness.orchestrator.state().await, SessionState::Connected);
}

#[tokio::test]
async fn test_permission_denied_tears_session_down() {
    let harness = Harness::with(FakeTransportFactory::default(), FakeMicrophone::denied());
    let mut events = harness.connect().await;

    let err = harness.orchestrator.toggle_microphone().await.unwrap_err();
    assert!(matches!(err, GuardianError::PermissionDenied(_)));
    assert!(err.user_message().contains("settings"));

    assert_eq!(harness.orchestrator.state().await, SessionState::Error);
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Error(GuardianError::PermissionDenied(_))
    ));
    assert!(harness.transports.latest().close_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_interrupt_flushes_playback_once() {
    let harness = Harness::new();
    let mut events = harness.connect().await;
    let transport = harness.transports.latest();

    // One-second frames, so none finishes during the test
    for id in 1..=4 {
        transport.emit(TransportEvent::Audio(inbound_frame(id, 24000)));
    }
    for id in 1..=4 {
        match next_event(&mut events).await {
            SessionEvent::AudioReceived(frame) => assert_eq!(frame.samples[0], id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    transport.emit(TransportEvent::Interrupted);
    transport.emit(TransportEvent::TurnComplete);
    assert_eq!(next_event(&mut events).await, SessionEvent::Interrupted);
    assert_eq!(next_event(&mut events).await, SessionEvent::TurnComplete);

    assert_eq!(harness.output.stop_calls.load(Ordering::SeqCst), 1);
    assert!(harness.output.finished.lock().is_empty());
    assert!(harness.output.started.lock().len() <= 1);

    let stats = harness.orchestrator.stats().await;
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.interruptions, 1);
    assert_eq!(harness.orchestrator.state().await, SessionState::Connected);
}

#[tokio::test]
async fn test_transcript_merges_streamed_text() {
    let harness = Harness::new();
    let mut events = harness.connect().await;
    let transport = harness.transports.latest();

    transport.emit(TransportEvent::Text("Go to ".to_string()));
    transport.emit(TransportEvent::Text("the basement.".to_string()));
    transport.emit(TransportEvent::TurnComplete);
    transport.emit(TransportEvent::Text("Stay low.".to_string()));
    transport.emit(TransportEvent::InputTranscript("Okay".to_string()));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TextReceived("Go to ".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TextReceived("the basement.".to_string())
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::TurnComplete);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TextReceived("Stay low.".to_string())
    );
    wait_for_entries(&harness, 3).await;

    harness.orchestrator.send_text("Where is the nearest shelter?").await.unwrap();
    assert!(transport
        .sent_text
        .lock()
        .contains(&("Where is the nearest shelter?".to_string(), true)));

    let transcript = harness.orchestrator.transcript().await;
    let entries: Vec<(Speaker, &str)> = transcript
        .iter()
        .map(|e| (e.speaker, e.text.as_str()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Speaker::Assistant, "Go to the basement."),
            (Speaker::Assistant, "Stay low."),
            (Speaker::User, "Okay"),
            (Speaker::User, "Where is the nearest shelter?"),
        ]
    );
    assert_eq!(harness.orchestrator.stats().await.transcript_entries_count, 4);
}

async fn wait_for_entries(harness: &Harness, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.orchestrator.transcript().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transcript never filled");
}

#[tokio::test]
async fn test_remote_close_disconnects_and_reconnect_starts_fresh() {
    let harness = Harness::new();
    let mut events = harness.connect().await;
    let first_id = harness.orchestrator.session().await.unwrap().id;
    let transport = harness.transports.latest();
    harness.orchestrator.toggle_microphone().await.unwrap();

    transport.emit(TransportEvent::Text("Take shelter.".to_string()));
    assert!(matches!(next_event(&mut events).await, SessionEvent::TextReceived(_)));
    transport.emit(TransportEvent::Closed);
    assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);

    assert_eq!(harness.orchestrator.state().await, SessionState::Disconnected);
    assert_eq!(harness.mic.released(), 1);
    assert!(transport.close_calls.load(Ordering::SeqCst) >= 1);
    // Kept for the UI until the next connect
    assert_eq!(harness.orchestrator.transcript().await.len(), 1);

    let _events = harness.connect().await;
    let second_id = harness.orchestrator.session().await.unwrap().id;
    assert_ne!(first_id, second_id);
    assert_eq!(harness.transports.count(), 2);
    assert!(harness.orchestrator.transcript().await.is_empty());
}

#[tokio::test]
async fn test_transport_error_moves_to_error_state() {
    let harness = Harness::new();
    let mut events = harness.connect().await;

    harness
        .transports
        .latest()
        .emit(TransportEvent::Error("connection reset".to_string()));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error(GuardianError::Connection("connection reset".to_string()))
    );
    assert_eq!(harness.orchestrator.state().await, SessionState::Error);
    assert_eq!(
        harness.orchestrator.send_text("hello").await,
        Err(GuardianError::NotConnected)
    );
}

#[tokio::test]
async fn test_disconnect_during_connect_wins() {
    let transports = FakeTransportFactory {
        open_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let harness = Harness::with(transports, FakeMicrophone::new(16000, 1));
    let (tx, mut events) = mpsc::unbounded_channel();

    let orchestrator = harness.orchestrator.clone();
    let connecting =
        tokio::spawn(async move { orchestrator.connect(FakeCredentials::ok(), context(), tx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.orchestrator.state().await, SessionState::Connecting);
    harness.orchestrator.disconnect().await;

    assert!(connecting.await.unwrap().is_ok());
    assert_eq!(harness.orchestrator.state().await, SessionState::Disconnected);
    assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
    assert!(!harness.transports.latest().is_open_flag());
}

#[tokio::test]
async fn test_dropping_orchestrator_releases_microphone() {
    let harness = Harness::new();
    let _events = harness.connect().await;
    harness.orchestrator.toggle_microphone().await.unwrap();

    let mic = harness.mic.clone();
    drop(harness);

    wait_until(|| mic.released() == 1).await;
}

#[tokio::test]
async fn test_inbound_events_flow_while_microphone_is_acquired() {
    let harness = Harness::with(
        FakeTransportFactory::default(),
        FakeMicrophone::slow(Duration::from_millis(300)),
    );
    let mut events = harness.connect().await;

    let orchestrator = harness.orchestrator.clone();
    let toggling = tokio::spawn(async move { orchestrator.toggle_microphone().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .transports
        .latest()
        .emit(TransportEvent::Text("Stay away from windows.".to_string()));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TextReceived("Stay away from windows.".to_string())
    );
    assert!(!toggling.is_finished());

    assert_eq!(toggling.await.unwrap(), Ok(true));
    assert!(harness.orchestrator.is_microphone_active().await);
}

#[tokio::test]
async fn test_disconnect_while_microphone_is_acquired_releases_it() {
    let harness = Harness::with(
        FakeTransportFactory::default(),
        FakeMicrophone::slow(Duration::from_millis(200)),
    );
    let _events = harness.connect().await;

    let orchestrator = harness.orchestrator.clone();
    let toggling = tokio::spawn(async move { orchestrator.toggle_microphone().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.orchestrator.disconnect().await;

    assert_eq!(toggling.await.unwrap(), Err(GuardianError::NotConnected));
    assert_eq!(harness.mic.released(), 1);
    assert!(!harness.orchestrator.is_microphone_active().await);
    assert_eq!(harness.orchestrator.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_transcript_outlives_error_until_disconnect() {
    let harness = Harness::new();
    let mut events = harness.connect().await;
    harness.orchestrator.send_text("Is the garage safe?").await.unwrap();

    harness
        .transports
        .latest()
        .emit(TransportEvent::Error("connection reset".to_string()));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Error(_)));

    let transcript = harness.orchestrator.transcript().await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].speaker, Speaker::User);

    harness.orchestrator.disconnect().await;
    assert!(harness.orchestrator.transcript().await.is_empty());
}
