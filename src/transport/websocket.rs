// WebSocket implementation of the duplex transport
//
// One connection task per transport runs a select loop over:
// - outbound messages queued by send_audio_frame/send_text
// - inbound frames from the server
// - the optional idle keepalive ticker
// - the shutdown signal from close()

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::codec;
use super::messages::ClientMessage;
use super::{Transport, TransportConfig, TransportEvent, TransportFactory};
use crate::audio::{AudioFrame, Direction};
use crate::credential::Token;
use crate::error::{GuardianError, GuardianResult};
use crate::session::ConversationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Opening,
    Open,
    Closed,
}

struct Connection {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Transport speaking the JSON-over-WebSocket live protocol
pub struct WebSocketTransport {
    config: TransportConfig,
    connection: Mutex<Connection>,
    /// Cleared by the connection task when the socket goes away
    open: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(Connection {
                state: ConnectionState::Idle,
                outbound: None,
                shutdown: None,
                task: None,
            }),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn endpoint_url(&self, token: &Token) -> String {
        let separator = if self.config.endpoint.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}access_token={}",
            self.config.endpoint,
            separator,
            token.value()
        )
    }

    fn keepalive_frame(&self) -> AudioFrame {
        AudioFrame::silence(
            self.config.capture_sample_rate,
            self.config.keepalive_samples,
            Direction::Outbound,
        )
    }

    fn queue(&self, message: ClientMessage) -> bool {
        let connection = self.connection.lock();
        match &connection.outbound {
            Some(outbound) if connection.state == ConnectionState::Open => {
                outbound.send(message).is_ok()
            }
            _ => false,
        }
    }

    /// Decode one inbound text payload and forward its events
    ///
    /// Returns false when the connection should end.
    fn handle_payload(
        text: &str,
        playback_rate: u32,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> bool {
        match codec::decode_server_message(text, playback_rate) {
            Ok(decoded) => {
                for event in decoded {
                    if events.send(event).is_err() {
                        debug!("Transport event receiver dropped");
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                error!("{}", e);
                let _ = events.send(TransportEvent::Error(e.to_string()));
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        token: &Token,
        context: &ConversationContext,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> GuardianResult<()> {
        {
            let mut connection = self.connection.lock();
            match connection.state {
                ConnectionState::Opening | ConnectionState::Open => {
                    warn!("Transport already opening or open");
                    return Ok(());
                }
                ConnectionState::Closed => {
                    return Err(GuardianError::Connection(
                        "transport already closed".to_string(),
                    ));
                }
                ConnectionState::Idle => connection.state = ConnectionState::Opening,
            }
        }

        if token.is_expired() {
            self.connection.lock().state = ConnectionState::Closed;
            return Err(GuardianError::Credential("session token expired".to_string()));
        }

        info!("Connecting to {}", self.config.endpoint);

        let url = self.endpoint_url(token);
        let ws_stream = match timeout(self.config.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.connection.lock().state = ConnectionState::Closed;
                return Err(GuardianError::Connection(format!("Failed to connect: {e}")));
            }
            Err(_) => {
                self.connection.lock().state = ConnectionState::Closed;
                return Err(GuardianError::Connection("Connection timeout".to_string()));
            }
        };

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let setup = codec::encode_setup(&self.config, context);
        let setup_json = match serde_json::to_string(&setup) {
            Ok(json) => json,
            Err(e) => {
                self.connection.lock().state = ConnectionState::Closed;
                return Err(GuardianError::Connection(format!(
                    "Failed to encode setup: {e}"
                )));
            }
        };
        if let Err(e) = ws_sink.send(Message::Text(setup_json)).await {
            self.connection.lock().state = ConnectionState::Closed;
            return Err(GuardianError::Connection(format!("Failed to send setup: {e}")));
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        {
            let mut connection = self.connection.lock();
            if connection.state != ConnectionState::Opening {
                // close() won the race while we were handshaking
                info!("Transport closed during open, dropping connection");
                return Err(GuardianError::Connection(
                    "transport closed while opening".to_string(),
                ));
            }
            connection.state = ConnectionState::Open;
            connection.outbound = Some(outbound_tx.clone());
            connection.shutdown = Some(shutdown_tx);
        }
        self.open.store(true, Ordering::SeqCst);

        let open = Arc::clone(&self.open);
        let playback_rate = self.config.playback_sample_rate;
        let capture_rate = self.config.capture_sample_rate;
        let keepalive_interval = self.config.keepalive_interval;
        let keepalive = self.keepalive_frame();
        let task_events = events.clone();

        let task = tokio::spawn(async move {
            let mut ticker: Option<Interval> = keepalive_interval.map(tokio::time::interval);
            let mut last_audio = Instant::now();

            loop {
                tokio::select! {
                    Some(message) = outbound_rx.recv() => {
                        if matches!(message, ClientMessage::RealtimeInput(_)) {
                            last_audio = Instant::now();
                        }
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json)).await {
                            error!("Failed to send WebSocket message: {}", e);
                            let _ = task_events.send(TransportEvent::Error(format!(
                                "send failed: {e}"
                            )));
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if !Self::handle_payload(&text, playback_rate, &task_events) {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                // Some servers ship JSON in binary frames
                                match std::str::from_utf8(&bytes) {
                                    Ok(text) => {
                                        if !Self::handle_payload(text, playback_rate, &task_events) {
                                            break;
                                        }
                                    }
                                    Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server: {:?}", frame);
                                let _ = task_events.send(TransportEvent::Closed);
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong handled by tungstenite
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = task_events.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                info!("WebSocket stream ended");
                                let _ = task_events.send(TransportEvent::Closed);
                                break;
                            }
                        }
                    }

                    _ = tick(&mut ticker) => {
                        let idle_for = last_audio.elapsed();
                        if keepalive_interval.is_some_and(|interval| idle_for >= interval) {
                            match codec::encode_audio(&keepalive, capture_rate) {
                                Ok(message) => {
                                    debug!("Sending idle keepalive after {:?}", idle_for);
                                    if let Ok(json) = serde_json::to_string(&message) {
                                        if let Err(e) = ws_sink.send(Message::Text(json)).await {
                                            let _ = task_events.send(TransportEvent::Error(format!(
                                                "keepalive failed: {e}"
                                            )));
                                            break;
                                        }
                                    }
                                    last_audio = Instant::now();
                                }
                                Err(e) => warn!("Keepalive frame invalid: {}", e),
                            }
                        }
                    }

                    _ = &mut shutdown_rx => {
                        debug!("Transport shutdown requested");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            open.store(false, Ordering::SeqCst);
            info!("Transport connection task finished");
        });

        self.connection.lock().task = Some(task);

        // The audio modality is only confirmed once a packet has been seen
        if let Ok(message) = codec::encode_audio(&self.keepalive_frame(), capture_rate) {
            let _ = outbound_tx.send(message);
        }

        let _ = events.send(TransportEvent::Opened);
        info!("Transport open (model {})", self.config.model);

        Ok(())
    }

    fn send_audio_frame(&self, frame: AudioFrame) {
        if !self.is_open() {
            debug!("Transport not open, dropping outbound frame");
            return;
        }

        match codec::encode_audio(&frame, self.config.capture_sample_rate) {
            Ok(message) => {
                if !self.queue(message) {
                    debug!("Transport closing, dropping outbound frame");
                }
            }
            Err(e) => warn!("Dropping outbound frame: {}", e),
        }
    }

    fn send_text(&self, text: &str, turn_complete: bool) -> GuardianResult<()> {
        if !self.is_open() || !self.queue(codec::encode_text(text, turn_complete)) {
            return Err(GuardianError::NotConnected);
        }
        debug!("Queued text turn ({} chars, complete={})", text.len(), turn_complete);
        Ok(())
    }

    async fn close(&self) {
        let (shutdown, task) = {
            let mut connection = self.connection.lock();
            if connection.state == ConnectionState::Closed {
                return;
            }
            connection.state = ConnectionState::Closed;
            connection.outbound = None;
            (connection.shutdown.take(), connection.task.take())
        };
        self.open.store(false, Ordering::SeqCst);

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(task) = task {
            if timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("Transport task did not finish within 5s");
            }
        }

        info!("Transport closed");
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let connection = self.connection.get_mut();
        if let Some(shutdown) = connection.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Builds a [`WebSocketTransport`] per session
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    config: TransportConfig,
}

impl WebSocketTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new(self.config.clone()))
    }
}
