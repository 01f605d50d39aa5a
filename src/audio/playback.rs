// Inbound audio playback pipeline
//
// A single worker task owns the playback queue. Frames play strictly in
// arrival order, one at a time; when one finishes the next starts without
// caller involvement. An interrupt (barge-in) cuts the current frame and
// discards everything queued behind it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioOutput};
use crate::error::GuardianResult;

type PlayFuture = Pin<Box<dyn Future<Output = GuardianResult<()>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Snapshot of the playback pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Frames waiting behind the one in flight
    pub queued: usize,
    /// Frames that played to completion
    pub played: u64,
    /// Frames skipped because they failed to decode or play
    pub skipped: u64,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            queued: 0,
            played: 0,
            skipped: 0,
        }
    }
}

enum PlaybackCommand {
    Enqueue(AudioFrame),
    Interrupt(oneshot::Sender<usize>),
    Shutdown,
}

/// Handle to the playback worker
pub struct PlaybackPipeline {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    status: watch::Receiver<PlaybackStatus>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackPipeline {
    /// Spawn the worker; frames not at `sample_rate` are skipped
    pub fn spawn(output: Arc<dyn AudioOutput>, sample_rate: u32) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PlaybackStatus::default());

        info!(
            "Playback pipeline started on {} ({}Hz)",
            output.name(),
            sample_rate
        );

        let worker = PlaybackWorker {
            output,
            sample_rate,
            queue: VecDeque::new(),
            in_flight: None,
            status: status_tx,
            played: 0,
            skipped: 0,
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            commands,
            status,
            task: Some(task),
        }
    }

    /// Append a frame; starts playback if nothing is playing
    pub fn enqueue(&self, frame: AudioFrame) {
        if self.commands.send(PlaybackCommand::Enqueue(frame)).is_err() {
            debug!("Playback worker gone, dropping frame");
        }
    }

    /// Stop the current frame and discard the queue
    ///
    /// Resolves once the worker is idle with an empty queue, returning how
    /// many frames (queued plus in flight) were discarded.
    pub async fn interrupt(&self) -> usize {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(PlaybackCommand::Interrupt(ack_tx))
            .is_err()
        {
            return 0;
        }
        ack_rx.await.unwrap_or(0)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes (useful for waiting on drain)
    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    /// Stop output and end the worker
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.commands.send(PlaybackCommand::Shutdown);
        // The worker stops the output on its way out
        self.task.take();
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

struct PlaybackWorker {
    output: Arc<dyn AudioOutput>,
    sample_rate: u32,
    queue: VecDeque<AudioFrame>,
    in_flight: Option<PlayFuture>,
    status: watch::Sender<PlaybackStatus>,
    played: u64,
    skipped: u64,
}

impl PlaybackWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PlaybackCommand>) {
        loop {
            if self.in_flight.is_none() {
                self.start_next();
            }
            self.publish();

            tokio::select! {
                // Interrupts must win over a frame that happens to finish
                biased;

                command = commands.recv() => match command {
                    Some(PlaybackCommand::Enqueue(frame)) => {
                        self.queue.push_back(frame);
                    }
                    Some(PlaybackCommand::Interrupt(ack)) => {
                        let discarded = self.clear();
                        info!("Playback interrupted, {} frames discarded", discarded);
                        self.publish();
                        let _ = ack.send(discarded);
                    }
                    Some(PlaybackCommand::Shutdown) | None => break,
                },

                result = next_completion(&mut self.in_flight) => {
                    self.in_flight = None;
                    match result {
                        Ok(()) => self.played += 1,
                        Err(e) => {
                            warn!("Frame playback failed, skipping: {}", e);
                            self.skipped += 1;
                        }
                    }
                }
            }
        }

        self.clear();
        self.publish();
        debug!("Playback worker stopped");
    }

    /// Pop frames until one is valid and start playing it
    fn start_next(&mut self) {
        while let Some(frame) = self.queue.pop_front() {
            if let Err(e) = frame.validate(self.sample_rate) {
                warn!("Skipping undecodable frame: {}", e);
                self.skipped += 1;
                continue;
            }

            let output = Arc::clone(&self.output);
            self.in_flight = Some(Box::pin(async move { output.play(frame).await }));
            return;
        }
    }

    fn clear(&mut self) -> usize {
        let mut discarded = self.queue.len();
        self.queue.clear();
        if self.in_flight.take().is_some() {
            self.output.stop();
            discarded += 1;
        }
        discarded
    }

    fn publish(&self) {
        let state = if self.in_flight.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        };
        let status = PlaybackStatus {
            state,
            queued: self.queue.len(),
            played: self.played,
            skipped: self.skipped,
        };
        self.status.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

async fn next_completion(in_flight: &mut Option<PlayFuture>) -> GuardianResult<()> {
    match in_flight {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
