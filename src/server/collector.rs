//! Frame streaming for a single streaming command.
//!
//! A [`FrameCollector`] pulls frames from the shared camera at its own cadence,
//! crops them to its own region of interest and pushes header/payload pairs
//! onto the owning session's outgoing queue. Several collectors may run at once
//! against the same camera; the camera serializes device access.
//!
//! Cancellation is cooperative: the [`CancellationToken`] is checked at every
//! iteration boundary, again after each acquisition and while waiting for
//! queue space, so a frame not yet queued when an abort arrives is discarded
//! rather than sent.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    camera::{CameraError, CameraHandle},
    protocol::OutMessage,
};

use super::{
    frame::{Frame, FrameError, FrameMetadata, Roi},
    queue::{QueueError, SafeQueue},
    session::ClientId,
};

/// How often a collector blocked on a full queue looks for an abort.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of a session's stream settings taken when the stream starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientCollectionParams {
    pub frame_rate: f64,
    pub sequence_length: u64,
    pub roi: Roi,
}

impl ClientCollectionParams {
    /// Time between frames, or `None` when the rate gives no representable
    /// interval.
    pub fn frame_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.frame_rate).ok()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("frame rate {0} has no usable frame interval")]
    FrameRate(f64),
    #[error("frame collector panicked")]
    Panicked,
}

/// How a stream ended, with the number of frames enqueued.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed { frames: u64 },
    Aborted { frames: u64 },
    Failed { frames: u64, error: StreamError },
    /// The outgoing queue closed underneath the stream.
    Disconnected { frames: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wakeup) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` unless cancelled first. Returns whether the token
    /// is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wakeup) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wakeup
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

pub struct FrameCollector {
    client_id: ClientId,
    command: String,
    params: ClientCollectionParams,
    camera: CameraHandle,
    queue: Arc<SafeQueue<OutMessage>>,
    token: CancellationToken,
    acquisition_timeout: Duration,
}

impl FrameCollector {
    pub fn new(
        client_id: ClientId,
        command: impl Into<String>,
        params: ClientCollectionParams,
        camera: CameraHandle,
        queue: Arc<SafeQueue<OutMessage>>,
        token: CancellationToken,
        acquisition_timeout: Duration,
    ) -> Self {
        Self {
            client_id,
            command: command.into(),
            params,
            camera,
            queue,
            token,
            acquisition_timeout,
        }
    }

    /// Runs the stream to completion on the current thread.
    pub fn run(&self) -> StreamOutcome {
        let Some(interval) = self.params.frame_interval() else {
            return StreamOutcome::Failed {
                frames: 0,
                error: StreamError::FrameRate(self.params.frame_rate),
            };
        };
        let _acquiring = self.camera.begin_acquisition();
        let mut next_frame = Instant::now();
        let mut frames = 0;

        info!(
            "[{}] {} started: {} frame(s) at {} fps, {:?}",
            self.client_id,
            self.command,
            self.params.sequence_length,
            self.params.frame_rate,
            self.params.roi
        );

        while frames < self.params.sequence_length {
            if self.token.is_cancelled() {
                return StreamOutcome::Aborted { frames };
            }

            let delay = next_frame.saturating_duration_since(Instant::now());
            if !delay.is_zero() && self.token.wait_timeout(delay) {
                return StreamOutcome::Aborted { frames };
            }
            next_frame = Instant::now().max(next_frame) + interval;

            let raw = match self.camera.acquire_frame(self.acquisition_timeout) {
                Ok(raw) => raw,
                Err(e) => {
                    return StreamOutcome::Failed {
                        frames,
                        error: e.into(),
                    };
                }
            };

            if self.token.is_cancelled() {
                debug!(
                    "[{}] {} discarding frame acquired during abort",
                    self.client_id, self.command
                );
                return StreamOutcome::Aborted { frames };
            }

            let metadata = FrameMetadata {
                timestamp: raw.timestamp,
                sequence_index: frames,
                client_id: self.client_id,
            };
            let frame = match Frame::from_raw(raw, self.params.roi, metadata) {
                Ok(frame) => frame,
                Err(e) => {
                    return StreamOutcome::Failed {
                        frames,
                        error: e.into(),
                    };
                }
            };

            let mut batch = frame.into_messages();
            loop {
                match self.queue.push_batch_timeout(batch, CANCEL_POLL_INTERVAL) {
                    Ok(()) => break,
                    Err((QueueError::Closed, _)) => {
                        return StreamOutcome::Disconnected { frames };
                    }
                    Err((QueueError::Timeout, returned)) => {
                        if self.token.is_cancelled() {
                            debug!(
                                "[{}] {} dropping frame held back by a full queue",
                                self.client_id, self.command
                            );
                            return StreamOutcome::Aborted { frames };
                        }
                        batch = returned;
                    }
                }
            }
            frames += 1;
        }

        StreamOutcome::Completed { frames }
    }

    /// Runs the stream on its own thread and hands the outcome to `on_finish`.
    /// A panicking stream is reported as failed, so `on_finish` always runs.
    pub fn spawn<F>(self, on_finish: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(StreamOutcome) + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("{}-{}", self.client_id, self.command))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run()))
                    .unwrap_or(StreamOutcome::Failed {
                        frames: 0,
                        error: StreamError::Panicked,
                    });
                match &outcome {
                    StreamOutcome::Failed { frames, error } => warn!(
                        "[{}] {} failed after {frames} frame(s): {error}",
                        self.client_id, self.command
                    ),
                    outcome => info!("[{}] {} finished: {outcome:?}", self.client_id, self.command),
                }
                on_finish(outcome);
            })
    }
}
