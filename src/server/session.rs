//! A single client connection.
//!
//! Each session runs a reader on its own thread and a writer on a second one.
//! The reader parses requests and dispatches them; every response, broadcast
//! and frame goes through the session's outgoing [`SafeQueue`], whose only
//! consumer is the writer. Nothing else writes to the socket, so messages
//! never interleave on the wire.

use std::{
    fmt,
    io::{self, BufWriter, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use log::{debug, error, info, trace, warn};

use crate::{
    camera::CameraHandle,
    protocol::{OutMessage, Parser, ParserResult, Serializer, schema::PARSE_ERROR},
};

use super::{
    app::ServerState,
    collector::{CancellationToken, ClientCollectionParams, FrameCollector, StreamOutcome},
    context::Context,
    handlers::HandlerError,
    queue::{QueueError, SafeQueue},
};

pub const DEFAULT_FRAME_RATE: f64 = 4.0;
pub const DEFAULT_SEQUENCE_LENGTH: u64 = 16;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Lifecycle of the session's streaming slot.
///
/// `Idle -> Streaming -> (Aborting ->) Done`, and a new stream may start from
/// `Idle` or `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Streaming,
    Aborting,
    Done,
}

/// Per-session stream settings, copied into each stream when it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParams {
    pub frame_rate: f64,
    pub sequence_length: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
        }
    }
}

#[derive(Debug)]
struct ActiveStream {
    command: String,
    params: ClientCollectionParams,
    token: CancellationToken,
}

#[derive(Debug)]
pub struct FrameListeningState {
    phase: StreamPhase,
    params: SessionParams,
    active: Option<ActiveStream>,
    collector: Option<thread::JoinHandle<()>>,
}

impl FrameListeningState {
    fn new() -> Self {
        Self {
            phase: StreamPhase::Idle,
            params: SessionParams::default(),
            active: None,
            collector: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, StreamPhase::Streaming | StreamPhase::Aborting)
    }

    pub fn abort_requested(&self) -> bool {
        self.phase == StreamPhase::Aborting
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// Parameters of the running stream, if any.
    pub fn active_params(&self) -> Option<&ClientCollectionParams> {
        self.active.as_ref().map(|active| &active.params)
    }
}

#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    peer: SocketAddr,
    stream: TcpStream,
    queue: Arc<SafeQueue<OutMessage>>,
    state: Mutex<FrameListeningState>,
}

impl ClientSession {
    pub fn new(id: ClientId, stream: TcpStream, queue_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            id,
            peer: stream.peer_addr()?,
            stream,
            queue: Arc::new(SafeQueue::new(queue_capacity)),
            state: Mutex::new(FrameListeningState::new()),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn queue(&self) -> &Arc<SafeQueue<OutMessage>> {
        &self.queue
    }

    /// Enqueues `message` for the writer, blocking while the queue is full.
    pub fn send(&self, message: OutMessage) -> Result<(), QueueError> {
        self.queue.push(message)
    }

    pub fn send_timeout(&self, message: OutMessage, timeout: Duration) -> Result<(), QueueError> {
        self.queue.push_timeout(message, timeout)
    }

    fn lock_state(&self) -> MutexGuard<'_, FrameListeningState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the streaming state locked.
    pub fn with_listening_state<R>(&self, f: impl FnOnce(&FrameListeningState) -> R) -> R {
        f(&self.lock_state())
    }

    pub fn phase(&self) -> StreamPhase {
        self.lock_state().phase
    }

    pub fn is_streaming(&self) -> bool {
        self.lock_state().is_streaming()
    }

    pub fn params(&self) -> SessionParams {
        self.lock_state().params
    }

    /// Changes the session's stream settings. Refused while a stream runs.
    pub fn update_params<F>(&self, identifier: &str, update: F) -> Result<SessionParams, HandlerError>
    where
        F: FnOnce(&mut SessionParams),
    {
        let mut state = self.lock_state();
        if state.is_streaming() {
            return Err(HandlerError::LockedWhileStreaming(identifier.to_string()));
        }
        update(&mut state.params);
        Ok(state.params)
    }

    /// Starts a collector for `command`. Its completion (or failure) is
    /// reported on this session's queue under the same identifier.
    pub fn start_stream(
        self: &Arc<Self>,
        command: &str,
        params: ClientCollectionParams,
        camera: CameraHandle,
        acquisition_timeout: Duration,
    ) -> Result<(), HandlerError> {
        let previous = {
            let mut state = self.lock_state();
            if state.is_streaming() {
                return Err(HandlerError::Busy);
            }
            state.collector.take()
        };
        // A finished collector may still be handing over its report.
        if let Some(previous) = previous {
            if previous.join().is_err() {
                warn!("[{}] previous frame collector panicked", self.id);
            }
        }

        let token = CancellationToken::new();
        let collector = FrameCollector::new(
            self.id,
            command,
            params,
            camera,
            Arc::clone(&self.queue),
            token.clone(),
            acquisition_timeout,
        );

        let mut state = self.lock_state();
        if state.is_streaming() {
            return Err(HandlerError::Busy);
        }
        state.phase = StreamPhase::Streaming;
        state.active = Some(ActiveStream {
            command: command.to_string(),
            params,
            token,
        });

        let session = Arc::clone(self);
        let identifier = command.to_string();
        match collector.spawn(move |outcome| session.finish_stream(&identifier, outcome)) {
            Ok(handle) => {
                state.collector = Some(handle);
                Ok(())
            }
            Err(e) => {
                state.phase = StreamPhase::Idle;
                state.active = None;
                Err(HandlerError::Spawn(e))
            }
        }
    }

    fn finish_stream(&self, command: &str, outcome: StreamOutcome) {
        let report = {
            let mut state = self.lock_state();
            let aborted = state.abort_requested();
            state.phase = StreamPhase::Done;
            state.active = None;

            match outcome {
                _ if aborted => None,
                StreamOutcome::Completed { .. } => Some(OutMessage::ack(command)),
                StreamOutcome::Failed { error, .. } => Some(OutMessage::error(command, error)),
                StreamOutcome::Aborted { .. } | StreamOutcome::Disconnected { .. } => None,
            }
        };

        if let Some(report) = report {
            if self.send(report).is_err() {
                debug!("[{}] {command} finished after the session closed", self.id);
            }
        }
    }

    /// Cancels the running stream and waits for its collector to exit.
    /// Returns whether a stream was running.
    pub fn abort_stream(&self) -> bool {
        let (was_streaming, collector) = {
            let mut state = self.lock_state();
            let was_streaming = state.is_streaming();
            if state.phase == StreamPhase::Streaming {
                state.phase = StreamPhase::Aborting;
            }
            if let Some(active) = &state.active {
                info!("[{}] aborting {}", self.id, active.command);
                active.token.cancel();
            }
            (was_streaming, state.collector.take())
        };

        if let Some(collector) = collector {
            if collector.join().is_err() {
                error!("[{}] frame collector panicked", self.id);
                let mut state = self.lock_state();
                state.phase = StreamPhase::Done;
                state.active = None;
            }
        }
        was_streaming
    }

    /// Shuts the socket down, which ends both loops.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                debug!("[{}] shutdown failed: {e}", self.id);
            }
        }
    }

    /// Serves the connection until it closes, then tears the session down.
    pub fn run(self: Arc<Self>, state: Arc<ServerState>) {
        info!("[{}] connected from {}", self.id, self.peer);

        let writer = {
            let session = Arc::clone(&self);
            thread::Builder::new()
                .name(format!("{}-writer", self.id))
                .spawn(move || session.write_loop())
        };

        match writer {
            Ok(writer) => {
                match self.read_loop(&state) {
                    Ok(()) => info!("[{}] disconnected", self.id),
                    Err(e) => error!("[{}] connection error: {e}", self.id),
                }

                self.abort_stream();
                self.queue.close();
                if writer.join().is_err() {
                    error!("[{}] writer panicked", self.id);
                }
            }
            Err(e) => error!("[{}] failed to start writer: {e}", self.id),
        }

        self.close();
        state.unregister(self.id);
    }

    fn read_loop(self: &Arc<Self>, state: &ServerState) -> io::Result<()> {
        let ctx = Context::new(state, self);
        let mut parser = Parser::new();
        let mut chunk = vec![0; READ_CHUNK];

        loop {
            let n = match (&self.stream).read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            trace!("[{}] read {n} bytes", self.id);
            parser.feed(&chunk[..n]);

            loop {
                let responses = match parser.next_result() {
                    ParserResult::NeedMoreData => break,
                    ParserResult::Parsed { message, .. } => {
                        debug!("[{}] received {message}", self.id);
                        state.registry().dispatch(&ctx, message)
                    }
                    ParserResult::Malformed { error, skipped } => {
                        warn!("[{}] skipped {skipped} bytes: {error}", self.id);
                        vec![OutMessage::error(PARSE_ERROR, error)]
                    }
                };

                if !responses.is_empty() && self.queue.push_batch(responses).is_err() {
                    // The writer has gone away.
                    return Ok(());
                }
            }
        }
    }

    fn write_loop(&self) {
        let mut writer = BufWriter::new(&self.stream);

        while let Some(message) = self.queue.pop() {
            trace!("[{}] sending {}", self.id, message.summary());
            let mut result = Serializer::write_to(&message, &mut writer);
            if result.is_ok() && self.queue.is_empty() {
                result = writer.flush();
            }

            if let Err(e) = result {
                error!("[{}] write failed: {e}", self.id);
                self.queue.close();
                self.close();
                return;
            }
        }

        if let Err(e) = writer.flush() {
            debug!("[{}] final flush failed: {e}", self.id);
        }
    }
}
