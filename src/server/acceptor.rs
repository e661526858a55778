use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};

use super::{ServerError, app::ServerState, session::ClientSession};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Accept loop turning connections into sessions.
///
/// The listener is non-blocking and polled so that the loop notices the
/// shutdown flag promptly.
pub struct ClientSessionAcceptor {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: Arc<AtomicBool>,
}

impl ClientSessionAcceptor {
    pub fn bind(
        address: SocketAddr,
        state: Arc<ServerState>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(address).map_err(|source| ServerError::Bind { address, source })?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            state,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts until shutdown, then closes every session and waits for them.
    pub fn run(self) {
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.start_session(stream) {
                    Ok(handle) => sessions.push(handle),
                    Err(e) => warn!("failed to start session for {peer}: {e}"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("error accepting connection: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
            sessions.retain(|handle| !handle.is_finished());
        }

        info!("acceptor stopping, closing {} session(s)", sessions.len());
        for session in self.state.sessions() {
            session.close();
        }
        for handle in sessions {
            if handle.join().is_err() {
                error!("session thread panicked");
            }
        }
    }

    fn start_session(&self, stream: TcpStream) -> Result<JoinHandle<()>, ServerError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;

        let id = self.state.next_client_id();
        let session = Arc::new(ClientSession::new(
            id,
            stream,
            self.state.config().queue_capacity,
        )?);
        self.state.register(Arc::clone(&session));

        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(id.to_string())
            .spawn(move || session.run(state));

        spawned.map_err(|e| {
            self.state.unregister(id);
            e.into()
        })
    }
}
