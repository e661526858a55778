use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

use crate::{camera::CameraHandle, config::ServerConfig, protocol::OutMessage};

use super::{
    ServerError,
    acceptor::ClientSessionAcceptor,
    handlers::{HandlerRegistry, default_registry},
    queue::QueueError,
    session::{ClientId, ClientSession},
};

/// State shared by the acceptor, every session and every handler.
pub struct ServerState {
    config: ServerConfig,
    camera: CameraHandle,
    registry: HandlerRegistry,
    sessions: Mutex<HashMap<ClientId, Arc<ClientSession>>>,
    next_id: AtomicU64,
}

impl ServerState {
    pub fn new(config: ServerConfig, camera: CameraHandle, registry: HandlerRegistry) -> Self {
        Self {
            config,
            camera,
            registry,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraHandle {
        &self.camera
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<ClientId, Arc<ClientSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session: Arc<ClientSession>) {
        self.lock_sessions().insert(session.id(), session);
    }

    pub fn unregister(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        let removed = self.lock_sessions().remove(&id);
        if removed.is_some() {
            debug!("[{id}] unregistered");
        }
        removed
    }

    pub fn lookup(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.lock_sessions().get(&id).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.lock_sessions().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Queues `message` on every session. A session whose queue stays full
    /// for the broadcast timeout misses it. Returns how many got it.
    pub fn broadcast(&self, message: &OutMessage) -> usize {
        let timeout = self.config.broadcast_timeout();
        let mut delivered = 0;

        // Not under the registry lock: a full queue may block for a while.
        for session in self.sessions() {
            match session.send_timeout(message.clone(), timeout) {
                Ok(()) => delivered += 1,
                Err(QueueError::Timeout) => {
                    warn!("[{}] missed broadcast {}", session.id(), message.summary())
                }
                Err(QueueError::Closed) => debug!("[{}] closed before broadcast", session.id()),
            }
        }
        delivered
    }
}

/// Running server: the accept loop plus the shared state.
pub struct App {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl App {
    /// Binds the configured address and starts accepting with the built-in
    /// handlers.
    pub fn start(config: ServerConfig, camera: CameraHandle) -> Result<Self, ServerError> {
        Self::with_registry(config, camera, default_registry())
    }

    pub fn with_registry(
        config: ServerConfig,
        camera: CameraHandle,
        registry: HandlerRegistry,
    ) -> Result<Self, ServerError> {
        let address = config.address;
        let state = Arc::new(ServerState::new(config, camera, registry));
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor =
            ClientSessionAcceptor::bind(address, Arc::clone(&state), Arc::clone(&shutdown))?;
        let local_addr = acceptor.local_addr()?;
        let acceptor = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || acceptor.run())?;

        info!("listening at {local_addr}");
        Ok(Self {
            state,
            local_addr,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stops accepting, closes every session and waits for their threads.
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };

        info!("shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        if acceptor.join().is_err() {
            error!("acceptor thread panicked");
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
