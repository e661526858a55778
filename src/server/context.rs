use std::sync::Arc;

use crate::{camera::CameraHandle, config::ServerConfig, protocol::OutMessage};

use super::{
    app::ServerState,
    session::{ClientId, ClientSession},
};

/// What a handler can reach while processing one message: the session that
/// received it and the server around it.
pub struct Context<'a> {
    state: &'a ServerState,
    session: &'a Arc<ClientSession>,
}

impl<'a> Context<'a> {
    pub fn new(state: &'a ServerState, session: &'a Arc<ClientSession>) -> Self {
        Self { state, session }
    }

    pub fn session(&self) -> &'a Arc<ClientSession> {
        self.session
    }

    pub fn client_id(&self) -> ClientId {
        self.session.id()
    }

    pub fn camera(&self) -> &'a CameraHandle {
        self.state.camera()
    }

    pub fn config(&self) -> &'a ServerConfig {
        self.state.config()
    }

    pub fn lookup(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.state.lookup(id)
    }

    /// Sends `message` to every connected session, this one included.
    pub fn broadcast(&self, message: OutMessage) -> usize {
        self.state.broadcast(&message)
    }
}
