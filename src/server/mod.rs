//! Camera control server.
//!
//! [`App`] binds a listener and runs a [`ClientSessionAcceptor`] on its own
//! thread. Each connection becomes a [`ClientSession`] with a reader thread, a
//! writer thread and at most one [`FrameCollector`] thread at a time.
//! Handlers reach the session and the rest of the server through a
//! [`Context`].

pub mod acceptor;
pub mod app;
pub mod collector;
pub mod context;
pub mod frame;
pub mod handlers;
pub mod queue;
pub mod session;

#[cfg(test)]
mod tests;

use std::{io, net::SocketAddr};

use thiserror::Error;

pub use acceptor::ClientSessionAcceptor;
pub use app::{App, ServerState};
pub use collector::{
    CancellationToken, ClientCollectionParams, FrameCollector, StreamError, StreamOutcome,
};
pub use context::Context;
pub use frame::{Frame, FrameError, FrameMetadata, Roi};
pub use handlers::{FnHandler, Handler, HandlerError, HandlerRegistry, default_registry};
pub use queue::{QueueError, SafeQueue};
pub use session::{ClientId, ClientSession, FrameListeningState, SessionParams, StreamPhase};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Server IO Error: {0}")]
    Io(#[from] io::Error),
}
