//! Message handlers and the registry dispatching to them.
//!
//! Every `(kind, identifier)` pair maps to at most one [`Handler`]. Dispatch
//! runs the value schema check, then [`Handler::validate`], then
//! [`Handler::process`]; the first failure becomes an error response for the
//! identifier the client used. Handler failures never leave the reader thread
//! as anything but an [`OutMessage::Error`].

mod attributes;
mod stream;

use std::{collections::HashMap, io, sync::Arc};

use log::debug;
use thiserror::Error;

use crate::{
    camera::CameraError,
    protocol::{InMessage, MessageKind, OutMessage, ProtocolError, Value, schema},
};

use super::context::Context;

pub use attributes::{CameraAttributeHandler, RoiAxis, SessionAttribute, SessionAttributeHandler};
pub use stream::{AbortHandler, StreamHandler};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{identifier} must be {expected}, got {value}")]
    OutOfRange {
        identifier: String,
        expected: String,
        value: Value,
    },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("a streaming command is already active")]
    Busy,

    #[error("{0} cannot change while streaming")]
    LockedWhileStreaming(String),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("failed to start stream: {0}")]
    Spawn(io::Error),
}

impl HandlerError {
    pub fn out_of_range(identifier: &str, expected: impl Into<String>, value: Value) -> Self {
        HandlerError::OutOfRange {
            identifier: identifier.to_string(),
            expected: expected.into(),
            value,
        }
    }
}

pub trait Handler: Send + Sync {
    /// Rejects a message before it has any effect.
    fn validate(&self, _ctx: &Context<'_>, _message: &InMessage) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Handles a validated message. An empty result sends nothing now;
    /// streaming commands report later through the session queue.
    fn process(&self, ctx: &Context<'_>, message: InMessage)
    -> Result<Vec<OutMessage>, HandlerError>;
}

/// Adapts a plain function into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Context<'_>, InMessage) -> Result<Vec<OutMessage>, HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Context<'_>, InMessage) -> Result<Vec<OutMessage>, HandlerError> + Send + Sync,
{
    fn process(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        (self.f)(ctx, message)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(MessageKind, String), Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, kind: MessageKind, identifier: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.register_shared(&[kind], &[identifier], Arc::new(handler));
    }

    /// Registers one handler under several kinds and identifiers (aliases).
    pub fn register_shared(
        &mut self,
        kinds: &[MessageKind],
        identifiers: &[&str],
        handler: Arc<dyn Handler>,
    ) {
        for kind in kinds {
            for identifier in identifiers {
                self.handlers
                    .insert((*kind, identifier.to_string()), Arc::clone(&handler));
            }
        }
    }

    pub fn contains(&self, kind: MessageKind, identifier: &str) -> bool {
        self.handlers.contains_key(&(kind, identifier.to_string()))
    }

    pub fn dispatch(&self, ctx: &Context<'_>, message: InMessage) -> Vec<OutMessage> {
        let identifier = message.identifier().to_string();
        debug!("[{}] dispatching {} {identifier}", ctx.client_id(), message.kind());

        match self.try_dispatch(ctx, message) {
            Ok(responses) => responses,
            Err(e) => {
                debug!("[{}] {identifier} failed: {e}", ctx.client_id());
                vec![OutMessage::error(identifier, e)]
            }
        }
    }

    fn try_dispatch(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        let key = (message.kind(), message.identifier().to_string());
        let Some(handler) = self.handlers.get(&key) else {
            return Err(ProtocolError::UnknownIdentifier {
                identifier: key.1,
                kind: key.0.to_string(),
            }
            .into());
        };

        let message = schema::check(message)?;
        handler.validate(ctx, &message)?;
        handler.process(ctx, message)
    }
}

/// Registry with every built-in identifier and its aliases.
pub fn default_registry() -> HandlerRegistry {
    use MessageKind::{Assignment, Command, Inquiry};

    use crate::camera::{
        FEATURE_EXPOSURE_TIME, FEATURE_HEIGHT, FEATURE_OFFSET_X, FEATURE_OFFSET_Y, FEATURE_WIDTH,
    };

    let mut registry = HandlerRegistry::new();
    let attribute = [Assignment, Inquiry];

    registry.register_shared(
        &attribute,
        &[schema::FRAME_RATE, schema::FRAME_RATE_ALIAS],
        Arc::new(SessionAttributeHandler::new(SessionAttribute::FrameRate)),
    );
    registry.register_shared(
        &attribute,
        &[
            schema::INPUT_SEQUENCE_LENGTH,
            schema::INPUT_SEQUENCE_LENGTH_ALIAS,
        ],
        Arc::new(SessionAttributeHandler::new(SessionAttribute::SequenceLength)),
    );
    registry.register_shared(
        &attribute,
        &[schema::INTEGRATION_TIME, schema::INTEGRATION_TIME_ALIAS],
        Arc::new(CameraAttributeHandler::integration_time(FEATURE_EXPOSURE_TIME)),
    );
    for (names, feature, axis) in [
        (
            [schema::IMAGE_LEFT, schema::IMAGE_LEFT_ALIAS],
            FEATURE_OFFSET_X,
            RoiAxis::Left,
        ),
        (
            [schema::IMAGE_TOP, schema::IMAGE_TOP_ALIAS],
            FEATURE_OFFSET_Y,
            RoiAxis::Top,
        ),
        (
            [schema::IMAGE_WIDTH, schema::IMAGE_WIDTH_ALIAS],
            FEATURE_WIDTH,
            RoiAxis::Width,
        ),
        (
            [schema::IMAGE_HEIGHT, schema::IMAGE_HEIGHT_ALIAS],
            FEATURE_HEIGHT,
            RoiAxis::Height,
        ),
    ] {
        registry.register_shared(
            &attribute,
            &names,
            Arc::new(CameraAttributeHandler::roi(feature, axis)),
        );
    }

    registry.register(
        Inquiry,
        schema::CLIENT_ID,
        FnHandler::new(|ctx, message| {
            Ok(vec![OutMessage::success(
                message.identifier(),
                ctx.client_id().to_string(),
            )])
        }),
    );
    registry.register(
        Command,
        schema::PING,
        FnHandler::new(|_, message| Ok(vec![OutMessage::ack(message.identifier())])),
    );

    registry.register_shared(
        &[Command],
        &[schema::GET_ONE_FRAME, schema::GET_ONE_FRAME_ALIAS],
        Arc::new(StreamHandler::single()),
    );
    registry.register_shared(
        &[Command],
        &[schema::GET_N_FRAMES, schema::GET_N_FRAMES_ALIAS],
        Arc::new(StreamHandler::sequence()),
    );
    registry.register(Command, schema::ABORT, AbortHandler);

    registry
}
