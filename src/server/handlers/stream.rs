use crate::{
    camera::{CameraError, FEATURE_HEIGHT, FEATURE_OFFSET_X, FEATURE_OFFSET_Y, FEATURE_WIDTH},
    protocol::{InMessage, OutMessage, Value},
    server::{collector::ClientCollectionParams, frame::Roi},
};

use super::{Context, Handler, HandlerError, attributes::MAX_SEQUENCE_LENGTH};

/// `get-one-frame` and `get-N-frames`.
///
/// Replies nothing up front. The collector reports `identifier;` once every
/// frame is queued, or an error if the camera fails.
pub struct StreamHandler {
    single: bool,
}

impl StreamHandler {
    pub fn single() -> Self {
        Self { single: true }
    }

    pub fn sequence() -> Self {
        Self { single: false }
    }

    /// Frame count requested by the arguments, if any.
    fn requested_count(
        &self,
        identifier: &str,
        args: &[Value],
    ) -> Result<Option<u64>, HandlerError> {
        match args {
            [] => Ok(None),
            _ if self.single => Err(HandlerError::InvalidArguments(format!(
                "{identifier} takes no arguments"
            ))),
            [count] => match count.as_i64() {
                Some(n) if (1..=MAX_SEQUENCE_LENGTH).contains(&n) => Ok(Some(n as u64)),
                _ => Err(HandlerError::out_of_range(
                    identifier,
                    format!("a frame count within [1, {MAX_SEQUENCE_LENGTH}]"),
                    count.clone(),
                )),
            },
            _ => Err(HandlerError::InvalidArguments(format!(
                "{identifier} takes at most one argument, got {}",
                args.len()
            ))),
        }
    }

    /// Snapshot of the camera's region of interest, read in one step so a
    /// concurrent ROI assignment cannot leave it half updated.
    fn roi(ctx: &Context<'_>) -> Result<Roi, HandlerError> {
        Ok(ctx.camera().read_features(|features| {
            let read = |feature: &str| -> Result<u32, CameraError> {
                let value = features.get_int(feature)?;
                u32::try_from(value).map_err(|_| CameraError::Rejected {
                    name: feature.to_string(),
                    reason: format!("unusable region value {value}"),
                })
            };

            Ok::<_, CameraError>(Roi {
                left: read(FEATURE_OFFSET_X)?,
                top: read(FEATURE_OFFSET_Y)?,
                width: read(FEATURE_WIDTH)?,
                height: read(FEATURE_HEIGHT)?,
            })
        })?)
    }
}

impl Handler for StreamHandler {
    fn validate(&self, ctx: &Context<'_>, message: &InMessage) -> Result<(), HandlerError> {
        if let InMessage::Command { identifier, args } = message {
            self.requested_count(identifier, args)?;
        }
        if ctx.session().is_streaming() {
            return Err(HandlerError::Busy);
        }
        Ok(())
    }

    fn process(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        let InMessage::Command { identifier, args } = message else {
            return Ok(Vec::new());
        };
        let session = ctx.session();
        let defaults = session.params();

        let sequence_length = if self.single {
            1
        } else {
            self.requested_count(&identifier, &args)?
                .unwrap_or(defaults.sequence_length)
        };
        let params = ClientCollectionParams {
            frame_rate: defaults.frame_rate,
            sequence_length,
            roi: Self::roi(ctx)?,
        };

        session.start_stream(
            &identifier,
            params,
            ctx.camera().clone(),
            ctx.config().acquisition_timeout(),
        )?;
        Ok(Vec::new())
    }
}

/// Stops the session's stream, if any, and always acknowledges.
///
/// The acknowledgment is queued only after the collector has exited, so no
/// frame of the aborted stream can follow it.
pub struct AbortHandler;

impl Handler for AbortHandler {
    fn process(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        ctx.session().abort_stream();
        Ok(vec![OutMessage::ack(message.identifier())])
    }
}
