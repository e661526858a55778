//! Assignment and inquiry handlers for the settable attributes.
//!
//! Session attributes (frame rate, sequence length) live in the session and
//! only affect streams started afterwards. Camera attributes are read from and
//! written to the camera on every request; nothing is cached.

use crate::{
    camera::{
        CameraError, FEATURE_HEIGHT, FEATURE_OFFSET_X, FEATURE_OFFSET_Y, FEATURE_WIDTH,
        FeatureReader, FeatureValue,
    },
    protocol::{InMessage, OutMessage, Value, schema},
};

use super::{Context, Handler, HandlerError};

/// Slowest accepted rate: one frame every 1000 s.
pub const MIN_FRAME_RATE: f64 = 0.001;
pub const MAX_FRAME_RATE: f64 = 1000.0;
pub const MAX_SEQUENCE_LENGTH: i64 = 1_000_000;
pub const MAX_INTEGRATION_TIME_MS: f64 = 10_000.0;

const MICROS_PER_MILLI: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAttribute {
    FrameRate,
    SequenceLength,
}

pub struct SessionAttributeHandler {
    attribute: SessionAttribute,
}

impl SessionAttributeHandler {
    pub fn new(attribute: SessionAttribute) -> Self {
        Self { attribute }
    }
}

impl Handler for SessionAttributeHandler {
    fn validate(&self, _ctx: &Context<'_>, message: &InMessage) -> Result<(), HandlerError> {
        let InMessage::Assignment { identifier, value } = message else {
            return Ok(());
        };

        match self.attribute {
            SessionAttribute::FrameRate => {
                let rate = value.as_f64().unwrap_or(f64::NAN);
                if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&rate) {
                    return Err(HandlerError::out_of_range(
                        identifier,
                        format!("within [{MIN_FRAME_RATE}, {MAX_FRAME_RATE}]"),
                        value.clone(),
                    ));
                }
            }
            SessionAttribute::SequenceLength => {
                let length = value.as_i64().unwrap_or(0);
                if !(1..=MAX_SEQUENCE_LENGTH).contains(&length) {
                    return Err(HandlerError::out_of_range(
                        identifier,
                        format!("within [1, {MAX_SEQUENCE_LENGTH}]"),
                        value.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn process(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        let session = ctx.session();
        let identifier = message.identifier().to_string();

        let params = match message {
            InMessage::Assignment { value, .. } => {
                session.update_params(&identifier, |params| match self.attribute {
                    SessionAttribute::FrameRate => {
                        params.frame_rate = value.as_f64().unwrap_or(params.frame_rate);
                    }
                    SessionAttribute::SequenceLength => {
                        params.sequence_length = value
                            .as_i64()
                            .map(|v| v as u64)
                            .unwrap_or(params.sequence_length);
                    }
                })?
            }
            _ => session.params(),
        };

        let value = match self.attribute {
            SessionAttribute::FrameRate => Value::Float(params.frame_rate),
            SessionAttribute::SequenceLength => Value::Int(params.sequence_length as i64),
        };
        Ok(vec![OutMessage::success(identifier, value)])
    }
}

/// Edge of the region of interest an attribute controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiAxis {
    Left,
    Top,
    Width,
    Height,
}

impl RoiAxis {
    /// The feature that shares a sensor dimension with this one.
    fn partner(self) -> &'static str {
        match self {
            RoiAxis::Left => FEATURE_WIDTH,
            RoiAxis::Width => FEATURE_OFFSET_X,
            RoiAxis::Top => FEATURE_HEIGHT,
            RoiAxis::Height => FEATURE_OFFSET_Y,
        }
    }

    fn minimum(self) -> i64 {
        match self {
            RoiAxis::Left | RoiAxis::Top => 0,
            RoiAxis::Width | RoiAxis::Height => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CameraAttribute {
    /// Milliseconds on the wire, microseconds on the camera. Changes are
    /// broadcast to every session.
    IntegrationTime,
    Roi(RoiAxis),
}

pub struct CameraAttributeHandler {
    feature: &'static str,
    attribute: CameraAttribute,
}

impl CameraAttributeHandler {
    pub fn integration_time(feature: &'static str) -> Self {
        Self {
            feature,
            attribute: CameraAttribute::IntegrationTime,
        }
    }

    pub fn roi(feature: &'static str, axis: RoiAxis) -> Self {
        Self {
            feature,
            attribute: CameraAttribute::Roi(axis),
        }
    }

    fn read(&self, ctx: &Context<'_>, feature: &str) -> Result<FeatureValue, HandlerError> {
        Ok(ctx.camera().get_feature(feature)?)
    }

    /// Rejects `value` when it would push the region past the sensor edge
    /// given the partner feature's current value.
    fn check_partner(
        ctx: &Context<'_>,
        axis: RoiAxis,
        identifier: &str,
        value: &Value,
        features: &FeatureReader<'_>,
    ) -> Result<(), HandlerError> {
        let v = value.as_i64().unwrap_or_default();
        let (sensor_width, sensor_height) = ctx.camera().sensor_size();
        let limit = i64::from(match axis {
            RoiAxis::Left | RoiAxis::Width => sensor_width,
            RoiAxis::Top | RoiAxis::Height => sensor_height,
        });
        let partner = features.get_int(axis.partner())?;
        if v + partner > limit {
            return Err(HandlerError::out_of_range(
                identifier,
                format!(
                    "at most {} with {} = {partner}",
                    limit - partner,
                    axis.partner()
                ),
                value.clone(),
            ));
        }
        Ok(())
    }

    fn to_wire(&self, value: FeatureValue) -> Result<Value, HandlerError> {
        let wire = match self.attribute {
            CameraAttribute::IntegrationTime => {
                value.as_f64().map(|us| Value::Float(us / MICROS_PER_MILLI))
            }
            CameraAttribute::Roi(_) => value.as_i64().map(Value::Int),
        };
        wire.ok_or_else(|| {
            CameraError::Rejected {
                name: self.feature.to_string(),
                reason: format!("non-numeric value {value}"),
            }
            .into()
        })
    }
}

impl Handler for CameraAttributeHandler {
    fn validate(&self, _ctx: &Context<'_>, message: &InMessage) -> Result<(), HandlerError> {
        let InMessage::Assignment { identifier, value } = message else {
            return Ok(());
        };

        match self.attribute {
            CameraAttribute::IntegrationTime => {
                let ms = value.as_f64().unwrap_or(f64::NAN);
                if !(ms > 0.0 && ms <= MAX_INTEGRATION_TIME_MS) {
                    return Err(HandlerError::out_of_range(
                        identifier,
                        format!("within (0, {MAX_INTEGRATION_TIME_MS}] ms"),
                        value.clone(),
                    ));
                }
            }
            CameraAttribute::Roi(axis) => {
                let v = value.as_i64().unwrap_or(-1);
                if v < axis.minimum() {
                    return Err(HandlerError::out_of_range(
                        identifier,
                        format!("at least {}", axis.minimum()),
                        value.clone(),
                    ));
                }
                // The sensor-edge check needs the partner feature and runs
                // together with the write in `process`.
            }
        }
        Ok(())
    }

    fn process(
        &self,
        ctx: &Context<'_>,
        message: InMessage,
    ) -> Result<Vec<OutMessage>, HandlerError> {
        match message {
            InMessage::Assignment { identifier, value } => {
                let settled = match self.attribute {
                    CameraAttribute::IntegrationTime => ctx.camera().set_feature(
                        self.feature,
                        FeatureValue::Float(value.as_f64().unwrap_or_default() * MICROS_PER_MILLI),
                    )?,
                    CameraAttribute::Roi(axis) => ctx.camera().set_feature_checked(
                        self.feature,
                        FeatureValue::Int(value.as_i64().unwrap_or_default()),
                        |features| Self::check_partner(ctx, axis, &identifier, &value, features),
                    )?,
                };
                let settled = self.to_wire(settled)?;

                if self.attribute == CameraAttribute::IntegrationTime {
                    // Every client sees the new exposure, the sender through
                    // its own queue like the others.
                    ctx.broadcast(OutMessage::success(schema::INTEGRATION_TIME, settled));
                    return Ok(Vec::new());
                }
                Ok(vec![OutMessage::success(identifier, settled)])
            }
            message => {
                let value = self.to_wire(self.read(ctx, self.feature)?)?;
                Ok(vec![OutMessage::success(message.identifier(), value)])
            }
        }
    }
}
