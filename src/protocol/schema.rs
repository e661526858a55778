//! Identifier table shared by the parser, the handlers and the client.
//!
//! Every assignable identifier has exactly one value type. Short aliases are
//! distinct identifiers with the same type and handler.

use std::fmt;

use super::{InMessage, ProtocolError, Value};

pub const FRAME_RATE: &str = "frameRate";
pub const FRAME_RATE_ALIAS: &str = "fr";
pub const INPUT_SEQUENCE_LENGTH: &str = "inputSequenceLength";
pub const INPUT_SEQUENCE_LENGTH_ALIAS: &str = "isl";
pub const INTEGRATION_TIME: &str = "integrationTime";
pub const INTEGRATION_TIME_ALIAS: &str = "it";
pub const IMAGE_LEFT: &str = "imageLeft";
pub const IMAGE_LEFT_ALIAS: &str = "img_l";
pub const IMAGE_TOP: &str = "imageTop";
pub const IMAGE_TOP_ALIAS: &str = "img_t";
pub const IMAGE_WIDTH: &str = "imageWidth";
pub const IMAGE_WIDTH_ALIAS: &str = "img_w";
pub const IMAGE_HEIGHT: &str = "imageHeight";
pub const IMAGE_HEIGHT_ALIAS: &str = "img_h";
pub const CLIENT_ID: &str = "clientId";

pub const GET_ONE_FRAME: &str = "get-one-frame";
pub const GET_ONE_FRAME_ALIAS: &str = "gi";
pub const GET_N_FRAMES: &str = "get-N-frames";
pub const GET_N_FRAMES_ALIAS: &str = "gis";
pub const ABORT: &str = "abort";
pub const PING: &str = "ping";

/// Identifier used for errors that cannot be attributed to a message.
pub const PARSE_ERROR: &str = "error";

/// Name of the binary buffer carrying frames.
pub const IMAGE_BUFFER: &str = "img";

/// Frame header attribute keys.
pub const ATTR_CLIENT_ID: &str = "clientId";
pub const ATTR_SEQUENCE_INDEX: &str = "isn";
pub const ATTR_TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Text,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "integer",
            ValueType::Float => "float",
            ValueType::Text => "string",
        };
        f.write_str(name)
    }
}

impl ValueType {
    /// Checks `value` against this type. Integers are accepted, and widened,
    /// where a float is expected.
    pub fn coerce(self, identifier: &str, value: Value) -> Result<Value, ProtocolError> {
        match (self, value) {
            (ValueType::Int, v @ Value::Int(_)) => Ok(v),
            (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ValueType::Float, v @ Value::Float(_)) => Ok(v),
            (ValueType::Text, v @ Value::Text(_)) => Ok(v),
            (expected, found) => Err(ProtocolError::TypeMismatch {
                identifier: identifier.to_string(),
                expected,
                found: found.type_name(),
            }),
        }
    }
}

const SCHEMA: &[(&str, ValueType)] = &[
    (FRAME_RATE, ValueType::Float),
    (FRAME_RATE_ALIAS, ValueType::Float),
    (INPUT_SEQUENCE_LENGTH, ValueType::Int),
    (INPUT_SEQUENCE_LENGTH_ALIAS, ValueType::Int),
    (INTEGRATION_TIME, ValueType::Float),
    (INTEGRATION_TIME_ALIAS, ValueType::Float),
    (IMAGE_LEFT, ValueType::Int),
    (IMAGE_LEFT_ALIAS, ValueType::Int),
    (IMAGE_TOP, ValueType::Int),
    (IMAGE_TOP_ALIAS, ValueType::Int),
    (IMAGE_WIDTH, ValueType::Int),
    (IMAGE_WIDTH_ALIAS, ValueType::Int),
    (IMAGE_HEIGHT, ValueType::Int),
    (IMAGE_HEIGHT_ALIAS, ValueType::Int),
    (CLIENT_ID, ValueType::Text),
];

pub fn value_type(identifier: &str) -> Option<ValueType> {
    SCHEMA
        .iter()
        .find(|(name, _)| *name == identifier)
        .map(|(_, ty)| *ty)
}

/// Applies the value schema to an assignment. Other message kinds, and
/// identifiers without a schema entry, pass through untouched.
pub fn check(message: InMessage) -> Result<InMessage, ProtocolError> {
    match message {
        InMessage::Assignment { identifier, value } => {
            let value = match value_type(&identifier) {
                Some(ty) => ty.coerce(&identifier, value)?,
                None => value,
            };
            Ok(InMessage::Assignment { identifier, value })
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_to_floats() {
        let message = check(InMessage::assignment(FRAME_RATE, 10)).unwrap();
        assert_eq!(message, InMessage::assignment(FRAME_RATE, 10.0));
    }

    #[test]
    #[should_panic(expected = "TypeMismatch")]
    fn floats_do_not_narrow() {
        check(InMessage::assignment(INPUT_SEQUENCE_LENGTH, 2.5)).unwrap();
    }

    #[test]
    fn text_rejected_for_numeric_identifiers() {
        let err = check(InMessage::assignment(IMAGE_WIDTH_ALIAS, "wide")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'img_w' expects integer, got string"
        );
    }

    #[test]
    fn unknown_identifiers_pass_through() {
        let message = InMessage::assignment("custom", "x");
        assert_eq!(check(message.clone()).unwrap(), message);
        assert_eq!(value_type("custom"), None);
    }
}
