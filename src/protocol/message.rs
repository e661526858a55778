use std::fmt;

/// Scalar carried by assignments, command arguments and success responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            // `{:?}` keeps a decimal point or exponent, so the value parses back as a float.
            Value::Float(v) => write!(f, "{v:?}"),
            // The grammar has no escapes, so pick a delimiter the text lacks.
            Value::Text(s) if !s.contains('"') => write!(f, "\"{s}\""),
            Value::Text(s) if !s.contains('\'') => write!(f, "'{s}'"),
            Value::Text(s) => write!(f, "{{{s}}}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Assignment,
    Inquiry,
    Command,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Assignment => "assignment",
            MessageKind::Inquiry => "inquiry",
            MessageKind::Command => "command",
        };
        f.write_str(name)
    }
}

/// Message sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum InMessage {
    /// `identifier=value`
    Assignment { identifier: String, value: Value },
    /// `identifier?`
    Inquiry { identifier: String },
    /// `identifier` or `identifier(arg,...)`
    Command { identifier: String, args: Vec<Value> },
}

impl InMessage {
    pub fn assignment(identifier: impl Into<String>, value: impl Into<Value>) -> Self {
        InMessage::Assignment {
            identifier: identifier.into(),
            value: value.into(),
        }
    }

    pub fn inquiry(identifier: impl Into<String>) -> Self {
        InMessage::Inquiry {
            identifier: identifier.into(),
        }
    }

    pub fn command(identifier: impl Into<String>, args: Vec<Value>) -> Self {
        InMessage::Command {
            identifier: identifier.into(),
            args,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            InMessage::Assignment { identifier, .. }
            | InMessage::Inquiry { identifier }
            | InMessage::Command { identifier, .. } => identifier,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            InMessage::Assignment { .. } => MessageKind::Assignment,
            InMessage::Inquiry { .. } => MessageKind::Inquiry,
            InMessage::Command { .. } => MessageKind::Command,
        }
    }
}

/// Wire form of the message, without the terminator.
impl fmt::Display for InMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InMessage::Assignment { identifier, value } => write!(f, "{identifier}={value}"),
            InMessage::Inquiry { identifier } => write!(f, "{identifier}?"),
            InMessage::Command { identifier, args } if args.is_empty() => f.write_str(identifier),
            InMessage::Command { identifier, args } => {
                write!(f, "{identifier}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Text header announcing a raw pixel payload of `payload_len()` bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryDataAttribute {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub byte_depth: u8,
    pub attributes: Vec<(String, Value)>,
}

impl BinaryDataAttribute {
    pub fn new(name: impl Into<String>, width: u32, height: u32, byte_depth: u8) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            byte_depth,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn payload_len(&self) -> usize {
        self.width as usize * self.height as usize * self.byte_depth as usize
    }
}

/// Message sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutMessage {
    Success {
        identifier: String,
        value: Option<Value>,
    },
    BinaryDataAttribute(BinaryDataAttribute),
    BwImage(Vec<u8>),
    ColorImage(Vec<u8>),
    Error {
        identifier: String,
        description: String,
    },
}

impl OutMessage {
    /// Bare acknowledgment.
    pub fn ack(identifier: impl Into<String>) -> Self {
        OutMessage::Success {
            identifier: identifier.into(),
            value: None,
        }
    }

    pub fn success(identifier: impl Into<String>, value: impl Into<Value>) -> Self {
        OutMessage::Success {
            identifier: identifier.into(),
            value: Some(value.into()),
        }
    }

    pub fn error(identifier: impl Into<String>, description: impl fmt::Display) -> Self {
        OutMessage::Error {
            identifier: identifier.into(),
            description: description.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutMessage::Error { .. })
    }

    /// Short description used in logs; never includes pixel data.
    pub fn summary(&self) -> String {
        match self {
            OutMessage::Success {
                identifier,
                value: Some(value),
            } => format!("success {identifier}={value}"),
            OutMessage::Success {
                identifier,
                value: None,
            } => format!("success {identifier}"),
            OutMessage::BinaryDataAttribute(header) => format!(
                "binary header {}[{}x{}x{}]",
                header.name, header.width, header.height, header.byte_depth
            ),
            OutMessage::BwImage(pixels) => format!("bw image ({} bytes)", pixels.len()),
            OutMessage::ColorImage(pixels) => format!("color image ({} bytes)", pixels.len()),
            OutMessage::Error {
                identifier,
                description,
            } => format!("error {identifier}: {description}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_message_wire_form() {
        let inputs = vec![
            (InMessage::assignment("frameRate", 10.0), "frameRate=10.0"),
            (InMessage::assignment("isl", 4), "isl=4"),
            (InMessage::assignment("name", "cam"), "name=\"cam\""),
            (InMessage::inquiry("frameRate"), "frameRate?"),
            (InMessage::command("gi", vec![]), "gi"),
            (
                InMessage::command("gis", vec![Value::Int(5), Value::from("x")]),
                "gis(5,\"x\")",
            ),
            (
                InMessage::command("cmd", vec![Value::from(r#"a"b"#)]),
                r#"cmd('a"b')"#,
            ),
            (
                InMessage::assignment("note", r#"it's "x""#),
                r#"note={it's "x"}"#,
            ),
        ];

        for (message, expected) in inputs {
            assert_eq!(message.to_string(), expected);
        }
    }

    #[test]
    fn value_widening() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(3.0).as_i64(), None);
        assert_eq!(Value::from("a").as_f64(), None);
    }

    #[test]
    fn payload_length_from_dimensions() {
        let header = BinaryDataAttribute::new("img", 4, 3, 2).with_attribute("isn", 1);
        assert_eq!(header.payload_len(), 24);
        assert_eq!(header.attribute("isn"), Some(&Value::Int(1)));
        assert_eq!(header.attribute("missing"), None);
    }
}
