//! Client-side decoding of server output.
//!
//! Responses are text lines, except that a binary header line is followed by
//! exactly `width * height * byte_depth` raw bytes which may contain any byte
//! value, terminators included.

use super::{
    BinaryDataAttribute, OutMessage, ProtocolError,
    parser::{identifier_end, parse_value},
    serializer::BINARY_HEADER_PREFIX,
};

/// Payloads with this many bytes per pixel decode as colour images.
const COLOR_BYTE_DEPTH: u8 = 3;

#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buffer: Vec<u8>,
    pending: Option<BinaryDataAttribute>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` when more bytes are needed.
    pub fn next_message(&mut self) -> Option<Result<OutMessage, ProtocolError>> {
        if let Some(header) = &self.pending {
            let len = header.payload_len();
            if self.buffer.len() < len {
                return None;
            }
            let color = header.byte_depth == COLOR_BYTE_DEPTH;
            self.pending = None;
            let pixels: Vec<u8> = self.buffer.drain(..len).collect();
            return Some(Ok(if color {
                OutMessage::ColorImage(pixels)
            } else {
                OutMessage::BwImage(pixels)
            }));
        }

        loop {
            let pos = self.buffer.iter().position(|b| *b == b'\n')?;
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let Ok(text) = std::str::from_utf8(&line[..pos]) else {
                return Some(Err(ProtocolError::InvalidUtf8));
            };
            let text = text.trim_end_matches('\r');
            if text.is_empty() {
                continue;
            }

            let message = parse_response_line(text);
            if let Ok(OutMessage::BinaryDataAttribute(header)) = &message {
                self.pending = Some(header.clone());
            }
            return Some(message);
        }
    }
}

/// Parses one response line (without terminator).
pub fn parse_response_line(line: &str) -> Result<OutMessage, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::Malformed {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    if let Some(header) = line.strip_prefix(BINARY_HEADER_PREFIX) {
        return parse_header(header)
            .map(OutMessage::BinaryDataAttribute)
            .map_err(|reason| malformed(&reason));
    }

    let end = identifier_end(line).ok_or_else(|| malformed("expected an identifier"))?;
    let identifier = line[..end].to_string();
    let rest = &line[end..];

    match rest.chars().next() {
        None | Some(';') if rest.len() <= 1 => Ok(OutMessage::Success {
            identifier,
            value: None,
        }),
        Some('=') => {
            let value = parse_value(&rest[1..]).map_err(|reason| malformed(&reason))?;
            Ok(OutMessage::Success {
                identifier,
                value: Some(value),
            })
        }
        Some('!') => Ok(OutMessage::Error {
            identifier,
            description: rest[1..].to_string(),
        }),
        _ => Err(malformed("unknown response delimiter")),
    }
}

fn parse_header(header: &str) -> Result<BinaryDataAttribute, String> {
    let mut tokens = tokenize(header).into_iter();
    let shape = tokens.next().ok_or("empty binary header")?;

    let (name, dims) = shape
        .strip_suffix(']')
        .and_then(|s| s.split_once('['))
        .ok_or_else(|| format!("invalid binary shape '{shape}'"))?;
    let dims = dims
        .split(',')
        .map(|d| d.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid binary dimension: {e}"))?;
    let [width, height, depth] = dims[..] else {
        return Err(format!("expected 3 dimensions, got {}", dims.len()));
    };
    let byte_depth = u8::try_from(depth).map_err(|_| format!("byte depth {depth} too large"))?;

    let mut out = BinaryDataAttribute::new(name, width, height, byte_depth);
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("attribute '{token}' has no value"))?;
        out.attributes.push((key.to_string(), parse_value(value)?));
    }
    Ok(out)
}

/// Splits on whitespace that is not inside a quoted or braced value.
fn tokenize(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut closing: Option<char> = None;

    for (i, c) in s.char_indices() {
        match (closing, c) {
            (Some(end), c) if c == end => closing = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => closing = Some(c),
            (None, '{') => closing = Some('}'),
            (None, c) if c.is_whitespace() => {
                if let Some(begin) = start.take() {
                    out.push(&s[begin..i]);
                }
                continue;
            }
            _ => {}
        }
        start.get_or_insert(i);
    }
    if let Some(begin) = start {
        out.push(&s[begin..]);
    }
    out
}
