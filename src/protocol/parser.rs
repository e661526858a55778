//! Incremental request parser.
//!
//! Network reads are not aligned to messages, so [`Parser`] buffers input
//! until a terminator arrives. Grammar violations are reported as
//! [`ParserResult::Malformed`] and the offending line is skipped; the parser
//! stays usable afterwards.

use log::trace;
use thiserror::Error;

use super::{InMessage, Value, schema::ValueType};

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 4096;

const TERMINATOR: u8 = b'\n';
const BYPASS_PREFIX: &str = "bypass ";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed message '{line}': {reason}")]
    Malformed { line: String, reason: String },

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("'{identifier}' expects {expected}, got {found}")]
    TypeMismatch {
        identifier: String,
        expected: ValueType,
        found: &'static str,
    },

    #[error("unknown identifier '{identifier}' for {kind}")]
    UnknownIdentifier { identifier: String, kind: String },
}

impl ProtocolError {
    fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParserResult {
    /// No complete message is buffered.
    NeedMoreData,
    /// A message was parsed out of `consumed` buffered bytes.
    Parsed { message: InMessage, consumed: usize },
    /// `skipped` buffered bytes did not form a valid message and were dropped.
    Malformed { error: ProtocolError, skipped: usize },
}

#[derive(Debug, Default)]
pub struct Parser {
    buffer: Vec<u8>,
    // Bytes dropped from an over-long line whose terminator has not arrived yet.
    discarding: Option<usize>,
    // Blank-line bytes not yet attributed to a result.
    blank: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `bytes` and returns the next result. Call [`Parser::next_result`]
    /// until it yields [`ParserResult::NeedMoreData`] to drain the buffer.
    pub fn consume(&mut self, bytes: &[u8]) -> ParserResult {
        self.feed(bytes);
        self.next_result()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_result(&mut self) -> ParserResult {
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == TERMINATOR) else {
                if self.buffer.len() > MAX_LINE_LENGTH || self.discarding.is_some() {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    *self.discarding.get_or_insert(0) += dropped;
                }
                return ParserResult::NeedMoreData;
            };

            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let consumed = std::mem::take(&mut self.blank) + line.len();

            if let Some(dropped) = self.discarding.take() {
                return ParserResult::Malformed {
                    error: ProtocolError::LineTooLong {
                        limit: MAX_LINE_LENGTH,
                    },
                    skipped: consumed + dropped,
                };
            }
            if pos > MAX_LINE_LENGTH {
                return ParserResult::Malformed {
                    error: ProtocolError::LineTooLong {
                        limit: MAX_LINE_LENGTH,
                    },
                    skipped: consumed,
                };
            }

            let text = match std::str::from_utf8(&line[..pos]) {
                Ok(text) => text.trim(),
                Err(_) => {
                    return ParserResult::Malformed {
                        error: ProtocolError::InvalidUtf8,
                        skipped: consumed,
                    };
                }
            };

            if text.is_empty() {
                trace!("skipping blank line");
                self.blank = consumed;
                continue;
            }

            return match parse_line(text) {
                Ok(message) => ParserResult::Parsed { message, consumed },
                Err(error) => ParserResult::Malformed {
                    error,
                    skipped: consumed,
                },
            };
        }
    }
}

/// Parses one trimmed line (without terminator) into a message.
///
/// The message kind is decided by the first delimiter after the identifier:
/// `=` for assignments, `?` for inquiries, `(` or end of line for commands.
pub fn parse_line(line: &str) -> Result<InMessage, ProtocolError> {
    let text = line.strip_prefix(BYPASS_PREFIX).unwrap_or(line).trim();

    let end = identifier_end(text)
        .ok_or_else(|| ProtocolError::malformed(line, "expected an identifier"))?;
    let identifier = text[..end].to_string();
    let rest = text[end..].trim_start();

    if rest.is_empty() {
        return Ok(InMessage::Command {
            identifier,
            args: Vec::new(),
        });
    }

    if let Some(value) = rest.strip_prefix('=') {
        let value = value.trim();
        if value.is_empty() {
            return Err(ProtocolError::malformed(line, "assignment without a value"));
        }
        let value = parse_value(value).map_err(|reason| ProtocolError::malformed(line, reason))?;
        return Ok(InMessage::Assignment { identifier, value });
    }

    if rest == "?" {
        return Ok(InMessage::Inquiry { identifier });
    }

    if let Some(args) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        let args = split_args(args)
            .map_err(|reason| ProtocolError::malformed(line, reason))?
            .into_iter()
            .map(parse_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ProtocolError::malformed(line, reason))?;
        return Ok(InMessage::Command { identifier, args });
    }

    Err(ProtocolError::malformed(
        line,
        format!("unexpected '{rest}' after identifier"),
    ))
}

/// Length of the identifier at the start of `text`:
/// `[A-Za-z][A-Za-z0-9_-]*` followed by any number of `[digits]` suffixes.
pub(crate) fn identifier_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if !bytes.first()?.is_ascii_alphabetic() {
        return None;
    }

    let mut i = 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'-'))
    {
        i += 1;
    }

    while i < bytes.len() && bytes[i] == b'[' {
        let start = i + 1;
        let mut j = start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == start || j >= bytes.len() || bytes[j] != b']' {
            return None;
        }
        i = j + 1;
    }

    Some(i)
}

/// Interprets a raw value token: quoted text, integer, finite float, or bare text.
pub fn parse_value(raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty value".to_string());
    }

    if let Some(inner) = strip_delimiters(raw) {
        return Ok(Value::Text(inner.to_string()));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Ok(Value::Float(f));
        }
    }
    Ok(Value::Text(raw.to_string()))
}

fn strip_delimiters(raw: &str) -> Option<&str> {
    if raw.len() < 2 {
        return None;
    }
    let (first, last) = (raw.as_bytes()[0], raw.as_bytes()[raw.len() - 1]);
    match (first, last) {
        (b'"', b'"') | (b'\'', b'\'') | (b'{', b'}') => Some(&raw[1..raw.len() - 1]),
        _ => None,
    }
}

/// Splits command arguments on commas that are not inside quotes or braces.
/// Quote characters inside braces are plain text.
fn split_args(args: &str) -> Result<Vec<&str>, String> {
    if args.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if depth == 0 => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                out.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated quote in arguments".to_string());
    }
    out.push(&args[start..]);

    if out.iter().any(|arg| arg.trim().is_empty()) {
        return Err("empty argument".to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(parser: &mut Parser) -> Vec<ParserResult> {
        let mut out = Vec::new();
        loop {
            match parser.next_result() {
                ParserResult::NeedMoreData => return out,
                result => out.push(result),
            }
        }
    }

    fn messages(results: &[ParserResult]) -> Vec<Result<InMessage, ProtocolError>> {
        results
            .iter()
            .map(|r| match r {
                ParserResult::Parsed { message, .. } => Ok(message.clone()),
                ParserResult::Malformed { error, .. } => Err(error.clone()),
                ParserResult::NeedMoreData => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn parses_each_message_kind() {
        let inputs = vec![
            ("frameRate=10", InMessage::assignment("frameRate", 10)),
            ("it=2.5", InMessage::assignment("it", 2.5)),
            ("name='cam one'", InMessage::assignment("name", "cam one")),
            ("label={a b}", InMessage::assignment("label", "a b")),
            ("mode=fast", InMessage::assignment("mode", "fast")),
            ("frameRate?", InMessage::inquiry("frameRate")),
            ("roi[1][2]?", InMessage::inquiry("roi[1][2]")),
            ("abort", InMessage::command("abort", vec![])),
            ("get-N-frames(5)", InMessage::command("get-N-frames", vec![5.into()])),
            (
                "cmd(1, 2.5, \"a,b\")",
                InMessage::command("cmd", vec![1.into(), 2.5.into(), "a,b".into()]),
            ),
            ("gis()", InMessage::command("gis", vec![])),
            ("bypass isl=3", InMessage::assignment("isl", 3)),
            ("  fr ?  ", InMessage::inquiry("fr")),
        ];

        for (line, expected) in inputs {
            assert_eq!(parse_line(line).unwrap(), expected, "line: {line}");
        }
    }

    #[test]
    fn rejects_grammar_violations() {
        for line in ["=5", "1abc?", "a=", "a?b", "a(1", "a(1,,2)", "a[x]?", "a(\"x)"] {
            assert!(
                matches!(parse_line(line), Err(ProtocolError::Malformed { .. })),
                "line: {line}"
            );
        }
    }

    #[test]
    fn non_finite_floats_are_text() {
        assert_eq!(parse_value("inf"), Ok(Value::Text("inf".into())));
        assert_eq!(parse_value("1e3"), Ok(Value::Float(1000.0)));
    }

    #[test]
    fn waits_for_terminator() {
        let mut parser = Parser::new();
        assert_eq!(parser.consume(b"frame"), ParserResult::NeedMoreData);
        assert_eq!(parser.consume(b"Rate?"), ParserResult::NeedMoreData);
        assert_eq!(
            parser.consume(b"\r\n"),
            ParserResult::Parsed {
                message: InMessage::inquiry("frameRate"),
                consumed: 12
            }
        );
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn skips_blank_lines() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.consume(b"\n\r\nabort\n"),
            ParserResult::Parsed {
                message: InMessage::command("abort", vec![]),
                consumed: 9
            }
        );
    }

    #[test]
    fn recovers_after_malformed_line() {
        let mut parser = Parser::new();
        parser.feed(b"%%garbage%%\nframeRate?\n");
        let results = drain(&mut parser);

        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            ParserResult::Malformed { skipped: 12, .. }
        ));
        assert_eq!(
            results[1],
            ParserResult::Parsed {
                message: InMessage::inquiry("frameRate"),
                consumed: 11
            }
        );
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut parser = Parser::new();
        let result = parser.consume(&[0xff, 0xfe, b'\n']);
        assert_eq!(
            result,
            ParserResult::Malformed {
                error: ProtocolError::InvalidUtf8,
                skipped: 3
            }
        );
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let mut input = b"frameRate=10\n\nframeRate?\n!!\ngis(3)\nname=\"x y\"\n".to_vec();
        input.extend(std::iter::repeat_n(b'a', MAX_LINE_LENGTH + 10));
        input.extend_from_slice(b"\nabort\n");

        let mut whole = Parser::new();
        whole.feed(&input);
        let expected = drain(&mut whole);

        let mut incremental = Parser::new();
        let mut actual = Vec::new();
        for byte in &input {
            incremental.feed(std::slice::from_ref(byte));
            actual.extend(drain(&mut incremental));
        }

        assert_eq!(messages(&actual), messages(&expected));
        assert_eq!(actual, expected);
        assert_eq!(expected.len(), 7);
    }

    #[test]
    fn round_trips_through_wire_form() {
        let messages = vec![
            InMessage::assignment("frameRate", 12.5),
            InMessage::assignment("isl", -3),
            InMessage::assignment("it", 1e-7),
            InMessage::assignment("label", "two words"),
            InMessage::assignment("empty", ""),
            InMessage::inquiry("img_w"),
            InMessage::inquiry("table[3]"),
            InMessage::command("abort", vec![]),
            InMessage::command("gis", vec![Value::Int(5), Value::Float(0.5), "a,b".into()]),
            InMessage::command("cmd", vec![r#"a"b"#.into()]),
            InMessage::command("cmd", vec![r#"it's "x", y"#.into(), Value::Int(1)]),
            InMessage::assignment("label", r#"say "hi""#),
        ];

        for message in messages {
            let wire = message.to_string();
            assert_eq!(parse_line(&wire).unwrap(), message, "wire: {wire}");
        }
    }
}
