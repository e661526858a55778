//! CLI utilities for camwire.
//!
//! The utilities present in this module can be used to build an interactive
//! client for the camera server.
use std::io::{BufRead, Write};

use crate::protocol::{InMessage, OutMessage, parse_line};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Protocol message to send to the server
    Send(InMessage),
    /// Blank input
    Empty,
}

/// Prompt user for a command.
///
/// Returns an error for unknown dot-commands and lines that do not parse as a
/// protocol message. End of input counts as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")
        .and_then(|_| writer.flush())
        .map_err(|e| format!("failed to write prompt: {e}"))?;

    let n = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if n == 0 {
        return Ok(Command::Exit);
    }

    match s.trim() {
        ".exit" => Ok(Command::Exit),
        "" => Ok(Command::Empty),
        s if s.starts_with('.') => Err(format!("unrecognized command '{}'", s)),
        s => parse_line(s).map(Command::Send).map_err(|e| e.to_string()),
    }
}

/// One-line, human readable rendering of a server message.
pub fn describe(message: &OutMessage) -> String {
    match message {
        OutMessage::Success {
            identifier,
            value: Some(value),
        } => format!("{identifier} = {value}"),
        OutMessage::Success {
            identifier,
            value: None,
        } => format!("{identifier}: ok"),
        OutMessage::Error {
            identifier,
            description,
        } => format!("{identifier}: error: {description}"),
        OutMessage::BinaryDataAttribute(header) => {
            let attributes: Vec<String> = header
                .attributes
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            format!(
                "{} {}x{}x{} ({} bytes) {}",
                header.name,
                header.width,
                header.height,
                header.byte_depth,
                header.payload_len(),
                attributes.join(" ")
            )
        }
        OutMessage::BwImage(pixels) | OutMessage::ColorImage(pixels) => {
            format!("  <{} bytes of pixel data>", pixels.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BinaryDataAttribute, Value};

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_messages() {
        let inputs = vec![
            ("frameRate=10\n", InMessage::assignment("frameRate", 10)),
            ("isl?\n", InMessage::inquiry("isl")),
            ("gis(3)\n", InMessage::command("gis", vec![Value::Int(3)])),
        ];

        for (input, expected) in inputs {
            let res = prompt(input.as_bytes(), Vec::new()).unwrap();
            assert_eq!(Command::Send(expected), res);
        }
    }

    #[test]
    fn prompt_blank_and_eof() {
        assert_eq!(prompt(&b"  \n"[..], Vec::new()), Ok(Command::Empty));
        assert_eq!(prompt(&b""[..], Vec::new()), Ok(Command::Exit));
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }

    #[test]
    #[should_panic(expected = "expected an identifier")]
    fn prompt_rejects_malformed_messages() {
        prompt(&b"=5\n"[..], Vec::new()).unwrap();
    }

    #[test]
    fn describe_messages() {
        assert_eq!(
            describe(&OutMessage::success("frameRate", 10.0)),
            "frameRate = 10.0"
        );
        assert_eq!(describe(&OutMessage::ack("gi")), "gi: ok");
        assert_eq!(
            describe(&OutMessage::BinaryDataAttribute(
                BinaryDataAttribute::new("img", 2, 2, 2).with_attribute("isn", 0)
            )),
            "img 2x2x2 (8 bytes) isn=0"
        );
    }
}
