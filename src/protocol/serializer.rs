use std::io::{self, Write};

use super::{BinaryDataAttribute, InMessage, OutMessage};

pub const TERMINATOR: &[u8] = b"\n";

/// Marks a binary header line; identifiers can never start with it.
pub const BINARY_HEADER_PREFIX: char = '#';

/// Renders messages into their wire form.
///
/// Text messages end with [`TERMINATOR`]. A binary header is a text line
/// declaring the payload dimensions; the pixel bytes that follow it are
/// written verbatim and are located by length, never by delimiter scanning.
pub struct Serializer;

impl Serializer {
    pub fn serialize(message: &OutMessage) -> Vec<u8> {
        let mut out = Vec::with_capacity(match message {
            OutMessage::BwImage(pixels) | OutMessage::ColorImage(pixels) => pixels.len(),
            _ => 64,
        });
        // Writing into a Vec cannot fail.
        let _ = Self::write_to(message, &mut out);
        out
    }

    /// Streams `message` into `writer` without an intermediate copy of pixel data.
    pub fn write_to<W: Write>(message: &OutMessage, writer: &mut W) -> io::Result<()> {
        match message {
            OutMessage::Success {
                identifier,
                value: Some(value),
            } => write!(writer, "{identifier}={value}")?,
            OutMessage::Success {
                identifier,
                value: None,
            } => write!(writer, "{identifier};")?,
            OutMessage::Error {
                identifier,
                description,
            } => write!(
                writer,
                "{identifier}!{}",
                description.replace(['\r', '\n'], " ")
            )?,
            OutMessage::BinaryDataAttribute(header) => Self::write_header(header, writer)?,
            OutMessage::BwImage(pixels) | OutMessage::ColorImage(pixels) => {
                return writer.write_all(pixels);
            }
        }
        writer.write_all(TERMINATOR)
    }

    /// Request form of an inbound message, as sent by clients.
    pub fn serialize_request(message: &InMessage) -> Vec<u8> {
        let mut out = message.to_string().into_bytes();
        out.extend_from_slice(TERMINATOR);
        out
    }

    fn write_header<W: Write>(header: &BinaryDataAttribute, writer: &mut W) -> io::Result<()> {
        write!(
            writer,
            "{BINARY_HEADER_PREFIX}{}[{},{},{}]",
            header.name, header.width, header.height, header.byte_depth
        )?;
        for (key, value) in &header.attributes {
            write!(writer, " {key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    fn text(message: &OutMessage) -> String {
        String::from_utf8(Serializer::serialize(message)).unwrap()
    }

    #[test]
    fn text_responses() {
        let inputs = vec![
            (OutMessage::success("frameRate", 10.0), "frameRate=10.0\n"),
            (OutMessage::success("isl", 16), "isl=16\n"),
            (OutMessage::success("clientId", "client-1"), "clientId=\"client-1\"\n"),
            (OutMessage::ack("gis"), "gis;\n"),
            (
                OutMessage::error("img_w", "too\nwide"),
                "img_w!too wide\n",
            ),
        ];

        for (message, expected) in inputs {
            assert_eq!(text(&message), expected);
        }
    }

    #[test]
    fn binary_header_declares_dimensions() {
        let header = BinaryDataAttribute::new("img", 640, 480, 2)
            .with_attribute("clientId", "client-2")
            .with_attribute("isn", Value::Int(7));

        assert_eq!(
            text(&OutMessage::BinaryDataAttribute(header)),
            "#img[640,480,2] clientId=\"client-2\" isn=7\n"
        );
    }

    #[test]
    fn image_payload_is_verbatim() {
        let pixels = vec![b'\n', 0, b'#', 255];
        assert_eq!(
            Serializer::serialize(&OutMessage::BwImage(pixels.clone())),
            pixels
        );
    }

    #[test]
    fn request_form() {
        assert_eq!(
            Serializer::serialize_request(&InMessage::inquiry("frameRate")),
            b"frameRate?\n"
        );
    }
}
