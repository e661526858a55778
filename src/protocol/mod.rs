//! Client-server communication protocol.
//!
//! This module defines the wire protocol spoken between camera control clients and
//! the server: the message types, the incremental request [`Parser`], the
//! [`Serializer`] for responses, and the client-side [`ResponseDecoder`] and
//! [`ProtocolTransport`].
//!
//! # Overview
//!
//! The control channel is line oriented and human readable. Every request is one
//! line terminated by `\n`:
//!
//! - Assignment: `identifier=value` sets a parameter.
//! - Inquiry: `identifier?` reads a parameter.
//! - Command: `identifier` or `identifier(arg,...)` runs an action.
//!
//! Responses are `identifier=value` or `identifier;` on success and
//! `identifier!description` on failure.
//!
//! # Binary Format
//!
//! Image frames share the same connection. A frame is sent as a header line
//!
//! ```text
//! #img[width,height,byteDepth] clientId="client-1" isn=0 timestamp=1718000000.25
//! ```
//!
//! immediately followed by exactly `width * height * byteDepth` raw bytes.
//! Readers consume the payload by its declared length, so pixel bytes never need
//! escaping even when they coincide with `\n` or `#`. Multi-byte samples are
//! big-endian.
//!
//! # Value Types
//!
//! Each assignable identifier has a fixed value type listed in [`schema`].
//! A value of the wrong type is a validation failure reported to the client as
//! an error response; it never closes the connection.
mod decoder;
mod message;
mod parser;
pub mod schema;
mod serializer;
mod transport;

pub use decoder::{ResponseDecoder, parse_response_line};
pub use message::{BinaryDataAttribute, InMessage, MessageKind, OutMessage, Value};
pub use parser::{MAX_LINE_LENGTH, Parser, ParserResult, ProtocolError, parse_line, parse_value};
pub use schema::ValueType;
pub use serializer::{BINARY_HEADER_PREFIX, Serializer, TERMINATOR};
pub use transport::{ProtocolTransport, TransportError};
