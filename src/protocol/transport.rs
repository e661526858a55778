use std::io::{self, Read, Write};

use thiserror::Error;

use super::{InMessage, OutMessage, ProtocolError, ResponseDecoder, Serializer};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] ProtocolError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    Closed,
}

/// Client end of a control connection.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    decoder: ResponseDecoder,
    chunk: Vec<u8>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            decoder: ResponseDecoder::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    pub fn write_message(&mut self, message: &InMessage) -> Result<(), TransportError> {
        self.write_raw(&Serializer::serialize_request(message))
    }

    /// Sends bytes as-is; used for lines that are not valid messages.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn read_response(&mut self) -> Result<OutMessage, TransportError> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Ok(message?);
            }
            let n = self.stream.read(&mut self.chunk)?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.decoder.feed(&self.chunk[..n]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }
}
