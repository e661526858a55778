use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::{
    camera::RawFrame,
    protocol::{
        BinaryDataAttribute, OutMessage,
        schema::{ATTR_CLIENT_ID, ATTR_SEQUENCE_INDEX, ATTR_TIMESTAMP, IMAGE_BUFFER},
    },
};

use super::session::ClientId;

const COLOR_BYTE_DEPTH: u8 = 3;

/// Region of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.left) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.top) + u64::from(self.height) <= u64::from(height)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("region {roi:?} lies outside the {width}x{height} frame")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },

    #[error("frame holds {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub timestamp: SystemTime,
    pub sequence_index: u64,
    pub client_id: ClientId,
}

/// Cropped frame ready for delivery. Wide samples are big-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub byte_depth: u8,
    pub pixels: Vec<u8>,
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Crops `raw` to `roi` and converts samples to network byte order.
    pub fn from_raw(raw: RawFrame, roi: Roi, metadata: FrameMetadata) -> Result<Self, FrameError> {
        if !roi.fits(raw.width, raw.height) {
            return Err(FrameError::RoiOutOfBounds {
                roi,
                width: raw.width,
                height: raw.height,
            });
        }

        let depth = raw.byte_depth as usize;
        let expected = raw.width as usize * raw.height as usize * depth;
        if raw.pixels.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: raw.pixels.len(),
            });
        }

        let stride = raw.width as usize * depth;
        let row_len = roi.width as usize * depth;
        let mut pixels = Vec::with_capacity(row_len * roi.height as usize);
        for row in roi.top..roi.top + roi.height {
            let start = row as usize * stride + roi.left as usize * depth;
            pixels.extend_from_slice(&raw.pixels[start..start + row_len]);
        }

        // Colour pixels are byte triples, not wide samples.
        if depth > 1 && raw.byte_depth != COLOR_BYTE_DEPTH {
            for sample in pixels.chunks_exact_mut(depth) {
                sample.reverse();
            }
        }

        Ok(Self {
            width: roi.width,
            height: roi.height,
            byte_depth: raw.byte_depth,
            pixels,
            metadata: FrameMetadata {
                timestamp: raw.timestamp,
                ..metadata
            },
        })
    }

    pub fn header(&self) -> BinaryDataAttribute {
        let timestamp = self
            .metadata
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        BinaryDataAttribute::new(IMAGE_BUFFER, self.width, self.height, self.byte_depth)
            .with_attribute(ATTR_CLIENT_ID, self.metadata.client_id.to_string())
            .with_attribute(ATTR_SEQUENCE_INDEX, self.metadata.sequence_index as i64)
            .with_attribute(ATTR_TIMESTAMP, timestamp)
    }

    /// Header followed by its payload; the pair must be enqueued together.
    pub fn into_messages(self) -> Vec<OutMessage> {
        let header = OutMessage::BinaryDataAttribute(self.header());
        let image = if self.byte_depth == COLOR_BYTE_DEPTH {
            OutMessage::ColorImage(self.pixels)
        } else {
            OutMessage::BwImage(self.pixels)
        };
        vec![header, image]
    }
}
