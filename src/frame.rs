//! Tag-prefixed string frames carried by the modem.
//!
//! `TXT:<text>` and `IMG:<base64>` are recognized; any other string is passed
//! through as raw for compatibility with untagged senders.

use crate::bitmap::MonoBitmap;

pub const TEXT_PREFIX: &str = "TXT:";
pub const IMAGE_PREFIX: &str = "IMG:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Image(MonoBitmap),
    /// Untagged payload, kept verbatim.
    Raw(String),
    /// `IMG:` frame whose body could not be decoded. Holds the body.
    Corrupt(String),
}

impl Frame {
    pub fn text(body: impl Into<String>) -> Self {
        Frame::Text(body.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Image(_) => "image",
            Frame::Raw(_) => "raw",
            Frame::Corrupt(_) => "corrupt",
        }
    }
}

pub fn encode_frame(frame: &Frame) -> String {
    match frame {
        Frame::Text(body) => format!("{}{}", TEXT_PREFIX, body),
        Frame::Image(bitmap) => format!("{}{}", IMAGE_PREFIX, bitmap.to_base64()),
        Frame::Raw(body) => body.clone(),
        Frame::Corrupt(body) => format!("{}{}", IMAGE_PREFIX, body),
    }
}

pub fn decode_frame(wire: &str) -> Frame {
    if let Some(body) = wire.strip_prefix(TEXT_PREFIX) {
        return Frame::Text(body.to_string());
    }

    if let Some(body) = wire.strip_prefix(IMAGE_PREFIX) {
        return match MonoBitmap::from_base64(body) {
            Ok(bitmap) => Frame::Image(bitmap),
            Err(e) => {
                log::debug!("Dropping undecodable image frame: {}", e);
                Frame::Corrupt(body.to_string())
            }
        };
    }

    Frame::Raw(wire.to_string())
}
