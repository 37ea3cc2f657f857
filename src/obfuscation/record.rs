//! TLS record framing for established sessions
//!
//! Record format:
//! ```text
//! +--------+--------+--------+--------+--------+
//! |  Type  |  Version (2B)   |   Length (2B)   |
//! +--------+--------+--------+--------+--------+
//! |              Payload (Length bytes)        |
//! +--------+--------+--------+--------+--------+
//! ```

use super::{ObfsError, ServerInfo};
use bytes::{BufMut, Bytes, BytesMut};

/// Record header size in bytes
pub const RECORD_HEADER_LEN: usize = 5;

/// Protocol version written in record headers (TLS 1.2)
pub const TLS_VERSION: [u8; 2] = [0x03, 0x03];

/// TLS record content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// ChangeCipherSpec
    ChangeCipherSpec = 0x14,
    /// Alert
    Alert = 0x15,
    /// Handshake
    Handshake = 0x16,
    /// Application data
    ApplicationData = 0x17,
}

impl TryFrom<u8> for ContentType {
    type Error = ObfsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x14 => Ok(ContentType::ChangeCipherSpec),
            0x15 => Ok(ContentType::Alert),
            0x16 => Ok(ContentType::Handshake),
            0x17 => Ok(ContentType::ApplicationData),
            _ => Err(ObfsError::InvalidRecord(format!(
                "Unknown content type: {:#04x}",
                value
            ))),
        }
    }
}

/// A parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw content type byte
    pub content_type: u8,
    /// Protocol version
    pub version: [u8; 2],
    /// Payload length
    pub length: usize,
}

impl RecordHeader {
    /// Read a header from the front of `buf`, or `None` if it is incomplete
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_LEN {
            return None;
        }

        Some(Self {
            content_type: buf[0],
            version: [buf[1], buf[2]],
            length: u16::from_be_bytes([buf[3], buf[4]]) as usize,
        })
    }

    /// Header plus payload length
    pub fn total_len(&self) -> usize {
        RECORD_HEADER_LEN + self.length
    }
}

/// Write one record to `out`
pub(crate) fn put_record(out: &mut BytesMut, content_type: ContentType, version: [u8; 2], payload: &[u8]) {
    out.reserve(RECORD_HEADER_LEN + payload.len());
    out.put_u8(content_type as u8);
    out.put_slice(&version);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
}

/// Outcome of [`RecordFramer::decode_stream`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes taken from the front of the input
    pub consumed: usize,
    /// Concatenated record payloads
    pub payload: Bytes,
    /// An incomplete record remains after `consumed`
    pub need_more: bool,
}

/// Application-data record framer
#[derive(Debug, Clone, Copy)]
pub struct RecordFramer {
    max_chunk: usize,
    max_record: usize,
}

impl RecordFramer {
    /// Create a framer splitting at `max_chunk` and accepting records up to
    /// `max_record` bytes
    pub fn new(max_chunk: usize, max_record: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
            max_record,
        }
    }

    /// Framer sized from connection parameters
    pub fn from_info(info: &ServerInfo) -> Self {
        Self::new(info.max_chunk_len(), info.buffer_size)
    }

    /// Largest payload per record
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Append `payload` to `out` as application-data records
    ///
    /// An empty payload appends nothing.
    pub fn encode(&self, payload: &[u8], out: &mut BytesMut) {
        for chunk in payload.chunks(self.max_chunk) {
            put_record(out, ContentType::ApplicationData, TLS_VERSION, chunk);
        }
    }

    /// Parse every complete record at the front of `buf`
    pub fn decode_stream(&self, buf: &[u8]) -> Result<Decoded, ObfsError> {
        let mut consumed = 0;
        let mut payload = BytesMut::new();

        while let Some(header) = RecordHeader::peek(&buf[consumed..]) {
            match ContentType::try_from(header.content_type)? {
                ContentType::ApplicationData => {}
                ContentType::Handshake => return Err(ObfsError::UnexpectedHandshake),
                other => {
                    return Err(ObfsError::InvalidRecord(format!(
                        "Unexpected {:?} record",
                        other
                    )))
                }
            }

            if header.version != TLS_VERSION {
                return Err(ObfsError::InvalidRecord(format!(
                    "Unexpected record version: {:02x}{:02x}",
                    header.version[0], header.version[1]
                )));
            }

            if header.length > self.max_record {
                return Err(ObfsError::InvalidRecord(format!(
                    "Record too large: {} > {}",
                    header.length, self.max_record
                )));
            }

            let end = consumed + header.total_len();
            if buf.len() < end {
                break;
            }

            payload.extend_from_slice(&buf[consumed + RECORD_HEADER_LEN..end]);
            consumed = end;
        }

        Ok(Decoded {
            consumed,
            payload: payload.freeze(),
            need_more: consumed < buf.len(),
        })
    }
}
