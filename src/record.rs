//! The record codec: one framed, CRC-checksummed record.
//!
//! A record is `crc | format | attributes | timestamp? | key | payload`. The
//! CRC covers every byte that follows it. A null key or payload is encoded
//! with the length sentinel [`NULL_LEN`] rather than a zero length, which
//! denotes a present-but-empty string.

use bytes::{Bytes, BytesMut};

use crate::error::LogError;

/// Length sentinel denoting an absent (not merely empty) key or payload.
pub const NULL_LEN: u32 = 0xFFFF_FFFF;

/// Smallest possible encoded record: crc + format + attributes + two null
/// length fields, no timestamp, no body.
pub const MIN_RECORD_LEN: u32 = 4 + 1 + 1 + 4 + 4;

/// One record: an optional timestamp, an optional key, and an optional
/// payload, plus the format/attributes bytes that govern their presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub format: u8,
    pub attributes: u8,
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
}

impl Record {
    /// Builds a record carrying a timestamp (seconds since epoch), matching
    /// the wire format's `format = 1` variant.
    pub fn new(timestamp: i64, key: Option<Bytes>, payload: Option<Bytes>) -> Self {
        Self {
            format: 1,
            attributes: 0,
            timestamp: Some(timestamp),
            key,
            payload,
        }
    }

    /// Current wall-clock time as seconds since the Unix epoch.
    pub fn now_seconds() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Encoded length of this record, i.e. the frame's `size` field.
    pub fn encoded_len(&self) -> u32 {
        let mut n: u32 = 4 + 1 + 1;
        if self.timestamp.is_some() {
            n += 8;
        }
        n += 4 + self.key.as_ref().map_or(0, |k| k.len() as u32);
        n += 4 + self.payload.as_ref().map_or(0, |p| p.len() as u32);
        n
    }

    /// Encodes this record, CRC included, as exactly `encoded_len()` bytes.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(self.encoded_len() as usize - 4);
        body.extend_from_slice(&[self.format, self.attributes]);
        if let Some(ts) = self.timestamp {
            body.extend_from_slice(&ts.to_be_bytes());
        }
        encode_field(&mut body, self.key.as_deref());
        encode_field(&mut body, self.payload.as_deref());

        let crc = crc32fast::hash(&body);
        let mut out = BytesMut::with_capacity(4 + body.len());
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend_from_slice(&body);
        out.freeze()
    }

    /// Decodes a record from exactly its encoded bytes (as read from a
    /// frame whose `size` field gave the length). Verifies the CRC.
    pub fn decode(frame: Bytes) -> Result<Record, LogError> {
        if frame.len() < MIN_RECORD_LEN as usize {
            return Err(LogError::UnexpectedEof);
        }
        let stored_crc = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        if crc32fast::hash(&frame[4..]) != stored_crc {
            return Err(LogError::BadCrc);
        }

        let mut pos = 4usize;
        let format = take_u8(&frame, &mut pos)?;
        let attributes = take_u8(&frame, &mut pos)?;
        let timestamp = if format > 0 {
            Some(take_i64(&frame, &mut pos)?)
        } else {
            None
        };
        let key = take_field(&frame, &mut pos)?;
        let payload = take_field(&frame, &mut pos)?;

        Ok(Record {
            format,
            attributes,
            timestamp,
            key,
            payload,
        })
    }
}

fn encode_field(buf: &mut BytesMut, field: Option<&[u8]>) {
    match field {
        None => buf.extend_from_slice(&NULL_LEN.to_be_bytes()),
        Some(bytes) => {
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
    }
}

fn take_u8(frame: &Bytes, pos: &mut usize) -> Result<u8, LogError> {
    if *pos >= frame.len() {
        return Err(LogError::UnexpectedEof);
    }
    let v = frame[*pos];
    *pos += 1;
    Ok(v)
}

fn take_i64(frame: &Bytes, pos: &mut usize) -> Result<i64, LogError> {
    if frame.len() < *pos + 8 {
        return Err(LogError::UnexpectedEof);
    }
    let v = i64::from_be_bytes(frame[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

fn take_u32(frame: &Bytes, pos: &mut usize) -> Result<u32, LogError> {
    if frame.len() < *pos + 4 {
        return Err(LogError::UnexpectedEof);
    }
    let v = u32::from_be_bytes(frame[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn take_field(frame: &Bytes, pos: &mut usize) -> Result<Option<Bytes>, LogError> {
    let len = take_u32(frame, pos)?;
    if len == NULL_LEN {
        return Ok(None);
    }
    let len = len as usize;
    if frame.len() < *pos + len {
        return Err(LogError::UnexpectedEof);
    }
    let value = frame.slice(*pos..*pos + len);
    *pos += len;
    Ok(Some(value))
}
