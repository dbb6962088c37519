//! # Stream Framing
//!
//! Length-prefixed framing for the per-peer byte streams. Each frame is an
//! unsigned LEB128 varint length followed by exactly that many payload
//! bytes. The codec plugs into `FramedRead`/`FramedWrite` so inbound and
//! outbound directions share one implementation.
//!
//! Every stream is independently framed: a reconnect starts a fresh
//! sequence, and frames never straddle streams.
//!
//! ## Security Limits
//!
//! The decoder enforces a frame ceiling (default 1 MiB) and rejects varint
//! prefixes longer than [`MAX_VARINT_LEN`] bytes, so a hostile peer cannot
//! force unbounded buffering from a length prefix alone.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// Default ceiling for a single frame's payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Longest accepted varint prefix (a full u64).
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `dst` as an unsigned LEB128 varint.
pub(crate) fn put_uvarint(dst: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Try to read a varint from the front of `src` without consuming it.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((value, len)))`
/// on success, and an error when the prefix cannot be a valid varint.
pub(crate) fn peek_uvarint(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (i, byte) in src.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(Error::MalformedFrame("varint prefix too long".into()));
        }
        if i == MAX_VARINT_LEN - 1 && *byte > 0x01 {
            return Err(Error::MalformedFrame("varint prefix overflows u64".into()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Varint length-prefix codec over raw payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(MAX_VARINT_LEN + item.len());
        put_uvarint(dst, item.len() as u64);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let (len, prefix) = match peek_uvarint(src)? {
            Some(header) => header,
            None => return Ok(None),
        };
        if len > self.max_frame_len as u64 {
            return Err(Error::MalformedFrame(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_len
            )));
        }
        let len = len as usize;
        if src.len() < prefix + len {
            src.reserve(prefix + len - src.len());
            return Ok(None);
        }
        src.advance(prefix);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::MalformedFrame(
                "stream ended inside a frame".into(),
            )),
        }
    }
}
