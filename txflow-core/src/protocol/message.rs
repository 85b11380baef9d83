//! Wire message encoding and decoding.
//!
//! A message is a big-endian `u16` request id, an opcode byte, and zero
//! or more TLV parameters: a parameter id byte, a packed-u32 payload
//! length, and the payload. The end of the parameter list is the end of
//! the frame; framing is the transport's concern.
//!
//! Unsigned integer parameters are encoded as the minimal big-endian
//! byte string of the value; zero encodes as an empty payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::packed::{packed_len, read_packed_u32, write_packed_u32};
use crate::error::TransactionError;
use crate::xid::SimpleXid;

/// Builds an outbound request or response message.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    /// Starts a message with the given request id and opcode.
    pub fn new(request_id: u16, opcode: u8) -> Self {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u16(request_id);
        buf.put_u8(opcode);
        Self { buf }
    }

    /// Appends an unsigned integer parameter.
    pub fn put_uint_param(&mut self, id: u8, value: u32) {
        let len = significant_len(value);
        self.buf.put_u8(id);
        write_packed_u32(&mut self.buf, len as u32);
        for i in (0..len).rev() {
            self.buf.put_u8((value >> (i * 8)) as u8);
        }
    }

    /// Appends a zero-length flag parameter.
    pub fn put_flag_param(&mut self, id: u8) {
        self.buf.put_u8(id);
        write_packed_u32(&mut self.buf, 0);
    }

    /// Appends a raw byte-string parameter.
    pub fn put_bytes_param(&mut self, id: u8, payload: &[u8]) {
        self.buf.put_u8(id);
        write_packed_u32(&mut self.buf, payload.len() as u32);
        self.buf.put_slice(payload);
    }

    /// Appends a UTF-8 string parameter.
    pub fn put_str_param(&mut self, id: u8, value: &str) {
        self.put_bytes_param(id, value.as_bytes());
    }

    /// Appends a transaction identifier parameter.
    pub fn put_xid_param(&mut self, id: u8, xid: &SimpleXid) {
        let mut payload = BytesMut::with_capacity(
            packed_len(xid.format_id() as u32) + 1 + xid.global_id().len() + xid.branch_id().len(),
        );
        xid.encode_into(&mut payload);
        self.put_bytes_param(id, &payload);
    }

    /// Finishes the message and returns the wire bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

fn significant_len(value: u32) -> usize {
    (4 - value.leading_zeros() as usize / 8).min(4)
}

/// A fully parsed inbound message.
#[derive(Debug, Clone)]
pub struct WireMessage {
    request_id: u16,
    opcode: u8,
    params: Bytes,
}

impl WireMessage {
    /// Parses a whole frame into request id, opcode and parameter bytes.
    pub fn parse(mut frame: Bytes) -> Result<Self, TransactionError> {
        if frame.len() < 3 {
            return Err(TransactionError::Protocol);
        }
        let request_id = frame.get_u16();
        let opcode = frame.get_u8();
        Ok(Self {
            request_id,
            opcode,
            params: frame,
        })
    }

    /// Returns the request id used for invocation correlation.
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// Returns the opcode.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Returns a reader over the parameter list.
    pub fn params(&self) -> ParamReader {
        ParamReader::new(self.params.clone())
    }
}

/// Iterates the TLV parameters of a message body.
#[derive(Debug)]
pub struct ParamReader {
    buf: Bytes,
}

impl ParamReader {
    /// Creates a reader over raw parameter bytes.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Reads the next parameter, or `None` at the end of the frame.
    ///
    /// Truncated parameters and over-long length encodings fail with a
    /// protocol error.
    pub fn next(&mut self) -> Result<Option<Param>, TransactionError> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }
        let id = self.buf.get_u8();
        let len = read_packed_u32(&mut self.buf)? as usize;
        if self.buf.remaining() < len {
            return Err(TransactionError::Protocol);
        }
        let payload = self.buf.split_to(len);
        Ok(Some(Param { id, payload }))
    }

    /// Drains the remaining parameters, validating their structure.
    pub fn drain(&mut self) -> Result<(), TransactionError> {
        while self.next()?.is_some() {}
        Ok(())
    }
}

/// A single decoded TLV parameter.
#[derive(Debug, Clone)]
pub struct Param {
    id: u8,
    payload: Bytes,
}

impl Param {
    /// Returns the parameter id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload as a big-endian unsigned integer.
    pub fn as_u32(&self) -> Result<u32, TransactionError> {
        if self.payload.len() > 4 {
            return Err(TransactionError::Protocol);
        }
        Ok(self
            .payload
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
    }

    /// Decodes the payload as UTF-8 text.
    pub fn as_str(&self) -> Result<&str, TransactionError> {
        std::str::from_utf8(&self.payload).map_err(|_| TransactionError::Protocol)
    }

    /// Decodes the payload as a transaction identifier.
    pub fn as_xid(&self) -> Result<SimpleXid, TransactionError> {
        SimpleXid::decode(&self.payload)
    }
}
