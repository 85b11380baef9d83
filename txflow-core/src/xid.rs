//! Transaction branch identifiers.

use std::fmt;

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::TransactionError;
use crate::protocol::packed::{read_packed_u32, write_packed_u32};

/// An XA transaction branch identifier.
///
/// Equality, hashing and ordering are byte-lexicographic across
/// `(format_id, global_id, branch_id)`, which makes the type directly
/// usable as an ordered map or set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleXid {
    format_id: i32,
    global_id: Vec<u8>,
    branch_id: Vec<u8>,
}

impl SimpleXid {
    /// Maximum length of the global transaction id, in bytes.
    pub const MAX_GTRID_SIZE: usize = 64;
    /// Maximum length of the branch qualifier, in bytes.
    pub const MAX_BQUAL_SIZE: usize = 64;

    /// Creates a new transaction identifier.
    ///
    /// # Panics
    ///
    /// Panics if `global_id` or `branch_id` exceeds the XA maximum of
    /// 64 bytes.
    pub fn new(format_id: i32, global_id: &[u8], branch_id: &[u8]) -> Self {
        assert!(
            global_id.len() <= Self::MAX_GTRID_SIZE,
            "global transaction id exceeds maximum size of {} bytes",
            Self::MAX_GTRID_SIZE
        );
        assert!(
            branch_id.len() <= Self::MAX_BQUAL_SIZE,
            "branch qualifier exceeds maximum size of {} bytes",
            Self::MAX_BQUAL_SIZE
        );
        Self {
            format_id,
            global_id: global_id.to_vec(),
            branch_id: branch_id.to_vec(),
        }
    }

    /// The identifier with format id `0` and empty global and branch ids.
    ///
    /// Orders before every other xid with a non-negative format id; used
    /// as the lower bound for range sweeps.
    pub fn empty() -> Self {
        Self {
            format_id: 0,
            global_id: Vec::new(),
            branch_id: Vec::new(),
        }
    }

    /// Generates a fresh identifier with a random global id and no branch.
    pub fn generate(format_id: i32) -> Self {
        let uuid = Uuid::new_v4();
        Self::new(format_id, uuid.as_bytes(), &[])
    }

    /// Returns the format identifier.
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Returns the global transaction id.
    pub fn global_id(&self) -> &[u8] {
        &self.global_id
    }

    /// Returns the branch qualifier.
    pub fn branch_id(&self) -> &[u8] {
        &self.branch_id
    }

    /// Returns `true` if this xid carries a branch qualifier.
    pub fn has_branch(&self) -> bool {
        !self.branch_id.is_empty()
    }

    /// Returns the global transaction id: this xid with the branch
    /// qualifier stripped.
    pub fn without_branch(&self) -> SimpleXid {
        if self.branch_id.is_empty() {
            self.clone()
        } else {
            Self {
                format_id: self.format_id,
                global_id: self.global_id.clone(),
                branch_id: Vec::new(),
            }
        }
    }

    /// Writes the wire form: packed format id, global-id length byte,
    /// global id, then the branch qualifier as the remainder.
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        write_packed_u32(dst, self.format_id as u32);
        dst.put_u8(self.global_id.len() as u8);
        dst.put_slice(&self.global_id);
        dst.put_slice(&self.branch_id);
    }

    /// Parses the wire form produced by [`encode_into`](Self::encode_into).
    pub fn decode(payload: &[u8]) -> Result<SimpleXid, TransactionError> {
        let mut cursor = payload;
        let format_id = read_packed_u32(&mut cursor)? as i32;
        if !cursor.has_remaining() {
            return Err(TransactionError::Protocol);
        }
        let gtrid_len = cursor.get_u8() as usize;
        if gtrid_len > Self::MAX_GTRID_SIZE || cursor.remaining() < gtrid_len {
            return Err(TransactionError::Protocol);
        }
        let global_id = cursor[..gtrid_len].to_vec();
        cursor.advance(gtrid_len);
        if cursor.remaining() > Self::MAX_BQUAL_SIZE {
            return Err(TransactionError::Protocol);
        }
        let branch_id = cursor.to_vec();
        Ok(Self {
            format_id,
            global_id,
            branch_id,
        })
    }
}

impl fmt::Display for SimpleXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid:{:x}:", self.format_id)?;
        for byte in &self.global_id {
            write!(f, "{byte:02x}")?;
        }
        if !self.branch_id.is_empty() {
            write!(f, ":")?;
            for byte in &self.branch_id {
                write!(f, "{byte:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_new_accessors() {
        let xid = SimpleXid::new(0x20000, b"global-id", b"branch-1");
        assert_eq!(xid.format_id(), 0x20000);
        assert_eq!(xid.global_id(), b"global-id");
        assert_eq!(xid.branch_id(), b"branch-1");
        assert!(xid.has_branch());
    }

    #[test]
    fn test_without_branch_strips_qualifier() {
        let xid = SimpleXid::new(1, b"gtid", b"bq");
        let gtid = xid.without_branch();
        assert_eq!(gtid.global_id(), b"gtid");
        assert!(!gtid.has_branch());
        assert_eq!(gtid, gtid.without_branch());
    }

    #[test]
    fn test_gtid_is_shared_key() {
        let a = SimpleXid::new(1, b"gtid", b"branch-a");
        let b = SimpleXid::new(1, b"gtid", b"branch-b");
        assert_ne!(a, b);
        assert_eq!(a.without_branch(), b.without_branch());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = SimpleXid::new(1, b"aaa", b"");
        let b = SimpleXid::new(1, b"aab", b"");
        let c = SimpleXid::new(2, b"aaa", b"");
        let d = SimpleXid::new(1, b"aaa", b"x");
        assert!(a < b);
        assert!(b < c);
        assert!(a < d);
        assert!(d < b);
    }

    #[test]
    fn test_empty_orders_first() {
        let empty = SimpleXid::empty();
        assert!(empty < SimpleXid::new(0, b"", b"\x00"));
        assert!(empty < SimpleXid::new(0, b"\x00", b""));
        assert!(empty < SimpleXid::new(1, b"", b""));
    }

    #[test]
    fn test_generate_is_unique() {
        let a = SimpleXid::generate(0);
        let b = SimpleXid::generate(0);
        assert_ne!(a.global_id(), b.global_id());
        assert!(!a.has_branch());
    }

    #[test]
    fn test_wire_roundtrip() {
        let xid = SimpleXid::new(0x20005, b"a-global-id", b"branch-7");
        let mut buf = BytesMut::new();
        xid.encode_into(&mut buf);
        let decoded = SimpleXid::decode(&buf).unwrap();
        assert_eq!(decoded, xid);
    }

    #[test]
    fn test_wire_roundtrip_no_branch() {
        let xid = SimpleXid::new(0, b"only-global", b"");
        let mut buf = BytesMut::new();
        xid.encode_into(&mut buf);
        assert_eq!(SimpleXid::decode(&buf).unwrap(), xid);
    }

    #[test]
    fn test_decode_truncated_rejected() {
        let xid = SimpleXid::new(7, b"abcdef", b"gh");
        let mut buf = BytesMut::new();
        xid.encode_into(&mut buf);
        assert!(SimpleXid::decode(&buf[..3]).is_err());
        assert!(SimpleXid::decode(&[]).is_err());
    }

    #[test]
    #[should_panic(expected = "global transaction id exceeds maximum size")]
    fn test_oversized_gtrid_panics() {
        let long = vec![0u8; SimpleXid::MAX_GTRID_SIZE + 1];
        SimpleXid::new(0, &long, b"");
    }

    #[test]
    #[should_panic(expected = "branch qualifier exceeds maximum size")]
    fn test_oversized_bqual_panics() {
        let long = vec![0u8; SimpleXid::MAX_BQUAL_SIZE + 1];
        SimpleXid::new(0, b"", &long);
    }

    #[test]
    fn test_display_is_hex() {
        let xid = SimpleXid::new(0x1, &[0xde, 0xad], &[0x01]);
        assert_eq!(xid.to_string(), "xid:1:dead:01");
    }
}
