//! Core types and wire protocol for the txflow distributed transaction
//! client.
//!
//! This crate holds everything shared between the client-side transaction
//! machinery and code that speaks the protocol directly: the TLV message
//! codec with its packed-integer encoding, transaction branch identifiers,
//! the XA flag and return-code constants, and the error taxonomy.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod xa;
pub mod xid;

pub use error::{EngineError, Result, TransactionError, XaError, XaErrorKind};
pub use xid::SimpleXid;
