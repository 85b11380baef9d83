//! The transaction wire protocol: constants, packed integers and TLV
//! message codec.

pub mod constants;
pub mod message;
pub mod packed;

pub use message::{MessageBuilder, Param, ParamReader, WireMessage};
