//! Tag-length-value codec (X.690 BER subset used by SNMP).
//!
//! Encoding is canonical: definite lengths in minimal form and minimal
//! two's-complement integers. Decoding accepts any valid BER the agents
//! in the wild produce and turns everything else into [`crate::Error::Decode`].

mod decode;
mod encode;
mod length;
pub mod tag;

pub use decode::Decoder;
pub use encode::{EncodeBuf, Mark};
pub use length::{MAX_LENGTH, decode_length, encode_length, length_of_length};
pub use tag::{application, class, context, pdu, universal};
