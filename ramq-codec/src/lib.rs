#![deny(unsafe_code)]

//! Wire protocol codec for the ramq broker.
//!
//! Every request and response on the wire is a fixed-layout frame:
//! `[4-byte big-endian type][4-byte big-endian length][length bytes of payload]`.
//! Payloads are bincode-encoded argument/result structs; the frame type code
//! selects which struct the payload decodes into. Type codes partition into
//! connection lifecycle (channel open/close), topology declare/delete,
//! publish, consume, ack, and the two server-push frames (delivery and the
//! generic response).
//!
//! The [`Codec`] implements `tokio_util::codec::{Encoder, Decoder}` with a
//! two-phase decode state machine (header, then payload) and a configurable
//! maximum frame size.

/// Error types for encoding/decoding operations
pub mod error;

/// Frame payload definitions and type codes
pub mod packet;

/// Frame encoder/decoder
pub mod codec;

/// Shared wire-level types (exchange kinds, message properties)
pub mod types;

pub use codec::Codec;
pub use packet::Packet;
