use std::cell::Cell;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError};
use crate::packet::Packet;

const HEADER_LEN: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FrameHeader {
    packet_type: u32,
    remaining_length: u32,
}

/// Broker wire protocol codec
#[derive(Debug, Clone)]
pub struct Codec {
    state: Cell<DecodeState>,
    max_size: Cell<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DecodeState {
    FrameHeader,
    Frame(FrameHeader),
}

impl Codec {
    /// Create `Codec` instance
    pub fn new(max_frame_size: u32) -> Self {
        Codec { state: Cell::new(DecodeState::FrameHeader), max_size: Cell::new(max_frame_size) }
    }

    /// Set max inbound frame payload size.
    ///
    /// If max size is set to `0`, size is unlimited.
    /// By default max size is set to `0`
    pub fn set_max_size(&mut self, size: u32) {
        self.max_size.set(size);
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        loop {
            match self.state.get() {
                DecodeState::FrameHeader => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let src_slice = src.as_ref();
                    let packet_type =
                        u32::from_be_bytes([src_slice[0], src_slice[1], src_slice[2], src_slice[3]]);
                    let remaining_length =
                        u32::from_be_bytes([src_slice[4], src_slice[5], src_slice[6], src_slice[7]]);
                    // check max frame size
                    let max_size = self.max_size.get();
                    if max_size != 0 && max_size < remaining_length {
                        return Err(DecodeError::MaxSizeExceeded);
                    }
                    src.advance(HEADER_LEN);
                    self.state.set(DecodeState::Frame(FrameHeader { packet_type, remaining_length }));
                    let remaining_length = remaining_length as usize;
                    if src.len() < remaining_length {
                        src.reserve(remaining_length);
                        return Ok(None);
                    }
                }
                DecodeState::Frame(header) => {
                    if src.len() < header.remaining_length as usize {
                        return Ok(None);
                    }
                    let packet_buf = src.split_to(header.remaining_length as usize);
                    let packet = Packet::from_payload(header.packet_type, packet_buf.as_ref())?;
                    self.state.set(DecodeState::FrameHeader);
                    src.reserve(HEADER_LEN);
                    return Ok(Some(packet));
                }
            }
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let payload = item.to_payload()?;
        if payload.len() > u32::MAX as usize {
            return Err(EncodeError::InvalidLength);
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(item.packet_type());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use bytestring::ByteString;

    use crate::packet::{BasicPublishArgs, Response};
    use crate::types::{BasicProperties, Durability};

    #[test]
    fn test_max_size() {
        let mut codec = Codec::default();
        codec.set_max_size(5);

        let mut buf = BytesMut::new();
        buf.put_u32(0x0d);
        buf.put_u32(9);
        assert_eq!(
            codec.decode(&mut buf).map_err(|e| matches!(e, DecodeError::MaxSizeExceeded)),
            Err(true)
        );
    }

    #[test]
    fn test_unknown_type() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(0xff);
        buf.put_u32(0);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::UnsupportedPacketType(0xff))));
    }

    #[test]
    fn test_packet() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();

        let pkt = Packet::BasicPublish(BasicPublishArgs {
            rid: ByteString::from_static("r-1"),
            channel_id: ByteString::from_static("c-1"),
            exchange_name: ByteString::from_static("orders"),
            routing_key: ByteString::from_static("order.created"),
            properties: Some(BasicProperties {
                message_id: ByteString::new(),
                routing_key: ByteString::new(),
                durability: Durability::Persistent,
            }),
            body: Bytes::from(Vec::from("a".repeat(260 * 1024))),
        });
        codec.encode(pkt.clone(), &mut buf).unwrap();

        let pkt2 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(pkt, pkt2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame() {
        let mut codec = Codec::default();
        let mut encoded = BytesMut::new();
        let pkt = Packet::Response(Response {
            rid: ByteString::from_static("r-42"),
            channel_id: ByteString::from_static("c-1"),
            ok: true,
        });
        codec.encode(pkt.clone(), &mut encoded).unwrap();

        // feed the header alone, then the payload in two pieces
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..HEADER_LEN]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mid = HEADER_LEN + (encoded.len() - HEADER_LEN) / 2;
        buf.extend_from_slice(&encoded[HEADER_LEN..mid]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[mid..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), pkt);
    }

    #[test]
    fn test_two_frames_one_buffer() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        let a = Packet::ChannelOpen(crate::packet::ChannelArgs {
            rid: ByteString::from_static("r-1"),
            channel_id: ByteString::from_static("c-1"),
        });
        let b = Packet::ChannelClose(crate::packet::ChannelArgs {
            rid: ByteString::from_static("r-2"),
            channel_id: ByteString::from_static("c-1"),
        });
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
