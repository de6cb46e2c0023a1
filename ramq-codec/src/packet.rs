use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::types::{Arguments, BasicProperties, ExchangeKind};

pub(crate) mod packet_type {
    pub(crate) const CHANNEL_OPEN: u32 = 0x01;
    pub(crate) const CHANNEL_CLOSE: u32 = 0x02;
    pub(crate) const EXCHANGE_DECLARE: u32 = 0x03;
    pub(crate) const EXCHANGE_DELETE: u32 = 0x04;
    pub(crate) const QUEUE_DECLARE: u32 = 0x05;
    pub(crate) const QUEUE_DELETE: u32 = 0x06;
    pub(crate) const QUEUE_BIND: u32 = 0x07;
    pub(crate) const QUEUE_UNBIND: u32 = 0x08;
    pub(crate) const BASIC_PUBLISH: u32 = 0x09;
    pub(crate) const BASIC_CONSUME: u32 = 0x0a;
    pub(crate) const BASIC_ACK: u32 = 0x0b;
    pub(crate) const DELIVERY: u32 = 0x0c;
    pub(crate) const RESPONSE: u32 = 0x0d;
}

/// Channel lifecycle arguments (open/close)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDeclareArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub exchange_name: ByteString,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDeleteArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub exchange_name: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclareArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub queue_name: ByteString,
    pub exclusive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeleteArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub queue_name: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBindArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub exchange_name: ByteString,
    pub queue_name: ByteString,
    pub binding_key: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUnbindArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub exchange_name: ByteString,
    pub queue_name: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicPublishArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub exchange_name: ByteString,
    pub routing_key: ByteString,
    /// Client-supplied properties; the broker assigns the message id and
    /// overwrites the routing key, only the durability mode is honored.
    pub properties: Option<BasicProperties>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConsumeArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub consumer_tag: ByteString,
    pub queue_name: ByteString,
    pub auto_ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAckArgs {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub queue_name: ByteString,
    pub message_id: ByteString,
}

/// Server-push frame carrying one message to a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub consumer_tag: ByteString,
    pub properties: BasicProperties,
    pub body: Bytes,
}

/// Generic response to any client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub rid: ByteString,
    pub channel_id: ByteString,
    pub ok: bool,
}

/// One decoded wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ChannelOpen(ChannelArgs),
    ChannelClose(ChannelArgs),
    ExchangeDeclare(ExchangeDeclareArgs),
    ExchangeDelete(ExchangeDeleteArgs),
    QueueDeclare(QueueDeclareArgs),
    QueueDelete(QueueDeleteArgs),
    QueueBind(QueueBindArgs),
    QueueUnbind(QueueUnbindArgs),
    BasicPublish(BasicPublishArgs),
    BasicConsume(BasicConsumeArgs),
    BasicAck(BasicAckArgs),
    Delivery(Delivery),
    Response(Response),
}

impl Packet {
    /// Frame type code this packet encodes to
    #[inline]
    pub fn packet_type(&self) -> u32 {
        match self {
            Packet::ChannelOpen(_) => packet_type::CHANNEL_OPEN,
            Packet::ChannelClose(_) => packet_type::CHANNEL_CLOSE,
            Packet::ExchangeDeclare(_) => packet_type::EXCHANGE_DECLARE,
            Packet::ExchangeDelete(_) => packet_type::EXCHANGE_DELETE,
            Packet::QueueDeclare(_) => packet_type::QUEUE_DECLARE,
            Packet::QueueDelete(_) => packet_type::QUEUE_DELETE,
            Packet::QueueBind(_) => packet_type::QUEUE_BIND,
            Packet::QueueUnbind(_) => packet_type::QUEUE_UNBIND,
            Packet::BasicPublish(_) => packet_type::BASIC_PUBLISH,
            Packet::BasicConsume(_) => packet_type::BASIC_CONSUME,
            Packet::BasicAck(_) => packet_type::BASIC_ACK,
            Packet::Delivery(_) => packet_type::DELIVERY,
            Packet::Response(_) => packet_type::RESPONSE,
        }
    }

    /// Request id carried by the payload, if the frame is a client request
    #[inline]
    pub fn rid(&self) -> Option<&ByteString> {
        match self {
            Packet::ChannelOpen(args) | Packet::ChannelClose(args) => Some(&args.rid),
            Packet::ExchangeDeclare(args) => Some(&args.rid),
            Packet::ExchangeDelete(args) => Some(&args.rid),
            Packet::QueueDeclare(args) => Some(&args.rid),
            Packet::QueueDelete(args) => Some(&args.rid),
            Packet::QueueBind(args) => Some(&args.rid),
            Packet::QueueUnbind(args) => Some(&args.rid),
            Packet::BasicPublish(args) => Some(&args.rid),
            Packet::BasicConsume(args) => Some(&args.rid),
            Packet::BasicAck(args) => Some(&args.rid),
            Packet::Delivery(_) | Packet::Response(_) => None,
        }
    }

    /// Channel the frame belongs to, if the frame is a client request
    #[inline]
    pub fn channel_id(&self) -> Option<&ByteString> {
        match self {
            Packet::ChannelOpen(args) | Packet::ChannelClose(args) => Some(&args.channel_id),
            Packet::ExchangeDeclare(args) => Some(&args.channel_id),
            Packet::ExchangeDelete(args) => Some(&args.channel_id),
            Packet::QueueDeclare(args) => Some(&args.channel_id),
            Packet::QueueDelete(args) => Some(&args.channel_id),
            Packet::QueueBind(args) => Some(&args.channel_id),
            Packet::QueueUnbind(args) => Some(&args.channel_id),
            Packet::BasicPublish(args) => Some(&args.channel_id),
            Packet::BasicConsume(args) => Some(&args.channel_id),
            Packet::BasicAck(args) => Some(&args.channel_id),
            Packet::Delivery(_) | Packet::Response(_) => None,
        }
    }

    pub(crate) fn to_payload(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = match self {
            Packet::ChannelOpen(args) | Packet::ChannelClose(args) => bincode::serialize(args),
            Packet::ExchangeDeclare(args) => bincode::serialize(args),
            Packet::ExchangeDelete(args) => bincode::serialize(args),
            Packet::QueueDeclare(args) => bincode::serialize(args),
            Packet::QueueDelete(args) => bincode::serialize(args),
            Packet::QueueBind(args) => bincode::serialize(args),
            Packet::QueueUnbind(args) => bincode::serialize(args),
            Packet::BasicPublish(args) => bincode::serialize(args),
            Packet::BasicConsume(args) => bincode::serialize(args),
            Packet::BasicAck(args) => bincode::serialize(args),
            Packet::Delivery(d) => bincode::serialize(d),
            Packet::Response(r) => bincode::serialize(r),
        };
        payload.map_err(|_| EncodeError::MalformedPacket)
    }

    pub(crate) fn from_payload(packet_type: u32, payload: &[u8]) -> Result<Packet, DecodeError> {
        let packet = match packet_type {
            packet_type::CHANNEL_OPEN => Packet::ChannelOpen(deserialize(payload)?),
            packet_type::CHANNEL_CLOSE => Packet::ChannelClose(deserialize(payload)?),
            packet_type::EXCHANGE_DECLARE => Packet::ExchangeDeclare(deserialize(payload)?),
            packet_type::EXCHANGE_DELETE => Packet::ExchangeDelete(deserialize(payload)?),
            packet_type::QUEUE_DECLARE => Packet::QueueDeclare(deserialize(payload)?),
            packet_type::QUEUE_DELETE => Packet::QueueDelete(deserialize(payload)?),
            packet_type::QUEUE_BIND => Packet::QueueBind(deserialize(payload)?),
            packet_type::QUEUE_UNBIND => Packet::QueueUnbind(deserialize(payload)?),
            packet_type::BASIC_PUBLISH => Packet::BasicPublish(deserialize(payload)?),
            packet_type::BASIC_CONSUME => Packet::BasicConsume(deserialize(payload)?),
            packet_type::BASIC_ACK => Packet::BasicAck(deserialize(payload)?),
            packet_type::DELIVERY => Packet::Delivery(deserialize(payload)?),
            packet_type::RESPONSE => Packet::Response(deserialize(payload)?),
            other => return Err(DecodeError::UnsupportedPacketType(other)),
        };
        Ok(packet)
    }
}

#[inline]
fn deserialize<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, DecodeError> {
    bincode::deserialize(payload).map_err(|_| DecodeError::MalformedPacket)
}
