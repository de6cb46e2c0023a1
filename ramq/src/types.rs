use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::codec::types::{Arguments, BasicProperties, Durability, ExchangeKind};
use crate::codec::Packet;
use crate::utils::{timestamp_millis, TimestampMillis};
use crate::Result;

pub type ExchangeName = bytestring::ByteString;
pub type QueueName = bytestring::ByteString;
pub type RoutingKey = bytestring::ByteString;
pub type BindingKey = bytestring::ByteString;
pub type MessageId = bytestring::ByteString;
pub type ConsumerTag = bytestring::ByteString;
pub type ChannelId = bytestring::ByteString;
pub type ConnectionId = bytestring::ByteString;

///Outbound frame channel of one client connection
pub type Tx = mpsc::UnboundedSender<Packet>;
pub type Rx = mpsc::UnboundedReceiver<Packet>;

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;

/// Named routing rule entry point that messages are published into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: ExchangeName,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

/// Declared attributes of a queue, persisted as-is for durable queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: QueueName,
    pub exclusive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

/// Rule connecting an exchange to a queue via a binding key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub exchange_name: ExchangeName,
    pub queue_name: QueueName,
    pub binding_key: BindingKey,
}

/// One stored copy of a published message.
///
/// `valid` is the logical-delete flag written to the durable log; flipping it
/// from 1 to 0 never changes the bincode record length, which is what makes
/// overwrite-in-place deletion safe. The byte offsets locate the record in the
/// queue data file and are recomputed on load, never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub routing_key: RoutingKey,
    pub durability: Durability,
    pub body: Bytes,
    pub valid: u8,
    #[serde(skip)]
    pub offset_begin: u64,
    #[serde(skip)]
    pub offset_end: u64,
}

impl Message {
    pub fn new(routing_key: RoutingKey, durability: Durability, body: Bytes) -> Self {
        let id = format!(
            "M-{}",
            Uuid::new_v4().as_simple().encode_lower(&mut Uuid::encode_buffer())
        );
        Message {
            id: MessageId::from(id),
            routing_key,
            durability,
            body,
            valid: 1,
            offset_begin: 0,
            offset_end: 0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid == 1
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.durability.is_persistent()
    }

    #[inline]
    pub fn properties(&self) -> BasicProperties {
        BasicProperties {
            message_id: self.id.clone(),
            routing_key: self.routing_key.clone(),
            durability: self.durability,
        }
    }
}

/// Identifies one channel on one client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub conn_id: ConnectionId,
    pub channel_id: ChannelId,
}

impl ChannelKey {
    #[inline]
    pub fn new(conn_id: ConnectionId, channel_id: ChannelId) -> Self {
        ChannelKey { conn_id, channel_id }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.conn_id, self.channel_id)
    }
}

/// Delivery capability of one subscriber, single method, implemented by the
/// session layer per consume request.
#[async_trait]
pub trait Consumer: Sync + Send {
    async fn deliver(
        &self,
        consumer_tag: ConsumerTag,
        properties: BasicProperties,
        body: Bytes,
    ) -> Result<()>;
}

/// One subscription of a consumer to a queue.
#[derive(Clone)]
pub struct ConsumerBinding {
    pub consumer_tag: ConsumerTag,
    pub queue_name: QueueName,
    pub channel: ChannelKey,
    pub auto_ack: bool,
    pub consumer: Arc<dyn Consumer>,
}

impl fmt::Debug for ConsumerBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConsumerBinding")
            .field("consumer_tag", &self.consumer_tag)
            .field("queue_name", &self.queue_name)
            .field("channel", &self.channel)
            .field("auto_ack", &self.auto_ack)
            .finish()
    }
}

/// Delivered-but-unconfirmed bookkeeping entry.
#[derive(Debug, Clone)]
pub struct UnackedEntry {
    pub delivered_at: TimestampMillis,
}

impl UnackedEntry {
    fn new() -> Self {
        UnackedEntry { delivered_at: timestamp_millis() }
    }
}

/// Mutable half of a queue: backlog, unacknowledged set, subscriber list and
/// the round-robin cursor. Guarded by the owning `Queue`'s lock, together with
/// that queue's data and stat files, so memory and disk never observe a torn
/// intermediate state relative to each other.
#[derive(Debug, Default)]
pub struct QueueState {
    pub backlog: VecDeque<MessageId>,
    pub unacked: HashMap<MessageId, UnackedEntry>,
    pub consumers: Vec<ConsumerBinding>,
    pub cursor: usize,
}

impl QueueState {
    #[inline]
    pub fn enqueue(&mut self, id: MessageId) {
        self.backlog.push_back(id);
    }

    #[inline]
    pub fn dequeue_next(&mut self) -> Option<MessageId> {
        self.backlog.pop_front()
    }

    #[inline]
    pub fn requeue_front(&mut self, id: MessageId) {
        self.backlog.push_front(id);
    }

    #[inline]
    pub fn mark_awaiting_ack(&mut self, id: MessageId) {
        self.unacked.insert(id, UnackedEntry::new());
    }

    #[inline]
    pub fn awaiting_ack(&self, id: &str) -> bool {
        self.unacked.contains_key(id)
    }

    #[inline]
    pub fn clear_awaiting_ack(&mut self, id: &str) -> Option<UnackedEntry> {
        self.unacked.remove(id)
    }

    /// Plain round-robin over the subscriber list. The cursor only advances
    /// when a subscriber is returned, so stale dispatch tokens do not skew
    /// fairness.
    pub fn select_next(&mut self) -> Option<ConsumerBinding> {
        if self.consumers.is_empty() {
            return None;
        }
        let picked = self.consumers[self.cursor % self.consumers.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(picked)
    }
}

/// A queue and its lock.
#[derive(Debug)]
pub struct Queue {
    pub info: QueueInfo,
    pub state: Mutex<QueueState>,
}

impl Queue {
    pub fn new(info: QueueInfo) -> Self {
        Queue { info, state: Mutex::new(QueueState::default()) }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }
}
