use std::collections::BTreeMap;
use std::fmt;

use bytestring::ByteString;
use serde::{Deserialize, Serialize};

/// Opaque, string-keyed argument table attached to exchanges and queues.
///
/// The broker stores and returns arguments verbatim; values are never
/// interpreted. Clients that need structured values serialize them into the
/// strings themselves.
pub type Arguments = BTreeMap<String, String>;

/// Exchange routing semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Route to the queue whose name equals the routing key
    Direct = 0,
    /// Route one copy to every bound queue
    Fanout = 1,
    /// Route by matching the routing key against each binding key pattern
    Topic = 2,
}

impl ExchangeKind {
    #[inline]
    pub fn value(&self) -> u8 {
        match self {
            ExchangeKind::Direct => 0,
            ExchangeKind::Fanout => 1,
            ExchangeKind::Topic => 2,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeKind::Direct => write!(f, "direct"),
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Topic => write!(f, "topic"),
        }
    }
}

/// Message durability mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Durability {
    Transient = 1,
    Persistent = 2,
}

impl Durability {
    #[inline]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Durability::Persistent)
    }
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Transient
    }
}

/// Per-message property block carried on the wire and in the durable log.
///
/// `message_id` is assigned by the broker at publish time; a client-supplied
/// value is overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicProperties {
    pub message_id: ByteString,
    pub routing_key: ByteString,
    pub durability: Durability,
}
