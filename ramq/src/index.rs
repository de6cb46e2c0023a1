//! In-memory topology and message index.
//!
//! Sharded concurrent maps for exchanges, queues, bindings and the global
//! message map. Lookups are lock-free against one another; compound
//! check-then-act sequences are serialized by the orchestrator's coarse
//! namespace locks, and per-queue mutable state lives behind each queue's own
//! lock.

use std::sync::Arc;

use crate::types::{
    Binding, DashMap, Exchange, ExchangeName, HashMap, Message, MessageId, Queue, QueueInfo,
    QueueName,
};

pub struct MemoryIndex {
    exchanges: DashMap<ExchangeName, Exchange>,
    queues: DashMap<QueueName, Arc<Queue>>,
    // exchange name -> queue name -> binding; at most one binding per pair
    bindings: DashMap<ExchangeName, HashMap<QueueName, Binding>>,
    messages: DashMap<MessageId, Message>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        MemoryIndex {
            exchanges: DashMap::default(),
            queues: DashMap::default(),
            bindings: DashMap::default(),
            messages: DashMap::default(),
        }
    }

    pub fn clear(&self) {
        self.exchanges.clear();
        self.queues.clear();
        self.bindings.clear();
        self.messages.clear();
    }

    pub fn insert_exchange(&self, exchange: Exchange) {
        self.exchanges.insert(exchange.name.clone(), exchange);
    }

    pub fn exchange(&self, name: &str) -> Option<Exchange> {
        self.exchanges.get(name).map(|e| e.value().clone())
    }

    #[inline]
    pub fn exchange_exists(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    pub fn remove_exchange(&self, name: &str) {
        self.exchanges.remove(name);
        self.bindings.remove(name);
    }

    pub fn insert_queue(&self, info: QueueInfo) -> Arc<Queue> {
        let queue = Arc::new(Queue::new(info));
        self.queues.insert(queue.info.name.clone(), queue.clone());
        queue
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| q.value().clone())
    }

    pub fn remove_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.remove(name).map(|(_, q)| q)
    }

    pub fn all_queues(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|item| item.value().clone()).collect()
    }

    pub fn insert_binding(&self, binding: Binding) {
        self.bindings
            .entry(binding.exchange_name.clone())
            .or_default()
            .insert(binding.queue_name.clone(), binding);
    }

    pub fn binding(&self, exchange_name: &str, queue_name: &str) -> Option<Binding> {
        self.bindings.get(exchange_name).and_then(|m| m.get(queue_name).cloned())
    }

    pub fn remove_binding(&self, exchange_name: &str, queue_name: &str) {
        if let Some(mut m) = self.bindings.get_mut(exchange_name) {
            m.remove(queue_name);
        }
    }

    /// All bindings declared on one exchange.
    pub fn exchange_bindings(&self, exchange_name: &str) -> Vec<Binding> {
        self.bindings
            .get(exchange_name)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All bindings referencing one queue, across exchanges.
    pub fn queue_bindings(&self, queue_name: &str) -> Vec<Binding> {
        self.bindings
            .iter()
            .flat_map(|entry| entry.value().get(queue_name).cloned())
            .collect()
    }

    pub fn insert_message(&self, message: Message) {
        self.messages.insert(message.id.clone(), message);
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.messages.get(id).map(|m| m.value().clone())
    }

    pub fn remove_message(&self, id: &str) -> Option<Message> {
        self.messages.remove(id).map(|(_, m)| m)
    }

    /// Rewrites the stored offsets of messages that survived a compaction.
    pub fn refresh_offsets(&self, compacted: &[Message]) {
        for message in compacted {
            if let Some(mut entry) = self.messages.get_mut(&message.id) {
                entry.offset_begin = message.offset_begin;
                entry.offset_end = message.offset_end;
            }
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::types::{Arguments, Durability, ExchangeKind};
    use bytes::Bytes;

    fn queue_info(name: &str) -> QueueInfo {
        QueueInfo {
            name: name.into(),
            exclusive: false,
            durable: false,
            auto_delete: false,
            arguments: Arguments::default(),
        }
    }

    #[test]
    fn test_exchange_index() {
        let index = MemoryIndex::new();
        index.insert_exchange(Exchange {
            name: "ex1".into(),
            kind: ExchangeKind::Fanout,
            durable: false,
            auto_delete: false,
            arguments: Arguments::default(),
        });
        assert!(index.exchange_exists("ex1"));
        assert_eq!(index.exchange("ex1").unwrap().kind, ExchangeKind::Fanout);
        index.remove_exchange("ex1");
        assert!(index.exchange("ex1").is_none());
    }

    #[test]
    fn test_binding_index() {
        let index = MemoryIndex::new();
        for q in ["q1", "q2"] {
            index.insert_binding(Binding {
                exchange_name: "ex1".into(),
                queue_name: q.into(),
                binding_key: "k".into(),
            });
        }
        index.insert_binding(Binding {
            exchange_name: "ex2".into(),
            queue_name: "q1".into(),
            binding_key: "k2".into(),
        });

        assert_eq!(index.exchange_bindings("ex1").len(), 2);
        assert_eq!(index.queue_bindings("q1").len(), 2);
        assert!(index.binding("ex1", "q2").is_some());

        index.remove_binding("ex1", "q2");
        assert!(index.binding("ex1", "q2").is_none());
        assert_eq!(index.exchange_bindings("ex1").len(), 1);

        // removing the exchange drops its binding map
        index.remove_exchange("ex1");
        assert!(index.exchange_bindings("ex1").is_empty());
        assert_eq!(index.queue_bindings("q1").len(), 1);
    }

    #[test]
    fn test_message_offsets_refresh() {
        let index = MemoryIndex::new();
        let mut m = Message::new("k".into(), Durability::Persistent, Bytes::from_static(b"x"));
        m.offset_begin = 100;
        m.offset_end = 150;
        index.insert_message(m.clone());

        m.offset_begin = 4;
        m.offset_end = 54;
        index.refresh_offsets(&[m.clone()]);
        let got = index.message(&m.id).unwrap();
        assert_eq!(got.offset_begin, 4);
        assert_eq!(got.offset_end, 54);

        assert!(index.remove_message(&m.id).is_some());
        assert!(index.remove_message(&m.id).is_none());
    }

    #[test]
    fn test_queue_index() {
        let index = MemoryIndex::new();
        index.insert_queue(queue_info("q1"));
        assert!(index.queue("q1").is_some());
        assert_eq!(index.all_queues().len(), 1);
        assert!(index.remove_queue("q1").is_some());
        assert!(index.queue("q1").is_none());
    }
}
