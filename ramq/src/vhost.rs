//! Virtual host orchestrator.
//!
//! Owns the topology/message index, the metadata store, the per-queue durable
//! logs and the dispatch channel, and exposes the broker operations the
//! session layer calls. Exchange and queue namespaces are serialized by two
//! coarse locks; operations that touch both always take the exchange lock
//! first. Per-queue backlog/unacked/subscriber state is guarded by each
//! queue's own lock, shared with that queue's data and stat files.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use rust_box::task_exec_queue::TaskExecQueue;
use tokio::sync::{mpsc, Mutex};

use crate::codec::types::{Arguments, BasicProperties, ExchangeKind};
use crate::dispatcher::{self, DispatchRx, DispatchTx};
use crate::index::MemoryIndex;
use crate::key;
use crate::metastore::MetaStore;
use crate::msglog::MessageLog;
use crate::net::BrokerError;
use crate::types::{Binding, ChannelKey, Consumer, Exchange, Message, Queue, QueueInfo};
use crate::Result;

#[derive(Clone)]
pub struct VirtualHost {
    inner: Arc<VirtualHostInner>,
}

impl Deref for VirtualHost {
    type Target = VirtualHostInner;
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

pub struct VirtualHostInner {
    pub name: String,
    pub(crate) index: MemoryIndex,
    pub(crate) exec: TaskExecQueue,
    meta: Box<dyn MetaStore>,
    msglog: MessageLog,
    exchanges_lock: Mutex<()>,
    queues_lock: Mutex<()>,
    dispatch_tx: DispatchTx,
    dispatch_rx: parking_lot::Mutex<Option<DispatchRx>>,
}

impl VirtualHost {
    /// The durable logs of this host live under `<data_dir>/<name>/`, one
    /// directory per queue; queue and exchange names never contain path
    /// separators, the key grammar sees to that.
    pub fn new(name: &str, data_dir: &str, meta: Box<dyn MetaStore>, exec: TaskExecQueue) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        VirtualHost {
            inner: Arc::new(VirtualHostInner {
                name: name.into(),
                index: MemoryIndex::new(),
                exec,
                meta,
                msglog: MessageLog::new(Path::new(data_dir).join(name)),
                exchanges_lock: Mutex::new(()),
                queues_lock: Mutex::new(()),
                dispatch_tx,
                dispatch_rx: parking_lot::Mutex::new(Some(dispatch_rx)),
            }),
        }
    }

    /// Spawns the dispatch loop. Called once, after recovery; tokens sent
    /// earlier stay buffered until then.
    pub fn start_dispatch(&self) {
        if let Some(rx) = self.dispatch_rx.lock().take() {
            tokio::spawn(dispatcher::dispatch_loop(self.clone(), rx));
        }
    }

    /// Rebuilds the index from the metadata store and reloads every durable
    /// queue's backlog from its log. Messages that were delivered but not
    /// acknowledged before the restart come back as ordinary backlog: the
    /// unacknowledged set is deliberately not persisted.
    pub async fn recover(&self) -> Result<()> {
        self.meta.init().await?;
        self.index.clear();

        for exchange in self.meta.exchanges().await? {
            self.index.insert_exchange(exchange);
        }

        let mut restored = 0usize;
        for info in self.meta.queues().await? {
            let durable = info.durable;
            let name = info.name.clone();
            let queue = self.index.insert_queue(info);
            if durable {
                self.msglog.create_queue_files(&name)?;
                let messages = self.msglog.load_all(&name)?;
                let mut state = queue.state.lock().await;
                for message in messages {
                    state.enqueue(message.id.clone());
                    self.index.insert_message(message);
                    restored += 1;
                }
            }
        }

        for binding in self.meta.bindings().await? {
            self.index.insert_binding(binding);
        }

        // the nameless direct exchange every publisher can rely on
        if !self.index.exchange_exists("") {
            self.exchange_declare("", ExchangeKind::Direct, true, false, Arguments::default())
                .await?;
        }

        log::info!("virtual host '{}' recovered, {} messages restored", self.name, restored);
        Ok(())
    }

    pub async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        auto_delete: bool,
        arguments: Arguments,
    ) -> Result<()> {
        // the empty name is reserved for the default exchange
        if !name.is_empty() && !key::validate_routing_key(name) {
            return Err(BrokerError::InvalidArgument(format!("exchange name '{}'", name)).into());
        }
        let _guard = self.exchanges_lock.lock().await;
        if self.index.exchange_exists(name) {
            log::debug!("exchange '{}' already exists", name);
            return Ok(());
        }
        let exchange =
            Exchange { name: name.into(), kind, durable, auto_delete, arguments };
        if durable {
            self.meta.insert_exchange(exchange.clone()).await?;
        }
        self.index.insert_exchange(exchange);
        log::info!("exchange '{}' declared, kind: {}", name, kind);
        Ok(())
    }

    pub async fn exchange_delete(&self, name: &str) -> Result<()> {
        let _eguard = self.exchanges_lock.lock().await;
        let _qguard = self.queues_lock.lock().await;
        let Some(exchange) = self.index.exchange(name) else {
            log::debug!("exchange '{}' does not exist", name);
            return Ok(());
        };
        // bindings die with their exchange
        for binding in self.index.exchange_bindings(name) {
            self.meta.remove_binding(&binding.exchange_name, &binding.queue_name).await?;
        }
        if exchange.durable {
            self.meta.remove_exchange(name).await?;
        }
        self.index.remove_exchange(name);
        log::info!("exchange '{}' deleted", name);
        Ok(())
    }

    pub async fn queue_declare(
        &self,
        name: &str,
        exclusive: bool,
        durable: bool,
        auto_delete: bool,
        arguments: Arguments,
    ) -> Result<()> {
        if name.is_empty() || !key::validate_routing_key(name) {
            return Err(BrokerError::InvalidArgument(format!("queue name '{}'", name)).into());
        }
        let _guard = self.queues_lock.lock().await;
        if self.index.queue(name).is_some() {
            log::debug!("queue '{}' already exists", name);
            return Ok(());
        }
        let info = QueueInfo { name: name.into(), exclusive, durable, auto_delete, arguments };
        if durable {
            self.meta.insert_queue(info.clone()).await?;
            self.msglog.create_queue_files(name)?;
        }
        self.index.insert_queue(info);
        log::info!("queue '{}' declared, durable: {}", name, durable);
        Ok(())
    }

    pub async fn queue_delete(&self, name: &str) -> Result<()> {
        let _eguard = self.exchanges_lock.lock().await;
        let _qguard = self.queues_lock.lock().await;
        let Some(queue) = self.index.queue(name) else {
            log::debug!("queue '{}' does not exist", name);
            return Ok(());
        };
        for binding in self.index.queue_bindings(name) {
            self.meta.remove_binding(&binding.exchange_name, &binding.queue_name).await?;
            self.index.remove_binding(&binding.exchange_name, &binding.queue_name);
        }

        let mut state = queue.state.lock().await;
        for id in state.backlog.drain(..) {
            self.index.remove_message(&id);
        }
        for id in state.unacked.drain().map(|(id, _)| id) {
            self.index.remove_message(&id);
        }
        state.consumers.clear();

        if queue.info.durable {
            self.meta.remove_queue(name).await?;
            self.msglog.remove_queue_files(name)?;
        }
        self.index.remove_queue(name);
        log::info!("queue '{}' deleted", name);
        Ok(())
    }

    pub async fn queue_bind(
        &self,
        exchange_name: &str,
        queue_name: &str,
        binding_key: &str,
    ) -> Result<()> {
        let _eguard = self.exchanges_lock.lock().await;
        let _qguard = self.queues_lock.lock().await;
        if self.index.binding(exchange_name, queue_name).is_some() {
            log::debug!("binding '{}' -> '{}' already exists", exchange_name, queue_name);
            return Ok(());
        }
        if !key::validate_binding_key(binding_key) {
            return Err(
                BrokerError::InvalidArgument(format!("binding key '{}'", binding_key)).into()
            );
        }
        let Some(exchange) = self.index.exchange(exchange_name) else {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange_name)).into());
        };
        let Some(queue) = self.index.queue(queue_name) else {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue_name)).into());
        };

        let binding = Binding {
            exchange_name: exchange_name.into(),
            queue_name: queue_name.into(),
            binding_key: binding_key.into(),
        };
        if exchange.durable && queue.info.durable {
            self.meta.insert_binding(binding.clone()).await?;
        }
        self.index.insert_binding(binding);
        log::info!(
            "binding '{}' -> '{}' declared, key: '{}'",
            exchange_name,
            queue_name,
            binding_key
        );
        Ok(())
    }

    pub async fn queue_unbind(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        let _eguard = self.exchanges_lock.lock().await;
        let _qguard = self.queues_lock.lock().await;
        if self.index.binding(exchange_name, queue_name).is_none() {
            log::debug!("binding '{}' -> '{}' does not exist", exchange_name, queue_name);
            return Ok(());
        }
        // store removal is harmless for bindings that were never persisted
        self.meta.remove_binding(exchange_name, queue_name).await?;
        self.index.remove_binding(exchange_name, queue_name);
        Ok(())
    }

    /// Validates the routing key, resolves targets and runs
    /// append -> enqueue -> notify per target copy. A target that vanished
    /// since resolution is skipped with a warning; the first I/O failure
    /// aborts the whole call, copies already enqueued stay.
    pub async fn basic_publish(
        &self,
        exchange_name: &str,
        routing_key: &str,
        properties: Option<BasicProperties>,
        body: Bytes,
    ) -> Result<()> {
        if !key::validate_routing_key(routing_key) {
            return Err(
                BrokerError::InvalidArgument(format!("routing key '{}'", routing_key)).into()
            );
        }
        let Some(exchange) = self.index.exchange(exchange_name) else {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange_name)).into());
        };
        let bindings = self.index.exchange_bindings(exchange_name);
        let targets = crate::router::resolve_targets(&exchange, &bindings, routing_key);
        if targets.is_empty() {
            return Err(BrokerError::NoRoute(routing_key.into()).into());
        }
        let durability = properties.map(|p| p.durability).unwrap_or_default();

        let mut delivered = 0usize;
        for target in targets {
            let Some(queue) = self.index.queue(&target) else {
                log::warn!("queue '{}' no longer exists, routing key: '{}'", target, routing_key);
                continue;
            };
            let mut message = Message::new(routing_key.into(), durability, body.clone());
            {
                let mut state = queue.state.lock().await;
                if message.is_persistent() && queue.info.durable {
                    self.msglog.append(queue.name(), &mut message)?;
                }
                state.enqueue(message.id.clone());
                self.index.insert_message(message);
            }
            self.notify(&queue, 1);
            delivered += 1;
        }
        if delivered == 0 {
            return Err(BrokerError::NoRoute(routing_key.into()).into());
        }
        Ok(())
    }

    /// Confirms one delivery. Fails when the queue is unknown, or when the
    /// message is unknown or not awaiting acknowledgment, so acking the same
    /// id twice reports a failure the second time instead of corrupting the
    /// log.
    pub async fn basic_ack(&self, queue_name: &str, message_id: &str) -> Result<()> {
        let Some(queue) = self.index.queue(queue_name) else {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue_name)).into());
        };
        let mut state = queue.state.lock().await;
        if !state.awaiting_ack(message_id) {
            return Err(BrokerError::AlreadyAcknowledged(message_id.into()).into());
        }
        let Some(message) = self.index.message(message_id) else {
            return Err(BrokerError::AlreadyAcknowledged(message_id.into()).into());
        };
        if message.is_persistent() && queue.info.durable {
            self.msglog.mark_deleted(queue.name(), &message)?;
            self.maybe_compact(queue.name());
        }
        self.index.remove_message(message_id);
        if let Some(entry) = state.clear_awaiting_ack(message_id) {
            log::debug!(
                "message '{}' acked on queue '{}' after {}ms",
                message_id,
                queue_name,
                crate::utils::timestamp_millis() - entry.delivered_at
            );
        }
        Ok(())
    }

    /// Adds a subscriber and issues one dispatch token per message already
    /// in the backlog, so a new consumer is not left waiting for the next
    /// publish.
    pub async fn basic_consume(
        &self,
        channel: ChannelKey,
        consumer_tag: &str,
        queue_name: &str,
        auto_ack: bool,
        consumer: Arc<dyn Consumer>,
    ) -> Result<()> {
        let Some(queue) = self.index.queue(queue_name) else {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue_name)).into());
        };
        let mut state = queue.state.lock().await;
        state.consumers.push(crate::types::ConsumerBinding {
            consumer_tag: consumer_tag.into(),
            queue_name: queue.info.name.clone(),
            channel,
            auto_ack,
            consumer,
        });
        let backlog = state.backlog.len();
        self.notify(&queue, backlog);
        log::info!(
            "consumer '{}' subscribed to queue '{}', backlog: {}",
            consumer_tag,
            queue_name,
            backlog
        );
        Ok(())
    }

    /// Drops every subscription registered by one channel, called on channel
    /// close and on connection teardown.
    pub async fn remove_channel_consumers(&self, channel: &ChannelKey) {
        let mut removed = 0usize;
        for queue in self.index.all_queues() {
            let mut state = queue.state.lock().await;
            let before = state.consumers.len();
            state.consumers.retain(|c| &c.channel != channel);
            removed += before - state.consumers.len();
        }
        if removed > 0 {
            log::info!("channel '{}' released {} consumer(s)", channel, removed);
        }
    }

    fn notify(&self, queue: &Queue, tokens: usize) {
        for _ in 0..tokens {
            if self.dispatch_tx.send(queue.info.name.clone()).is_err() {
                log::warn!("dispatch channel closed, queue: {}", queue.name());
                return;
            }
        }
    }

    /// Compaction rides the delete path; a failed attempt leaves the
    /// uncompacted file valid and is retried on a later delete.
    fn maybe_compact(&self, queue_name: &str) {
        match self.msglog.should_compact(queue_name) {
            Ok(true) => match self.msglog.compact(queue_name) {
                Ok(compacted) => self.index.refresh_offsets(&compacted),
                Err(e) => log::warn!("queue '{}' compaction failed, {:?}", queue_name, e),
            },
            Ok(false) => {}
            Err(e) => log::warn!("queue '{}' compaction check failed, {:?}", queue_name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::deliver_one;
    use crate::metastore::DefaultMetaStore;
    use crate::types::{ConsumerTag, MessageId};
    use async_trait::async_trait;
    use rust_box::task_exec_queue::Builder;
    use std::path::Path;

    struct Collector {
        deliveries: Arc<Mutex<Vec<(ConsumerTag, MessageId, Bytes)>>>,
    }

    impl Collector {
        fn new() -> (Arc<Self>, Arc<Mutex<Vec<(ConsumerTag, MessageId, Bytes)>>>) {
            let deliveries = Arc::new(Mutex::new(Vec::new()));
            (Arc::new(Collector { deliveries: deliveries.clone() }), deliveries)
        }
    }

    #[async_trait]
    impl Consumer for Collector {
        async fn deliver(
            &self,
            consumer_tag: ConsumerTag,
            properties: BasicProperties,
            body: Bytes,
        ) -> Result<()> {
            self.deliveries.lock().await.push((consumer_tag, properties.message_id, body));
            Ok(())
        }
    }

    fn channel(n: &str) -> ChannelKey {
        ChannelKey::new("conn1".into(), n.into())
    }

    // dispatch stays unstarted so tests drive deliver_one deterministically
    async fn new_vhost(dir: &Path) -> VirtualHost {
        let (exec, runner) = Builder::default().workers(2).queue_max(1000).build();
        tokio::spawn(async move {
            runner.await;
        });
        let vhost = VirtualHost::new(
            "default",
            dir.to_str().unwrap(),
            Box::new(DefaultMetaStore::new(dir)),
            exec,
        );
        vhost.recover().await.unwrap();
        vhost
    }

    async fn declare_queue(vhost: &VirtualHost, name: &str, durable: bool) {
        vhost.queue_declare(name, false, durable, false, Arguments::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_default_exchange_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        let ex = vhost.index.exchange("").unwrap();
        assert_eq!(ex.kind, ExchangeKind::Direct);
        assert!(ex.durable);
    }

    #[tokio::test]
    async fn test_declare_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;

        for _ in 0..2 {
            vhost
                .exchange_declare("ex1", ExchangeKind::Topic, false, false, Arguments::default())
                .await
                .unwrap();
            declare_queue(&vhost, "q1", false).await;
            vhost.queue_bind("ex1", "q1", "a.#").await.unwrap();
        }
        assert_eq!(vhost.index.exchange_bindings("ex1").len(), 1);

        // deletes of missing resources are no-ops
        vhost.exchange_delete("ex9").await.unwrap();
        vhost.queue_delete("q9").await.unwrap();
        vhost.queue_unbind("ex9", "q9").await.unwrap();
    }

    #[tokio::test]
    async fn test_name_and_key_validation() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;

        assert!(vhost
            .exchange_declare("bad name", ExchangeKind::Direct, false, false, Arguments::default())
            .await
            .is_err());
        assert!(vhost
            .queue_declare("", false, false, false, Arguments::default())
            .await
            .is_err());
        assert!(vhost
            .queue_declare("../escape", false, false, false, Arguments::default())
            .await
            .is_err());

        vhost
            .exchange_declare("ex1", ExchangeKind::Topic, false, false, Arguments::default())
            .await
            .unwrap();
        declare_queue(&vhost, "q1", false).await;
        assert!(vhost.queue_bind("ex1", "q1", "a.#.#").await.is_err());
        assert!(vhost.queue_bind("ex9", "q1", "a").await.is_err());
        assert!(vhost.queue_bind("ex1", "q9", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_publish_no_route() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;

        // default direct exchange, no queue with that name
        assert!(vhost.basic_publish("", "nowhere", None, Bytes::from_static(b"x")).await.is_err());

        vhost
            .exchange_declare("ex1", ExchangeKind::Topic, false, false, Arguments::default())
            .await
            .unwrap();
        assert!(vhost
            .basic_publish("ex1", "a.b", None, Bytes::from_static(b"x"))
            .await
            .is_err());

        assert!(vhost
            .basic_publish("missing", "a.b", None, Bytes::from_static(b"x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_fifo_delivery_after_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        declare_queue(&vhost, "q1", false).await;

        for body in ["m1", "m2", "m3"] {
            vhost.basic_publish("", "q1", None, Bytes::from(body.to_owned())).await.unwrap();
        }

        // tokens issued before anyone subscribed leave the backlog intact
        deliver_one(&vhost, "q1").await.unwrap();
        assert_eq!(vhost.index.queue("q1").unwrap().state.lock().await.backlog.len(), 3);

        let (collector, deliveries) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", true, collector).await.unwrap();
        for _ in 0..3 {
            deliver_one(&vhost, "q1").await.unwrap();
        }

        let got = deliveries.lock().await;
        let bodies: Vec<&[u8]> = got.iter().map(|(_, _, b)| b.as_ref()).collect();
        assert_eq!(bodies, vec![b"m1".as_ref(), b"m2".as_ref(), b"m3".as_ref()]);
    }

    #[tokio::test]
    async fn test_round_robin_selection() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        declare_queue(&vhost, "q1", false).await;

        let (c1, d1) = Collector::new();
        let (c2, d2) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", true, c1).await.unwrap();
        vhost.basic_consume(channel("ch2"), "c2", "q1", true, c2).await.unwrap();

        for body in ["m1", "m2", "m3", "m4"] {
            vhost.basic_publish("", "q1", None, Bytes::from(body.to_owned())).await.unwrap();
            deliver_one(&vhost, "q1").await.unwrap();
        }

        let got1 = d1.lock().await;
        let got2 = d2.lock().await;
        let bodies1: Vec<&[u8]> = got1.iter().map(|(_, _, b)| b.as_ref()).collect();
        let bodies2: Vec<&[u8]> = got2.iter().map(|(_, _, b)| b.as_ref()).collect();
        assert_eq!(bodies1, vec![b"m1".as_ref(), b"m3".as_ref()]);
        assert_eq!(bodies2, vec![b"m2".as_ref(), b"m4".as_ref()]);
    }

    #[tokio::test]
    async fn test_fanout_and_topic_routing() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        vhost
            .exchange_declare("fan", ExchangeKind::Fanout, false, false, Arguments::default())
            .await
            .unwrap();
        vhost
            .exchange_declare("top", ExchangeKind::Topic, false, false, Arguments::default())
            .await
            .unwrap();
        for q in ["q1", "q2", "q3"] {
            declare_queue(&vhost, q, false).await;
        }
        vhost.queue_bind("fan", "q1", "").await.unwrap();
        vhost.queue_bind("fan", "q2", "").await.unwrap();
        vhost.queue_bind("top", "q2", "order.*").await.unwrap();
        vhost.queue_bind("top", "q3", "invoice.#").await.unwrap();

        vhost.basic_publish("fan", "whatever", None, Bytes::from_static(b"f")).await.unwrap();
        vhost.basic_publish("top", "order.created", None, Bytes::from_static(b"t")).await.unwrap();

        let backlog = |q: &str| {
            let vhost = vhost.clone();
            let q = q.to_owned();
            async move { vhost.index.queue(&q).unwrap().state.lock().await.backlog.len() }
        };
        assert_eq!(backlog("q1").await, 1);
        assert_eq!(backlog("q2").await, 2);
        assert_eq!(backlog("q3").await, 0);
    }

    #[tokio::test]
    async fn test_manual_ack_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        declare_queue(&vhost, "q1", false).await;

        let (collector, deliveries) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", false, collector).await.unwrap();
        vhost.basic_publish("", "q1", None, Bytes::from_static(b"m1")).await.unwrap();
        deliver_one(&vhost, "q1").await.unwrap();

        let id = deliveries.lock().await[0].1.clone();
        {
            let queue = vhost.index.queue("q1").unwrap();
            assert!(queue.state.lock().await.awaiting_ack(&id));
        }

        vhost.basic_ack("q1", &id).await.unwrap();
        assert!(vhost.index.message(&id).is_none());
        // second ack is a defined failure, not a crash
        assert!(vhost.basic_ack("q1", &id).await.is_err());
        // acking an id that was never delivered fails the same way
        assert!(vhost.basic_ack("q1", "M-unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_durable_recovery_without_unacked() {
        let dir = tempfile::tempdir().unwrap();
        {
            let vhost = new_vhost(dir.path()).await;
            declare_queue(&vhost, "q1", true).await;
            let props = BasicProperties {
                durability: crate::codec::types::Durability::Persistent,
                ..Default::default()
            };
            for body in ["m1", "m2"] {
                vhost
                    .basic_publish("", "q1", Some(props.clone()), Bytes::from(body.to_owned()))
                    .await
                    .unwrap();
            }
            // m1 is delivered but never acked
            let (collector, _deliveries) = Collector::new();
            vhost.basic_consume(channel("ch1"), "c1", "q1", false, collector).await.unwrap();
            deliver_one(&vhost, "q1").await.unwrap();
            assert_eq!(vhost.index.queue("q1").unwrap().state.lock().await.unacked.len(), 1);
        }

        // a fresh host over the same directory sees both messages as backlog
        let vhost = new_vhost(dir.path()).await;
        let queue = vhost.index.queue("q1").unwrap();
        {
            let state = queue.state.lock().await;
            assert_eq!(state.backlog.len(), 2);
            assert!(state.unacked.is_empty());
        }

        let (collector, deliveries) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", true, collector).await.unwrap();
        deliver_one(&vhost, "q1").await.unwrap();
        deliver_one(&vhost, "q1").await.unwrap();
        let got = deliveries.lock().await;
        let bodies: Vec<&[u8]> = got.iter().map(|(_, _, b)| b.as_ref()).collect();
        assert_eq!(bodies, vec![b"m1".as_ref(), b"m2".as_ref()]);
    }

    #[tokio::test]
    async fn test_persistent_ack_deletes_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        declare_queue(&vhost, "q1", true).await;
        let props = BasicProperties {
            durability: crate::codec::types::Durability::Persistent,
            ..Default::default()
        };
        vhost.basic_publish("", "q1", Some(props), Bytes::from_static(b"m1")).await.unwrap();

        let (collector, deliveries) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", false, collector).await.unwrap();
        deliver_one(&vhost, "q1").await.unwrap();
        let id = deliveries.lock().await[0].1.clone();
        vhost.basic_ack("q1", &id).await.unwrap();

        // nothing comes back after a restart
        let vhost = new_vhost(dir.path()).await;
        assert_eq!(vhost.index.queue("q1").unwrap().state.lock().await.backlog.len(), 0);
    }

    #[tokio::test]
    async fn test_queue_delete_removes_files_and_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        vhost
            .exchange_declare("ex1", ExchangeKind::Topic, true, false, Arguments::default())
            .await
            .unwrap();
        declare_queue(&vhost, "q1", true).await;
        vhost.queue_bind("ex1", "q1", "a.#").await.unwrap();

        let queue_dir = dir.path().join("default").join("q1");
        assert!(queue_dir.join("queue_data.txt").exists());
        assert!(queue_dir.join("queue_stat.txt").exists());

        vhost.queue_delete("q1").await.unwrap();
        assert!(!queue_dir.exists());
        assert!(vhost.index.binding("ex1", "q1").is_none());

        // the cascade reached the store as well
        let vhost = new_vhost(dir.path()).await;
        assert!(vhost.index.queue("q1").is_none());
        assert!(vhost.index.binding("ex1", "q1").is_none());
        assert!(vhost.index.exchange("ex1").is_some());
    }

    #[tokio::test]
    async fn test_remove_channel_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let vhost = new_vhost(dir.path()).await;
        declare_queue(&vhost, "q1", false).await;

        let (collector, deliveries) = Collector::new();
        vhost.basic_consume(channel("ch1"), "c1", "q1", true, collector).await.unwrap();
        vhost.remove_channel_consumers(&channel("ch1")).await;

        vhost.basic_publish("", "q1", None, Bytes::from_static(b"m1")).await.unwrap();
        deliver_one(&vhost, "q1").await.unwrap();

        // no subscriber anymore, the message stays queued
        assert!(deliveries.lock().await.is_empty());
        assert_eq!(vhost.index.queue("q1").unwrap().state.lock().await.backlog.len(), 1);
    }
}
