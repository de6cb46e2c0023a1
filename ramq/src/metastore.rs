//! Durable topology storage.
//!
//! Exchanges, queues and bindings declared as durable are written through
//! [`MetaStore`] so a restart can rebuild the topology index. The default
//! implementation keeps the whole snapshot in one JSON document and rewrites
//! it atomically (temp file plus rename) on every mutation; topology changes
//! are rare compared to message traffic, so the full rewrite is cheap.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{Binding, Exchange, QueueInfo};
use crate::Result;

#[async_trait]
pub trait MetaStore: Sync + Send {
    /// Loads existing state, called once before any other method.
    async fn init(&self) -> Result<()>;

    async fn insert_exchange(&self, exchange: Exchange) -> Result<()>;
    async fn remove_exchange(&self, name: &str) -> Result<()>;
    async fn exchanges(&self) -> Result<Vec<Exchange>>;

    async fn insert_queue(&self, queue: QueueInfo) -> Result<()>;
    async fn remove_queue(&self, name: &str) -> Result<()>;
    async fn queues(&self) -> Result<Vec<QueueInfo>>;

    async fn insert_binding(&self, binding: Binding) -> Result<()>;
    async fn remove_binding(&self, exchange_name: &str, queue_name: &str) -> Result<()>;
    async fn bindings(&self) -> Result<Vec<Binding>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    exchanges: Vec<Exchange>,
    queues: Vec<QueueInfo>,
    bindings: Vec<Binding>,
}

/// JSON snapshot store, one `meta.json` per data directory.
pub struct DefaultMetaStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl DefaultMetaStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        DefaultMetaStore {
            path: data_dir.into().join("meta.json"),
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for DefaultMetaStore {
    async fn init(&self) -> Result<()> {
        if self.path.exists() {
            let data = fs::read(&self.path)?;
            *self.snapshot.lock().await = serde_json::from_slice(&data)?;
        }
        Ok(())
    }

    async fn insert_exchange(&self, exchange: Exchange) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.exchanges.retain(|e| e.name != exchange.name);
        s.exchanges.push(exchange);
        self.persist(&s)
    }

    async fn remove_exchange(&self, name: &str) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.exchanges.retain(|e| e.name != name);
        self.persist(&s)
    }

    async fn exchanges(&self) -> Result<Vec<Exchange>> {
        Ok(self.snapshot.lock().await.exchanges.clone())
    }

    async fn insert_queue(&self, queue: QueueInfo) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.queues.retain(|q| q.name != queue.name);
        s.queues.push(queue);
        self.persist(&s)
    }

    async fn remove_queue(&self, name: &str) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.queues.retain(|q| q.name != name);
        self.persist(&s)
    }

    async fn queues(&self) -> Result<Vec<QueueInfo>> {
        Ok(self.snapshot.lock().await.queues.clone())
    }

    async fn insert_binding(&self, binding: Binding) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.bindings.retain(|b| {
            !(b.exchange_name == binding.exchange_name && b.queue_name == binding.queue_name)
        });
        s.bindings.push(binding);
        self.persist(&s)
    }

    async fn remove_binding(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        let mut s = self.snapshot.lock().await;
        s.bindings
            .retain(|b| !(b.exchange_name == exchange_name && b.queue_name == queue_name));
        self.persist(&s)
    }

    async fn bindings(&self) -> Result<Vec<Binding>> {
        Ok(self.snapshot.lock().await.bindings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::types::{Arguments, ExchangeKind};

    fn exchange(name: &str) -> Exchange {
        Exchange {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
            arguments: Arguments::default(),
        }
    }

    fn queue(name: &str) -> QueueInfo {
        QueueInfo {
            name: name.into(),
            exclusive: false,
            durable: true,
            auto_delete: false,
            arguments: Arguments::default(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefaultMetaStore::new(dir.path());
        store.init().await.unwrap();

        store.insert_exchange(exchange("ex1")).await.unwrap();
        store.insert_queue(queue("q1")).await.unwrap();
        store
            .insert_binding(Binding {
                exchange_name: "ex1".into(),
                queue_name: "q1".into(),
                binding_key: "a.#".into(),
            })
            .await
            .unwrap();

        // a second store over the same directory sees the same state
        let reloaded = DefaultMetaStore::new(dir.path());
        reloaded.init().await.unwrap();
        assert_eq!(reloaded.exchanges().await.unwrap(), vec![exchange("ex1")]);
        assert_eq!(reloaded.queues().await.unwrap(), vec![queue("q1")]);
        assert_eq!(reloaded.bindings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefaultMetaStore::new(dir.path());
        store.init().await.unwrap();

        store.insert_exchange(exchange("ex1")).await.unwrap();
        store.insert_exchange(exchange("ex1")).await.unwrap();
        assert_eq!(store.exchanges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefaultMetaStore::new(dir.path());
        store.init().await.unwrap();

        store.insert_queue(queue("q1")).await.unwrap();
        store.insert_queue(queue("q2")).await.unwrap();
        store.remove_queue("q1").await.unwrap();
        assert_eq!(store.queues().await.unwrap(), vec![queue("q2")]);

        // removing something absent is a no-op
        store.remove_queue("q9").await.unwrap();
        store.remove_binding("ex1", "q1").await.unwrap();
    }
}
