//! Broker server lifecycle.
//!
//! `BrokerServerBuilder` collects bound listeners, `BrokerServer::run` drives
//! them concurrently, and each accepted TCP connection gets its own session
//! task. Connections over the configured limit are dropped at accept time.
//!
//! ```rust,no_run
//! use ramq::context::ServerContext;
//! use ramq::net::{Builder, Result};
//! use ramq::server::BrokerServer;
//! use ramq::conf::Settings;
//! use ramq::logger::config_logger;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::init(Default::default())?.clone();
//!     let logger = config_logger(settings.log.filename(), settings.log.to, settings.log.level);
//!     let scx = ServerContext::new(settings, logger).build().await?;
//!     BrokerServer::new(scx)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 15672).into()).bind()?)
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use itertools::Itertools;

use crate::context::ServerContext;
use crate::net::{Listener, Result};
use crate::session;

/// Builder collecting the listeners a broker instance serves
pub struct BrokerServerBuilder {
    scx: ServerContext,
    listeners: Vec<Listener>,
}

impl BrokerServerBuilder {
    fn new(scx: ServerContext) -> Self {
        Self { scx, listeners: Vec::default() }
    }

    pub fn listener(mut self, listen: Listener) -> Self {
        self.listeners.push(listen);
        self
    }

    pub fn build(self) -> BrokerServer {
        BrokerServer {
            inner: Arc::new(BrokerServerInner { scx: self.scx, listeners: self.listeners }),
        }
    }
}

#[derive(Clone)]
pub struct BrokerServer {
    inner: Arc<BrokerServerInner>,
}

pub struct BrokerServerInner {
    scx: ServerContext,
    listeners: Vec<Listener>,
}

impl Deref for BrokerServer {
    type Target = BrokerServerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl BrokerServer {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(scx: ServerContext) -> BrokerServerBuilder {
        BrokerServerBuilder::new(scx)
    }

    /// Starts the server in a background Tokio task
    pub fn start(self) {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                log::error!("Failed to start the broker server! {e}");
                std::process::exit(1);
            }
        });
    }

    /// Runs all listeners until the process exits
    pub async fn run(self) -> Result<()> {
        futures::future::join_all(
            self.listeners.iter().map(|l| listen_tcp(self.scx.clone(), l).boxed()).collect_vec(),
        )
        .await;
        Ok(())
    }
}

async fn listen_tcp(scx: ServerContext, l: &Listener) {
    let conns = Arc::new(AtomicUsize::new(0));
    loop {
        match l.accept().await {
            Ok(accept) => {
                if conns.load(Ordering::SeqCst) >= l.cfg.max_connections {
                    log::warn!(
                        "connection limit reached, max: {}, remote_addr: {}",
                        l.cfg.max_connections,
                        accept.remote_addr
                    );
                    continue;
                }
                let scx = scx.clone();
                let conns = conns.clone();
                tokio::spawn(async move {
                    log::debug!("TCP connection from {}", accept.remote_addr);
                    conns.fetch_add(1, Ordering::SeqCst);
                    scopeguard::defer! {
                        conns.fetch_sub(1, Ordering::SeqCst);
                    }

                    if let Err(e) = session::process(scx, accept.tcp()).await {
                        log::info!("session processing error: {e:?}");
                    }
                });
            }
            Err(e) => {
                log::info!("TCP listener error: {e:?}");
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    use crate::codec::packet::{
        BasicAckArgs, BasicConsumeArgs, BasicPublishArgs, ChannelArgs, ExchangeDeclareArgs,
        QueueBindArgs, QueueDeclareArgs, Response,
    };
    use crate::codec::types::{Arguments, ExchangeKind};
    use crate::codec::{Codec, Packet};
    use crate::conf::{Options, Settings};
    use crate::logger::config_logger;
    use bytes::Bytes;

    async fn recv(c: &mut Framed<TcpStream, Codec>) -> Packet {
        tokio::time::timeout(Duration::from_secs(5), c.next())
            .await
            .expect("read timeout")
            .expect("connection closed")
            .expect("decode error")
    }

    async fn request(c: &mut Framed<TcpStream, Codec>, packet: Packet) -> Response {
        c.send(packet).await.expect("send failed");
        match recv(c).await {
            Packet::Response(resp) => resp,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let opts =
            Options { data_dir: Some(tmp.path().to_string_lossy().into_owned()), ..Default::default() };
        let settings = Settings::init(opts).unwrap().clone();
        let logger = config_logger(settings.log.filename(), settings.log.to, settings.log.level);
        let scx = ServerContext::new(settings, logger).build().await.unwrap();

        let listener =
            crate::net::Builder::new().name("test/tcp").laddr(([127, 0, 0, 1], 0).into()).bind().unwrap();
        let laddr = listener.local_addr().unwrap();
        BrokerServer::new(scx).listener(listener).build().start();

        let socket = TcpStream::connect(laddr).await.unwrap();
        let mut c = Framed::new(socket, Codec::new(1024 * 1024));

        let resp = request(
            &mut c,
            Packet::ChannelOpen(ChannelArgs { rid: "r1".into(), channel_id: "ch1".into() }),
        )
        .await;
        assert!(resp.ok);
        assert_eq!(resp.rid, "r1");

        let resp = request(
            &mut c,
            Packet::ExchangeDeclare(ExchangeDeclareArgs {
                rid: "r2".into(),
                channel_id: "ch1".into(),
                exchange_name: "logs".into(),
                kind: ExchangeKind::Topic,
                durable: false,
                auto_delete: false,
                arguments: Arguments::default(),
            }),
        )
        .await;
        assert!(resp.ok);

        let resp = request(
            &mut c,
            Packet::QueueDeclare(QueueDeclareArgs {
                rid: "r3".into(),
                channel_id: "ch1".into(),
                queue_name: "q1".into(),
                exclusive: false,
                durable: false,
                auto_delete: false,
                arguments: Arguments::default(),
            }),
        )
        .await;
        assert!(resp.ok);

        let resp = request(
            &mut c,
            Packet::QueueBind(QueueBindArgs {
                rid: "r4".into(),
                channel_id: "ch1".into(),
                exchange_name: "logs".into(),
                queue_name: "q1".into(),
                binding_key: "user.*".into(),
            }),
        )
        .await;
        assert!(resp.ok);

        // adjacent wildcards other than "*.*" are rejected
        let resp = request(
            &mut c,
            Packet::QueueBind(QueueBindArgs {
                rid: "r5".into(),
                channel_id: "ch1".into(),
                exchange_name: "logs".into(),
                queue_name: "q1".into(),
                binding_key: "a.#.#".into(),
            }),
        )
        .await;
        assert!(!resp.ok);

        let resp = request(
            &mut c,
            Packet::BasicConsume(BasicConsumeArgs {
                rid: "r6".into(),
                channel_id: "ch1".into(),
                consumer_tag: "c1".into(),
                queue_name: "q1".into(),
                auto_ack: false,
            }),
        )
        .await;
        assert!(resp.ok);

        let resp = request(
            &mut c,
            Packet::BasicPublish(BasicPublishArgs {
                rid: "r7".into(),
                channel_id: "ch1".into(),
                exchange_name: "logs".into(),
                routing_key: "user.created".into(),
                properties: None,
                body: Bytes::from_static(b"hello"),
            }),
        )
        .await;
        assert!(resp.ok);

        let message_id = match recv(&mut c).await {
            Packet::Delivery(d) => {
                assert_eq!(d.consumer_tag, "c1");
                assert_eq!(d.properties.routing_key, "user.created");
                assert!(d.properties.message_id.starts_with("M-"));
                assert_eq!(d.body.as_ref(), b"hello");
                d.properties.message_id
            }
            other => panic!("expected a delivery, got {:?}", other),
        };

        let resp = request(
            &mut c,
            Packet::BasicAck(BasicAckArgs {
                rid: "r8".into(),
                channel_id: "ch1".into(),
                queue_name: "q1".into(),
                message_id: message_id.clone(),
            }),
        )
        .await;
        assert!(resp.ok);

        // a second ack of the same message reports a failure
        let resp = request(
            &mut c,
            Packet::BasicAck(BasicAckArgs {
                rid: "r9".into(),
                channel_id: "ch1".into(),
                queue_name: "q1".into(),
                message_id,
            }),
        )
        .await;
        assert!(!resp.ok);

        // no binding matches, publish reports no route
        let resp = request(
            &mut c,
            Packet::BasicPublish(BasicPublishArgs {
                rid: "r10".into(),
                channel_id: "ch1".into(),
                exchange_name: "logs".into(),
                routing_key: "admin.created".into(),
                properties: None,
                body: Bytes::from_static(b"x"),
            }),
        )
        .await;
        assert!(!resp.ok);

        let resp = request(
            &mut c,
            Packet::ChannelClose(ChannelArgs { rid: "r11".into(), channel_id: "ch1".into() }),
        )
        .await;
        assert!(resp.ok);
    }
}
