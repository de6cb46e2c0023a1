//! Per-connection protocol session.
//!
//! One session runs one `tokio::select!` loop over the inbound frame stream
//! and the connection's outbound channel, so responses and pushed deliveries
//! are interleaved onto the socket by a single writer. Every request frame is
//! answered with a `Response` carrying the request id; broker operation
//! failures become `ok=false` instead of closing the connection.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::packet::{Delivery, Response};
use crate::codec::types::BasicProperties;
use crate::codec::Packet;
use crate::context::ServerContext;
use crate::net::BrokerStream;
use crate::types::{ChannelId, ChannelKey, ConnectionId, Consumer, ConsumerTag, HashSet, Rx, Tx};
use crate::Result;

pub(crate) async fn process<Io>(scx: ServerContext, mut stream: BrokerStream<Io>) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let conn_id = ConnectionId::from(
        Uuid::new_v4().as_simple().encode_lower(&mut Uuid::encode_buffer()).to_owned(),
    );
    log::debug!("{} new session, remote_addr: {}", conn_id, stream.remote_addr);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = Session { scx, conn_id, tx, channels: HashSet::default() };

    let result = session.run_loop(&mut stream, rx).await;
    session.teardown().await;
    let _ = stream.close().await;
    log::info!("{} session exit", session.conn_id);
    result
}

struct Session {
    scx: ServerContext,
    conn_id: ConnectionId,
    /// Outbound half of this connection, cloned into every consumer
    /// registered on it.
    tx: Tx,
    /// Channels seen on this connection, for teardown.
    channels: HashSet<ChannelId>,
}

impl Session {
    async fn run_loop<Io>(&mut self, stream: &mut BrokerStream<Io>, mut rx: Rx) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                packet = rx.recv() => {
                    match packet {
                        Some(packet) => stream.send(packet).await?,
                        None => return Err(anyhow!("outbound channel closed")),
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(packet)) => self.handle_packet(stream, packet).await?,
                        Some(Err(e)) => return Err(e),
                        None => {
                            log::debug!("{} connection closed by remote", self.conn_id);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_packet<Io>(
        &mut self,
        stream: &mut BrokerStream<Io>,
        packet: Packet,
    ) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(channel_id) = packet.channel_id() {
            self.channels.insert(channel_id.clone());
        }

        let vhost = self.scx.default_vhost.clone();
        match packet {
            Packet::ChannelOpen(args) => self.respond(stream, args.rid, args.channel_id, Ok(())).await,
            Packet::ChannelClose(args) => {
                self.channels.remove(&args.channel_id);
                let channel = ChannelKey::new(self.conn_id.clone(), args.channel_id.clone());
                vhost.remove_channel_consumers(&channel).await;
                self.respond(stream, args.rid, args.channel_id, Ok(())).await
            }
            Packet::ExchangeDeclare(args) => {
                let result = vhost
                    .exchange_declare(
                        &args.exchange_name,
                        args.kind,
                        args.durable,
                        args.auto_delete,
                        args.arguments,
                    )
                    .await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::ExchangeDelete(args) => {
                let result = vhost.exchange_delete(&args.exchange_name).await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::QueueDeclare(args) => {
                let result = vhost
                    .queue_declare(
                        &args.queue_name,
                        args.exclusive,
                        args.durable,
                        args.auto_delete,
                        args.arguments,
                    )
                    .await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::QueueDelete(args) => {
                let result = vhost.queue_delete(&args.queue_name).await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::QueueBind(args) => {
                let result =
                    vhost.queue_bind(&args.exchange_name, &args.queue_name, &args.binding_key).await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::QueueUnbind(args) => {
                let result = vhost.queue_unbind(&args.exchange_name, &args.queue_name).await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::BasicPublish(args) => {
                let result = vhost
                    .basic_publish(&args.exchange_name, &args.routing_key, args.properties, args.body)
                    .await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::BasicConsume(args) => {
                let channel = ChannelKey::new(self.conn_id.clone(), args.channel_id.clone());
                let consumer = Arc::new(ChannelConsumer { tx: self.tx.clone() });
                let result = vhost
                    .basic_consume(channel, &args.consumer_tag, &args.queue_name, args.auto_ack, consumer)
                    .await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::BasicAck(args) => {
                let result = vhost.basic_ack(&args.queue_name, &args.message_id).await;
                self.respond(stream, args.rid, args.channel_id, result).await
            }
            Packet::Delivery(_) | Packet::Response(_) => {
                Err(anyhow!("{} server frame received from client", self.conn_id))
            }
        }
    }

    async fn respond<Io>(
        &self,
        stream: &mut BrokerStream<Io>,
        rid: ByteString,
        channel_id: ByteString,
        result: Result<()>,
    ) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                log::info!("{} request '{}' failed, {}", self.conn_id, rid, e);
                false
            }
        };
        stream.send_response(Response { rid, channel_id, ok }).await
    }

    /// Releases every consumer this connection registered, on any exit path.
    async fn teardown(&mut self) {
        let channels = self.channels.drain().collect::<Vec<_>>();
        for channel_id in channels {
            let channel = ChannelKey::new(self.conn_id.clone(), channel_id);
            self.scx.default_vhost.remove_channel_consumers(&channel).await;
        }
    }
}

/// Forwards deliveries into the owning connection's outbound channel.
struct ChannelConsumer {
    tx: Tx,
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn deliver(
        &self,
        consumer_tag: ConsumerTag,
        properties: BasicProperties,
        body: Bytes,
    ) -> Result<()> {
        self.tx
            .send(Packet::Delivery(Delivery { consumer_tag, properties, body }))
            .map_err(|_| anyhow!("connection outbound channel closed"))
    }
}
