use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use ramq_codec::packet::{Delivery, Response};
use ramq_codec::{Codec, Packet};

use crate::error::BrokerError;
use crate::{Builder, Error, Result};

pub struct BrokerStream<Io> {
    pub io: Framed<Io, Codec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<Io> BrokerStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        BrokerStream { io: Framed::new(io, Codec::new(cfg.max_frame_size)), remote_addr, cfg }
    }

    #[inline]
    pub async fn send_response(&mut self, resp: Response) -> Result<()> {
        self.send(Packet::Response(resp)).await
    }

    #[inline]
    pub async fn send_delivery(&mut self, delivery: Delivery) -> Result<()> {
        self.send(Packet::Delivery(delivery)).await
    }

    #[inline]
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.send(packet).await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.send(packet)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(BrokerError::Encode(e)),
                Err(_) => Err(BrokerError::WriteTimeout),
            }?;
            Ok(())
        }
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.flush().await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.flush()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(BrokerError::Encode(e)),
                Err(_) => Err(BrokerError::FlushTimeout),
            }?;
            Ok(())
        }
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.close().await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.close()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(BrokerError::Encode(e)),
                Err(_) => Err(BrokerError::CloseTimeout),
            }?;
            Ok(())
        }
    }

    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(packet))) => Ok(Some(packet)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(BrokerError::ReadTimeout.into()),
        }
    }
}

impl<Io> futures::Stream for BrokerStream<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Packet>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(packet)) => Some(Ok(packet)),
            Some(Err(e)) => Some(Err(Error::from(e))),
            None => None,
        })
    }
}
