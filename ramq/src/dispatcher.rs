//! Consumer dispatcher.
//!
//! Publish and dispatch are decoupled through an unbounded channel of
//! queue-name tokens: one token per enqueued message, plus one per backlog
//! message when a consumer subscribes. A single loop drains the channel and
//! hands each token to the shared task queue, which bounds delivery
//! concurrency to the configured worker count.

use rust_box::task_exec_queue::SpawnExt;
use tokio::sync::mpsc;

use crate::types::QueueName;
use crate::vhost::VirtualHost;
use crate::Result;

pub type DispatchTx = mpsc::UnboundedSender<QueueName>;
pub type DispatchRx = mpsc::UnboundedReceiver<QueueName>;

pub(crate) async fn dispatch_loop(vhost: VirtualHost, mut rx: DispatchRx) {
    while let Some(queue_name) = rx.recv().await {
        let vhost1 = vhost.clone();
        let qname = queue_name.clone();
        let task = async move {
            if let Err(e) = deliver_one(&vhost1, &qname).await {
                log::warn!("deliver to queue '{}' failed, {:?}", qname, e);
            }
        };
        if task.spawn(&vhost.exec).await.is_err() {
            log::warn!("dispatch task rejected, queue: {}", queue_name);
        }
    }
    log::info!("dispatch loop exited");
}

/// Handles one dispatch token: take the head of the backlog, pick the next
/// subscriber round-robin, mark the message awaiting ack and invoke the
/// delivery capability. The callback runs outside the queue lock.
pub(crate) async fn deliver_one(vhost: &VirtualHost, queue_name: &str) -> Result<()> {
    let Some(queue) = vhost.index.queue(queue_name) else {
        // queue deleted after the token was issued
        return Ok(());
    };

    let (message, binding) = {
        let mut state = queue.state.lock().await;
        let Some(id) = state.dequeue_next() else {
            // stale token
            return Ok(());
        };
        let Some(binding) = state.select_next() else {
            // no subscriber yet, keep the message for the subscribe-time drain
            state.requeue_front(id);
            return Ok(());
        };
        let Some(message) = vhost.index.message(&id) else {
            log::warn!("queue '{}' backlog references unknown message '{}'", queue_name, id);
            return Ok(());
        };
        state.mark_awaiting_ack(id);
        (message, binding)
    };

    if let Err(e) = binding
        .consumer
        .deliver(binding.consumer_tag.clone(), message.properties(), message.body.clone())
        .await
    {
        log::warn!(
            "delivery to consumer '{}' on queue '{}' failed, message: {}, {:?}",
            binding.consumer_tag,
            queue_name,
            message.id,
            e
        );
        return Ok(());
    }

    if binding.auto_ack {
        vhost.basic_ack(queue_name, &message.id).await?;
    }
    Ok(())
}
