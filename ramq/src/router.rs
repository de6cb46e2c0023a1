//! Resolves the target queues for a published message.

use crate::codec::types::ExchangeKind;
use crate::key::match_topic;
use crate::types::{Binding, Exchange, QueueName};

/// Returns the candidate target queues, in binding order for fanout/topic.
///
/// Direct exchanges ignore bindings entirely: the single candidate is the
/// queue named exactly like the routing key. Candidates are not checked for
/// existence here; the orchestrator skips queues that no longer exist.
pub fn resolve_targets(
    exchange: &Exchange,
    bindings: &[Binding],
    routing_key: &str,
) -> Vec<QueueName> {
    match exchange.kind {
        ExchangeKind::Direct => vec![QueueName::from(routing_key)],
        ExchangeKind::Fanout => bindings.iter().map(|b| b.queue_name.clone()).collect(),
        ExchangeKind::Topic => bindings
            .iter()
            .filter(|b| match_topic(&b.binding_key, routing_key))
            .map(|b| b.queue_name.clone())
            .collect(),
    }
}
