//! Event fan-out to subscribed connections.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use agent_gateway_core::{
    traits::Connection,
    types::{BroadcastReport, CloudEvent, ConnectionId, DeliveryFailure, OutboundMessage},
    Error, Result,
};

use crate::registry::ConnectionRegistry;

/// Delivers events to every connection whose subscriptions match.
///
/// Delivery is best-effort and independent per connection: a failing or
/// slow connection never prevents delivery to the others. Each delivery is
/// bounded by `send_timeout`; one that runs over counts as failed. The
/// broadcast only fails as a whole when it had targets and reached none of
/// them.
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub async fn broadcast(
        &self,
        event: CloudEvent,
        cancel: &CancellationToken,
    ) -> Result<BroadcastReport> {
        event.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::cancelled("broadcast_event"));
        }

        let targets = self.registry.subscribers_for(&event.event_type);
        if targets.is_empty() {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Broadcast has no subscribers"
            );
            return Ok(BroadcastReport::empty(event.id));
        }

        let deliveries = targets
            .iter()
            .map(|conn| deliver(conn, &event, self.send_timeout));
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("broadcast_event")),
            outcomes = join_all(deliveries) => outcomes,
        };

        let mut report = BroadcastReport::empty(event.id.clone());
        report.attempted = targets.len();
        for (conn, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id,
                        connection_id = %conn.id(),
                        error = %e,
                        "Event delivery failed"
                    );
                    report.failures.push(DeliveryFailure {
                        connection_id: conn.id().clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::counter!("gateway_events_delivered_total").increment(report.delivered as u64);
        metrics::counter!("gateway_event_delivery_failures_total")
            .increment(report.failures.len() as u64);

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Event broadcast"
        );

        if report.all_failed() {
            return Err(Error::transport(format!(
                "event {} could not be delivered to any of {} connections",
                event.id, report.attempted
            )));
        }
        Ok(report)
    }

    /// Deliver `event` to one named connection, ignoring its subscriptions.
    ///
    /// A connection that is unknown, dropped, or no longer live is a
    /// transport error, same as a failed send. A send that outlasts
    /// `send_timeout` is a timeout.
    pub async fn send_to(
        &self,
        connection_id: &ConnectionId,
        event: CloudEvent,
        cancel: &CancellationToken,
    ) -> Result<()> {
        event.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::cancelled("send_message"));
        }
        let conn = self.registry.get(connection_id).ok_or_else(|| {
            Error::transport(format!("connection {} is not live", connection_id))
        })?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("send_message")),
            result = deliver(&conn, &event, self.send_timeout) => result,
        };

        match &result {
            Ok(()) => {
                metrics::counter!("gateway_events_delivered_total").increment(1);
                tracing::debug!(event_id = %event.id, connection_id = %connection_id, "Event sent");
            }
            Err(e) => {
                metrics::counter!("gateway_event_delivery_failures_total").increment(1);
                tracing::warn!(
                    event_id = %event.id,
                    connection_id = %connection_id,
                    error = %e,
                    "Event send failed"
                );
            }
        }
        result
    }
}

async fn deliver(conn: &Arc<dyn Connection>, event: &CloudEvent, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, conn.send(OutboundMessage::Event(event.clone()))).await {
        Ok(sent) => sent,
        Err(_) => Err(Error::timeout(format!(
            "delivery of event {} to {} exceeded {:?}",
            event.id,
            conn.id(),
            limit
        ))),
    }
}
