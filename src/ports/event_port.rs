//! Outbound domain event port.

use crate::domain::error::StratvaultError;
use crate::domain::event::DomainEvent;

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> Result<(), StratvaultError>;
}

/// Publish after a committed write. A sink failure never undoes the write,
/// so it is logged and dropped.
pub fn publish_or_warn(sink: &dyn EventSink, event: DomainEvent) {
    if let Err(e) = sink.publish(&event) {
        tracing::warn!(
            event_type = event.event_type(),
            key = %event.key(),
            error = %e,
            "failed to publish event"
        );
    }
}
