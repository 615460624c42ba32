//! Event sink that writes each event to the log as JSON.
//!
//! Stands in for a message broker: the payload and partition key are what a
//! producer would send.

use crate::domain::error::StratvaultError;
use crate::domain::event::DomainEvent;
use crate::ports::event_port::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: &DomainEvent) -> Result<(), StratvaultError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(
            target: "stratvault::events",
            key = %event.key(),
            event_type = event.event_type(),
            %payload,
            "event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn publish_succeeds() {
        let event = DomainEvent::StrategyDeleted {
            strategy_id: 1,
            user_id: 2,
            timestamp: Utc::now(),
        };
        assert!(LogEventSink.publish(&event).is_ok());
    }
}
