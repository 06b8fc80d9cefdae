//! Stage lifecycle events
//!
//! Move and pivot operations publish their lifecycle on a broadcast channel so
//! collaborators (UI glue, sequence engines, loggers) can observe the stage
//! without touching the device. Events are serde-serializable for direct JSON
//! output.

use crate::pose::PivotPoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Channel capacity for stage events. Slow subscribers lag rather than block
/// the driver.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type EventSender = broadcast::Sender<StageEvent>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    MoveSubmitted {
        id: Uuid,
        mode: &'static str,
        target: String,
        timestamp: DateTime<Utc>,
    },
    MoveCompleted {
        id: Uuid,
        target: String,
        timestamp: DateTime<Utc>,
    },
    MoveFailed {
        id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
    PivotRead {
        pivot: PivotPoint,
        timestamp: DateTime<Utc>,
    },
    PivotSet {
        pivot: PivotPoint,
        timestamp: DateTime<Utc>,
    },
    PivotFailed {
        operation: &'static str,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

pub fn channel() -> (EventSender, broadcast::Receiver<StageEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Pose;

    #[test]
    fn events_serialize_with_tag() {
        let event = StageEvent::MoveCompleted {
            id: Uuid::nil(),
            target: Pose::default().to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"move_completed\""));
        assert!(json.contains("X=0.0000"));
    }
}
