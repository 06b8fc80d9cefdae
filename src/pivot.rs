//! PivotStore - rotation-center get/set
//!
//! Thin request/response wrapper over the link's pivot primitives that also
//! publishes success/failure events. The pivot lives in the controller's
//! volatile memory: it survives reconnects of this driver but not a power
//! cycle, and is not re-applied automatically.
//!
//! Setting the pivot while a move is in flight is undefined at the controller
//! and is the caller's responsibility to avoid.

use crate::error::{CommandError, QueryError};
use crate::events::{EventSender, StageEvent};
use crate::link::DeviceLink;
use crate::pose::PivotPoint;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct PivotStore {
    link: Arc<Mutex<DeviceLink>>,
    events: EventSender,
}

impl PivotStore {
    pub fn new(link: Arc<Mutex<DeviceLink>>, events: EventSender) -> Self {
        Self { link, events }
    }

    /// Read the current pivot point from the controller.
    pub async fn get(&self) -> Result<PivotPoint, QueryError> {
        let result = {
            let mut link = self.link.lock().await;
            link.query_pivot().await
        };
        match &result {
            Ok(pivot) => {
                let _ = self.events.send(StageEvent::PivotRead {
                    pivot: *pivot,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                let _ = self.events.send(StageEvent::PivotFailed {
                    operation: "get",
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        result
    }

    /// Set the rotation center used by the controller's kinematics.
    pub async fn set(&self, pivot: &PivotPoint) -> Result<(), CommandError> {
        let result = {
            let mut link = self.link.lock().await;
            link.set_pivot(pivot).await
        };
        match &result {
            Ok(()) => {
                info!("pivot set to {}", pivot);
                let _ = self.events.send(StageEvent::PivotSet {
                    pivot: *pivot,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                let _ = self.events.send(StageEvent::PivotFailed {
                    operation: "set",
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::transport::SimTransport;

    async fn store_with_sim() -> (PivotStore, tokio::sync::broadcast::Receiver<StageEvent>) {
        let sim = SimTransport::new();
        let link = DeviceLink::open(Box::new(sim), "sim", 0)
            .await
            .expect("sim handshake");
        let (events, rx) = events::channel();
        (PivotStore::new(Arc::new(Mutex::new(link)), events), rx)
    }

    #[tokio::test]
    async fn set_get_round_trip_emits_events() {
        let (store, mut rx) = store_with_sim().await;
        let pivot = PivotPoint::new(0.0, 0.0, 12.7);

        store.set(&pivot).await.unwrap();
        let read = store.get().await.unwrap();
        assert!((read.z - 12.7).abs() < 1e-9);

        assert!(matches!(rx.try_recv().unwrap(), StageEvent::PivotSet { .. }));
        assert!(matches!(rx.try_recv().unwrap(), StageEvent::PivotRead { .. }));
    }

    #[tokio::test]
    async fn failure_emits_pivot_failed() {
        let sim = SimTransport::new();
        let mut link = DeviceLink::open(Box::new(sim), "sim", 0).await.unwrap();
        link.disconnect();
        let (events, mut rx) = events::channel();
        let store = PivotStore::new(Arc::new(Mutex::new(link)), events);

        assert!(store.get().await.is_err());
        match rx.try_recv().unwrap() {
            StageEvent::PivotFailed { operation, .. } => assert_eq!(operation, "get"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
