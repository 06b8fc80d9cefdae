//! TelemetryPublisher - continuous best-effort pose streaming
//!
//! A background task samples the current pose at a fixed interval and fans it
//! out to subscribers. The stream favors resilience over completeness: a
//! failed read is logged and skipped, never fatal to the publisher. Device
//! access goes through the same lock as the motion session, so a sample is
//! simply delayed (not corrupted) while a move command is on the wire.
//!
//! Samples carry no ordering guarantee relative to moves; a sample may be
//! captured mid-move.

use crate::link::DeviceLink;
use crate::pose::TelemetrySample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Periodic pose sampler with an independent lifecycle from the motion
/// session. `start`/`stop` are idempotent.
pub struct TelemetryPublisher {
    link: Arc<Mutex<DeviceLink>>,
    samples: broadcast::Sender<TelemetrySample>,
    latest_tx: watch::Sender<Option<TelemetrySample>>,
    latest_rx: watch::Receiver<Option<TelemetrySample>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl TelemetryPublisher {
    pub fn new(link: Arc<Mutex<DeviceLink>>) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(None);
        Self {
            link,
            samples,
            latest_tx,
            latest_rx,
            task: std::sync::Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Begin sampling at `interval`. Calling start on a running publisher is
    /// a no-op.
    pub fn start(&self, interval: Duration) {
        let mut slot = self.task.lock().unwrap();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("telemetry already running, start ignored");
            return;
        }

        info!("telemetry started at {:?} interval", interval);
        self.running.store(true, Ordering::Relaxed);
        let link = Arc::clone(&self.link);
        let samples = self.samples.clone();
        let latest = self.latest_tx.clone();
        let running = Arc::clone(&self.running);

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let pose = {
                    let mut link = link.lock().await;
                    link.query_pose().await
                };
                match pose {
                    Ok(pose) => {
                        let sample = TelemetrySample::now(pose);
                        // No subscribers is not an error for a broadcast.
                        let _ = samples.send(sample.clone());
                        let _ = latest.send(Some(sample));
                    }
                    Err(e) => {
                        // Best-effort stream: skip the tick, keep sampling.
                        warn!("telemetry sample skipped: {}", e);
                    }
                }
            }
            debug!("telemetry task exited");
        }));
    }

    /// Stop sampling. Safe to call when already stopped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            info!("telemetry stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to the sample stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetrySample> {
        self.samples.subscribe()
    }

    /// Most recent sample, if any tick has succeeded since start.
    pub fn latest(&self) -> Option<TelemetrySample> {
        self.latest_rx.borrow().clone()
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Pose;
    use crate::transport::{PoseQueryFailure, SimTransport};

    async fn publisher_with_sim() -> (TelemetryPublisher, SimTransport) {
        let sim = SimTransport::new();
        let link = DeviceLink::open(Box::new(sim.clone()), "sim", 0)
            .await
            .expect("sim handshake");
        (TelemetryPublisher::new(Arc::new(Mutex::new(link))), sim)
    }

    #[tokio::test]
    async fn publishes_samples_to_subscribers() {
        let (publisher, sim) = publisher_with_sim().await;
        sim.set_position([1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        let mut rx = publisher.subscribe();

        publisher.start(Duration::from_millis(5));
        let sample = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("sample within deadline")
            .unwrap();
        assert!(sample
            .pose
            .within(&Pose::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0), 1e-6));
        assert!(publisher.latest().is_some());
        publisher.stop();
    }

    #[tokio::test]
    async fn survives_alternating_query_failures() {
        let (publisher, sim) = publisher_with_sim().await;
        sim.set_pose_failure(PoseQueryFailure::EveryOther);
        let mut rx = publisher.subscribe();

        publisher.start(Duration::from_millis(5));
        // Every other tick fails; the stream must keep delivering the
        // successful ones.
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("stream stayed alive")
                .unwrap();
        }
        assert!(publisher.is_running());
        publisher.stop();
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (publisher, _sim) = publisher_with_sim().await;

        publisher.start(Duration::from_millis(10));
        publisher.start(Duration::from_millis(10));
        assert!(publisher.is_running());

        publisher.stop();
        publisher.stop();
        assert!(!publisher.is_running());

        // Restart after stop works.
        publisher.start(Duration::from_millis(10));
        assert!(publisher.is_running());
        publisher.stop();
    }
}
