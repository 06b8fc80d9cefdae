//! StageService - composition and teardown ordering
//!
//! Wires one connected [`DeviceLink`] into the session/telemetry/pivot/
//! resolver stack and owns the teardown contract: stop telemetry first, drain
//! the motion gate, then invalidate the handle. Shutdown is idempotent and
//! tolerated on an already-dead link.

use crate::config::{LinkMode, StageConfig};
use crate::error::QueryError;
use crate::events::{self, EventSender, StageEvent};
use crate::link::{DeviceLink, Travel};
use crate::pivot::PivotStore;
use crate::pose::Pose;
use crate::poses::{NamedPoseTable, PoseResolver, ResolvedPose};
use crate::session::MotionSession;
use crate::telemetry::TelemetryPublisher;
use crate::transport::SimTransport;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

/// One connected hexapod stage with its full driver stack.
pub struct StageService {
    link: Arc<Mutex<DeviceLink>>,
    session: MotionSession,
    telemetry: TelemetryPublisher,
    pivot: PivotStore,
    resolver: std::sync::Mutex<PoseResolver>,
    events: EventSender,
    config: StageConfig,
    shut_down: AtomicBool,
}

impl StageService {
    /// Connect to the configured controller and build the driver stack.
    pub async fn connect(config: StageConfig) -> Result<Self> {
        let address = config.stage.address.clone();
        let port = config.port();
        info!(
            "connecting to stage {} at {}:{}",
            config.stage.name, address, port
        );

        let link = match config.link_mode() {
            LinkMode::Tcp => DeviceLink::connect(&address, port).await?,
            LinkMode::Sim => {
                DeviceLink::open(Box::new(SimTransport::new()), &address, port).await?
            }
        };
        let link = Arc::new(Mutex::new(link));

        let resolver = match config.pose_table_path() {
            Some(path) => PoseResolver::load_from_path(path, config.resolver_tolerance())
                .context("failed to load named pose table")?,
            None => PoseResolver::new(NamedPoseTable::default(), config.resolver_tolerance()),
        };

        let (events, _) = events::channel();
        let session = MotionSession::new(Arc::clone(&link), events.clone(), config.motion_config());
        let telemetry = TelemetryPublisher::new(Arc::clone(&link));
        let pivot = PivotStore::new(Arc::clone(&link), events.clone());

        info!("stage {} ready", config.stage.name);
        Ok(Self {
            link,
            session,
            telemetry,
            pivot,
            resolver: std::sync::Mutex::new(resolver),
            events,
            config,
            shut_down: AtomicBool::new(false),
        })
    }

    pub async fn connect_with_config_path(path: &str) -> Result<Self> {
        let config = StageConfig::load_from_path(path)?;
        Self::connect(config).await
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn session(&self) -> &MotionSession {
        &self.session
    }

    pub fn telemetry(&self) -> &TelemetryPublisher {
        &self.telemetry
    }

    pub fn pivot(&self) -> &PivotStore {
        &self.pivot
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    /// Start telemetry at the configured interval.
    pub fn start_telemetry(&self) {
        self.telemetry.start(self.config.telemetry_interval());
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_connected()
    }

    pub async fn current_pose(&self) -> Result<Pose, QueryError> {
        self.link.lock().await.query_pose().await
    }

    /// Classify the current pose against the named pose table.
    pub async fn where_am_i(&self) -> Result<ResolvedPose, QueryError> {
        let pose = self.current_pose().await?;
        Ok(self.resolver.lock().unwrap().resolve(&pose))
    }

    /// Classify an already-captured pose (e.g. a telemetry sample) without
    /// touching the device.
    pub fn resolve_pose(&self, pose: &Pose) -> ResolvedPose {
        self.resolver.lock().unwrap().resolve(pose)
    }

    /// Re-read the named pose table from its backing file.
    pub fn reload_pose_table(&self) -> Result<()> {
        self.resolver.lock().unwrap().reload()
    }

    pub async fn travel_limits(&self, travel: Travel) -> Result<[f64; 6], QueryError> {
        self.link.lock().await.query_limits(travel).await
    }

    pub async fn velocity(&self) -> Result<f64, QueryError> {
        self.link.lock().await.query_velocity().await
    }

    pub async fn system_velocity(&self) -> Result<f64, QueryError> {
        self.link.lock().await.query_system_velocity().await
    }

    pub async fn configured_axes(&self) -> Result<String, QueryError> {
        self.link.lock().await.configured_axes().await
    }

    pub async fn analog_inputs(&self, channels: &[u16]) -> Result<Vec<f64>, QueryError> {
        self.link.lock().await.query_analog_inputs(channels).await
    }

    /// Ordered teardown: telemetry first, then drain the motion gate, then
    /// invalidate the handle. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down stage {}", self.config.stage.name);
        self.telemetry.stop();
        // No new move can matter past this point; waiting on the gate
        // guarantees no poll loop still needs the link.
        self.session.wait_idle().await;
        self.link.lock().await.disconnect();
        info!("stage {} shut down", self.config.stage.name);
    }
}

impl Drop for StageService {
    fn drop(&mut self) {
        // Best effort: the async teardown path is preferred, but make sure
        // the sampling task dies and the handle is invalidated.
        if !self.shut_down.load(Ordering::SeqCst) {
            self.telemetry.stop();
            if let Ok(mut link) = self.link.try_lock() {
                link.disconnect();
            }
        }
    }
}
