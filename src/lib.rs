//! hexd - Hexapod stage driver for photonics assembly
//!
//! Async driver for six-axis hexapod motion controllers speaking the GCS
//! ASCII protocol over TCP. Wraps the raw command set in a safe surface:
//! serialized moves with completion polling, continuous pose telemetry,
//! named-pose classification, and pivot-point management.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hexd::{StageConfig, StageService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StageConfig::load_from_path("config/stage_a.yaml")?;
//!     let service = StageService::connect(config).await?;
//!     service.start_telemetry();
//!
//!     let pose = service.current_pose().await?;
//!     println!("at {} ({})", pose, service.resolve_pose(&pose));
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **StageService**: High-level composition and teardown ordering
//! - **DeviceLink**: Connection handle and GCS wire primitives
//! - **MotionSession**: Serialized moves with completion polling
//! - **TelemetryPublisher**: Periodic best-effort pose sampling
//! - **PoseResolver**: Named-pose table classification
//! - **PivotStore**: Rotation-center get/set

pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod pivot;
pub mod pose;
pub mod poses;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod transport;

// High-level exports for easy usage
pub use config::{LinkMode, StageConfig};
pub use error::{CommandError, ConnectError, MotionError, QueryError};
pub use events::StageEvent;
pub use link::{DeviceLink, MoveMode, Travel};
pub use pose::{PivotPoint, Pose, TelemetrySample, AXIS_IDS};
pub use poses::{NamedPose, NamedPoseTable, PoseResolver, ResolvedPose};
pub use service::StageService;
pub use session::{MotionConfig, MotionSession};
pub use telemetry::TelemetryPublisher;

// Core component exports for advanced usage
pub use pivot::PivotStore;
pub use transport::{ControllerTransport, SimTransport, TcpTransport};
