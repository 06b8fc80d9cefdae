//! hexd - Hexapod stage daemon
//!
//! Connects to one configured stage, streams pose telemetry as JSON lines on
//! stdout, and mirrors motion events to the log until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use hexd::{StageConfig, StageService};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hexd")]
#[command(about = "Hexapod stage daemon - pose telemetry and motion event stream")]
#[command(version)]
struct Args {
    /// Path to the stage configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run against the built-in controller simulator instead of hardware
    #[arg(long)]
    sim: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("HEXD_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/stage_a.yaml".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.get_config_path();

    std::env::set_var("RUST_LOG", "info");
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Hexapod Stage Daemon");
    info!("Using config: {}", config_path);

    let mut config = StageConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path))?;
    if args.sim {
        config.stage.link = Some(hexd::LinkMode::Sim);
        info!("Simulator link forced by --sim");
    }

    let service = match StageService::connect(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Stage connection failed: {}", e);
            error!("Make sure:");
            error!("   - Controller is powered and reachable");
            error!("   - Address and port in the config are correct");
            return Err(e);
        }
    };

    let mut samples = service.telemetry().subscribe();
    let mut events = service.subscribe_events();
    service.start_telemetry();
    info!("Streaming telemetry, Ctrl+C to stop");

    loop {
        tokio::select! {
            sample = samples.recv() => {
                match sample {
                    Ok(sample) => {
                        let label = service.resolve_pose(&sample.pose);
                        println!(
                            "{}",
                            serde_json::json!({
                                "timestamp": sample.timestamp,
                                "pose": sample.pose,
                                "named": label.to_string(),
                            })
                        );
                    }
                    // Lagged receivers resubscribe implicitly on next recv.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        info!("telemetry lagged, dropped {} samples", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    info!("{}", serde_json::to_string(&event)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    info!("Performing graceful shutdown");
    service.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
