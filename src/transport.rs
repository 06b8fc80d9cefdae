//! Controller transport layer
//!
//! [`ControllerTransport`] is the seam between the driver and the physical
//! link. The wire dialect is the vendor's ASCII command set (`MOV`, `POS?`,
//! `ERR?`, single control bytes for motion status and stop-all); framing lives
//! here so [`crate::link::DeviceLink`] only deals in commands and replies.
//!
//! Two implementations ship: [`TcpTransport`] for real controllers and
//! [`SimTransport`], an in-memory controller used by the test suite and the
//! daemon's `--sim` mode.

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Raw command/query surface against one physical controller.
///
/// `command` sends a line that produces no reply; `query` sends a line and
/// reads the complete (possibly multi-line) reply. Implementations own the
/// framing; callers never see line terminators.
#[async_trait]
pub trait ControllerTransport: Send {
    async fn command(&mut self, line: &str) -> io::Result<()>;
    async fn query(&mut self, line: &str) -> io::Result<String>;
}

/// Single control bytes are sent unframed; everything else gets a newline.
fn frame(line: &str) -> Vec<u8> {
    let bytes = line.as_bytes();
    if bytes.len() == 1 && bytes[0] < 0x20 {
        bytes.to_vec()
    } else {
        let mut framed = bytes.to_vec();
        framed.push(b'\n');
        framed
    }
}

/// TCP transport to a physical controller.
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpTransport {
    pub async fn connect(address: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((address, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        debug!("TCP transport connected to {}:{}", address, port);
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn read_reply(&mut self) -> io::Result<String> {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "controller closed connection",
                ));
            }
            // Multi-line replies mark continuation with a trailing space
            // before the line feed; the last line has none.
            let continued = line.trim_end_matches('\n').ends_with(' ');
            reply.push_str(&line);
            if !continued {
                break;
            }
        }
        Ok(reply.trim_end().to_string())
    }
}

#[async_trait]
impl ControllerTransport for TcpTransport {
    async fn command(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(&frame(line)).await?;
        self.writer.flush().await
    }

    async fn query(&mut self, line: &str) -> io::Result<String> {
        self.writer.write_all(&frame(line)).await?;
        self.writer.flush().await?;
        self.read_reply().await
    }
}

/// How the simulator treats pose queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoseQueryFailure {
    #[default]
    Never,
    /// Every second pose query fails with a transport error. Exercises the
    /// telemetry stream's skip-and-continue behavior.
    EveryOther,
}

#[derive(Debug)]
struct SimState {
    position: [f64; 6],
    pivot: [f64; 3],
    axis_velocity: f64,
    system_velocity: f64,
    limits_min: [f64; 6],
    limits_max: [f64; 6],
    /// Motion-status queries left before the stage reports idle.
    settle_remaining: u32,
    /// Ticks a fresh move stays "moving".
    settle_after: u32,
    /// Never settle; models a wedged controller.
    hold_moving: bool,
    /// Reject the next moves with error code 7 (out of travel range).
    reject_moves: bool,
    pose_failure: PoseQueryFailure,
    pose_query_count: u64,
    last_error: i32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            position: [0.0; 6],
            pivot: [0.0; 3],
            axis_velocity: 10.0,
            system_velocity: 20.0,
            limits_min: [-50.0, -50.0, -25.0, -15.0, -15.0, -30.0],
            limits_max: [50.0, 50.0, 25.0, 15.0, 15.0, 30.0],
            settle_remaining: 0,
            settle_after: 2,
            hold_moving: false,
            reject_moves: false,
            pose_failure: PoseQueryFailure::Never,
            pose_query_count: 0,
            last_error: 0,
        }
    }
}

/// Simulated hexapod controller speaking the same ASCII dialect as the real
/// hardware.
///
/// Clones share state, so a test can keep a handle for inspection and fault
/// injection while the driver owns the transport.
#[derive(Clone, Default)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of motion-status polls a move reports "moving" before settling.
    pub fn set_settle_after(&self, ticks: u32) {
        self.state.lock().unwrap().settle_after = ticks;
    }

    /// Keep reporting motion forever until stopped or halted.
    pub fn set_hold_moving(&self, hold: bool) {
        self.state.lock().unwrap().hold_moving = hold;
    }

    /// Make subsequent move commands fail with controller error 7.
    pub fn set_reject_moves(&self, reject: bool) {
        self.state.lock().unwrap().reject_moves = reject;
    }

    pub fn set_pose_failure(&self, mode: PoseQueryFailure) {
        self.state.lock().unwrap().pose_failure = mode;
    }

    pub fn set_position(&self, position: [f64; 6]) {
        self.state.lock().unwrap().position = position;
    }

    pub fn position(&self) -> [f64; 6] {
        self.state.lock().unwrap().position
    }

    fn apply_command(state: &mut SimState, line: &str) {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("MOV") | Some("MVR") => {
                if state.reject_moves {
                    state.last_error = 7;
                    return;
                }
                let relative = line.starts_with("MVR");
                while let (Some(axis), Some(value)) = (tokens.next(), tokens.next()) {
                    let Ok(value) = value.parse::<f64>() else {
                        state.last_error = 23; // invalid argument
                        return;
                    };
                    if let Some(idx) = axis_index(axis) {
                        if relative {
                            state.position[idx] += value;
                        } else {
                            state.position[idx] = value;
                        }
                    }
                }
                state.settle_remaining = state.settle_after;
            }
            Some("SPI") => {
                while let (Some(axis), Some(value)) = (tokens.next(), tokens.next()) {
                    let Ok(value) = value.parse::<f64>() else {
                        state.last_error = 23;
                        return;
                    };
                    if let Some(idx) = axis_index(axis).filter(|&i| i < 3) {
                        state.pivot[idx] = value;
                    }
                }
            }
            Some("HLT") | Some("\u{18}") => {
                state.settle_remaining = 0;
                state.hold_moving = false;
                state.last_error = 10; // stop latches code 10, like the hardware
            }
            _ => state.last_error = 2, // unknown command
        }
    }

    fn answer_query(state: &mut SimState, line: &str) -> io::Result<String> {
        let reply = match line.split_whitespace().next() {
            Some("*IDN?") => "Simulated Motion Systems, H-850 hexapod, 0, 1.0".to_string(),
            Some("POS?") => {
                state.pose_query_count += 1;
                let fail = state.pose_failure == PoseQueryFailure::EveryOther
                    && state.pose_query_count % 2 == 1;
                if fail {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "simulated pose read failure",
                    ));
                }
                axis_lines(&state.position)
            }
            Some("SPI?") => {
                let axes = ["X", "Y", "Z"];
                axes.iter()
                    .enumerate()
                    .map(|(i, axis)| format!("{}={:.6}", axis, state.pivot[i]))
                    .collect::<Vec<_>>()
                    .join(" \n")
            }
            Some("TMN?") => axis_lines(&state.limits_min),
            Some("TMX?") => axis_lines(&state.limits_max),
            Some("VEL?") => format!("X={:.6}", state.axis_velocity),
            Some("VLS?") => format!("{:.6}", state.system_velocity),
            Some("SAI?") => "X \nY \nZ \nU \nV \nW".to_string(),
            Some("TAV?") => {
                let channel: u16 = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                // Deterministic per-channel voltage for tests.
                format!("{}={:.6}", channel, 0.1 * f64::from(channel))
            }
            Some("ERR?") => {
                let code = state.last_error;
                state.last_error = 0;
                code.to_string()
            }
            Some("\u{5}") => {
                let moving = state.hold_moving || state.settle_remaining > 0;
                if state.settle_remaining > 0 {
                    state.settle_remaining -= 1;
                }
                if moving {
                    "3f".to_string()
                } else {
                    "0".to_string()
                }
            }
            _ => {
                state.last_error = 2;
                String::new()
            }
        };
        Ok(reply)
    }
}

fn axis_index(axis: &str) -> Option<usize> {
    crate::pose::AXIS_IDS.iter().position(|&a| a == axis)
}

fn axis_lines(values: &[f64; 6]) -> String {
    crate::pose::AXIS_IDS
        .iter()
        .enumerate()
        .map(|(i, axis)| format!("{}={:.6}", axis, values[i]))
        .collect::<Vec<_>>()
        .join(" \n")
}

#[async_trait]
impl ControllerTransport for SimTransport {
    async fn command(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        SimTransport::apply_command(&mut state, line);
        Ok(())
    }

    async fn query(&mut self, line: &str) -> io::Result<String> {
        let mut state = self.state.lock().unwrap();
        SimTransport::answer_query(&mut state, line)
    }
}
