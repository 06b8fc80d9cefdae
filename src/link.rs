//! DeviceLink - exclusive owner of one controller session
//!
//! Owns the transport to a single physical controller and exposes the raw
//! primitives the rest of the driver is built on: move submission, pose and
//! motion-status queries, pivot get/set, travel limits, velocities, analog
//! inputs, stop/halt. Every device-reported failure is mapped to a typed
//! error; a failed read is never replaced with zeros.
//!
//! The handle is a process-local non-negative integer; `-1` means "not
//! connected". It is owned exclusively by this struct and never cloned.

use crate::error::{CommandError, ConnectError, QueryError};
use crate::pose::{PivotPoint, Pose, AXIS_IDS, PIVOT_AXIS_IDS};
use crate::transport::{ControllerTransport, TcpTransport};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info};

/// Sentinel handle value for an unconnected link.
pub const INVALID_HANDLE: i32 = -1;

static NEXT_HANDLE: AtomicI32 = AtomicI32::new(0);

/// Absolute target or per-axis relative delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    Absolute,
    Relative,
}

/// Which travel-range boundary to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Travel {
    Min,
    Max,
}

/// Connection to one hexapod controller.
pub struct DeviceLink {
    transport: Option<Box<dyn ControllerTransport>>,
    handle: i32,
    address: String,
    port: u16,
}

impl DeviceLink {
    /// Connect over TCP and run the identification handshake.
    pub async fn connect(address: &str, port: u16) -> Result<Self, ConnectError> {
        let transport =
            TcpTransport::connect(address, port)
                .await
                .map_err(|source| ConnectError::Transport {
                    address: address.to_string(),
                    port,
                    source,
                })?;
        Self::open(Box::new(transport), address, port).await
    }

    /// Attach an already-established transport (simulator, test double) and
    /// run the identification handshake.
    pub async fn open(
        mut transport: Box<dyn ControllerTransport>,
        address: &str,
        port: u16,
    ) -> Result<Self, ConnectError> {
        let idn = transport
            .query("*IDN?")
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        info!("controller session {} open: {}", handle, idn.trim());
        Ok(Self {
            transport: Some(transport),
            handle,
            address: address.to_string(),
            port,
        })
    }

    /// Session handle; negative once disconnected.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.handle >= 0 && self.transport.is_some()
    }

    pub fn address(&self) -> (&str, u16) {
        (&self.address, self.port)
    }

    /// Close the session and invalidate the handle. Calling this on an
    /// already-disconnected link is a no-op.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("controller session {} closed", self.handle);
        }
        self.handle = INVALID_HANDLE;
    }

    fn transport_mut(&mut self) -> Result<&mut (dyn ControllerTransport + '_), ConnectError> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(ConnectError::NotConnected),
        }
    }

    async fn raw_query(&mut self, line: &str) -> Result<String, QueryError> {
        let transport = self.transport_mut()?;
        Ok(transport.query(line).await?)
    }

    /// Send a command, then read the error register; a non-zero code means the
    /// controller rejected it.
    async fn checked_command(&mut self, line: &str) -> Result<(), CommandError> {
        let transport = self.transport_mut()?;
        transport.command(line).await?;
        let code = self.read_error().await.map_err(CommandError::Confirm)?;
        if code != 0 {
            debug!("command {:?} rejected with code {}", line, code);
            return Err(CommandError::Rejected { code });
        }
        Ok(())
    }

    async fn read_error(&mut self) -> Result<i32, QueryError> {
        let reply = self.raw_query("ERR?").await?;
        reply
            .trim()
            .parse()
            .map_err(|_| QueryError::Malformed(format!("error register: {:?}", reply)))
    }

    /// Submit a move. The command returns as soon as the controller accepts
    /// it; motion completion is the session's job.
    pub async fn send_move(&mut self, mode: MoveMode, target: &Pose) -> Result<(), CommandError> {
        let mnemonic = match mode {
            MoveMode::Absolute => "MOV",
            MoveMode::Relative => "MVR",
        };
        let args = AXIS_IDS
            .iter()
            .zip(target.to_array().iter())
            .map(|(axis, value)| format!("{} {}", axis, value))
            .collect::<Vec<_>>()
            .join(" ");
        self.checked_command(&format!("{} {}", mnemonic, args)).await
    }

    /// Current pose in the fixed X Y Z U V W order.
    pub async fn query_pose(&mut self) -> Result<Pose, QueryError> {
        let reply = self.raw_query("POS? X Y Z U V W").await?;
        Ok(Pose::from_array(parse_six_axes(&reply)?))
    }

    /// Per-axis moving flags. All-false means the stage is idle.
    pub async fn query_moving(&mut self) -> Result<[bool; 6], QueryError> {
        let reply = self.raw_query("\u{5}").await?;
        let mask = u32::from_str_radix(reply.trim(), 16)
            .map_err(|_| QueryError::Malformed(format!("motion status: {:?}", reply)))?;
        let mut flags = [false; 6];
        for (bit, flag) in flags.iter_mut().enumerate() {
            *flag = mask & (1 << bit) != 0;
        }
        Ok(flags)
    }

    /// Current pivot point.
    ///
    /// The controller it replaces reported zeroed coordinates alongside the
    /// failure signal on a bad read; here the error result is authoritative
    /// and no substitute values are produced.
    pub async fn query_pivot(&mut self) -> Result<PivotPoint, QueryError> {
        let reply = self.raw_query("SPI?").await?;
        let values = parse_axis_values(&reply)?;
        let mut pivot = [0.0; 3];
        for (i, axis) in PIVOT_AXIS_IDS.iter().enumerate() {
            pivot[i] = lookup_axis(&values, axis)?;
        }
        Ok(PivotPoint::new(pivot[0], pivot[1], pivot[2]))
    }

    pub async fn set_pivot(&mut self, pivot: &PivotPoint) -> Result<(), CommandError> {
        let args = format!("X {} Y {} Z {}", pivot.x, pivot.y, pivot.z);
        self.checked_command(&format!("SPI {}", args)).await
    }

    /// Travel-range boundary per axis.
    pub async fn query_limits(&mut self, travel: Travel) -> Result<[f64; 6], QueryError> {
        let mnemonic = match travel {
            Travel::Min => "TMN?",
            Travel::Max => "TMX?",
        };
        let reply = self.raw_query(mnemonic).await?;
        parse_six_axes(&reply)
    }

    /// Closed-loop velocity of the first axis, in mm/s.
    pub async fn query_velocity(&mut self) -> Result<f64, QueryError> {
        let reply = self.raw_query("VEL? X").await?;
        let values = parse_axis_values(&reply)?;
        lookup_axis(&values, "X")
    }

    /// Platform velocity of the whole stage, in mm/s.
    pub async fn query_system_velocity(&mut self) -> Result<f64, QueryError> {
        let reply = self.raw_query("VLS?").await?;
        reply
            .trim()
            .parse()
            .map_err(|_| QueryError::Malformed(format!("system velocity: {:?}", reply)))
    }

    /// Space-separated identifiers of the configured axes, e.g. `"X Y Z U V W"`.
    pub async fn configured_axes(&mut self) -> Result<String, QueryError> {
        let reply = self.raw_query("SAI?").await?;
        Ok(reply
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Sample the given analog input channels, in channel order.
    pub async fn query_analog_inputs(&mut self, channels: &[u16]) -> Result<Vec<f64>, QueryError> {
        let mut readings = Vec::with_capacity(channels.len());
        for channel in channels {
            let reply = self.raw_query(&format!("TAV? {}", channel)).await?;
            let values = parse_axis_values(&reply)?;
            readings.push(lookup_axis(&values, &channel.to_string())?);
        }
        Ok(readings)
    }

    /// Immediate stop of all axes. Fire-and-forget: callable mid-move, does
    /// not wait for the stage to come to rest.
    pub async fn stop(&mut self) -> Result<(), CommandError> {
        let transport = self.transport_mut()?;
        transport.command("\u{18}").await?;
        // Stop latches error code 10; clear it so the next command's
        // confirmation read sees a clean register.
        let _ = self.read_error().await;
        Ok(())
    }

    /// Halt motion with the configured deceleration ramp.
    pub async fn halt(&mut self) -> Result<(), CommandError> {
        let transport = self.transport_mut()?;
        transport.command("HLT").await?;
        let _ = self.read_error().await;
        Ok(())
    }
}

/// Parse `AXIS=value` reply lines into pairs, trimming continuation padding.
fn parse_axis_values(reply: &str) -> Result<Vec<(String, f64)>, QueryError> {
    let mut values = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (axis, value) = line
            .split_once('=')
            .ok_or_else(|| QueryError::Malformed(format!("expected AXIS=value, got {:?}", line)))?;
        let value = value
            .trim()
            .parse()
            .map_err(|_| QueryError::Malformed(format!("bad value in {:?}", line)))?;
        values.push((axis.trim().to_string(), value));
    }
    Ok(values)
}

fn lookup_axis(values: &[(String, f64)], axis: &str) -> Result<f64, QueryError> {
    values
        .iter()
        .find(|(a, _)| a == axis)
        .map(|(_, v)| *v)
        .ok_or_else(|| QueryError::Malformed(format!("axis {} missing from reply", axis)))
}

/// Collect all six axes in the fixed order, regardless of reply order.
fn parse_six_axes(reply: &str) -> Result<[f64; 6], QueryError> {
    let values = parse_axis_values(reply)?;
    let mut out = [0.0; 6];
    for (i, axis) in AXIS_IDS.iter().enumerate() {
        out[i] = lookup_axis(&values, axis)?;
    }
    Ok(out)
}
