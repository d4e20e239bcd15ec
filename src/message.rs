//! Message ids and fixed-shape payloads carried inside framed packets.
//!
//! Payload structs are serialized field by field in little-endian order; no struct is
//! ever reinterpreted as raw bytes.

use crate::consts::{AXIS_COUNT, MOTOR_FRAME_SIZE, ROW_SIZE};

/// Identifies the kind of a framed packet (the `msgId` header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum MsgId {
    /// Liveness probe; acknowledged and otherwise ignored.
    Heartbeat = 0x01,
    /// Arm the axes and start calibration.
    Enable = 0x02,
    /// Start trajectory playback with engaged gains.
    Play = 0x03,
    /// Pause playback and fall back to idle gains.
    Pause = 0x04,
    /// Stop playback and fall back to idle gains.
    Stop = 0x05,
    /// Disarm the axes.
    Disable = 0x06,
    /// Bulk trajectory upload (rows of one `f32` per axis).
    Upload = 0x07,
    /// Positive acknowledgment; the payload is the acknowledged message id.
    Ack = 0x08,
    /// Negative acknowledgment; the payload is the rejected message id.
    Nak = 0x09,
    /// Request a node reboot.
    Reset = 0x0A,
    /// Host is shutting down the session.
    Quit = 0x0B,
    /// Host opened a session.
    Connect = 0x0C,
    /// Host closed a session.
    Disconnect = 0x0D,
    /// One trajectory row applied directly as axis setpoints.
    Move = 0x0E,
    /// Per-axis telemetry snapshot.
    Feedback = 0x0F,
    /// Human-readable log line.
    Info = 0xFD,
    /// Placeholder for an unrecognized message.
    Unknown = 0xFE,
}

impl MsgId {
    /// Human-readable name of the message id.
    pub fn as_str(self) -> &'static str {
        match self {
            MsgId::Heartbeat => "HEARTBEAT",
            MsgId::Enable => "ENABLE",
            MsgId::Play => "PLAY",
            MsgId::Pause => "PAUSE",
            MsgId::Stop => "STOP",
            MsgId::Disable => "DISABLE",
            MsgId::Upload => "UPLOAD",
            MsgId::Ack => "ACK",
            MsgId::Nak => "NAK",
            MsgId::Reset => "RESET",
            MsgId::Quit => "QUIT",
            MsgId::Connect => "CONNECT",
            MsgId::Disconnect => "DISCONNECT",
            MsgId::Move => "MOVE",
            MsgId::Feedback => "FEEDBACK",
            MsgId::Info => "INFO",
            MsgId::Unknown => "UNKNOWN",
        }
    }
}

impl From<MsgId> for u8 {
    fn from(id: MsgId) -> u8 {
        id as u8
    }
}

impl TryFrom<u8> for MsgId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => MsgId::Heartbeat,
            0x02 => MsgId::Enable,
            0x03 => MsgId::Play,
            0x04 => MsgId::Pause,
            0x05 => MsgId::Stop,
            0x06 => MsgId::Disable,
            0x07 => MsgId::Upload,
            0x08 => MsgId::Ack,
            0x09 => MsgId::Nak,
            0x0A => MsgId::Reset,
            0x0B => MsgId::Quit,
            0x0C => MsgId::Connect,
            0x0D => MsgId::Disconnect,
            0x0E => MsgId::Move,
            0x0F => MsgId::Feedback,
            0xFD => MsgId::Info,
            0xFE => MsgId::Unknown,
            other => return Err(other),
        })
    }
}

fn f32_at(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// One trajectory row: a target angle (radians, body frame) per axis.
///
/// This is both the MOVE payload and the layout of a row in the
/// [`TrajectoryBuffer`](crate::trajectory::TrajectoryBuffer).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveCommand {
    /// Target angle per axis, indexed by `axis_id - 1`.
    pub angles: [f32; AXIS_COUNT],
}

impl MoveCommand {
    /// Serializes the row as six little-endian `f32`s.
    pub fn encode(&self) -> [u8; ROW_SIZE] {
        let mut out = [0u8; ROW_SIZE];
        for (chunk, angle) in out.chunks_exact_mut(4).zip(self.angles.iter()) {
            chunk.copy_from_slice(&angle.to_le_bytes());
        }
        out
    }

    /// Parses a row. Returns `None` unless `bytes` is exactly [`ROW_SIZE`] long.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ROW_SIZE {
            return None;
        }
        let mut angles = [0f32; AXIS_COUNT];
        for (i, angle) in angles.iter_mut().enumerate() {
            *angle = f32_at(bytes, i * 4);
        }
        Some(Self { angles })
    }
}

/// Snapshot of one axis, sent upstream as a FEEDBACK payload.
///
/// Wire layout (32 bytes, packed little-endian):
///
/// | Offset | Field        | Type     |
/// |--------|--------------|----------|
/// | 0      | `axis_id`    | `u8`     |
/// | 1      | `mode`       | `u8`     |
/// | 2      | `armed`      | `u8`     |
/// | 3      | `calibrated` | `u8`     |
/// | 4      | `set_point`  | `f32`    |
/// | 8      | `t_send`     | `u32`    |
/// | 12     | `t_recv`     | `u32`    |
/// | 16     | `sent`       | `[u8;8]` |
/// | 24     | `recv`       | `[u8;8]` |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Feedback {
    /// Axis this snapshot belongs to.
    pub axis_id: u8,
    /// Active gain set: `1` engaged, `0` idle.
    pub mode: u8,
    /// Whether the motor driver reported a successful start.
    pub armed: bool,
    /// Whether limit-switch calibration has completed.
    pub calibrated: bool,
    /// Commanded setpoint in the motor frame (radians).
    pub set_point: f32,
    /// Timestamp (µs) of the last request sent to the driver.
    pub t_send: u32,
    /// Timestamp (µs) of the last reply received from the driver.
    pub t_recv: u32,
    /// Last request frame sent to the driver.
    pub sent: [u8; MOTOR_FRAME_SIZE],
    /// Last reply frame received from the driver.
    pub recv: [u8; MOTOR_FRAME_SIZE],
}

impl Feedback {
    /// Encoded payload length in bytes.
    pub const LEN: usize = 4 + 4 + 4 + 4 + 2 * MOTOR_FRAME_SIZE;

    /// Serializes the snapshot.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.axis_id;
        out[1] = self.mode;
        out[2] = u8::from(self.armed);
        out[3] = u8::from(self.calibrated);
        out[4..8].copy_from_slice(&self.set_point.to_le_bytes());
        out[8..12].copy_from_slice(&self.t_send.to_le_bytes());
        out[12..16].copy_from_slice(&self.t_recv.to_le_bytes());
        out[16..24].copy_from_slice(&self.sent);
        out[24..32].copy_from_slice(&self.recv);
        out
    }

    /// Parses a snapshot. Returns `None` unless `bytes` is exactly [`Feedback::LEN`] long.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut sent = [0u8; MOTOR_FRAME_SIZE];
        let mut recv = [0u8; MOTOR_FRAME_SIZE];
        sent.copy_from_slice(&bytes[16..24]);
        recv.copy_from_slice(&bytes[24..32]);
        Some(Self {
            axis_id: bytes[0],
            mode: bytes[1],
            armed: bytes[2] != 0,
            calibrated: bytes[3] != 0,
            set_point: f32_at(bytes, 4),
            t_send: u32_at(bytes, 8),
            t_recv: u32_at(bytes, 12),
            sent,
            recv,
        })
    }
}
