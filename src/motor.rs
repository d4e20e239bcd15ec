//! Motor driver protocol over CAN.
//!
//! Every request and response is a fixed 8-byte frame whose first byte is the command
//! opcode. Responses echo the opcode and carry a [`ResultCode`]; check it with
//! [`Response::result`] before trusting any decoded field.
//!
//! Multi-byte fields are little-endian. Control responses pack position, speed and
//! current as unsigned fixed-point codes:
//!
//! | Quantity | Bits | Bytes                      | Range              |
//! |----------|------|----------------------------|--------------------|
//! | position | 16   | 3..=4                      | ±12.5 rad          |
//! | speed    | 12   | 5, high nibble of 6        | ±65 rad/s          |
//! | current  | 12   | low nibble of 6, 7         | ±225 A             |
//!
//! Current is turned into output torque with [`TORQUE_CONSTANT`] and [`GEAR_RATIO`].

use libm::roundf;
use thiserror::Error;

use crate::consts::MOTOR_FRAME_SIZE;

/// One request or response frame.
pub type MotorFrame = [u8; MOTOR_FRAME_SIZE];

/// Half-range of the position code (radians).
pub const POSITION_RANGE: f32 = 12.5;
/// Half-range of the speed code (rad/s).
pub const SPEED_RANGE: f32 = 65.0;
/// Half-range of the current code (A).
pub const CURRENT_RANGE: f32 = 225.0;
/// Motor torque constant (N·m/A).
pub const TORQUE_CONSTANT: f32 = 0.11667;
/// Output gear ratio.
pub const GEAR_RATIO: f32 = 9.0;
/// Multiplier from rad/s to RPM; speed requests are sent in RPM.
pub const RAD_S_TO_RPM: f32 = 9.549_296_6;

const POSITION_MAX_CODE: u16 = u16::MAX;
const TWELVE_BIT_MAX_CODE: u16 = 0x0FFF;

/// Errors raised while decoding motor driver frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum MotorError {
    /// The frame carried a different opcode than the one asked for.
    #[error("expected opcode {expected:#04x}, found {found:#04x}")]
    UnexpectedOpcode {
        /// Opcode the caller expected.
        expected: u8,
        /// Opcode found in byte 0.
        found: u8,
    },
    /// Byte 0 is not a known opcode.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// The opcode is known but has no frame layout here.
    #[error("unsupported opcode {0:#04x}")]
    Unsupported(u8),
    /// A parameter or indicator id is out of range.
    #[error("invalid id {0:#04x}")]
    InvalidId(u8),
    /// Fewer than eight bytes were supplied.
    #[error("motor frame too short: {0} bytes")]
    ShortFrame(usize),
}

/// Command opcode in byte 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Restore factory configuration.
    ResetConfiguration = 0x81,
    /// Reload configuration.
    RefreshConfiguration = 0x82,
    /// Write one configuration item.
    ModifyConfiguration = 0x83,
    /// Read one configuration item.
    RetrieveConfiguration = 0x84,
    /// Energize the motor.
    StartMotor = 0x91,
    /// De-energize the motor.
    StopMotor = 0x92,
    /// Closed-loop torque command.
    TorqueControl = 0x93,
    /// Closed-loop speed command.
    SpeedControl = 0x94,
    /// Closed-loop position command.
    PositionControl = 0x95,
    /// Position/time/speed streaming command.
    PtsControl = 0x96,
    /// Abort the active control mode.
    StopControl = 0x97,
    /// Write one runtime parameter.
    ModifyParameter = 0xA1,
    /// Read one runtime parameter.
    RetrieveParameter = 0xA2,
    /// Read the firmware version.
    GetVersion = 0xB1,
    /// Read the fault flags.
    GetFault = 0xB2,
    /// Clear the fault flags.
    AckFault = 0xB3,
    /// Read one runtime indicator.
    RetrieveIndicator = 0xB4,
}

impl Opcode {
    /// Index of the [`ResultCode`] byte in this opcode's response frame.
    pub fn result_index(self) -> usize {
        match self {
            Opcode::ModifyConfiguration
            | Opcode::RetrieveConfiguration
            | Opcode::ModifyParameter => 3,
            Opcode::RetrieveParameter | Opcode::RetrieveIndicator => 2,
            _ => 1,
        }
    }

    /// `true` for the three closed-loop commands whose replies carry telemetry.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Opcode::TorqueControl | Opcode::SpeedControl | Opcode::PositionControl
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = MotorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x81 => Opcode::ResetConfiguration,
            0x82 => Opcode::RefreshConfiguration,
            0x83 => Opcode::ModifyConfiguration,
            0x84 => Opcode::RetrieveConfiguration,
            0x91 => Opcode::StartMotor,
            0x92 => Opcode::StopMotor,
            0x93 => Opcode::TorqueControl,
            0x94 => Opcode::SpeedControl,
            0x95 => Opcode::PositionControl,
            0x96 => Opcode::PtsControl,
            0x97 => Opcode::StopControl,
            0xA1 => Opcode::ModifyParameter,
            0xA2 => Opcode::RetrieveParameter,
            0xB1 => Opcode::GetVersion,
            0xB2 => Opcode::GetFault,
            0xB3 => Opcode::AckFault,
            0xB4 => Opcode::RetrieveIndicator,
            other => return Err(MotorError::UnknownOpcode(other)),
        })
    }
}

/// Outcome reported by the driver in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum ResultCode {
    /// Command executed.
    Success,
    /// Generic failure.
    Fail,
    /// Unknown command.
    UnknownCmd,
    /// Unknown id.
    UnknownId,
    /// Register is read-only.
    ReadOnlyReg,
    /// Unknown register.
    UnknownReg,
    /// Malformed string argument.
    StrFormat,
    /// Malformed data argument.
    DataFormat,
    /// Register is write-only.
    WriteOnlyReg,
    /// Driver is not connected to the motor.
    NotConnected,
    /// Any code not listed above.
    Other(u8),
}

impl ResultCode {
    /// `true` only for [`ResultCode::Success`].
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<u8> for ResultCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ResultCode::Success,
            0x01 => ResultCode::Fail,
            0x02 => ResultCode::UnknownCmd,
            0x03 => ResultCode::UnknownId,
            0x04 => ResultCode::ReadOnlyReg,
            0x05 => ResultCode::UnknownReg,
            0x06 => ResultCode::StrFormat,
            0x07 => ResultCode::DataFormat,
            0x0B => ResultCode::WriteOnlyReg,
            0x80 => ResultCode::NotConnected,
            other => ResultCode::Other(other),
        }
    }
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> u8 {
        match code {
            ResultCode::Success => 0x00,
            ResultCode::Fail => 0x01,
            ResultCode::UnknownCmd => 0x02,
            ResultCode::UnknownId => 0x03,
            ResultCode::ReadOnlyReg => 0x04,
            ResultCode::UnknownReg => 0x05,
            ResultCode::StrFormat => 0x06,
            ResultCode::DataFormat => 0x07,
            ResultCode::WriteOnlyReg => 0x0B,
            ResultCode::NotConnected => 0x80,
            ResultCode::Other(other) => other,
        }
    }
}

/// Value type of a configuration item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum ConfigType {
    /// Stored as `i32`.
    Int,
    /// Stored as `f32`.
    Float,
}

impl ConfigType {
    /// Decodes the type byte. Anything other than `1` reads as [`ConfigType::Int`],
    /// as the driver does.
    pub fn from_byte(byte: u8) -> Self {
        if byte == 1 {
            ConfigType::Float
        } else {
            ConfigType::Int
        }
    }

    /// Encodes the type byte.
    pub fn to_byte(self) -> u8 {
        match self {
            ConfigType::Int => 0,
            ConfigType::Float => 1,
        }
    }
}

/// Configuration item id. The meaning depends on the [`ConfigType`] it is used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ConfigId(pub u8);

#[allow(missing_docs)]
impl ConfigId {
    // integer items
    pub const POLE_PAIRS: Self = Self(0x00);
    pub const RATED_CURRENT: Self = Self(0x01);
    pub const MAX_SPEED: Self = Self(0x02);
    pub const RATED_VOLTAGE: Self = Self(0x06);
    pub const PWM_FREQ: Self = Self(0x07);
    pub const TORQUE_KP_DEFAULT: Self = Self(0x08);
    pub const TORQUE_KI_DEFAULT: Self = Self(0x09);
    pub const SPEED_KP_DEFAULT: Self = Self(0x0C);
    pub const SPEED_KI_DEFAULT: Self = Self(0x0D);
    pub const POSITION_KP_DEFAULT: Self = Self(0x0E);
    pub const POSITION_KI_DEFAULT: Self = Self(0x0F);
    pub const POSITION_KD_DEFAULT: Self = Self(0x10);
    pub const GEAR_RATIO: Self = Self(0x11);
    pub const CAN_ID: Self = Self(0x12);
    pub const CAN_MASTER_ID: Self = Self(0x13);
    pub const ZERO_POSITION: Self = Self(0x14);
    pub const OV_THRESHOLD: Self = Self(0x16);
    pub const UV_THRESHOLD: Self = Self(0x17);
    pub const CAN_BAUDRATE: Self = Self(0x18);
    pub const FW_KP_DEFAULT: Self = Self(0x19);
    pub const FW_KI_DEFAULT: Self = Self(0x1A);
    pub const CAN_PROTOCOL: Self = Self(0x1C);
    pub const OV_TEMP_THRESHOLD: Self = Self(0x20);
    // float items
    pub const RS: Self = Self(0x00);
    pub const LS: Self = Self(0x01);
    pub const BEMF_CONST: Self = Self(0x02);
    pub const TORQUE_CONST: Self = Self(0x03);
    pub const SAMPLING_RESISTOR: Self = Self(0x04);
    pub const AMP_GAIN: Self = Self(0x05);
}

macro_rules! byte_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl TryFrom<u8> for $name {
            type Error = MotorError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )+
                    other => Err(MotorError::InvalidId(other)),
                }
            }
        }
    };
}

byte_enum! {
    /// Runtime tuning parameter id.
    pub enum ParamId {
        /// Current loop proportional gain.
        TorqueKp = 0x00,
        /// Current loop integral gain.
        TorqueKi = 0x01,
        /// Speed loop proportional gain.
        SpeedKp = 0x02,
        /// Speed loop integral gain.
        SpeedKi = 0x03,
        /// Position loop proportional gain.
        PositionKp = 0x04,
        /// Position loop integral gain.
        PositionKi = 0x05,
        /// Position loop derivative gain.
        PositionKd = 0x06,
        /// Flux weakening proportional gain.
        FwKp = 0x07,
        /// Flux weakening integral gain.
        FwKi = 0x08,
    }
}

byte_enum! {
    /// Runtime indicator id.
    pub enum IndicatorId {
        /// Bus voltage (V).
        BusVoltage = 0x00,
        /// Board temperature.
        TempBoard = 0x01,
        /// Motor temperature.
        TempMotor = 0x02,
        /// Input power.
        Power = 0x03,
        /// Phase A current.
        Ia = 0x04,
        /// Phase B current.
        Ib = 0x05,
        /// Phase C current.
        Ic = 0x06,
        /// Alpha-axis current.
        IAlpha = 0x07,
        /// Beta-axis current.
        IBeta = 0x08,
        /// Quadrature current.
        Iq = 0x09,
        /// Direct current.
        Id = 0x0A,
        /// Quadrature current target.
        TargetIq = 0x0B,
        /// Direct current target.
        TargetId = 0x0C,
        /// Quadrature voltage.
        Vq = 0x0D,
        /// Direct voltage.
        Vd = 0x0E,
        /// Alpha-axis voltage.
        VAlpha = 0x0F,
        /// Beta-axis voltage.
        VBeta = 0x10,
        /// Rotor electrical angle.
        ElAngleRotor = 0x11,
        /// Rotor mechanical angle.
        MecAngleRotor = 0x12,
        /// Output shaft mechanical angle.
        MecAngleShaft = 0x13,
        /// Output shaft speed.
        SpeedShaft = 0x14,
        /// Output power.
        OutputPower = 0x15,
    }
}

/// Fault bitmask reported by [`Opcode::GetFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct FaultFlags(pub u8);

#[allow(missing_docs)]
impl FaultFlags {
    pub const NONE: Self = Self(0x00);
    pub const FREQ_TOO_HIGH: Self = Self(0x01);
    pub const OVER_VOLTAGE: Self = Self(0x02);
    pub const UNDER_VOLTAGE: Self = Self(0x04);
    pub const OVER_TEMPERATURE: Self = Self(0x08);
    pub const START_FAIL: Self = Self(0x10);
    pub const OVER_CURRENT: Self = Self(0x40);
    pub const SOFTWARE_EXCEPTION: Self = Self(0x80);
}

impl FaultFlags {
    /// `true` if no fault bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

fn check_len(frame: &[u8]) -> Result<&MotorFrame, MotorError> {
    frame
        .get(..MOTOR_FRAME_SIZE)
        .and_then(|head| <&MotorFrame>::try_from(head).ok())
        .ok_or(MotorError::ShortFrame(frame.len()))
}

fn f32_at(frame: &MotorFrame, at: usize) -> f32 {
    f32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}

fn i32_at(frame: &MotorFrame, at: usize) -> i32 {
    i32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}

fn u32_at(frame: &MotorFrame, at: usize) -> u32 {
    u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}

fn u24_at(frame: &MotorFrame, at: usize) -> u32 {
    u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], 0])
}

fn put_value_and_duration(frame: &mut MotorFrame, value: f32, duration_ms: u32) {
    frame[1..5].copy_from_slice(&value.to_le_bytes());
    frame[5..8].copy_from_slice(&duration_ms.to_le_bytes()[..3]);
}

fn config_value(kind: ConfigType, frame: &MotorFrame) -> f32 {
    match kind {
        ConfigType::Int => i32_at(frame, 4) as f32,
        ConfigType::Float => f32_at(frame, 4),
    }
}

/// A request to the motor driver.
///
/// Durations are in milliseconds and only the low 24 bits go on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    /// Restore factory configuration.
    ResetConfiguration,
    /// Reload configuration.
    RefreshConfiguration,
    /// Write one configuration item. Integer items are truncated toward zero.
    ModifyConfiguration {
        /// Item value type.
        kind: ConfigType,
        /// Item id.
        id: ConfigId,
        /// New value.
        value: f32,
    },
    /// Read one configuration item.
    RetrieveConfiguration {
        /// Item value type.
        kind: ConfigType,
        /// Item id.
        id: ConfigId,
    },
    /// Energize the motor.
    StartMotor,
    /// De-energize the motor.
    StopMotor,
    /// Hold an output torque.
    TorqueControl {
        /// Torque (N·m).
        torque: f32,
        /// How long to hold it; `0` means until the next command.
        duration_ms: u32,
    },
    /// Hold an output speed.
    SpeedControl {
        /// Speed (rad/s); sent as RPM.
        speed: f32,
        /// How long to hold it; `0` means until the next command.
        duration_ms: u32,
    },
    /// Move to an output position.
    PositionControl {
        /// Position (rad).
        position: f32,
        /// Time allowed for the move; `0` means as fast as the driver allows.
        duration_ms: u32,
    },
    /// Abort the active control mode.
    StopControl,
    /// Write one runtime parameter.
    ModifyParameter {
        /// Parameter id.
        id: ParamId,
        /// New value.
        value: f32,
    },
    /// Read one runtime parameter.
    RetrieveParameter {
        /// Parameter id.
        id: ParamId,
    },
    /// Read the firmware version.
    GetVersion,
    /// Read the fault flags.
    GetFault,
    /// Clear the fault flags.
    AckFault,
    /// Read one runtime indicator.
    RetrieveIndicator {
        /// Indicator id.
        id: IndicatorId,
    },
}

impl Request {
    /// Opcode in byte 0 of the encoded frame.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::ResetConfiguration => Opcode::ResetConfiguration,
            Request::RefreshConfiguration => Opcode::RefreshConfiguration,
            Request::ModifyConfiguration { .. } => Opcode::ModifyConfiguration,
            Request::RetrieveConfiguration { .. } => Opcode::RetrieveConfiguration,
            Request::StartMotor => Opcode::StartMotor,
            Request::StopMotor => Opcode::StopMotor,
            Request::TorqueControl { .. } => Opcode::TorqueControl,
            Request::SpeedControl { .. } => Opcode::SpeedControl,
            Request::PositionControl { .. } => Opcode::PositionControl,
            Request::StopControl => Opcode::StopControl,
            Request::ModifyParameter { .. } => Opcode::ModifyParameter,
            Request::RetrieveParameter { .. } => Opcode::RetrieveParameter,
            Request::GetVersion => Opcode::GetVersion,
            Request::GetFault => Opcode::GetFault,
            Request::AckFault => Opcode::AckFault,
            Request::RetrieveIndicator { .. } => Opcode::RetrieveIndicator,
        }
    }

    /// Builds the 8-byte request frame. Unused bytes are zero.
    pub fn encode(&self) -> MotorFrame {
        let mut frame = [0u8; MOTOR_FRAME_SIZE];
        frame[0] = self.opcode() as u8;
        match *self {
            Request::ModifyConfiguration { kind, id, value } => {
                frame[1] = kind.to_byte();
                frame[2] = id.0;
                let data = match kind {
                    ConfigType::Int => (value as i32).to_le_bytes(),
                    ConfigType::Float => value.to_le_bytes(),
                };
                frame[4..8].copy_from_slice(&data);
            }
            Request::RetrieveConfiguration { kind, id } => {
                frame[1] = kind.to_byte();
                frame[2] = id.0;
            }
            Request::TorqueControl {
                torque,
                duration_ms,
            } => put_value_and_duration(&mut frame, torque, duration_ms),
            Request::SpeedControl { speed, duration_ms } => {
                put_value_and_duration(&mut frame, speed * RAD_S_TO_RPM, duration_ms)
            }
            Request::PositionControl {
                position,
                duration_ms,
            } => put_value_and_duration(&mut frame, position, duration_ms),
            Request::ModifyParameter { id, value } => {
                frame[1] = id as u8;
                frame[4..8].copy_from_slice(&value.to_le_bytes());
            }
            Request::RetrieveParameter { id } => frame[1] = id as u8,
            Request::RetrieveIndicator { id } => frame[1] = id as u8,
            Request::ResetConfiguration
            | Request::RefreshConfiguration
            | Request::StartMotor
            | Request::StopMotor
            | Request::StopControl
            | Request::GetVersion
            | Request::GetFault
            | Request::AckFault => {}
        }
        frame
    }

    /// Parses a request frame, as a simulated driver would.
    pub fn decode(frame: &[u8]) -> Result<Self, MotorError> {
        let frame = check_len(frame)?;
        Ok(match Opcode::try_from(frame[0])? {
            Opcode::ResetConfiguration => Request::ResetConfiguration,
            Opcode::RefreshConfiguration => Request::RefreshConfiguration,
            Opcode::ModifyConfiguration => {
                let kind = ConfigType::from_byte(frame[1]);
                Request::ModifyConfiguration {
                    kind,
                    id: ConfigId(frame[2]),
                    value: config_value(kind, frame),
                }
            }
            Opcode::RetrieveConfiguration => Request::RetrieveConfiguration {
                kind: ConfigType::from_byte(frame[1]),
                id: ConfigId(frame[2]),
            },
            Opcode::StartMotor => Request::StartMotor,
            Opcode::StopMotor => Request::StopMotor,
            Opcode::TorqueControl => Request::TorqueControl {
                torque: f32_at(frame, 1),
                duration_ms: u24_at(frame, 5),
            },
            Opcode::SpeedControl => Request::SpeedControl {
                speed: f32_at(frame, 1) / RAD_S_TO_RPM,
                duration_ms: u24_at(frame, 5),
            },
            Opcode::PositionControl => Request::PositionControl {
                position: f32_at(frame, 1),
                duration_ms: u24_at(frame, 5),
            },
            Opcode::PtsControl => return Err(MotorError::Unsupported(frame[0])),
            Opcode::StopControl => Request::StopControl,
            Opcode::ModifyParameter => Request::ModifyParameter {
                id: ParamId::try_from(frame[1])?,
                value: f32_at(frame, 4),
            },
            Opcode::RetrieveParameter => Request::RetrieveParameter {
                id: ParamId::try_from(frame[1])?,
            },
            Opcode::GetVersion => Request::GetVersion,
            Opcode::GetFault => Request::GetFault,
            Opcode::AckFault => Request::AckFault,
            Opcode::RetrieveIndicator => Request::RetrieveIndicator {
                id: IndicatorId::try_from(frame[1])?,
            },
        })
    }
}

fn quantize(value: f32, range: f32, max_code: u16) -> u16 {
    let max = f32::from(max_code);
    let code = roundf((value + range) * max / (2.0 * range));
    code.clamp(0.0, max) as u16
}

fn dequantize(code: u16, range: f32, max_code: u16) -> f32 {
    f32::from(code) * (2.0 * range) / f32::from(max_code) - range
}

/// Telemetry carried by torque, speed and position control responses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ControlReply {
    /// Driver temperature (°C).
    pub temperature: i8,
    /// Output shaft position (rad).
    pub position: f32,
    /// Output shaft speed (rad/s).
    pub speed: f32,
    /// Output shaft torque (N·m).
    pub torque: f32,
}

impl ControlReply {
    /// Decodes bytes 2..8 of a control response.
    pub fn from_frame(frame: &MotorFrame) -> Self {
        let position_code = u16::from_le_bytes([frame[3], frame[4]]);
        let speed_code = (u16::from(frame[5]) << 4) | u16::from(frame[6] >> 4);
        let current_code = (u16::from(frame[6] & 0x0F) << 8) | u16::from(frame[7]);
        let current = dequantize(current_code, CURRENT_RANGE, TWELVE_BIT_MAX_CODE);
        Self {
            temperature: frame[2] as i8,
            position: dequantize(position_code, POSITION_RANGE, POSITION_MAX_CODE),
            speed: dequantize(speed_code, SPEED_RANGE, TWELVE_BIT_MAX_CODE),
            torque: current * TORQUE_CONSTANT * GEAR_RATIO,
        }
    }

    /// Phase current (A) the torque was derived from.
    pub fn current_amps(&self) -> f32 {
        self.torque / (TORQUE_CONSTANT * GEAR_RATIO)
    }

    /// Writes bytes 2..8 of a control response, quantizing and clamping each field.
    pub fn write_into(&self, frame: &mut MotorFrame) {
        let position_code = quantize(self.position, POSITION_RANGE, POSITION_MAX_CODE);
        let speed_code = quantize(self.speed, SPEED_RANGE, TWELVE_BIT_MAX_CODE);
        let current_code = quantize(self.current_amps(), CURRENT_RANGE, TWELVE_BIT_MAX_CODE);
        frame[2] = self.temperature as u8;
        frame[3..5].copy_from_slice(&position_code.to_le_bytes());
        frame[5] = (speed_code >> 4) as u8;
        frame[6] = (((speed_code & 0x0F) << 4) | (current_code >> 8)) as u8;
        frame[7] = (current_code & 0xFF) as u8;
    }
}

/// A response from the motor driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    /// Reply to [`Request::ResetConfiguration`].
    ResetConfiguration {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to [`Request::RefreshConfiguration`].
    RefreshConfiguration {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to [`Request::ModifyConfiguration`].
    ModifyConfiguration {
        /// Outcome.
        result: ResultCode,
        /// Echoed item type.
        kind: ConfigType,
        /// Echoed item id.
        id: ConfigId,
    },
    /// Reply to [`Request::RetrieveConfiguration`].
    RetrieveConfiguration {
        /// Outcome.
        result: ResultCode,
        /// Echoed item type.
        kind: ConfigType,
        /// Echoed item id.
        id: ConfigId,
        /// Item value, widened to `f32` for integer items.
        value: f32,
    },
    /// Reply to [`Request::StartMotor`].
    StartMotor {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to [`Request::StopMotor`].
    StopMotor {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to a torque, speed or position control request.
    Control {
        /// Which control request this answers.
        opcode: Opcode,
        /// Outcome.
        result: ResultCode,
        /// Telemetry snapshot.
        reply: ControlReply,
    },
    /// Reply to [`Request::StopControl`].
    StopControl {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to [`Request::ModifyParameter`].
    ModifyParameter {
        /// Outcome.
        result: ResultCode,
        /// Echoed parameter id.
        id: u8,
    },
    /// Reply to [`Request::RetrieveParameter`].
    RetrieveParameter {
        /// Outcome.
        result: ResultCode,
        /// Echoed parameter id.
        id: u8,
        /// Parameter value (sent as `i32`).
        value: f32,
    },
    /// Reply to [`Request::GetVersion`].
    GetVersion {
        /// Outcome.
        result: ResultCode,
        /// Firmware version word.
        version: u32,
    },
    /// Reply to [`Request::GetFault`].
    GetFault {
        /// Outcome.
        result: ResultCode,
        /// Active faults.
        faults: FaultFlags,
    },
    /// Reply to [`Request::AckFault`].
    AckFault {
        /// Outcome.
        result: ResultCode,
    },
    /// Reply to [`Request::RetrieveIndicator`].
    RetrieveIndicator {
        /// Outcome.
        result: ResultCode,
        /// Echoed indicator id.
        id: u8,
        /// Indicator value.
        value: f32,
    },
}

impl Response {
    /// Opcode echoed in byte 0.
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::ResetConfiguration { .. } => Opcode::ResetConfiguration,
            Response::RefreshConfiguration { .. } => Opcode::RefreshConfiguration,
            Response::ModifyConfiguration { .. } => Opcode::ModifyConfiguration,
            Response::RetrieveConfiguration { .. } => Opcode::RetrieveConfiguration,
            Response::StartMotor { .. } => Opcode::StartMotor,
            Response::StopMotor { .. } => Opcode::StopMotor,
            Response::Control { opcode, .. } => *opcode,
            Response::StopControl { .. } => Opcode::StopControl,
            Response::ModifyParameter { .. } => Opcode::ModifyParameter,
            Response::RetrieveParameter { .. } => Opcode::RetrieveParameter,
            Response::GetVersion { .. } => Opcode::GetVersion,
            Response::GetFault { .. } => Opcode::GetFault,
            Response::AckFault { .. } => Opcode::AckFault,
            Response::RetrieveIndicator { .. } => Opcode::RetrieveIndicator,
        }
    }

    /// The driver's verdict on the request.
    pub fn result(&self) -> ResultCode {
        match *self {
            Response::ResetConfiguration { result }
            | Response::RefreshConfiguration { result }
            | Response::ModifyConfiguration { result, .. }
            | Response::RetrieveConfiguration { result, .. }
            | Response::StartMotor { result }
            | Response::StopMotor { result }
            | Response::Control { result, .. }
            | Response::StopControl { result }
            | Response::ModifyParameter { result, .. }
            | Response::RetrieveParameter { result, .. }
            | Response::GetVersion { result, .. }
            | Response::GetFault { result, .. }
            | Response::AckFault { result }
            | Response::RetrieveIndicator { result, .. } => result,
        }
    }

    /// Parses any response frame.
    pub fn decode(frame: &[u8]) -> Result<Self, MotorError> {
        let frame = check_len(frame)?;
        let opcode = Opcode::try_from(frame[0])?;
        let result = ResultCode::from(frame[opcode.result_index()]);
        Ok(match opcode {
            Opcode::ResetConfiguration => Response::ResetConfiguration { result },
            Opcode::RefreshConfiguration => Response::RefreshConfiguration { result },
            Opcode::ModifyConfiguration => Response::ModifyConfiguration {
                result,
                kind: ConfigType::from_byte(frame[1]),
                id: ConfigId(frame[2]),
            },
            Opcode::RetrieveConfiguration => {
                let kind = ConfigType::from_byte(frame[1]);
                Response::RetrieveConfiguration {
                    result,
                    kind,
                    id: ConfigId(frame[2]),
                    value: config_value(kind, frame),
                }
            }
            Opcode::StartMotor => Response::StartMotor { result },
            Opcode::StopMotor => Response::StopMotor { result },
            Opcode::TorqueControl | Opcode::SpeedControl | Opcode::PositionControl => {
                Response::Control {
                    opcode,
                    result,
                    reply: ControlReply::from_frame(frame),
                }
            }
            Opcode::PtsControl => return Err(MotorError::Unsupported(frame[0])),
            Opcode::StopControl => Response::StopControl { result },
            Opcode::ModifyParameter => Response::ModifyParameter {
                result,
                id: frame[1],
            },
            Opcode::RetrieveParameter => Response::RetrieveParameter {
                result,
                id: frame[1],
                value: i32_at(frame, 4) as f32,
            },
            Opcode::GetVersion => Response::GetVersion {
                result,
                version: u32_at(frame, 4),
            },
            Opcode::GetFault => Response::GetFault {
                result,
                faults: FaultFlags(frame[2]),
            },
            Opcode::AckFault => Response::AckFault { result },
            Opcode::RetrieveIndicator => Response::RetrieveIndicator {
                result,
                id: frame[1],
                value: f32_at(frame, 4),
            },
        })
    }

    /// Parses a response that must answer `expected`.
    pub fn decode_as(expected: Opcode, frame: &[u8]) -> Result<Self, MotorError> {
        let head = check_len(frame)?;
        if head[0] != expected as u8 {
            return Err(MotorError::UnexpectedOpcode {
                expected: expected as u8,
                found: head[0],
            });
        }
        Self::decode(frame)
    }

    /// Builds the 8-byte response frame, as a simulated driver would.
    pub fn encode(&self) -> MotorFrame {
        let mut frame = [0u8; MOTOR_FRAME_SIZE];
        let opcode = self.opcode();
        frame[0] = opcode as u8;
        match *self {
            Response::ModifyConfiguration { kind, id, .. } => {
                frame[1] = kind.to_byte();
                frame[2] = id.0;
            }
            Response::RetrieveConfiguration {
                kind, id, value, ..
            } => {
                frame[1] = kind.to_byte();
                frame[2] = id.0;
                let data = match kind {
                    ConfigType::Int => (value as i32).to_le_bytes(),
                    ConfigType::Float => value.to_le_bytes(),
                };
                frame[4..8].copy_from_slice(&data);
            }
            Response::Control { reply, .. } => reply.write_into(&mut frame),
            Response::ModifyParameter { id, .. } => frame[1] = id,
            Response::RetrieveParameter { id, value, .. } => {
                frame[1] = id;
                frame[4..8].copy_from_slice(&(value as i32).to_le_bytes());
            }
            Response::GetVersion { version, .. } => {
                frame[4..8].copy_from_slice(&version.to_le_bytes());
            }
            Response::GetFault { faults, .. } => frame[2] = faults.0,
            Response::RetrieveIndicator { id, value, .. } => {
                frame[1] = id;
                frame[4..8].copy_from_slice(&value.to_le_bytes());
            }
            Response::ResetConfiguration { .. }
            | Response::RefreshConfiguration { .. }
            | Response::StartMotor { .. }
            | Response::StopMotor { .. }
            | Response::StopControl { .. }
            | Response::AckFault { .. } => {}
        }
        frame[opcode.result_index()] = self.result().into();
        frame
    }
}
