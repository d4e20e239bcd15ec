//! Constants used across the packet link and the axis controller.
//!
//! This module defines the wire layout of a framed packet, the node addressing
//! scheme, buffer sizing and the fixed geometry of a trajectory row.
//!
//! ## Key Concepts
//!
//! - **Markers**: A start and end sentinel byte delimit every packet on the stream.
//! - **Header**: Fixed 11-byte block (`length`, `sequence`, `from`, `to`, `msg id`)
//!   following the start marker.
//! - **Overhead**: Every byte of a packet that is not payload. `packetLength` on the
//!   wire always includes it.
//! - **Rows**: A trajectory row carries one `f32` per axis, little-endian.
//!
//! These values should be used wherever framing or buffer logic is implemented to ensure
//! both ends of a link agree on message boundaries.

/// Sentinel byte opening every packet.
pub const START_MARKER: u8 = 0x01;

/// Sentinel byte closing every packet.
pub const END_MARKER: u8 = 0x04;

/// Size (in bytes) of the little-endian `packetLength` field.
pub const LEN_SIZE: usize = 4;

/// Size (in bytes) of the little-endian `sequence` field.
pub const SEQ_SIZE: usize = 4;

/// Size (in bytes) of the CRC-32 footer.
pub const CRC_SIZE: usize = 4;

/// Length (in bytes) of the fixed header following the start marker.
///
/// `length(4) + sequence(4) + from(1) + to(1) + msg_id(1)`.
pub const HEADER_LEN: usize = LEN_SIZE + SEQ_SIZE + 3;

/// Bytes consumed after the payload: CRC-32 plus the end marker.
pub const FOOTER_LEN: usize = CRC_SIZE + 1;

/// Every byte of a packet that is not payload.
///
/// A packet with an empty payload is exactly this long.
pub const PACKET_OVERHEAD: usize = 1 + HEADER_LEN + FOOTER_LEN;

/// Default upper bound on `packetLength` accepted by the parser.
///
/// Large enough for a full trajectory upload into external RAM.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024 + PACKET_OVERHEAD;

/// Node id of the master (relay) node.
pub const NODE_ID_MASTER: u8 = 0x00;

/// Node id of the host computer.
pub const NODE_ID_HOST: u8 = 0xFF;

/// Number of axes carried in a trajectory row.
pub const AXIS_COUNT: usize = 6;

/// Size (in bytes) of one trajectory row.
pub const ROW_SIZE: usize = AXIS_COUNT * 4;

/// Size (in bytes) of every motor driver request and response frame.
pub const MOTOR_FRAME_SIZE: usize = 8;

/// Size (in bytes) of the scratch window used when draining payload bytes.
///
/// A single parser step never copies more than this many payload bytes.
pub const DRAIN_WINDOW: usize = 256;

/// Default capacity (in bytes) of the parser's scratch payload buffer for
/// small message kinds.
pub const DEFAULT_SCRATCH_LEN: usize = 64;
