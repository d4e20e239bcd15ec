//! Outbound packet framing.
//!
//! Every packet on the link has the same shape (integers little-endian):
//!
//! | Field          | Size | Notes                                         |
//! |----------------|------|-----------------------------------------------|
//! | start marker   | 1    | [`START_MARKER`]                              |
//! | `packetLength` | 4    | whole packet, header and footer included      |
//! | `sequence`     | 4    | monotonic per sender                          |
//! | `fromId`       | 1    | sender node id                                |
//! | `toId`         | 1    | recipient node id                             |
//! | `msgId`        | 1    | see [`MsgId`]                                 |
//! | payload        | n    | message specific                              |
//! | crc32          | 4    | CRC-32 (IEEE) over start marker .. payload    |
//! | end marker     | 1    | [`END_MARKER`]                                |
//!
//! [`encode_packet`] is the pure builder. [`FrameWriter`] wraps it with a private send
//! buffer and a sequence counter; give each execution context (main loop, CAN ISR,
//! timer ISR) its own writer so two senders never share a buffer mid-build.

use core::fmt::{Arguments, Write as _};

use embedded_io::Write;
use heapless::String;
use thiserror::Error;

use crate::consts::{END_MARKER, HEADER_LEN, PACKET_OVERHEAD, START_MARKER};
use crate::crc::crc32;
use crate::error::Error;
use crate::message::{Feedback, MoveCommand, MsgId};

/// Maximum length of a single INFO log line.
pub const INFO_LINE_LEN: usize = 128;

/// Errors raised while building an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FrameError {
    /// The destination buffer cannot hold the framed packet.
    #[error("send buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall {
        /// Bytes the framed packet needs.
        needed: usize,
        /// Bytes the buffer offers.
        capacity: usize,
    },
    /// The payload cannot be described by a 32-bit `packetLength`.
    #[error("payload too large for a 32-bit packet length")]
    PayloadTooLarge,
}

/// Builds one framed packet into `buf`.
///
/// # Arguments
/// - `buf`: destination; must hold at least `payload.len() + PACKET_OVERHEAD` bytes
/// - `seq`: sequence number written into the header
/// - `from`, `to`: sender and recipient node ids
/// - `msg_id`: raw message id byte
/// - `payload`: message body, may be empty
///
/// # Returns
/// The number of bytes written, i.e. the packet's `packetLength`.
pub fn encode_packet(
    buf: &mut [u8],
    seq: u32,
    from: u8,
    to: u8,
    msg_id: u8,
    payload: &[u8],
) -> Result<usize, FrameError> {
    let total = payload
        .len()
        .checked_add(PACKET_OVERHEAD)
        .ok_or(FrameError::PayloadTooLarge)?;
    let packet_len = u32::try_from(total).map_err(|_| FrameError::PayloadTooLarge)?;
    if buf.len() < total {
        return Err(FrameError::BufferTooSmall {
            needed: total,
            capacity: buf.len(),
        });
    }

    buf[0] = START_MARKER;
    buf[1..5].copy_from_slice(&packet_len.to_le_bytes());
    buf[5..9].copy_from_slice(&seq.to_le_bytes());
    buf[9] = from;
    buf[10] = to;
    buf[11] = msg_id;
    let body_end = 1 + HEADER_LEN + payload.len();
    buf[1 + HEADER_LEN..body_end].copy_from_slice(payload);
    let crc = crc32(&buf[..body_end]);
    buf[body_end..body_end + 4].copy_from_slice(&crc.to_le_bytes());
    buf[body_end + 4] = END_MARKER;
    Ok(total)
}

/// Frames and transmits packets for one node over an `embedded_io` byte link.
///
/// The writer owns an `N`-byte send buffer, so the largest payload it can carry is
/// `N - PACKET_OVERHEAD`. The link is borrowed per call, which lets the same serial
/// handle be polled for input between sends.
///
/// ## Example
///
/// ```rust
/// use axislink::frame::FrameWriter;
/// use axislink::message::MsgId;
///
/// let mut out = [0u8; 64];
/// let mut link: &mut [u8] = &mut out;
/// let mut writer: FrameWriter<64> = FrameWriter::new(0x00);
/// writer.heartbeat(&mut link, 0xFF).unwrap();
/// assert_eq!(writer.sequence(), 1);
/// ```
#[derive(Debug)]
pub struct FrameWriter<const N: usize> {
    buf: [u8; N],
    node_id: u8,
    seq: u32,
    /// Packets handed to the link successfully.
    pub tx_good: u32,
}

impl<const N: usize> FrameWriter<N> {
    /// Creates a writer that stamps `node_id` as the sender of every packet.
    pub fn new(node_id: u8) -> Self {
        Self {
            buf: [0u8; N],
            node_id,
            seq: 0,
            tx_good: 0,
        }
    }

    /// Node id written into the `fromId` field.
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Sequence number the next self-numbered packet will carry.
    pub fn sequence(&self) -> u32 {
        self.seq
    }

    /// Frames `payload` under the writer's own sequence counter and writes it out.
    ///
    /// # Returns
    /// The sequence number used. The counter only advances when the write succeeds.
    pub fn send<W: Write>(
        &mut self,
        link: &mut W,
        to: u8,
        msg_id: MsgId,
        payload: &[u8],
    ) -> Result<u32, Error> {
        let seq = self.seq;
        self.send_with_seq(link, seq, to, msg_id, payload)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(seq)
    }

    /// Frames `payload` with an explicit sequence number and writes it out.
    pub fn send_with_seq<W: Write>(
        &mut self,
        link: &mut W,
        seq: u32,
        to: u8,
        msg_id: MsgId,
        payload: &[u8],
    ) -> Result<(), Error> {
        let len = encode_packet(&mut self.buf, seq, self.node_id, to, msg_id.into(), payload)?;
        link.write_all(&self.buf[..len]).map_err(Error::link)?;
        self.tx_good = self.tx_good.wrapping_add(1);
        trace!("tx {} seq={} to={} len={}", msg_id.as_str(), seq, to, len);
        Ok(())
    }

    /// Acknowledges `acked`, echoing the request's sequence number.
    pub fn ack<W: Write>(&mut self, link: &mut W, to: u8, seq: u32, acked: u8) -> Result<(), Error> {
        self.send_with_seq(link, seq, to, MsgId::Ack, &[acked])
    }

    /// Rejects `rejected`, echoing the request's sequence number.
    pub fn nak<W: Write>(
        &mut self,
        link: &mut W,
        to: u8,
        seq: u32,
        rejected: u8,
    ) -> Result<(), Error> {
        self.send_with_seq(link, seq, to, MsgId::Nak, &[rejected])
    }

    /// Sends an empty HEARTBEAT.
    pub fn heartbeat<W: Write>(&mut self, link: &mut W, to: u8) -> Result<u32, Error> {
        self.send(link, to, MsgId::Heartbeat, &[])
    }

    /// Sends one trajectory row as a MOVE.
    pub fn send_move<W: Write>(
        &mut self,
        link: &mut W,
        to: u8,
        row: &MoveCommand,
    ) -> Result<u32, Error> {
        self.send(link, to, MsgId::Move, &row.encode())
    }

    /// Sends an axis snapshot as FEEDBACK.
    pub fn send_feedback<W: Write>(
        &mut self,
        link: &mut W,
        to: u8,
        feedback: &Feedback,
    ) -> Result<u32, Error> {
        self.send(link, to, MsgId::Feedback, &feedback.encode())
    }

    /// Formats a log line and sends it as INFO.
    ///
    /// Lines longer than [`INFO_LINE_LEN`] are cut at the first fragment that no
    /// longer fits.
    pub fn send_info<W: Write>(
        &mut self,
        link: &mut W,
        to: u8,
        args: Arguments<'_>,
    ) -> Result<u32, Error> {
        let mut line: String<INFO_LINE_LEN> = String::new();
        let _ = line.write_fmt(args);
        self.send(link, to, MsgId::Info, line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::NODE_ID_HOST;

    #[test]
    fn test_encode_packet_layout() {
        let mut buf = [0u8; 32];
        let len = encode_packet(&mut buf, 7, 0x02, 0xFF, 0x0E, &[0xAA, 0xBB]).unwrap();
        assert_eq!(len, PACKET_OVERHEAD + 2);
        assert_eq!(buf[0], START_MARKER);
        assert_eq!(&buf[1..5], &19u32.to_le_bytes());
        assert_eq!(&buf[5..9], &7u32.to_le_bytes());
        assert_eq!(&buf[9..12], &[0x02, 0xFF, 0x0E]);
        assert_eq!(&buf[12..14], &[0xAA, 0xBB]);
        assert_eq!(&buf[14..18], &crc32(&buf[..14]).to_le_bytes());
        assert_eq!(buf[18], END_MARKER);
    }

    #[test]
    fn test_encode_packet_rejects_small_buffer() {
        let mut buf = [0u8; 20];
        assert_eq!(
            encode_packet(&mut buf, 0, 0, 0, 0x07, &[0u8; 4]),
            Err(FrameError::BufferTooSmall {
                needed: 21,
                capacity: 20
            })
        );
    }

    #[test]
    fn test_writer_sequence_and_ack_echo() {
        let mut out = [0u8; 128];
        let mut writer: FrameWriter<64> = FrameWriter::new(0x01);
        {
            let mut link: &mut [u8] = &mut out;
            assert_eq!(writer.heartbeat(&mut link, NODE_ID_HOST), Ok(0));
            writer.ack(&mut link, NODE_ID_HOST, 41, 0x03).unwrap();
            assert_eq!(writer.heartbeat(&mut link, NODE_ID_HOST), Ok(1));
        }
        assert_eq!(writer.tx_good, 3);
        assert_eq!(writer.sequence(), 2);

        // second packet starts after the 17-byte heartbeat
        let ack = &out[PACKET_OVERHEAD..2 * PACKET_OVERHEAD + 1];
        assert_eq!(&ack[5..9], &41u32.to_le_bytes());
        assert_eq!(&ack[9..13], &[0x01, NODE_ID_HOST, 0x08, 0x03]);
    }

    #[test]
    fn test_writer_surfaces_link_errors() {
        let mut out = [0u8; 10];
        let mut link: &mut [u8] = &mut out;
        let mut writer: FrameWriter<64> = FrameWriter::new(0x01);
        assert!(matches!(
            writer.heartbeat(&mut link, NODE_ID_HOST),
            Err(Error::Link(_))
        ));
        assert_eq!(writer.sequence(), 0);
    }

    #[test]
    fn test_send_info_formats_line() {
        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(0x00);
        {
            let mut link: &mut [u8] = &mut out;
            let _ = writer
                .send_info(&mut link, NODE_ID_HOST, format_args!("axis {} ok", 3))
                .unwrap();
        }
        assert_eq!(&out[1..5], &(PACKET_OVERHEAD as u32 + 9).to_le_bytes());
        assert_eq!(out[11], 0xFD);
        assert_eq!(&out[12..21], b"axis 3 ok");
    }
}
