//! Incremental packet parser.
//!
//! The parser pulls bytes out of a [`RingBuffer`] and rebuilds one packet at a time.
//! It never blocks and never needs the whole packet in memory: payload bytes are
//! drained in windows of at most [`DRAIN_WINDOW`] bytes per step, and each window is
//! routed to wherever the [`PacketHandler`] asked for it.
//!
//! ## State machine
//!
//! ```text
//! AwaitStart ──start marker──▶ AwaitHeader ──length ok──▶ AwaitPayloadCrc ──footer──▶ PacketComplete
//!     ▲                            │ length out of range                                   │
//!     └────────────────────────────┴───────────────────────────────────────────────────────┘
//! ```
//!
//! A packet that fails its CRC or end-marker check still reaches `PacketComplete`
//! with `is_valid == false`, which keeps the stream aligned on the next packet. Only a
//! header whose declared length is out of bounds forces a marker scan.
//!
//! There is no staleness timeout. A packet cut off mid-way waits in its current
//! state until more bytes arrive; call [`PacketParser::reset`] to abandon it.

use heapless::Vec;

use crate::consts::{
    DEFAULT_MAX_PACKET_SIZE, DEFAULT_SCRATCH_LEN, DRAIN_WINDOW, END_MARKER, FOOTER_LEN,
    HEADER_LEN, PACKET_OVERHEAD, START_MARKER,
};
use crate::crc::RunningCrc;
use crate::message::MsgId;
use crate::ring::RingBuffer;

/// Where the parser is in the current packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum ParseState {
    /// Scanning for the start marker.
    AwaitStart,
    /// Waiting for the fixed-size header.
    AwaitHeader,
    /// Draining payload bytes, then the CRC and end marker.
    AwaitPayloadCrc,
    /// A packet has been checked and is ready to hand out.
    PacketComplete,
}

/// Header fields and verdict of one parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct PacketInfo {
    /// Declared `packetLength`, overhead included.
    pub length: u32,
    /// Sender-assigned sequence number.
    pub sequence: u32,
    /// `length - PACKET_OVERHEAD`.
    pub payload_size: usize,
    /// Sender node id.
    pub from: u8,
    /// Recipient node id.
    pub to: u8,
    /// Raw message id.
    pub msg_id: u8,
    /// CRC and end marker matched, and the payload was accepted.
    pub is_valid: bool,
}

impl PacketInfo {
    /// The message id, if it is one this crate knows.
    pub fn msg(&self) -> Option<MsgId> {
        MsgId::try_from(self.msg_id).ok()
    }
}

/// Where the payload of a packet should go, decided once the header is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum PayloadRoute {
    /// Collect into the parser's scratch buffer and pass to
    /// [`PacketHandler::on_packet`].
    Scratch,
    /// Stream through [`PacketHandler::bulk_write`] as it arrives.
    Bulk,
    /// Drain and drop; the packet is still validated and delivered with an empty
    /// payload.
    Discard,
    /// Drain and drop, and mark the packet invalid.
    Reject,
}

/// Receives the output of a [`PacketParser`].
pub trait PacketHandler {
    /// Chooses where the payload of `info` goes. Called once per packet, right after
    /// the header was accepted.
    fn route(&mut self, info: &PacketInfo) -> PayloadRoute;

    /// Receives a window of bulk payload starting at byte `offset` of the payload.
    ///
    /// Called before the CRC is known; commit nothing until
    /// [`on_packet`](PacketHandler::on_packet) runs.
    fn bulk_write(&mut self, info: &PacketInfo, offset: usize, chunk: &[u8]) {
        let _ = (info, offset, chunk);
    }

    /// Called once for every packet that passed validation.
    ///
    /// `payload` holds the scratch contents for [`PayloadRoute::Scratch`] and is empty
    /// otherwise.
    fn on_packet(&mut self, info: &PacketInfo, payload: &[u8]);
}

/// Tunables for [`PacketParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Largest `packetLength` accepted. Longer headers are treated as noise.
    pub max_packet_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Rebuilds packets from a byte stream, one state transition per [`step`](Self::step).
///
/// `SCRATCH` bounds the payload size of [`PayloadRoute::Scratch`] packets; a larger
/// scratch packet is rejected.
#[derive(Debug)]
pub struct PacketParser<const SCRATCH: usize = DEFAULT_SCRATCH_LEN> {
    config: ParserConfig,
    state: ParseState,
    info: PacketInfo,
    crc: RunningCrc,
    route: PayloadRoute,
    payload_read: usize,
    scratch: Vec<u8, SCRATCH>,
    /// Packets delivered with a valid CRC.
    pub rx_good: u32,
    /// Packets dropped for a bad length, CRC, end marker or rejected payload.
    pub rx_bad: u32,
}

impl<const SCRATCH: usize> Default for PacketParser<SCRATCH> {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl<const SCRATCH: usize> PacketParser<SCRATCH> {
    /// Creates a parser waiting for its first start marker.
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            state: ParseState::AwaitStart,
            info: PacketInfo::default(),
            crc: RunningCrc::new(),
            route: PayloadRoute::Discard,
            payload_read: 0,
            scratch: Vec::new(),
            rx_good: 0,
            rx_bad: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// The configuration in use.
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Abandons any packet in progress and goes back to scanning for a start marker.
    ///
    /// Bytes already taken out of the ring are not restored.
    pub fn reset(&mut self) {
        if self.state != ParseState::AwaitStart {
            debug!("parser reset in state {}", self.state as u8);
        }
        self.state = ParseState::AwaitStart;
        self.info = PacketInfo::default();
        self.payload_read = 0;
        self.scratch.clear();
    }

    /// Advances the state machine by one transition.
    ///
    /// # Returns
    /// `Some(info)` when a packet finished, valid or not. The handler's
    /// [`on_packet`](PacketHandler::on_packet) has already run for valid packets.
    pub fn step<H: PacketHandler>(
        &mut self,
        ring: &mut RingBuffer<'_>,
        handler: &mut H,
    ) -> Option<PacketInfo> {
        match self.state {
            ParseState::AwaitStart => {
                if ring.consume_until(START_MARKER) {
                    self.begin_packet();
                }
                None
            }
            ParseState::AwaitHeader => {
                if ring.len() >= HEADER_LEN {
                    self.read_header(ring, handler);
                }
                None
            }
            ParseState::AwaitPayloadCrc => {
                self.drain_payload(ring, handler);
                if self.payload_read == self.info.payload_size && ring.len() >= FOOTER_LEN {
                    self.read_footer(ring);
                }
                None
            }
            ParseState::PacketComplete => Some(self.finish(handler)),
        }
    }

    /// Steps until a packet completes or no further progress is possible with the
    /// bytes currently buffered.
    pub fn drive<H: PacketHandler>(
        &mut self,
        ring: &mut RingBuffer<'_>,
        handler: &mut H,
    ) -> Option<PacketInfo> {
        loop {
            let state = self.state;
            let buffered = ring.len();
            if let Some(info) = self.step(ring, handler) {
                return Some(info);
            }
            if self.state == state && ring.len() == buffered {
                return None;
            }
        }
    }

    fn begin_packet(&mut self) {
        self.info = PacketInfo::default();
        self.payload_read = 0;
        self.scratch.clear();
        self.crc = RunningCrc::new();
        self.crc.update(&[START_MARKER]);
        self.state = ParseState::AwaitHeader;
    }

    fn read_header<H: PacketHandler>(&mut self, ring: &mut RingBuffer<'_>, handler: &mut H) {
        let mut header = [0u8; HEADER_LEN];
        let _ = ring.read_bytes(&mut header);
        self.crc.update(&header);

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        self.info.length = length;
        self.info.sequence = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        self.info.from = header[8];
        self.info.to = header[9];
        self.info.msg_id = header[10];

        let declared = length as usize;
        if declared < PACKET_OVERHEAD || declared > self.config.max_packet_size {
            warn!(
                "invalid packet length {} (seq={} msg={}), resyncing",
                length,
                self.info.sequence,
                self.info.msg_id
            );
            self.rx_bad = self.rx_bad.wrapping_add(1);
            self.state = ParseState::AwaitStart;
            return;
        }
        self.info.payload_size = declared - PACKET_OVERHEAD;

        self.route = handler.route(&self.info);
        if self.route == PayloadRoute::Scratch && self.info.payload_size > SCRATCH {
            debug!(
                "payload of {} bytes exceeds scratch ({}), rejecting msg {}",
                self.info.payload_size,
                SCRATCH,
                self.info.msg_id
            );
            self.route = PayloadRoute::Reject;
        }
        self.state = ParseState::AwaitPayloadCrc;
    }

    fn drain_payload<H: PacketHandler>(&mut self, ring: &mut RingBuffer<'_>, handler: &mut H) {
        let remaining = self.info.payload_size - self.payload_read;
        let want = remaining.min(DRAIN_WINDOW).min(ring.len());
        if want == 0 {
            return;
        }
        let mut window = [0u8; DRAIN_WINDOW];
        let n = ring.read_bytes(&mut window[..want]);
        let chunk = &window[..n];
        self.crc.update(chunk);
        match self.route {
            PayloadRoute::Scratch => {
                if self.scratch.extend_from_slice(chunk).is_err() {
                    self.route = PayloadRoute::Reject;
                }
            }
            PayloadRoute::Bulk => handler.bulk_write(&self.info, self.payload_read, chunk),
            PayloadRoute::Discard | PayloadRoute::Reject => {}
        }
        self.payload_read += n;
    }

    fn read_footer(&mut self, ring: &mut RingBuffer<'_>) {
        let mut footer = [0u8; FOOTER_LEN];
        let _ = ring.read_bytes(&mut footer);
        let received = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let computed = self.crc.value();
        let crc_ok = received == computed;
        let end_ok = footer[4] == END_MARKER;

        if !crc_ok {
            warn!(
                "invalid CRC (expected {}, computed {}) len={} seq={} from={} to={} msg={}",
                received,
                computed,
                self.info.length,
                self.info.sequence,
                self.info.from,
                self.info.to,
                self.info.msg_id
            );
        } else if !end_ok {
            warn!(
                "invalid end marker (expected {}, found {}) seq={} msg={}",
                END_MARKER,
                footer[4],
                self.info.sequence,
                self.info.msg_id
            );
        }
        self.info.is_valid = crc_ok && end_ok && self.route != PayloadRoute::Reject;
        self.state = ParseState::PacketComplete;
    }

    fn finish<H: PacketHandler>(&mut self, handler: &mut H) -> PacketInfo {
        let info = self.info;
        if info.is_valid {
            self.rx_good = self.rx_good.wrapping_add(1);
            let payload: &[u8] = match self.route {
                PayloadRoute::Scratch => &self.scratch,
                _ => &[],
            };
            handler.on_packet(&info, payload);
        } else {
            self.rx_bad = self.rx_bad.wrapping_add(1);
        }
        self.state = ParseState::AwaitStart;
        self.scratch.clear();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_packet;

    #[derive(Default)]
    struct Recorder {
        bulk_threshold: usize,
        packets: Vec<(PacketInfo, std::vec::Vec<u8>), 16>,
        bulk: std::vec::Vec<u8>,
        routes: usize,
    }

    impl PacketHandler for Recorder {
        fn route(&mut self, info: &PacketInfo) -> PayloadRoute {
            self.routes += 1;
            if info.payload_size > self.bulk_threshold {
                PayloadRoute::Bulk
            } else {
                PayloadRoute::Scratch
            }
        }

        fn bulk_write(&mut self, _info: &PacketInfo, offset: usize, chunk: &[u8]) {
            assert_eq!(offset, self.bulk.len());
            self.bulk.extend_from_slice(chunk);
        }

        fn on_packet(&mut self, info: &PacketInfo, payload: &[u8]) {
            self.packets.push((*info, payload.to_vec())).unwrap();
        }
    }

    fn packet(seq: u32, msg_id: u8, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut buf = vec![0u8; payload.len() + PACKET_OVERHEAD];
        let len = encode_packet(&mut buf, seq, 0xFF, 0x01, msg_id, payload).unwrap();
        buf.truncate(len);
        buf
    }

    fn recorder() -> Recorder {
        Recorder {
            bulk_threshold: DEFAULT_SCRATCH_LEN,
            ..Recorder::default()
        }
    }

    #[test]
    fn test_valid_packets_of_many_sizes() {
        let mut storage = vec![0u8; 4096];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();

        for size in [0usize, 1, 5, 63, 64, 65, 300, 1000] {
            let mut handler = recorder();
            let payload: std::vec::Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();
            assert_eq!(ring.write_bytes(&packet(size as u32, 0x07, &payload)), size + 17);

            let info = parser.drive(&mut ring, &mut handler).unwrap();
            assert!(info.is_valid, "size {}", size);
            assert_eq!(info.payload_size, size);
            assert_eq!(info.sequence, size as u32);
            assert_eq!(info.length as usize, size + PACKET_OVERHEAD);
            assert_eq!((info.from, info.to, info.msg_id), (0xFF, 0x01, 0x07));
            assert_eq!(info.msg(), Some(MsgId::Upload));
            assert_eq!(parser.state(), ParseState::AwaitStart);

            assert_eq!(handler.packets.len(), 1);
            if size > DEFAULT_SCRATCH_LEN {
                assert_eq!(handler.bulk, payload);
                assert!(handler.packets[0].1.is_empty());
            } else {
                assert_eq!(handler.packets[0].1, payload);
            }
            assert!(ring.is_empty());
        }
        assert_eq!(parser.rx_good, 8);
        assert_eq!(parser.rx_bad, 0);
    }

    #[test]
    fn test_corrupt_crc_does_not_eat_next_packet() {
        let first = packet(1, 0x01, &[9, 8, 7]);
        let crc_at = first.len() - 5;
        for (byte, mask) in (0..4).flat_map(|byte| (1..=255u8).map(move |mask| (byte, mask))) {
            let mut storage = [0u8; 128];
            let mut ring = RingBuffer::new(&mut storage);
            let mut parser: PacketParser = PacketParser::default();
            let mut handler = recorder();

            let mut bad = first.clone();
            bad[crc_at + byte] ^= mask;
            let _ = ring.write_bytes(&bad);
            let _ = ring.write_bytes(&packet(2, 0x01, &[1]));

            let info = parser.drive(&mut ring, &mut handler).unwrap();
            assert!(!info.is_valid);
            assert_eq!(info.sequence, 1);
            assert_eq!(parser.state(), ParseState::AwaitStart);
            assert!(handler.packets.is_empty());

            let info = parser.drive(&mut ring, &mut handler).unwrap();
            assert!(info.is_valid);
            assert_eq!(info.sequence, 2);
            assert_eq!(parser.rx_bad, 1);
            assert_eq!(parser.rx_good, 1);
        }
    }

    #[test]
    fn test_bad_end_marker_is_invalid() {
        let mut storage = [0u8; 64];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();
        let mut handler = recorder();

        let mut bytes = packet(3, 0x02, &[]);
        let last = bytes.len() - 1;
        bytes[last] = 0x05;
        let _ = ring.write_bytes(&bytes);

        let info = parser.drive(&mut ring, &mut handler).unwrap();
        assert!(!info.is_valid);
        assert!(handler.packets.is_empty());
    }

    #[test]
    fn test_bad_length_resyncs_on_next_start() {
        let mut storage = [0u8; 128];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::new(ParserConfig {
            max_packet_size: 64,
        });
        let mut handler = recorder();

        // noise, a header declaring a length below the overhead, then a real packet
        let _ = ring.write_bytes(&[0x33, 0x44]);
        let _ = ring.write_bytes(&[START_MARKER, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let _ = ring.write_bytes(&packet(9, 0x0C, &[]));

        let info = parser.drive(&mut ring, &mut handler).unwrap();
        assert!(info.is_valid);
        assert_eq!(info.sequence, 9);
        assert_eq!(parser.rx_bad, 1);
        // the out-of-range header never reaches the handler
        assert_eq!(handler.routes, 1);
    }

    #[test]
    fn test_length_above_max_is_dropped() {
        let mut storage = [0u8; 256];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::new(ParserConfig {
            max_packet_size: 32,
        });
        let mut handler = recorder();

        let _ = ring.write_bytes(&packet(1, 0x07, &[0u8; 40]));
        assert_eq!(parser.drive(&mut ring, &mut handler), None);
        assert_eq!(parser.rx_bad, 1);
        assert!(handler.packets.is_empty());
    }

    #[test]
    fn test_torn_stream_byte_by_byte() {
        let mut storage = [0u8; 64];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();
        let mut handler = recorder();

        let bytes = packet(77, 0x0E, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut done = None;
        for (i, b) in bytes.iter().enumerate() {
            assert!(done.is_none(), "completed early at byte {}", i);
            assert!(ring.push(*b));
            done = parser.drive(&mut ring, &mut handler);
        }
        let info = done.unwrap();
        assert!(info.is_valid);
        assert_eq!(handler.packets[0].1, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_step_drains_bounded_window() {
        let mut storage = vec![0u8; 2048];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();
        let mut handler = recorder();

        let _ = ring.write_bytes(&packet(1, 0x07, &[0xAB; 1000]));
        assert_eq!(parser.step(&mut ring, &mut handler), None);
        assert_eq!(parser.state(), ParseState::AwaitHeader);
        assert_eq!(parser.step(&mut ring, &mut handler), None);
        assert_eq!(parser.state(), ParseState::AwaitPayloadCrc);

        let before = ring.len();
        assert_eq!(parser.step(&mut ring, &mut handler), None);
        assert_eq!(before - ring.len(), DRAIN_WINDOW);
        assert_eq!(parser.state(), ParseState::AwaitPayloadCrc);
    }

    #[test]
    fn test_oversized_scratch_payload_is_rejected() {
        let mut storage = [0u8; 256];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser<8> = PacketParser::default();
        let mut handler = Recorder {
            bulk_threshold: usize::MAX,
            ..Recorder::default()
        };

        let _ = ring.write_bytes(&packet(1, 0x0E, &[0u8; 24]));
        let _ = ring.write_bytes(&packet(2, 0x01, &[]));

        let info = parser.drive(&mut ring, &mut handler).unwrap();
        assert!(!info.is_valid);
        let info = parser.drive(&mut ring, &mut handler).unwrap();
        assert!(info.is_valid);
        assert_eq!(info.sequence, 2);
        assert_eq!(handler.packets.len(), 1);
    }

    #[test]
    fn test_reset_abandons_stalled_packet() {
        let mut storage = [0u8; 64];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();
        let mut handler = recorder();

        let bytes = packet(5, 0x01, &[1, 2, 3]);
        let _ = ring.write_bytes(&bytes[..14]);
        assert_eq!(parser.drive(&mut ring, &mut handler), None);
        assert_eq!(parser.state(), ParseState::AwaitPayloadCrc);

        parser.reset();
        assert_eq!(parser.state(), ParseState::AwaitStart);
        let _ = ring.write_bytes(&packet(6, 0x01, &[]));
        let info = parser.drive(&mut ring, &mut handler).unwrap();
        assert!(info.is_valid);
        assert_eq!(info.sequence, 6);
    }
}
