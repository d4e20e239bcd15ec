//! Routes decoded packets to axes and the trajectory table.
//!
//! The [`Dispatcher`] holds the node-level state that outlives a single packet: the
//! playing flag, the reboot request and a small outbox of replies. Everything it acts
//! on is borrowed per main-loop iteration through [`Dispatcher::bind`], which returns a
//! [`DispatchContext`] implementing [`PacketHandler`]:
//!
//! ```rust
//! use axislink::dispatch::{Dispatcher, NodeConfig};
//! use axislink::frame::FrameWriter;
//! use axislink::parser::PacketParser;
//! use axislink::ring::RingBuffer;
//! # use axislink::axis::AxisCommands;
//! # struct NoAxis;
//! # impl AxisCommands for NoAxis {
//! #     fn axis_id(&self) -> u8 { 1 }
//! #     fn enable(&mut self) {}
//! #     fn disable(&mut self) {}
//! #     fn calibrate(&mut self) {}
//! #     fn set_engaged_gains(&mut self) {}
//! #     fn set_idle_gains(&mut self) {}
//! #     fn set_position_setpoint(&mut self, _: f32) {}
//! # }
//!
//! let mut storage = [0u8; 512];
//! let mut ring = RingBuffer::new(&mut storage);
//! let mut parser: PacketParser = PacketParser::default();
//! let mut dispatcher: Dispatcher = Dispatcher::new(NodeConfig::default());
//! let mut writer: FrameWriter<64> = FrameWriter::new(0x00);
//! let mut axes: [NoAxis; 0] = [];
//! let mut out = [0u8; 64];
//! let mut link: &mut [u8] = &mut out;
//!
//! // main loop body
//! {
//!     let mut ctx = dispatcher.bind(&mut axes, None);
//!     let _ = parser.step(&mut ring, &mut ctx);
//! }
//! dispatcher.flush(&mut writer, &mut link).unwrap();
//! ```
//!
//! ## Message handling
//!
//! | Message      | Effect                                                            |
//! |--------------|-------------------------------------------------------------------|
//! | HEARTBEAT    | ACK                                                               |
//! | ENABLE       | ACK, idle gains, enable, calibrate                                |
//! | PLAY         | ACK, playing, engaged gains                                       |
//! | PAUSE, STOP  | ACK, not playing, idle gains (STOP also rewinds playback)         |
//! | DISABLE, QUIT| ACK, idle gains, disable, not playing                             |
//! | RESET        | not playing, idle gains, disable, reboot requested (no ACK)       |
//! | CONNECT      | ACK                                                               |
//! | DISCONNECT   | ACK, idle gains, disable                                          |
//! | UPLOAD       | ACK and commit rows, or NAK if the table is too small             |
//! | MOVE         | setpoints per [`MovePolicy`], no reply                            |
//! | FEEDBACK     | relayed to the host                                               |
//!
//! Anything else is logged and ignored. MOVE and FEEDBACK payloads of the wrong size
//! are rejected while routing, so the parser counts them as malformed.

use embedded_io::Write;
use heapless::Deque;

use crate::axis::AxisCommands;
use crate::consts::{AXIS_COUNT, NODE_ID_HOST, NODE_ID_MASTER, ROW_SIZE};
use crate::error::Error;
use crate::frame::FrameWriter;
use crate::message::{Feedback, MoveCommand, MsgId};
use crate::parser::{PacketHandler, PacketInfo, PayloadRoute};
use crate::trajectory::{Playback, TrajectoryBuffer};

/// When a MOVE packet is allowed to change setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum MovePolicy {
    /// Always apply.
    #[default]
    Always,
    /// Only while playing.
    WhilePlaying,
    /// Only while not playing, e.g. for jogging between runs.
    WhileIdle,
}

/// Identity and policy of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// This node's id.
    pub node_id: u8,
    /// Where replies and relayed feedback go.
    pub host_id: u8,
    /// MOVE gating.
    pub move_policy: MovePolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NODE_ID_MASTER,
            host_id: NODE_ID_HOST,
            move_policy: MovePolicy::Always,
        }
    }
}

/// A packet waiting in the outbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// Positive acknowledgment.
    Ack {
        /// Recipient.
        to: u8,
        /// Sequence number of the acknowledged packet.
        seq: u32,
        /// Acknowledged message id.
        msg: MsgId,
    },
    /// Negative acknowledgment.
    Nak {
        /// Recipient.
        to: u8,
        /// Sequence number of the rejected packet.
        seq: u32,
        /// Rejected message id.
        msg: MsgId,
    },
    /// Axis feedback forwarded upstream.
    Feedback {
        /// Recipient.
        to: u8,
        /// The snapshot.
        feedback: Feedback,
    },
}

/// Node-level command state and reply queue.
///
/// `OUTBOX` bounds the number of replies held between [`flush`](Self::flush) calls;
/// replies that do not fit are dropped with a warning.
#[derive(Debug)]
pub struct Dispatcher<const OUTBOX: usize = 8> {
    config: NodeConfig,
    playing: bool,
    rewind: bool,
    reset_requested: bool,
    outbox: Deque<Reply, OUTBOX>,
    /// Packets whose id this node does not handle.
    pub ignored: u32,
}

impl<const OUTBOX: usize> Default for Dispatcher<OUTBOX> {
    fn default() -> Self {
        Self::new(NodeConfig::default())
    }
}

impl<const OUTBOX: usize> Dispatcher<OUTBOX> {
    /// Creates an idle dispatcher.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            playing: false,
            rewind: false,
            reset_requested: false,
            outbox: Deque::new(),
            ignored: 0,
        }
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// `true` between PLAY and PAUSE/STOP/DISABLE/QUIT/RESET.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Returns `true` once after a RESET was received. The caller should reboot.
    pub fn take_reset_request(&mut self) -> bool {
        core::mem::take(&mut self.reset_requested)
    }

    /// Replies waiting for [`flush`](Self::flush).
    pub fn pending_replies(&self) -> usize {
        self.outbox.len()
    }

    /// Queues a local axis snapshot for the host.
    pub fn queue_feedback(&mut self, feedback: Feedback) {
        let to = self.config.host_id;
        self.enqueue(Reply::Feedback { to, feedback });
    }

    fn enqueue(&mut self, reply: Reply) {
        if self.outbox.push_back(reply).is_err() {
            warn!("outbox full, dropping reply");
        }
    }

    /// Borrows the axes and (on the master) the trajectory table for one round of
    /// packet handling.
    pub fn bind<'b, 't, A: AxisCommands>(
        &'b mut self,
        axes: &'b mut [A],
        trajectory: Option<&'b mut TrajectoryBuffer<'t>>,
    ) -> DispatchContext<'b, 't, A, OUTBOX> {
        DispatchContext {
            dispatcher: self,
            axes,
            trajectory,
        }
    }

    /// Next row to relay while playing.
    ///
    /// Rewinds `playback` first if a STOP arrived since the last call. Returns `None`
    /// while not playing or between rows.
    pub fn next_move(
        &mut self,
        playback: &mut Playback,
        trajectory: &TrajectoryBuffer<'_>,
    ) -> Option<MoveCommand> {
        if core::mem::take(&mut self.rewind) {
            playback.rewind();
        }
        if !self.playing {
            return None;
        }
        playback.tick(trajectory)
    }

    /// Sends queued replies in order.
    ///
    /// # Returns
    /// Number of packets written. On a link error the failed reply stays at the front
    /// of the queue.
    pub fn flush<W: Write, const N: usize>(
        &mut self,
        writer: &mut FrameWriter<N>,
        link: &mut W,
    ) -> Result<usize, Error> {
        let mut sent = 0;
        while let Some(reply) = self.outbox.pop_front() {
            let result = match reply {
                Reply::Ack { to, seq, msg } => writer.ack(link, to, seq, msg.into()),
                Reply::Nak { to, seq, msg } => writer.nak(link, to, seq, msg.into()),
                Reply::Feedback { to, feedback } => {
                    writer.send_feedback(link, to, &feedback).map(|_| ())
                }
            };
            if let Err(err) = result {
                let _ = self.outbox.push_front(reply);
                error!("link write failed, {} replies kept", self.outbox.len());
                return Err(err);
            }
            sent += 1;
        }
        Ok(sent)
    }
}

/// A [`Dispatcher`] bound to the axes and trajectory table for one round of parsing.
#[derive(Debug)]
pub struct DispatchContext<'b, 't, A, const OUTBOX: usize> {
    dispatcher: &'b mut Dispatcher<OUTBOX>,
    axes: &'b mut [A],
    trajectory: Option<&'b mut TrajectoryBuffer<'t>>,
}

impl<A: AxisCommands, const OUTBOX: usize> DispatchContext<'_, '_, A, OUTBOX> {
    fn ack(&mut self, info: &PacketInfo, msg: MsgId) {
        let to = self.dispatcher.config.host_id;
        self.dispatcher.enqueue(Reply::Ack {
            to,
            seq: info.sequence,
            msg,
        });
    }

    fn nak(&mut self, info: &PacketInfo, msg: MsgId) {
        let to = self.dispatcher.config.host_id;
        self.dispatcher.enqueue(Reply::Nak {
            to,
            seq: info.sequence,
            msg,
        });
    }

    fn idle_all(&mut self) {
        self.axes.iter_mut().for_each(|axis| axis.set_idle_gains());
    }

    fn disable_all(&mut self) {
        self.axes.iter_mut().for_each(|axis| axis.disable());
    }

    fn stop_playing(&mut self) {
        self.dispatcher.playing = false;
    }

    fn apply_move(&mut self, payload: &[u8]) {
        let Some(row) = MoveCommand::decode(payload) else {
            warn!("MOVE payload of {} bytes dropped", payload.len());
            return;
        };
        let allowed = match self.dispatcher.config.move_policy {
            MovePolicy::Always => true,
            MovePolicy::WhilePlaying => self.dispatcher.playing,
            MovePolicy::WhileIdle => !self.dispatcher.playing,
        };
        if !allowed {
            return;
        }
        for axis in self.axes.iter_mut() {
            let index = usize::from(axis.axis_id()).wrapping_sub(1);
            if index < AXIS_COUNT {
                axis.set_position_setpoint(row.angles[index]);
            }
        }
    }

    fn finish_upload(&mut self, info: &PacketInfo) {
        let rows = info.payload_size / ROW_SIZE;
        let accepted = match self.trajectory.as_deref_mut() {
            Some(trajectory) if trajectory.fits(info.payload_size) => {
                trajectory.commit(rows);
                info!("trajectory: {} rows", rows);
                true
            }
            Some(trajectory) => {
                warn!(
                    "trajectory of {} rows exceeds capacity {}",
                    rows,
                    trajectory.capacity_rows()
                );
                false
            }
            None => {
                warn!("no trajectory table on this node");
                false
            }
        };
        if accepted {
            self.ack(info, MsgId::Upload);
        } else {
            self.nak(info, MsgId::Upload);
        }
    }
}

impl<A: AxisCommands, const OUTBOX: usize> PacketHandler for DispatchContext<'_, '_, A, OUTBOX> {
    fn route(&mut self, info: &PacketInfo) -> PayloadRoute {
        match info.msg() {
            Some(MsgId::Upload) => match self.trajectory.as_deref() {
                Some(trajectory) if trajectory.fits(info.payload_size) => PayloadRoute::Bulk,
                _ => PayloadRoute::Discard,
            },
            Some(MsgId::Move) if info.payload_size != ROW_SIZE => PayloadRoute::Reject,
            Some(MsgId::Feedback) if info.payload_size != Feedback::LEN => PayloadRoute::Reject,
            Some(MsgId::Move) | Some(MsgId::Feedback) => PayloadRoute::Scratch,
            _ => PayloadRoute::Discard,
        }
    }

    fn bulk_write(&mut self, info: &PacketInfo, offset: usize, chunk: &[u8]) {
        if info.msg() != Some(MsgId::Upload) {
            return;
        }
        if let Some(trajectory) = self.trajectory.as_deref_mut() {
            let _ = trajectory.write_at(offset, chunk);
        }
    }

    fn on_packet(&mut self, info: &PacketInfo, payload: &[u8]) {
        let Some(msg) = info.msg() else {
            debug!("unknown msg id {} from {}", info.msg_id, info.from);
            self.dispatcher.ignored = self.dispatcher.ignored.wrapping_add(1);
            return;
        };
        debug!("rx {} seq={} from={}", msg.as_str(), info.sequence, info.from);

        match msg {
            MsgId::Heartbeat | MsgId::Connect => self.ack(info, msg),
            MsgId::Enable => {
                self.ack(info, msg);
                for axis in self.axes.iter_mut() {
                    axis.set_idle_gains();
                    axis.enable();
                    axis.calibrate();
                }
            }
            MsgId::Play => {
                self.ack(info, msg);
                self.dispatcher.playing = true;
                self.axes.iter_mut().for_each(|axis| axis.set_engaged_gains());
            }
            MsgId::Pause => {
                self.ack(info, msg);
                self.stop_playing();
                self.idle_all();
            }
            MsgId::Stop => {
                self.ack(info, msg);
                self.stop_playing();
                self.dispatcher.rewind = true;
                self.idle_all();
            }
            MsgId::Disable | MsgId::Quit => {
                self.ack(info, msg);
                self.idle_all();
                self.disable_all();
                self.stop_playing();
            }
            MsgId::Reset => {
                self.stop_playing();
                self.idle_all();
                self.disable_all();
                self.dispatcher.reset_requested = true;
            }
            MsgId::Disconnect => {
                self.ack(info, msg);
                self.idle_all();
                self.disable_all();
            }
            MsgId::Upload => self.finish_upload(info),
            MsgId::Move => self.apply_move(payload),
            MsgId::Feedback => match Feedback::decode(payload) {
                Some(feedback) => {
                    let to = self.dispatcher.config.host_id;
                    self.dispatcher.enqueue(Reply::Feedback { to, feedback });
                }
                None => warn!("FEEDBACK payload of {} bytes dropped", payload.len()),
            },
            MsgId::Ack | MsgId::Nak | MsgId::Info | MsgId::Unknown => {
                self.dispatcher.ignored = self.dispatcher.ignored.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::PACKET_OVERHEAD;
    use crate::frame::encode_packet;
    use crate::parser::PacketParser;
    use crate::ring::RingBuffer;

    #[derive(Debug, Default)]
    struct FakeAxis {
        id: u8,
        enables: u32,
        disables: u32,
        calibrating: bool,
        engaged: bool,
        target: Option<f32>,
    }

    impl FakeAxis {
        fn new(id: u8) -> Self {
            Self {
                id,
                ..Self::default()
            }
        }
    }

    impl AxisCommands for FakeAxis {
        fn axis_id(&self) -> u8 {
            self.id
        }
        fn enable(&mut self) {
            self.enables += 1;
        }
        fn disable(&mut self) {
            self.disables += 1;
        }
        fn calibrate(&mut self) {
            self.calibrating = true;
        }
        fn set_engaged_gains(&mut self) {
            self.engaged = true;
        }
        fn set_idle_gains(&mut self) {
            self.engaged = false;
        }
        fn set_position_setpoint(&mut self, body_angle: f32) {
            self.target = Some(body_angle);
        }
    }

    fn packet(seq: u32, msg: MsgId, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; payload.len() + PACKET_OVERHEAD];
        let len = encode_packet(&mut buf, seq, NODE_ID_HOST, NODE_ID_MASTER, msg.into(), payload)
            .unwrap();
        buf.truncate(len);
        buf
    }

    fn deliver<A: AxisCommands>(
        dispatcher: &mut Dispatcher,
        axes: &mut [A],
        trajectory: Option<&mut TrajectoryBuffer<'_>>,
        bytes: &[u8],
    ) -> PacketInfo {
        let mut storage = [0u8; 1024];
        let mut ring = RingBuffer::new(&mut storage);
        assert_eq!(ring.write_bytes(bytes), bytes.len());
        let mut parser: PacketParser = PacketParser::default();
        let mut ctx = dispatcher.bind(axes, trajectory);
        parser.drive(&mut ring, &mut ctx).unwrap()
    }

    fn rows(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| {
                MoveCommand {
                    angles: [i as f32; AXIS_COUNT],
                }
                .encode()
            })
            .collect()
    }

    #[test]
    fn test_enable_play_stop_sequence() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes = [FakeAxis::new(1), FakeAxis::new(2)];

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(1, MsgId::Enable, &[]));
        assert!(axes.iter().all(|a| a.enables == 1 && a.calibrating && !a.engaged));

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(2, MsgId::Play, &[]));
        assert!(dispatcher.is_playing());
        assert!(axes.iter().all(|a| a.engaged));

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(3, MsgId::Stop, &[]));
        assert!(!dispatcher.is_playing());
        assert!(axes.iter().all(|a| !a.engaged && a.disables == 0));

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(4, MsgId::Quit, &[]));
        assert!(axes.iter().all(|a| a.disables == 1));
        assert_eq!(dispatcher.pending_replies(), 4);
    }

    #[test]
    fn test_reset_requests_reboot_without_ack() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes = [FakeAxis::new(3)];
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(1, MsgId::Play, &[]));
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(2, MsgId::Reset, &[]));
        assert!(!dispatcher.is_playing());
        assert_eq!(axes[0].disables, 1);
        assert_eq!(dispatcher.pending_replies(), 1);
        assert!(dispatcher.take_reset_request());
        assert!(!dispatcher.take_reset_request());
    }

    #[test]
    fn test_acks_echo_request_sequence() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(77, MsgId::Heartbeat, &[]));

        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        {
            let mut link: &mut [u8] = &mut out;
            assert_eq!(dispatcher.flush(&mut writer, &mut link), Ok(1));
        }
        assert_eq!(&out[5..9], &77u32.to_le_bytes());
        assert_eq!(&out[9..13], &[NODE_ID_MASTER, NODE_ID_HOST, 0x08, 0x01]);
        assert_eq!(dispatcher.pending_replies(), 0);
    }

    #[test]
    fn test_flush_keeps_reply_on_link_error() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(5, MsgId::Connect, &[]));

        let mut out = [0u8; 4];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        let mut link: &mut [u8] = &mut out;
        assert!(matches!(
            dispatcher.flush(&mut writer, &mut link),
            Err(Error::Link(_))
        ));
        assert_eq!(dispatcher.pending_replies(), 1);
    }

    #[test]
    fn test_upload_within_capacity() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let mut storage = [0u8; ROW_SIZE * 20];
        let mut trajectory = TrajectoryBuffer::new(&mut storage);

        let info = deliver(
            &mut dispatcher,
            &mut axes,
            Some(&mut trajectory),
            &packet(9, MsgId::Upload, &rows(10)),
        );
        assert!(info.is_valid);
        assert_eq!(trajectory.len(), 10);
        assert_eq!(trajectory.row(7).unwrap().angles[3], 7.0);

        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        {
            let mut link: &mut [u8] = &mut out;
            let _ = dispatcher.flush(&mut writer, &mut link).unwrap();
        }
        assert_eq!(out[11], u8::from(MsgId::Ack));
        assert_eq!(out[12], u8::from(MsgId::Upload));
    }

    #[test]
    fn test_upload_beyond_capacity_is_refused() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let mut storage = [0u8; ROW_SIZE * 20];
        let mut trajectory = TrajectoryBuffer::new(&mut storage);
        let _ = deliver(
            &mut dispatcher,
            &mut axes,
            Some(&mut trajectory),
            &packet(1, MsgId::Upload, &rows(10)),
        );

        let mut bigger = rows(11);
        bigger.iter_mut().for_each(|b| *b = 0xAA);
        let info = deliver(
            &mut dispatcher,
            &mut axes,
            Some(&mut trajectory),
            &packet(2, MsgId::Upload, &bigger),
        );
        assert!(info.is_valid);
        assert_eq!(trajectory.len(), 10);
        assert_eq!(trajectory.row(9).unwrap().angles[0], 9.0);

        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        {
            let mut link: &mut [u8] = &mut out;
            assert_eq!(dispatcher.flush(&mut writer, &mut link), Ok(2));
        }
        // the NAK follows the first upload's 18-byte ACK
        let nak = &out[PACKET_OVERHEAD + 1..];
        assert_eq!(&nak[5..9], &2u32.to_le_bytes());
        assert_eq!(&nak[11..13], &[u8::from(MsgId::Nak), u8::from(MsgId::Upload)]);
    }

    #[test]
    fn test_corrupt_upload_keeps_previous_table() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let mut storage = [0u8; ROW_SIZE * 20];
        let mut trajectory = TrajectoryBuffer::new(&mut storage);
        let _ = deliver(
            &mut dispatcher,
            &mut axes,
            Some(&mut trajectory),
            &packet(1, MsgId::Upload, &rows(10)),
        );
        assert_eq!(trajectory.len(), 10);

        let mut replacement = rows(3);
        replacement.iter_mut().for_each(|b| *b = 0xBF);
        let mut bytes = packet(2, MsgId::Upload, &replacement);
        let crc_at = bytes.len() - 5;
        bytes[crc_at] ^= 0xFF;
        let info = deliver(&mut dispatcher, &mut axes, Some(&mut trajectory), &bytes);

        assert!(!info.is_valid);
        assert_eq!(trajectory.len(), 10);
        for i in 0..10 {
            assert_eq!(trajectory.row(i).unwrap().angles, [i as f32; AXIS_COUNT]);
        }
        // only the first upload was acknowledged
        assert_eq!(dispatcher.pending_replies(), 1);
    }

    #[test]
    fn test_corrupt_first_upload_commits_nothing() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let mut storage = [0u8; ROW_SIZE * 8];
        let mut trajectory = TrajectoryBuffer::new(&mut storage);

        let mut bytes = packet(1, MsgId::Upload, &rows(3));
        let crc_at = bytes.len() - 5;
        bytes[crc_at] ^= 0xFF;
        let info = deliver(&mut dispatcher, &mut axes, Some(&mut trajectory), &bytes);
        assert!(!info.is_valid);
        assert!(trajectory.is_empty());
        assert_eq!(dispatcher.pending_replies(), 0);
    }

    #[test]
    fn test_wrong_size_payloads_are_malformed() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes = [FakeAxis::new(1)];
        let row = MoveCommand {
            angles: [0.1; AXIS_COUNT],
        }
        .encode();

        let mut storage = [0u8; 1024];
        let mut ring = RingBuffer::new(&mut storage);
        let mut parser: PacketParser = PacketParser::default();
        let _ = ring.write_bytes(&packet(1, MsgId::Move, &row[..20]));
        let _ = ring.write_bytes(&packet(2, MsgId::Feedback, &[0u8; Feedback::LEN + 4]));
        let _ = ring.write_bytes(&packet(3, MsgId::Move, &row));

        let mut ctx = dispatcher.bind(&mut axes, None);
        let short = parser.drive(&mut ring, &mut ctx).unwrap();
        assert!(!short.is_valid);
        let long = parser.drive(&mut ring, &mut ctx).unwrap();
        assert!(!long.is_valid);
        let good = parser.drive(&mut ring, &mut ctx).unwrap();
        assert!(good.is_valid);

        assert_eq!(parser.rx_bad, 2);
        assert_eq!(parser.rx_good, 1);
        assert_eq!(axes[0].target, Some(0.1));
        assert_eq!(dispatcher.pending_replies(), 0);
    }

    #[test]
    fn test_upload_without_table_is_refused() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(1, MsgId::Upload, &rows(1)));
        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        {
            let mut link: &mut [u8] = &mut out;
            let _ = dispatcher.flush(&mut writer, &mut link).unwrap();
        }
        assert_eq!(out[11], u8::from(MsgId::Nak));
    }

    #[test]
    fn test_move_respects_policy() {
        let config = NodeConfig {
            move_policy: MovePolicy::WhilePlaying,
            ..NodeConfig::default()
        };
        let mut dispatcher: Dispatcher = Dispatcher::new(config);
        let mut axes = [FakeAxis::new(2), FakeAxis::new(5), FakeAxis::new(9)];
        let row = MoveCommand {
            angles: [0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        }
        .encode();

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(1, MsgId::Move, &row));
        assert!(axes.iter().all(|a| a.target.is_none()));

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(2, MsgId::Play, &[]));
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(3, MsgId::Move, &row));
        assert_eq!(axes[0].target, Some(0.2));
        assert_eq!(axes[1].target, Some(0.5));
        assert_eq!(axes[2].target, None);
        // MOVE is not acknowledged
        assert_eq!(dispatcher.pending_replies(), 1);

        let short = &row[..20];
        axes[0].target = None;
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(4, MsgId::Move, short));
        assert_eq!(axes[0].target, None);
    }

    #[test]
    fn test_feedback_relayed_to_host() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let feedback = Feedback {
            axis_id: 4,
            armed: true,
            set_point: 0.25,
            ..Feedback::default()
        };
        let _ = deliver(
            &mut dispatcher,
            &mut axes,
            None,
            &packet(1, MsgId::Feedback, &feedback.encode()),
        );
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(2, MsgId::Info, b"hello"));
        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(3, MsgId::Feedback, &[1, 2, 3]));
        assert_eq!(dispatcher.ignored, 1);
        assert_eq!(dispatcher.pending_replies(), 1);

        let mut out = [0u8; 64];
        let mut writer: FrameWriter<64> = FrameWriter::new(NODE_ID_MASTER);
        {
            let mut link: &mut [u8] = &mut out;
            assert_eq!(dispatcher.flush(&mut writer, &mut link), Ok(1));
        }
        assert_eq!(out[10], NODE_ID_HOST);
        assert_eq!(out[11], u8::from(MsgId::Feedback));
        assert_eq!(Feedback::decode(&out[12..12 + Feedback::LEN]), Some(feedback));
    }

    #[test]
    fn test_next_move_follows_play_state() {
        let mut dispatcher: Dispatcher = Dispatcher::default();
        let mut axes: [FakeAxis; 0] = [];
        let mut storage = [0u8; ROW_SIZE * 6];
        let mut trajectory = TrajectoryBuffer::new(&mut storage);
        let _ = deliver(
            &mut dispatcher,
            &mut axes,
            Some(&mut trajectory),
            &packet(1, MsgId::Upload, &rows(3)),
        );
        let mut playback = Playback::new(1);
        assert!(dispatcher.next_move(&mut playback, &trajectory).is_none());

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(2, MsgId::Play, &[]));
        assert_eq!(dispatcher.next_move(&mut playback, &trajectory).unwrap().angles[0], 0.0);
        assert_eq!(dispatcher.next_move(&mut playback, &trajectory).unwrap().angles[0], 1.0);

        let _ = deliver(&mut dispatcher, &mut axes, None, &packet(3, MsgId::Stop, &[]));
        assert!(dispatcher.next_move(&mut playback, &trajectory).is_none());
        assert_eq!(playback.index(), 0);
    }
}
