//! Per-joint controller: limit-switch calibration, PD position loop and CAN traffic.
//!
//! An [`AxisController`] owns one motor driver (reached through an
//! [`embedded_can::nb::Can`] peripheral) and one limit switch (an
//! [`embedded_hal::digital::InputPin`]). It is driven from three places:
//!
//! - the **control tick** ([`control_tick`](AxisController::control_tick)), typically
//!   1 kHz from a timer interrupt, which latches telemetry, steps calibration and
//!   computes the next speed command;
//! - the **CAN receive path** ([`on_can_reply`](AxisController::on_can_reply) or
//!   [`poll_can`](AxisController::poll_can)), which stores driver replies;
//! - the **main loop** ([`flush`](AxisController::flush)), which hands queued request
//!   frames to the CAN peripheral without blocking.
//!
//! Commands from the packet link arrive through the [`AxisCommands`] trait.
//!
//! ## Frames of reference
//!
//! The controller works in the *motor frame*: raw driver angles. Externally supplied
//! setpoints are in the *body frame* and are mapped with
//! `motor = body * direction + offset`, where `offset` is found by calibration.
//!
//! ## Calibration
//!
//! | Stage | Action                                                                  |
//! |-------|-------------------------------------------------------------------------|
//! | 255   | snap the setpoint to the measured angle                                 |
//! | 0     | step toward the switch in `direction` until it triggers                 |
//! | 1     | dwell for `dwell_ticks`                                                 |
//! | 2     | keep stepping until the switch releases, record `angle1`                |
//! | 3     | step the other way until the switch triggers                            |
//! | 4     | keep stepping until it releases, record `angle2`                        |
//! | 5     | ease the setpoint toward `(angle1 + angle2) / 2`, which becomes `offset`|
//! | 6     | mark calibrated                                                         |
//!
//! For interrupt-driven use, see [`crate::tick`].

use core::f32::consts::FRAC_PI_2;

use embedded_can::{Frame, StandardId, nb::Can};
use embedded_hal::digital::InputPin;
use heapless::Deque;

use crate::consts::MOTOR_FRAME_SIZE;
use crate::error::Error;
use crate::message::Feedback;
use crate::motor::{ControlReply, MotorError, MotorFrame, Opcode, Request, ResultCode};
use crate::tick::{self, DEFAULT_TICK_HZ};

const MODE_IDLE: u8 = 0;
const MODE_ENGAGED: u8 = 1;
const COMMAND_QUEUE_LEN: usize = 4;

/// Static configuration of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisConfig {
    /// Axis number, `1..=6`; also indexes MOVE rows as `axis_id - 1`.
    pub axis_id: u8,
    /// `+1` or `-1`: the direction calibration first drives in, and the body-to-motor sign.
    pub direction: i8,
    /// CAN id the motor driver listens on.
    pub can_id: StandardId,
    /// Setpoint increment per tick while searching for the switch (rad).
    pub step: f32,
    /// Ticks to wait after the switch first triggers.
    pub dwell_ticks: u32,
    /// Fraction of the remaining error removed per tick while converging on the offset.
    pub converge_gain: f32,
    /// Convergence is done once the setpoint is this close to the offset (rad).
    pub converge_tolerance: f32,
    /// Consecutive equal switch samples required before a change is accepted.
    pub debounce_ticks: u32,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            axis_id: 1,
            direction: -1,
            can_id: StandardId::new(0x001).unwrap_or(StandardId::ZERO),
            step: 0.05,
            dwell_ticks: tick::dwell_ticks(5_000, DEFAULT_TICK_HZ),
            converge_gain: 0.01,
            converge_tolerance: 0.001,
            debounce_ticks: 1,
        }
    }
}

impl AxisConfig {
    /// Default configuration for axis `axis_id`. Odd axes drive negative first.
    pub fn for_axis(axis_id: u8) -> Self {
        Self {
            axis_id,
            direction: 1 - 2 * (axis_id & 1) as i8,
            ..Self::default()
        }
    }
}

/// PD gains and the speed limit applied to the control output.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct GainSet {
    /// Proportional gain on position error.
    pub p: f32,
    /// Derivative gain on measured speed.
    pub d: f32,
    /// Magnitude limit of the speed command (rad/s).
    pub v_lim: f32,
}

impl GainSet {
    /// Stiff tracking used during playback.
    pub const ENGAGED: Self = Self {
        p: 100.0,
        d: 1.0,
        v_lim: 12.0,
    };
    /// Soft holding used while idle, paused or calibrating.
    pub const IDLE: Self = Self {
        p: 5.0,
        d: 1.0,
        v_lim: 0.33,
    };
}

/// Filters a bouncing digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Debouncer {
    stable: bool,
    candidate: bool,
    count: u32,
    ticks: u32,
}

impl Debouncer {
    /// A new debouncer that reports `false` until a level holds for `ticks` extra samples.
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks,
            ..Self::default()
        }
    }

    /// Feeds one raw sample and returns the debounced level.
    pub fn update(&mut self, raw: bool) -> bool {
        if raw != self.candidate {
            self.candidate = raw;
            self.count = 0;
        } else {
            self.count = self.count.saturating_add(1);
        }
        if self.count >= self.ticks {
            self.stable = self.candidate;
        }
        self.stable
    }

    /// Last accepted level.
    pub fn read(&self) -> bool {
        self.stable
    }
}

/// Calibration progress; the discriminants are the stage numbers reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum CalStage {
    /// Drive toward the switch.
    Seek = 0,
    /// Wait after the first trigger.
    Dwell = 1,
    /// Drive through and out of the switch.
    Release = 2,
    /// Drive back toward the switch.
    SeekReverse = 3,
    /// Drive back through and out of the switch.
    ReleaseReverse = 4,
    /// Ease onto the midpoint.
    Converge = 5,
    /// Latch the result.
    Done = 6,
    /// Not started; the setpoint snaps to the measured angle on the next tick.
    Snap = 255,
}

impl CalStage {
    fn next(self) -> Self {
        match self {
            CalStage::Snap => CalStage::Seek,
            CalStage::Seek => CalStage::Dwell,
            CalStage::Dwell => CalStage::Release,
            CalStage::Release => CalStage::SeekReverse,
            CalStage::SeekReverse => CalStage::ReleaseReverse,
            CalStage::ReleaseReverse => CalStage::Converge,
            CalStage::Converge => CalStage::Done,
            CalStage::Done => CalStage::Seek,
        }
    }
}

/// Commands the packet dispatcher can issue to an axis.
///
/// Implemented by [`AxisController`] directly, and by
/// [`GlobalAxis`](crate::tick::GlobalAxis) for controllers that live behind a
/// critical-section mutex.
pub trait AxisCommands {
    /// Axis number, `1..=6`.
    fn axis_id(&self) -> u8;
    /// Asks the driver to energize the motor (no-op if already armed).
    fn enable(&mut self);
    /// Asks the driver to de-energize the motor.
    fn disable(&mut self);
    /// Starts calibration unless the axis is already calibrated.
    fn calibrate(&mut self);
    /// Switches to [`GainSet::ENGAGED`].
    fn set_engaged_gains(&mut self);
    /// Switches to [`GainSet::IDLE`].
    fn set_idle_gains(&mut self);
    /// Sets the target angle in the body frame (rad), clamped to ±π/2.
    fn set_position_setpoint(&mut self, body_angle: f32);
}

/// Controller for one joint.
///
/// ## Type Parameters
///
/// - `CAN`: the CAN peripheral the motor driver hangs off
/// - `SW`: the limit switch input; *high* means the switch is triggered
///
/// The CAN peripheral and switch are public so board code and tests can reach them.
#[derive(Debug)]
pub struct AxisController<CAN, SW> {
    /// CAN peripheral.
    pub can: CAN,
    /// Limit switch input.
    pub switch: SW,
    config: AxisConfig,
    dir: f32,
    gains: GainSet,
    mode: u8,
    debouncer: Debouncer,
    stage: CalStage,
    wait: u32,
    angle1: f32,
    angle2: f32,
    offset: f32,
    theta: f32,
    omega: f32,
    tau: f32,
    set_point: f32,
    armed: bool,
    calibrated: bool,
    do_calibration: bool,
    pending: ControlReply,
    new_telemetry: bool,
    t_send: u32,
    t_recv: u32,
    sent: MotorFrame,
    recv: MotorFrame,
    control: Option<MotorFrame>,
    commands: Deque<MotorFrame, COMMAND_QUEUE_LEN>,
    /// Replies received from the driver.
    pub msg_in: u32,
    /// Requests handed to the CAN peripheral.
    pub msg_out: u32,
}

impl<CAN, SW> AxisController<CAN, SW>
where
    CAN: Can,
    SW: InputPin,
{
    /// Creates an unarmed, uncalibrated axis with idle gains.
    ///
    /// # Arguments
    /// - `can`: CAN peripheral for the motor driver
    /// - `switch`: limit switch input
    /// - `config`: axis configuration; any negative `direction` counts as `-1`, anything
    ///   else as `+1`
    pub fn new(can: CAN, switch: SW, config: AxisConfig) -> Self {
        let dir = if config.direction < 0 { -1.0 } else { 1.0 };
        Self {
            can,
            switch,
            config,
            dir,
            gains: GainSet::IDLE,
            mode: MODE_IDLE,
            debouncer: Debouncer::new(config.debounce_ticks),
            stage: CalStage::Snap,
            wait: 0,
            angle1: 0.0,
            angle2: 0.0,
            offset: 0.0,
            theta: 0.0,
            omega: 0.0,
            tau: 0.0,
            set_point: 0.0,
            armed: false,
            calibrated: false,
            do_calibration: false,
            pending: ControlReply::default(),
            new_telemetry: false,
            t_send: 0,
            t_recv: 0,
            sent: [0u8; MOTOR_FRAME_SIZE],
            recv: [0u8; MOTOR_FRAME_SIZE],
            control: None,
            commands: Deque::new(),
            msg_in: 0,
            msg_out: 0,
        }
    }

    /// Configuration the axis was built with.
    pub fn config(&self) -> &AxisConfig {
        &self.config
    }

    /// Current calibration stage.
    pub fn stage(&self) -> CalStage {
        self.stage
    }

    /// `true` once the driver confirmed a motor start.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// `true` once calibration finished.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// `true` while calibration is requested and unfinished.
    pub fn is_calibrating(&self) -> bool {
        self.do_calibration && !self.calibrated
    }

    /// Active gains.
    pub fn gains(&self) -> GainSet {
        self.gains
    }

    /// `1` with engaged gains, `0` with idle gains.
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Commanded angle in the motor frame.
    pub fn set_point(&self) -> f32 {
        self.set_point
    }

    /// Zero offset found by calibration (motor frame).
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Switch edges recorded during calibration, `(angle1, angle2)`.
    pub fn edges(&self) -> (f32, f32) {
        (self.angle1, self.angle2)
    }

    /// Latest latched angle, speed and torque (motor frame).
    pub fn measured(&self) -> (f32, f32, f32) {
        (self.theta, self.omega, self.tau)
    }

    /// Latest latched angle in the body frame.
    pub fn position(&self) -> f32 {
        self.motor_to_body(self.theta)
    }

    /// Frames waiting for [`flush`](Self::flush).
    pub fn pending_frames(&self) -> usize {
        self.commands.len() + usize::from(self.control.is_some())
    }

    /// Maps a body-frame angle into the motor frame.
    pub fn body_to_motor(&self, rad: f32) -> f32 {
        rad * self.dir + self.offset
    }

    /// Maps a motor-frame angle into the body frame.
    pub fn motor_to_body(&self, rad: f32) -> f32 {
        (rad - self.offset) / self.dir
    }

    /// Builds the snapshot reported upstream.
    pub fn feedback(&self) -> Feedback {
        Feedback {
            axis_id: self.config.axis_id,
            mode: self.mode,
            armed: self.armed,
            calibrated: self.calibrated,
            set_point: self.set_point,
            t_send: self.t_send,
            t_recv: self.t_recv,
            sent: self.sent,
            recv: self.recv,
        }
    }

    /// Runs one control period.
    ///
    /// Telemetry received since the previous tick is latched first; multiple replies
    /// within one period collapse to the latest. Calibration then advances one step and,
    /// if the motor is armed, a PD speed command is queued for the next
    /// [`flush`](Self::flush).
    ///
    /// # Returns
    /// A [`Feedback`] snapshot when new telemetry was latched, `None` otherwise.
    ///
    /// # Errors
    /// [`Error::Switch`] if the limit switch cannot be read during calibration.
    pub fn control_tick(&mut self) -> Result<Option<Feedback>, Error> {
        let feedback = if self.new_telemetry {
            self.theta = self.pending.position;
            self.omega = self.pending.speed;
            self.tau = self.pending.torque;
            self.new_telemetry = false;
            Some(self.feedback())
        } else {
            None
        };

        if self.is_calibrating() {
            self.step_calibration()?;
        }
        if self.armed {
            let command = (self.set_point - self.theta) * self.gains.p - self.omega * self.gains.d;
            let v_lim = self.gains.v_lim;
            self.queue_speed(command.max(-v_lim).min(v_lim));
        }
        Ok(feedback)
    }

    fn step_calibration(&mut self) -> Result<(), Error> {
        let raw = self.switch.is_high().map_err(Error::switch)?;
        let triggered = self.debouncer.update(raw);
        let toward = self.theta + self.config.step * self.dir;
        let away = self.theta - self.config.step * self.dir;

        match self.stage {
            CalStage::Snap => {
                self.set_point = self.theta;
                self.advance();
            }
            CalStage::Seek => {
                if triggered {
                    self.advance();
                } else {
                    self.set_point = toward;
                }
            }
            CalStage::Dwell => {
                if self.wait < self.config.dwell_ticks {
                    self.wait += 1;
                } else {
                    self.wait = 0;
                    self.advance();
                }
            }
            CalStage::Release => {
                if triggered {
                    self.set_point = toward;
                } else {
                    self.angle1 = self.theta;
                    self.advance();
                }
            }
            CalStage::SeekReverse => {
                if triggered {
                    self.advance();
                } else {
                    self.set_point = away;
                }
            }
            CalStage::ReleaseReverse => {
                if triggered {
                    self.set_point = away;
                } else {
                    self.angle2 = self.theta;
                    self.advance();
                }
            }
            CalStage::Converge => {
                self.offset = (self.angle1 + self.angle2) / 2.0;
                self.set_point += self.config.converge_gain * (self.offset - self.set_point);
                if (self.offset - self.set_point).abs() < self.config.converge_tolerance {
                    self.advance();
                }
            }
            CalStage::Done => {
                self.calibrated = true;
                self.do_calibration = false;
                info!(
                    "axis {} calibrated: offset={} edges={},{}",
                    self.config.axis_id,
                    self.offset,
                    self.angle1,
                    self.angle2
                );
                self.advance();
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.stage = self.stage.next();
        info!(
            "axis {} calibration stage {} (sp={} theta={})",
            self.config.axis_id,
            self.stage as u8,
            self.set_point,
            self.theta
        );
    }

    fn queue_speed(&mut self, speed: f32) {
        self.control = Some(
            Request::SpeedControl {
                speed,
                duration_ms: 0,
            }
            .encode(),
        );
    }

    fn queue_command(&mut self, request: Request) {
        if self.commands.is_full() {
            let _ = self.commands.pop_front();
            warn!("axis {} command queue full, dropped oldest", self.config.axis_id);
        }
        let _ = self.commands.push_back(request.encode());
    }

    /// Handles one reply frame from the motor driver.
    ///
    /// The frame is recorded for feedback regardless of content. A failure result code
    /// is logged and otherwise ignored. On success:
    /// - start motor arms the axis and queues a zero-speed command;
    /// - stop motor disarms it;
    /// - torque, speed and position control replies store telemetry for the next tick.
    ///
    /// # Arguments
    /// - `data`: CAN payload, at least eight bytes
    /// - `now`: receive timestamp (µs)
    ///
    /// # Errors
    /// [`MotorError::ShortFrame`] if `data` is shorter than a motor frame; nothing is
    /// recorded in that case.
    pub fn on_can_reply(&mut self, data: &[u8], now: u32) -> Result<(), Error> {
        let frame: MotorFrame = data
            .get(..MOTOR_FRAME_SIZE)
            .and_then(|head| head.try_into().ok())
            .ok_or(MotorError::ShortFrame(data.len()))?;

        self.recv = frame;
        self.t_recv = now;
        self.msg_in = self.msg_in.wrapping_add(1);
        self.new_telemetry = true;

        // every reply that changes state carries its result in byte 1
        let result = ResultCode::from(frame[1]);
        if !result.is_success() {
            warn!(
                "axis {} motor error: opcode {} result {}",
                self.config.axis_id,
                frame[0],
                frame[1]
            );
            return Ok(());
        }

        match Opcode::try_from(frame[0]) {
            Ok(Opcode::StartMotor) => {
                self.armed = true;
                self.queue_speed(0.0);
                info!("axis {} armed", self.config.axis_id);
            }
            Ok(Opcode::StopMotor) => {
                self.armed = false;
                info!("axis {} disarmed", self.config.axis_id);
            }
            Ok(opcode) if opcode.is_control() => {
                self.pending = ControlReply::from_frame(&frame);
            }
            _ => {
                debug!("axis {} unhandled reply {}", self.config.axis_id, frame[0]);
            }
        }
        Ok(())
    }

    /// Drains every frame the CAN peripheral has buffered through
    /// [`on_can_reply`](Self::on_can_reply).
    ///
    /// # Returns
    /// Number of frames handled.
    pub fn poll_can(&mut self, now: u32) -> Result<usize, Error> {
        let mut handled = 0;
        loop {
            match self.can.receive() {
                Ok(frame) => {
                    if frame.is_data_frame() {
                        self.on_can_reply(frame.data(), now)?;
                        handled += 1;
                    }
                }
                Err(nb::Error::WouldBlock) => return Ok(handled),
                Err(nb::Error::Other(err)) => return Err(Error::can(err)),
            }
        }
    }

    /// Hands queued frames to the CAN peripheral: start/stop commands in order, then
    /// the latest control command.
    ///
    /// Stops at the first frame the peripheral cannot take yet; that frame stays queued.
    ///
    /// # Arguments
    /// - `now`: transmit timestamp (µs) recorded for feedback
    ///
    /// # Returns
    /// Number of frames transmitted.
    pub fn flush(&mut self, now: u32) -> Result<usize, Error> {
        let mut sent = 0;
        while let Some(frame) = self.commands.pop_front() {
            if !self.transmit(&frame, now)? {
                let _ = self.commands.push_front(frame);
                return Ok(sent);
            }
            sent += 1;
        }
        if let Some(frame) = self.control.take() {
            if self.transmit(&frame, now)? {
                sent += 1;
            } else {
                self.control = Some(frame);
            }
        }
        Ok(sent)
    }

    fn transmit(&mut self, data: &MotorFrame, now: u32) -> Result<bool, Error> {
        let frame = CAN::Frame::new(self.config.can_id, data)
            .ok_or(Error::Can(embedded_can::ErrorKind::Other))?;
        match self.can.transmit(&frame) {
            Ok(displaced) => {
                if displaced.is_some() {
                    debug!("axis {} displaced a pending CAN frame", self.config.axis_id);
                }
                self.sent = *data;
                self.t_send = now;
                self.msg_out = self.msg_out.wrapping_add(1);
                Ok(true)
            }
            Err(nb::Error::WouldBlock) => Ok(false),
            Err(nb::Error::Other(err)) => Err(Error::can(err)),
        }
    }
}

impl<CAN, SW> AxisCommands for AxisController<CAN, SW>
where
    CAN: Can,
    SW: InputPin,
{
    fn axis_id(&self) -> u8 {
        self.config.axis_id
    }

    fn enable(&mut self) {
        if self.armed {
            return;
        }
        self.queue_command(Request::StartMotor);
    }

    fn disable(&mut self) {
        self.queue_command(Request::StopMotor);
    }

    fn calibrate(&mut self) {
        if !self.calibrated {
            self.do_calibration = true;
        }
    }

    fn set_engaged_gains(&mut self) {
        self.gains = GainSet::ENGAGED;
        self.mode = MODE_ENGAGED;
    }

    fn set_idle_gains(&mut self) {
        self.gains = GainSet::IDLE;
        self.mode = MODE_IDLE;
    }

    fn set_position_setpoint(&mut self, body_angle: f32) {
        self.set_point = self.body_to_motor(body_angle.max(-FRAC_PI_2).min(FRAC_PI_2));
    }
}
