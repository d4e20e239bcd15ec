use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use embedded_can::nb::Can;
use embedded_hal::digital::InputPin;

use crate::axis::{AxisCommands, AxisConfig, AxisController};
use crate::error::Error;
use crate::message::Feedback;

/// An axis shared between the timer ISR, the CAN ISR and the main loop.
pub type SharedAxis<CAN, SW> = Mutex<RefCell<Option<AxisController<CAN, SW>>>>;

/// Used to initialize a global static [`SharedAxis`].
///
/// # Returns
/// * An empty mutex, filled later by [`global_axis_setup`]
///
/// # Example
/// ```rust,ignore
/// static AXIS_L: SharedAxis<Can1, ProxPin> = global_axis_init();
/// ```
pub const fn global_axis_init<CAN, SW>() -> SharedAxis<CAN, SW> {
    Mutex::new(RefCell::new(None))
}

/// Builds the controller and stores it in `global`, replacing any previous one.
///
/// # Example
/// ```rust,ignore
/// fn main() {
///     global_axis_setup(&AXIS_L, can1, prox_pin, AxisConfig::for_axis(1));
/// }
/// ```
pub fn global_axis_setup<CAN: Can, SW: InputPin>(
    global: &'static SharedAxis<CAN, SW>,
    can: CAN,
    switch: SW,
    config: AxisConfig,
) {
    critical_section::with(|cs| {
        let _ = global
            .borrow(cs)
            .replace(Some(AxisController::new(can, switch, config)));
    });
}

/// Runs `f` on the shared axis inside a critical section.
///
/// # Returns
/// `None` if the axis has not been set up yet.
pub fn with_global_axis<CAN, SW, R>(
    global: &'static SharedAxis<CAN, SW>,
    f: impl FnOnce(&mut AxisController<CAN, SW>) -> R,
) -> Option<R> {
    critical_section::with(|cs| global.borrow(cs).borrow_mut().as_mut().map(f))
}

/// Runs the control tick; call from the timer interrupt.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn PIT() {
///     if let Ok(Some(feedback)) = global_axis_tick(&AXIS_L) {
///         // hand `feedback` to the link writer
///     }
/// }
/// ```
pub fn global_axis_tick<CAN: Can, SW: InputPin>(
    global: &'static SharedAxis<CAN, SW>,
) -> Result<Option<Feedback>, Error> {
    with_global_axis(global, |axis| axis.control_tick()).unwrap_or(Ok(None))
}

/// Hands one received CAN payload to the axis; call from the CAN receive interrupt.
pub fn global_axis_can_reply<CAN: Can, SW: InputPin>(
    global: &'static SharedAxis<CAN, SW>,
    data: &[u8],
    now: u32,
) -> Result<(), Error> {
    with_global_axis(global, |axis| axis.on_can_reply(data, now)).unwrap_or(Ok(()))
}

/// Drains the axis's CAN receive queue; for peripherals polled from the main loop.
pub fn global_axis_poll_can<CAN: Can, SW: InputPin>(
    global: &'static SharedAxis<CAN, SW>,
    now: u32,
) -> Result<usize, Error> {
    with_global_axis(global, |axis| axis.poll_can(now)).unwrap_or(Ok(0))
}

/// Transmits queued frames; call from the main loop.
pub fn global_axis_flush<CAN: Can, SW: InputPin>(
    global: &'static SharedAxis<CAN, SW>,
    now: u32,
) -> Result<usize, Error> {
    with_global_axis(global, |axis| axis.flush(now)).unwrap_or(Ok(0))
}

/// Handle that lets the [`Dispatcher`](crate::dispatch::Dispatcher) command a shared
/// axis. Every call takes its own critical section; calls before setup do nothing.
pub struct GlobalAxis<CAN: 'static, SW: 'static> {
    global: &'static SharedAxis<CAN, SW>,
}

impl<CAN: 'static, SW: 'static> GlobalAxis<CAN, SW> {
    /// Wraps `global`.
    pub const fn new(global: &'static SharedAxis<CAN, SW>) -> Self {
        Self { global }
    }
}

impl<CAN: 'static, SW: 'static> fmt::Debug for GlobalAxis<CAN, SW> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalAxis").finish_non_exhaustive()
    }
}

impl<CAN: Can + 'static, SW: InputPin + 'static> AxisCommands for GlobalAxis<CAN, SW> {
    fn axis_id(&self) -> u8 {
        with_global_axis(self.global, |axis| axis.axis_id()).unwrap_or(0)
    }

    fn enable(&mut self) {
        let _ = with_global_axis(self.global, |axis| axis.enable());
    }

    fn disable(&mut self) {
        let _ = with_global_axis(self.global, |axis| axis.disable());
    }

    fn calibrate(&mut self) {
        let _ = with_global_axis(self.global, |axis| axis.calibrate());
    }

    fn set_engaged_gains(&mut self) {
        let _ = with_global_axis(self.global, |axis| axis.set_engaged_gains());
    }

    fn set_idle_gains(&mut self) {
        let _ = with_global_axis(self.global, |axis| axis.set_idle_gains());
    }

    fn set_position_setpoint(&mut self, body_angle: f32) {
        let _ = with_global_axis(self.global, |axis| axis.set_position_setpoint(body_angle));
    }
}
