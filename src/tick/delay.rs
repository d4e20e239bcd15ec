use core::ops::ControlFlow;

use embedded_can::nb::Can;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;

use crate::axis::AxisController;
use crate::error::Error;
use crate::message::Feedback;

use super::tick_period_us;

/// Runs a blocking control loop on one axis, paced by `delay`.
///
/// Each iteration drains CAN replies, runs
/// [`control_tick`](AxisController::control_tick), flushes queued frames, hands the
/// tick's feedback (if any) to `on_tick`, and sleeps for one tick period. Timestamps
/// are derived from the iteration count, so they drift by however long the work takes.
///
/// # Arguments
/// - `axis`: the axis to drive
/// - `delay`: a delay provider implementing `DelayNs`, typically from the HAL
/// - `tick_hz`: control rate, e.g. [`DEFAULT_TICK_HZ`](super::DEFAULT_TICK_HZ)
/// - `on_tick`: called every iteration; return `ControlFlow::Break(())` to leave the loop
///
/// # Example
/// ```rust,ignore
/// use core::ops::ControlFlow;
/// use axislink::tick::{run_control_loop, DEFAULT_TICK_HZ};
///
/// let mut axis = AxisController::new(can, prox_pin, AxisConfig::for_axis(1));
/// run_control_loop(&mut axis, &mut delay, DEFAULT_TICK_HZ, |_axis, feedback| {
///     if let Some(fb) = feedback {
///         let _ = writer.send_feedback(&mut serial, NODE_ID_HOST, &fb);
///     }
///     ControlFlow::Continue(())
/// })?;
/// ```
///
/// # Notes
/// - Any CAN or switch error ends the loop.
/// - Prefer the interrupt-driven helpers when the tick must stay jitter free.
pub fn run_control_loop<CAN, SW, D, F>(
    axis: &mut AxisController<CAN, SW>,
    delay: &mut D,
    tick_hz: u32,
    mut on_tick: F,
) -> Result<(), Error>
where
    CAN: Can,
    SW: InputPin,
    D: DelayNs,
    F: FnMut(&mut AxisController<CAN, SW>, Option<Feedback>) -> ControlFlow<()>,
{
    let period_us = tick_period_us(tick_hz);
    let mut ticks: u32 = 0;
    loop {
        let now = ticks.wrapping_mul(period_us);
        let _ = axis.poll_can(now)?;
        let feedback = axis.control_tick()?;
        let _ = axis.flush(now)?;
        if on_tick(axis, feedback).is_break() {
            return Ok(());
        }
        delay.delay_us(period_us);
        ticks = ticks.wrapping_add(1);
    }
}
