//! Control tick scheduling.
//!
//! The control law and calibration expect [`AxisController::control_tick`] to run at a
//! fixed rate (1 kHz in the reference setup). Two ways of getting there are provided:
//!
//! - an interrupt service routine sharing the axis through a `critical_section` mutex
//!   (`timer-isr` feature): [`global_axis_init`], [`global_axis_tick`],
//!   [`GlobalAxis`] and the [`declare_axis!`](crate::declare_axis) /
//!   [`tick_axis!`](crate::tick_axis) macros;
//! - a blocking loop paced by an `embedded_hal` delay (`delay-loop` feature):
//!   [`run_control_loop`].
//!
//! Tick counts in [`AxisConfig`](crate::axis::AxisConfig) are rate dependent; convert
//! from milliseconds with [`dwell_ticks`].
//!
//! | Rate     | Period   | 1 s dwell  |
//! |----------|----------|------------|
//! | 500 Hz   | 2000 µs  | 500 ticks  |
//! | 1 kHz    | 1000 µs  | 1000 ticks |
//! | 2 kHz    | 500 µs   | 2000 ticks |
//!
//! [`AxisController::control_tick`]: crate::axis::AxisController::control_tick

#[cfg(feature = "delay-loop")]
mod delay;
#[cfg(feature = "delay-loop")]
pub use delay::*;

#[cfg(feature = "timer-isr")]
mod isr;
#[cfg(feature = "timer-isr")]
pub use isr::*;

#[cfg(feature = "timer-isr")]
mod macros;

/// Control rate of the reference firmware.
pub const DEFAULT_TICK_HZ: u32 = 1_000;

/// Period of one tick in microseconds, rounded down. A zero rate counts as 1 Hz.
pub const fn tick_period_us(hz: u32) -> u32 {
    let hz = if hz == 0 { 1 } else { hz };
    1_000_000 / hz
}

/// Number of ticks spanning `ms` milliseconds at `hz`, rounded to nearest.
///
/// # Arguments
/// - `ms`: duration in milliseconds
/// - `hz`: tick rate
///
/// # Returns
/// The tick count, saturated at `u32::MAX`.
pub fn dwell_ticks(ms: u32, hz: u32) -> u32 {
    let ticks = (u64::from(ms) * u64::from(hz) + 500) / 1_000;
    u32::try_from(ticks).unwrap_or(u32::MAX)
}
