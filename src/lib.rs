//! # axislink
//!
//! A portable, no_std Rust crate for the two halves of a small multi-axis motion node:
//! a framed packet link to a host, and a calibrated PD position loop per joint driven
//! over CAN.
//!
//! This crate implements:
//! - an incremental, non-blocking packet parser fed from a ring buffer
//! - CRC-32 framing for outbound packets over any `embedded-io` byte link
//! - a dispatcher routing packets to axes, a trajectory table and a reply outbox
//! - an 8-byte motor driver protocol carried by any `embedded-can` peripheral
//! - per-axis limit-switch calibration and PD speed control
//! - tick scheduling through either a timer interrupt or a blocking delay loop
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `std`                 | Disables `#![no_std]` and implements `std::error::Error` |
//! | `delay-loop`          | Uses `embedded_hal::delay::DelayNs` to pace the control tick |
//! | `timer-isr` (default) | Shares axes with interrupts through `critical_section` |
//! | `defmt-0-3`           | Uses `defmt` logging |
//! | `log`                 | Uses `log` logging |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axislink::{axis::*, dispatch::*, frame::FrameWriter, parser::PacketParser, ring::RingBuffer};
//!
//! let mut ring = RingBuffer::new(&mut RX_STORAGE);
//! let mut parser: PacketParser = PacketParser::default();
//! let mut dispatcher: Dispatcher = Dispatcher::new(NodeConfig::default());
//! let mut writer: FrameWriter<256> = FrameWriter::new(NODE_ID_MASTER);
//! let mut axes = [AxisController::new(can1, prox1, AxisConfig::for_axis(1))];
//!
//! loop {
//!     let _ = ring.read_stream(&mut serial);
//!     {
//!         let mut ctx = dispatcher.bind(&mut axes, None);
//!         let _ = parser.drive(&mut ring, &mut ctx);
//!     }
//!     let _ = dispatcher.flush(&mut writer, &mut serial);
//!     for axis in axes.iter_mut() {
//!         let _ = axis.flush(now_us());
//!     }
//! }
//! ```
//!
//! The control tick itself runs from a timer interrupt (see [`tick`]) or from
//! [`tick::run_control_loop`] when the `delay-loop` feature is enabled.
//!
//! ## Integration Notes
//!
//! - Calibration tick counts assume the rate the tick is actually driven at; see
//!   [`tick::dwell_ticks`].
//! - The parser has no idle timeout. Call [`PacketParser::reset`](parser::PacketParser::reset)
//!   when the link drops.
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod fmt;

#[cfg(feature = "timer-isr")]
pub use critical_section;

pub use heapless;

pub mod axis;
pub mod consts;
pub(crate) mod crc;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod motor;
pub mod parser;
pub mod ring;
pub mod tick;
pub mod trajectory;

#[cfg(test)]
mod mock;
