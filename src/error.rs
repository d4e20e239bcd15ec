//! Crate-wide error type.
//!
//! Hardware errors are flattened to the `ErrorKind` of the trait they came through,
//! so a single [`Error`] can travel across the byte link, the CAN bus and the limit
//! switch without dragging HAL-specific generics along.
//!
//! Framing and integrity failures on the receive path are not errors in this sense:
//! the [`PacketParser`](crate::parser::PacketParser) counts them and resynchronizes.

use crate::frame::FrameError;
use crate::motor::MotorError;
use thiserror::Error;

/// Everything that can go wrong while driving a link or an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The host byte link reported an I/O failure.
    #[error("byte link error: {0:?}")]
    Link(embedded_io::ErrorKind),
    /// The CAN peripheral reported a bus or controller failure.
    #[error("CAN bus error: {0:?}")]
    Can(embedded_can::ErrorKind),
    /// The limit switch input could not be read.
    #[error("limit switch error: {0:?}")]
    Switch(embedded_hal::digital::ErrorKind),
    /// An outbound packet could not be built.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A motor driver frame could not be decoded.
    #[error(transparent)]
    Motor(#[from] MotorError),
}

impl Error {
    /// Wraps any `embedded_io` error as [`Error::Link`].
    pub fn link<E: embedded_io::Error>(err: E) -> Self {
        Self::Link(err.kind())
    }

    /// Wraps any `embedded_can` error as [`Error::Can`].
    pub fn can<E: embedded_can::Error>(err: E) -> Self {
        Self::Can(err.kind())
    }

    /// Wraps any `embedded_hal` digital error as [`Error::Switch`].
    pub fn switch<E: embedded_hal::digital::Error>(err: E) -> Self {
        Self::Switch(err.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_errors_convert() {
        let err: Error = FrameError::PayloadTooLarge.into();
        assert_eq!(err, Error::Frame(FrameError::PayloadTooLarge));

        let err: Error = MotorError::ShortFrame(3).into();
        assert!(matches!(err, Error::Motor(MotorError::ShortFrame(3))));
    }

    #[test]
    fn test_can_error_flattens_to_kind() {
        let err = Error::can(embedded_can::ErrorKind::Overrun);
        assert_eq!(err, Error::Can(embedded_can::ErrorKind::Overrun));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_display_messages() {
        let err = Error::Frame(FrameError::BufferTooSmall {
            needed: 40,
            capacity: 32,
        });
        assert_eq!(
            err.to_string(),
            "send buffer too small: need 40 bytes, have 32"
        );
    }
}
