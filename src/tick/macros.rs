/// Declares a static [`SharedAxis`](crate::tick::SharedAxis) protected by a
/// `critical_section` mutex.
///
/// # Arguments
/// - `$vis`: optional visibility of the static
/// - `$name`: name of the static
/// - `$can`: concrete CAN peripheral type (must implement `embedded_can::nb::Can`)
/// - `$sw`: concrete limit switch type (must implement `InputPin`)
///
/// # Example
/// ```rust,ignore
/// declare_axis!(pub AXIS_L, Can1, ProxPin);
/// declare_axis!(pub AXIS_R, Can2, ProxPin);
/// ```
#[macro_export]
macro_rules! declare_axis {
    ( $vis:vis $name:ident, $can:ty, $sw:ty ) => {
        $vis static $name: $crate::tick::SharedAxis<$can, $sw> =
            $crate::critical_section::Mutex::new(::core::cell::RefCell::new(None));
    };
}

/// Runs the control tick on one or more axes declared with [`declare_axis!`], all
/// inside a single critical section.
///
/// Evaluates to `Result<(), Error>` and stops at the first error. Feedback snapshots
/// are handed to the optional closure.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn PIT() {
///     let _ = tick_axis!(AXIS_L, AXIS_R; |fb| FEEDBACK.enqueue(fb));
/// }
/// ```
///
/// # Notes
/// - Axes that have not been set up are skipped.
#[macro_export]
macro_rules! tick_axis {
    ( $( $name:ident ),+ ) => {
        $crate::tick_axis!($( $name ),+ ; |_feedback| {})
    };
    ( $( $name:ident ),+ ; $on_feedback:expr ) => {
        $crate::critical_section::with(|cs| -> ::core::result::Result<(), $crate::error::Error> {
            let on_feedback = &mut $on_feedback;
            $(
                if let Some(axis) = $name.borrow(cs).borrow_mut().as_mut() {
                    if let Some(feedback) = axis.control_tick()? {
                        on_feedback(feedback);
                    }
                }
            )+
            Ok(())
        })
    };
}
