//! Logging shims for the serial trace.
//!
//! The stack narrates packet receptions, routing decisions and session state through these
//! macros. With the `log` cargo feature enabled they forward to the `log` crate under the
//! `"wicker"` target, so the embedder's serial sink can filter the stack's output from the rest
//! of the firmware's. Without the feature they expand to `format_args!`, which still type-checks
//! and borrows every argument but emits no code.

#[cfg(feature = "log")]
macro_rules! error {
    ($($t:tt)*) => {{ log::error!(target: "wicker", $($t)*); }};
}

#[cfg(feature = "log")]
macro_rules! warn {
    ($($t:tt)*) => {{ log::warn!(target: "wicker", $($t)*); }};
}

#[cfg(feature = "log")]
macro_rules! info {
    ($($t:tt)*) => {{ log::info!(target: "wicker", $($t)*); }};
}

#[cfg(feature = "log")]
macro_rules! debug {
    ($($t:tt)*) => {{ log::debug!(target: "wicker", $($t)*); }};
}

#[cfg(feature = "log")]
macro_rules! trace {
    ($($t:tt)*) => {{ log::trace!(target: "wicker", $($t)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($t:tt)*) => {{ format_args!($($t)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($t:tt)*) => {{ format_args!($($t)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($t:tt)*) => {{ format_args!($($t)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($t:tt)*) => {{ format_args!($($t)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($t:tt)*) => {{ format_args!($($t)*); }};
}
