//! Single-writer async runtime around a [`crate::competition::Competition`].

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
