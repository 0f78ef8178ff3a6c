//! Long-running background loops.
//!
//! Both loops run until their cancellation token fires. The token is checked
//! before each iteration and raced against every sleep, so shutdown never
//! waits out a full interval.

pub mod discovery;
pub mod selection;
