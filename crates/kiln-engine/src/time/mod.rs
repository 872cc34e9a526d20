//! Frame pacing.
//!
//! One [`FramePacer`] per render loop: call `tick()` once per committed frame
//! and log the [`PacingReport`] it hands back once per reporting interval.

mod pacing;

pub use pacing::{FramePacer, FrameTime, PacingReport};
