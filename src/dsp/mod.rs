//! # DSP Stages
//!
//! The effects a path can run, plus the playback filter:
//!
//! - **`time_warp`**: tempo change without pitch change (WSOLA).
//! - **`convolution`**: convolution reverb against a recorded space.
//! - **`feedback_delay`**: decaying echo train, computed offline.
//! - **`filter`**: resonant low/high-pass applied while the result plays.

pub mod convolution;
pub mod feedback_delay;
pub mod filter;
pub mod time_warp;
