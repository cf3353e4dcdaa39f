//! # Reassembly
//!
//! Joins the processed rise and fall into one timeline. The fall starts
//! `offset` frames after the end of the rise: a positive offset leaves a gap
//! of silence, a negative one overlaps the two and sums them.
//!
//! ```text
//! offset > 0:   |---- rise ----|..gap..|---- fall ----|
//! offset < 0:   |---- rise ----|
//!                          |---- fall ----|
//! ```
//!
//! The result is always `max(1, R + F + offset)` frames long. If the overlap
//! is larger than the rise, the head of the fall that would land before
//! frame 0 is dropped.

use crate::buffer::SampleBuffer;

/// Convert a time offset in milliseconds to frames, rounding up.
pub fn offset_frames(offset_ms: i32, sample_rate: f32) -> i64 {
    (f64::from(offset_ms) / 1000.0 * f64::from(sample_rate)).ceil() as i64
}

/// Where each part lands in the joined buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// First frame of the fall, relative to the start of the rise. May be
    /// negative.
    pub fall_start: i64,
    pub total: usize,
}

impl Layout {
    pub fn new(rise_frames: usize, fall_frames: usize, offset: i64) -> Self {
        let rise = rise_frames as i64;
        let fall = fall_frames as i64;
        Self {
            fall_start: rise + offset,
            total: (rise + fall + offset).max(1) as usize,
        }
    }
}

/// Join `rise` and `fall` with `offset` frames between them.
///
/// Frames not covered by either part are zero. The result has as many
/// channels as the wider of the two inputs.
pub fn concatenate(rise: &SampleBuffer, fall: &SampleBuffer, offset: i64) -> SampleBuffer {
    let layout = Layout::new(rise.num_frames(), fall.num_frames(), offset);
    let channels = rise.num_channels().max(fall.num_channels());
    let mut out = SampleBuffer::new(channels, layout.total);

    out.add_from(0, rise, 1.0);
    if layout.fall_start >= 0 {
        out.add_from(layout.fall_start as usize, fall, 1.0);
    } else {
        let skipped = layout.fall_start.unsigned_abs() as usize;
        out.add_from(0, &fall.slice(skipped..fall.num_frames()), 1.0);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
