//! # Feedback Delay
//!
//! Builds a decaying echo train offline. Starting from a base "tap" (the
//! signal scaled by the delay mix), every iteration attenuates the tap once
//! more by the dampening factor and mixes it into the output one spacing
//! further along:
//!
//! ```text
//! output[s * i + t] += d^i * base[t]      for i = 1, 2, 3, ...
//! ```
//!
//! The output grows as needed so that each echo fits completely, with one
//! spacing of room after it: tap `i` needs `s * (i + 1) + tap_len` frames.
//! Growing by `tap_len + s` on every tap instead only adds trailing silence,
//! which the path trims off, so both give the same result.
//!
//! Each tap is mixed in before its level is acted on: the first tap whose
//! peak is at or below the continue threshold is still written, and ends the
//! train. A dampening of 1 or more never gets there, so the loop is bounded
//! by a tap count and an output length; hitting either aborts with
//! [`Error::RunawayDelay`].

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};

/// Bounds for one delay run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayLimits {
    /// A tap whose peak is at or below this ends the echo train.
    pub threshold: f32,
    pub max_taps: usize,
    /// Upper bound on the grown output, in frames.
    pub max_frames: usize,
}

impl Default for DelayLimits {
    fn default() -> Self {
        Self {
            threshold: 1e-3,
            max_taps: 4096,
            // Ten minutes at 48 kHz.
            max_frames: 48000 * 60 * 10,
        }
    }
}

/// Mix echoes of `base` into `output`, growing it as needed.
///
/// Returns the number of taps written. On error `output` may already hold
/// some of the echoes and should be discarded.
pub fn apply(
    output: &mut SampleBuffer,
    base: &SampleBuffer,
    dampening: f32,
    spacing: usize,
    limits: &DelayLimits,
) -> Result<usize> {
    if spacing == 0 {
        return Err(Error::InvalidDelay("tap spacing is zero".into()));
    }
    if !dampening.is_finite() || dampening < 0.0 {
        return Err(Error::InvalidDelay(format!("dampening {dampening}")));
    }

    let mut tap = base.clone();
    let mut taps = 0;
    loop {
        tap.apply_gain(dampening);
        let more = tap.peak() > limits.threshold;

        let iteration = taps + 1;
        let runaway = Error::RunawayDelay {
            taps,
            frames: output.num_frames(),
        };
        if iteration > limits.max_taps {
            return Err(runaway);
        }
        let needed = spacing
            .checked_mul(iteration + 1)
            .and_then(|frames| frames.checked_add(tap.num_frames()));
        let needed = match needed {
            Some(needed) if needed <= limits.max_frames => needed,
            _ => return Err(runaway),
        };
        let offset = spacing * iteration;

        if needed > output.num_frames() {
            output.resize(needed);
        }
        output.add_from(offset, &tap, 1.0);
        taps = iteration;
        if !more {
            break;
        }
    }

    nih_plug::nih_trace!(
        "delay: {} taps at spacing {}, output {} frames",
        taps,
        spacing,
        output.num_frames()
    );
    Ok(taps)
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn click(frames: usize, peak: f32) -> SampleBuffer {
        let mut data = vec![0.0; frames];
        data[0] = peak;
        SampleBuffer::from_channels(vec![data.clone(), data]).unwrap()
    }

    /// The train is exactly ceil(log(threshold / peak) / log(d)) taps long.
    #[test]
    fn test_terminates_at_bound() {
        let limits = DelayLimits::default();
        for peak in [1.0_f32, 0.5, 0.01] {
            let base = click(100, peak);
            let mut output = base.clone();
            let taps = apply(&mut output, &base, 0.5, 1000, &limits).unwrap();

            let bound = ((0.001 / peak).ln() / 0.5_f32.ln()).ceil() as usize;
            assert_eq!(taps, bound, "Wrong tap count for peak {peak}");
            assert_eq!(output.num_frames(), 1000 * taps + 100 + 1000);
        }
    }

    #[test]
    fn test_echo_positions_and_levels() {
        let base = click(10, 1.0);
        let mut output = base.clone();
        let taps = apply(&mut output, &base, 0.5, 20, &DelayLimits::default()).unwrap();
        assert_eq!(taps, 10);
        assert_eq!(output.num_frames(), 20 * 11 + 10);

        let left = output.channel(0);
        assert_eq!(left[0], 1.0);
        assert_eq!(left[20], 0.5);
        assert_eq!(left[40], 0.25);
        assert_eq!(left[180], 0.5_f32.powi(9));
        // At the threshold, but still mixed in.
        assert_eq!(left[200], 0.5_f32.powi(10));
        assert_eq!(left[220], 0.0);
    }

    /// Existing output beyond the echoes is kept intact.
    #[test]
    fn test_longer_output_is_not_shrunk() {
        let base = click(4, 1.0);
        let mut output = SampleBuffer::new(2, 5000);
        apply(&mut output, &base, 0.1, 10, &DelayLimits::default()).unwrap();
        assert_eq!(output.num_frames(), 5000);
        assert!((output.channel(1)[10] - 0.1).abs() < 1e-7);
    }

    /// A silent base writes its single (silent) tap and stops.
    #[test]
    fn test_silent_base_adds_nothing() {
        let base = SampleBuffer::new(2, 50);
        let mut output = base.clone();
        assert_eq!(apply(&mut output, &base, 0.9, 10, &DelayLimits::default()).unwrap(), 1);
        assert_eq!(output.num_frames(), 10 * 2 + 50);
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_runaway_is_capped() {
        let base = click(10, 1.0);
        let limits = DelayLimits {
            max_taps: 64,
            ..DelayLimits::default()
        };
        let mut output = base.clone();
        let result = apply(&mut output, &base, 1.0, 10, &limits);
        assert!(matches!(result, Err(Error::RunawayDelay { taps: 64, .. })));

        let limits = DelayLimits {
            max_frames: 1000,
            ..DelayLimits::default()
        };
        let mut output = base.clone();
        let result = apply(&mut output, &base, 0.999, 100, &limits);
        assert!(matches!(result, Err(Error::RunawayDelay { .. })));
        assert!(output.num_frames() <= 1000);
    }

    #[test]
    fn test_invalid_settings() {
        let base = click(10, 1.0);
        let mut output = base.clone();
        let limits = DelayLimits::default();
        assert!(matches!(
            apply(&mut output, &base, 0.5, 0, &limits),
            Err(Error::InvalidDelay(_))
        ));
        assert!(matches!(
            apply(&mut output, &base, f32::NAN, 10, &limits),
            Err(Error::InvalidDelay(_))
        ));
    }
}
