//! # Sample Buffers
//!
//! [`SampleBuffer`] is the unit of work for the whole engine: a block of
//! non-interleaved float channels that all have the same frame count. Every
//! stage takes one, transforms it (possibly changing its length) and hands it
//! on. The sample rate is not stored here; it travels alongside as context.
//!
//! The free functions at the bottom are the buffer-level operations the
//! pipeline applies between stages: peak normalization and silence trimming.

use std::ops::Range;

use crate::error::{Error, Result};

/// Default threshold below which samples count as silence when trimming.
pub const DEFAULT_TRIM_THRESHOLD: f32 = 0.0001;

/// Peaks at or below this are treated as digital silence by [`normalize`].
const SILENCE_PEAK: f32 = f32::EPSILON;

/// A multichannel block of audio. All channels have `num_frames()` samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl SampleBuffer {
    /// A silent buffer of the given shape.
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames]; num_channels],
            frames: num_frames,
        }
    }

    /// Build a buffer from per-channel sample vectors.
    ///
    /// Fails if the channels differ in length.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Result<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        if let Some((channel, data)) = channels
            .iter()
            .enumerate()
            .find(|(_, data)| data.len() != frames)
        {
            return Err(Error::RaggedChannels {
                channel,
                frames: data.len(),
                expected: frames,
            });
        }

        Ok(Self { channels, frames })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.frames
    }

    /// True if there is nothing to play: no channels or no frames.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.frames == 0
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    /// Read one sample, returning silence outside the buffer.
    #[inline]
    pub fn sample_or_zero(&self, channel: usize, frame: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|data| data.get(frame))
            .copied()
            .unwrap_or(0.0)
    }

    /// Change the frame count. Existing content is kept, new frames are
    /// explicitly zeroed.
    pub fn resize(&mut self, num_frames: usize) {
        for data in &mut self.channels {
            data.resize(num_frames, 0.0);
        }
        self.frames = num_frames;
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|data| data.iter())
            .fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for sample in self.channels.iter_mut().flat_map(|data| data.iter_mut()) {
            *sample *= gain;
        }
    }

    /// Multiply `len` frames starting at `start` by a gain that moves linearly
    /// from `from` towards `to`. Frame `start + i` gets `from + i * (to - from) / len`.
    pub fn apply_gain_ramp(&mut self, start: usize, len: usize, from: f32, to: f32) {
        if len == 0 {
            return;
        }
        let end = (start + len).min(self.frames);
        let step = (to - from) / len as f32;
        for data in &mut self.channels {
            for (i, sample) in data[start.min(end)..end].iter_mut().enumerate() {
                *sample *= from + step * i as f32;
            }
        }
    }

    /// Reverse every channel in time.
    pub fn reverse(&mut self) {
        for data in &mut self.channels {
            data.reverse();
        }
    }

    /// Copy of the frames in `range`, clamped to the buffer.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.frames);
        let start = range.start.min(end);
        Self {
            channels: self
                .channels
                .iter()
                .map(|data| data[start..end].to_vec())
                .collect(),
            frames: end - start,
        }
    }

    /// Mix `source * gain` into this buffer starting at frame `offset`.
    ///
    /// Only the overlapping region is touched. Missing channels on either side
    /// are skipped.
    pub fn add_from(&mut self, offset: usize, source: &SampleBuffer, gain: f32) {
        if offset >= self.frames {
            return;
        }
        let len = source.frames.min(self.frames - offset);
        for (dest, src) in self.channels.iter_mut().zip(&source.channels) {
            for (d, s) in dest[offset..offset + len].iter_mut().zip(&src[..len]) {
                *d += s * gain;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Buffer operations
// ─────────────────────────────────────────────────────────────────────

/// Scale the buffer so its peak magnitude is 1.0.
///
/// A silent buffer is left untouched (dividing by a zero peak would fill it
/// with NaN). Returns whether the buffer was scaled.
pub fn normalize(buffer: &mut SampleBuffer) -> bool {
    let peak = buffer.peak();
    if peak <= SILENCE_PEAK {
        return false;
    }
    buffer.apply_gain(1.0 / peak);
    true
}

/// Index of the first frame where any channel rises above `threshold`.
///
/// The comparison is against the signed sample value, so only positive-going
/// excursions count. Returns `num_frames()` when nothing qualifies.
pub fn first_loud_frame(buffer: &SampleBuffer, threshold: f32) -> usize {
    (0..buffer.num_frames())
        .find(|&frame| buffer.channels().any(|data| data[frame] > threshold))
        .unwrap_or(buffer.num_frames())
}

/// Like [`first_loud_frame`] but scanning backwards: the number of frames at
/// the end of the buffer before a loud one is met.
fn loud_frames_from_end(buffer: &SampleBuffer, threshold: f32) -> usize {
    (0..buffer.num_frames())
        .find(|&back| {
            let frame = buffer.num_frames() - 1 - back;
            buffer.channels().any(|data| data[frame] > threshold)
        })
        .unwrap_or(buffer.num_frames())
}

/// Index of the first frame where any channel's magnitude exceeds `threshold`.
pub fn first_audible_frame(buffer: &SampleBuffer, threshold: f32) -> usize {
    (0..buffer.num_frames())
        .find(|&frame| buffer.channels().any(|data| data[frame].abs() > threshold))
        .unwrap_or(buffer.num_frames())
}

/// Cut leading and trailing silence, keeping the inclusive span between the
/// first and last loud frames. A buffer with no loud frame becomes empty.
///
/// Returns the kept range in the original frame positions.
pub fn trim(buffer: &mut SampleBuffer, threshold: f32) -> Range<usize> {
    let frames = buffer.num_frames();
    let start = first_loud_frame(buffer, threshold);
    let end = frames - loud_frames_from_end(buffer, threshold);
    let kept = start..end.max(start);

    if kept.start != 0 || kept.end != frames {
        nih_plug::nih_trace!(
            "trim: dropped 0..{} and {}..{}",
            kept.start,
            kept.end,
            frames
        );
        *buffer = buffer.slice(kept.clone());
    }
    kept
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(left: &[f32], right: &[f32]) -> SampleBuffer {
        SampleBuffer::from_channels(vec![left.to_vec(), right.to_vec()]).unwrap()
    }

    #[test]
    fn test_ragged_channels_rejected() {
        let result = SampleBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]]);
        assert!(matches!(
            result,
            Err(Error::RaggedChannels { channel: 1, frames: 3, expected: 4 })
        ));
    }

    /// Normalizing any non-silent buffer puts its peak at exactly 1.0,
    /// whether the peak is positive or negative.
    #[test]
    fn test_normalize_peak_is_one() {
        for (left, right) in [
            (vec![0.1, -0.25, 0.05], vec![0.0, 0.2, 0.0]),
            (vec![3.0, 1.0, -2.0], vec![0.5, 0.5, 0.5]),
            (vec![0.0, 0.0, 1e-3], vec![-4e-4, 0.0, 0.0]),
        ] {
            let mut buffer = stereo(&left, &right);
            assert!(normalize(&mut buffer));
            let peak = buffer.peak();
            assert!((peak - 1.0).abs() < 1e-6, "Expected peak 1.0, got {peak}");
        }
    }

    /// A silent buffer must stay silent instead of turning into NaN.
    #[test]
    fn test_normalize_silence_is_noop() {
        let mut buffer = SampleBuffer::new(2, 16);
        assert!(!normalize(&mut buffer));
        assert!(buffer.channels().flatten().all(|s| *s == 0.0));
    }

    #[test]
    fn test_first_loud_frame_uses_signed_values() {
        // A large negative excursion at frame 1 is not "loud"; the positive
        // one at frame 3 is.
        let buffer = stereo(&[0.0, -0.9, 0.0, 0.0], &[0.0, 0.0, 0.0, 0.5]);
        assert_eq!(first_loud_frame(&buffer, 0.01), 3);
        assert_eq!(first_audible_frame(&buffer, 0.01), 1);
    }

    #[test]
    fn test_first_loud_frame_none_found() {
        let buffer = SampleBuffer::new(2, 10);
        assert_eq!(first_loud_frame(&buffer, 0.01), 10);
    }

    #[test]
    fn test_trim_keeps_inclusive_span() {
        let mut buffer = stereo(
            &[0.0, 0.0, 0.5, 0.1, 0.0, 0.0],
            &[0.0, 0.0, 0.0, 0.0, 0.3, 0.0],
        );
        let kept = trim(&mut buffer, DEFAULT_TRIM_THRESHOLD);
        assert_eq!(kept, 2..5);
        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.channel(0), &[0.5, 0.1, 0.0]);
        assert_eq!(buffer.channel(1), &[0.0, 0.0, 0.3]);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut buffer = stereo(
            &[0.0, 0.2, -0.4, 0.3, 0.0, 0.0, 0.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.6, 0.0],
        );
        trim(&mut buffer, DEFAULT_TRIM_THRESHOLD);
        let once = buffer.clone();
        let kept = trim(&mut buffer, DEFAULT_TRIM_THRESHOLD);
        assert_eq!(kept, 0..once.num_frames());
        assert_eq!(buffer, once);
    }

    /// An entirely silent buffer trims down to zero frames, and the empty
    /// result survives further operations.
    #[test]
    fn test_trim_silence_to_empty() {
        let mut buffer = SampleBuffer::new(2, 100);
        trim(&mut buffer, DEFAULT_TRIM_THRESHOLD);
        assert_eq!(buffer.num_frames(), 0);
        assert_eq!(buffer.num_channels(), 2);
        assert!(buffer.is_empty());

        assert!(!normalize(&mut buffer));
        buffer.reverse();
        trim(&mut buffer, DEFAULT_TRIM_THRESHOLD);
        assert_eq!(buffer.num_frames(), 0);
    }

    #[test]
    fn test_resize_zero_fills() {
        let mut buffer = stereo(&[1.0, 2.0], &[3.0, 4.0]);
        buffer.resize(4);
        assert_eq!(buffer.channel(0), &[1.0, 2.0, 0.0, 0.0]);
        assert_eq!(buffer.channel(1), &[3.0, 4.0, 0.0, 0.0]);
        buffer.resize(1);
        assert_eq!(buffer.channel(1), &[3.0]);
    }

    #[test]
    fn test_gain_ramp_matches_linear_steps() {
        let mut buffer = SampleBuffer::from_channels(vec![vec![1.0; 6]]).unwrap();
        buffer.apply_gain_ramp(0, 4, 0.0, 1.0);
        assert_eq!(buffer.channel(0), &[0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);

        let mut buffer = SampleBuffer::from_channels(vec![vec![1.0; 6]]).unwrap();
        buffer.apply_gain_ramp(2, 4, 1.0, 0.0);
        assert_eq!(buffer.channel(0), &[1.0, 1.0, 1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn test_add_from_clips_to_destination() {
        let mut dest = SampleBuffer::from_channels(vec![vec![1.0; 4]]).unwrap();
        let source = SampleBuffer::from_channels(vec![vec![0.5; 4]]).unwrap();
        dest.add_from(2, &source, 2.0);
        assert_eq!(dest.channel(0), &[1.0, 1.0, 2.0, 2.0]);
        dest.add_from(10, &source, 1.0);
        assert_eq!(dest.num_frames(), 4);
    }
}
