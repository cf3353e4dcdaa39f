//! # Rise and Fall Paths
//!
//! Each path takes its own copy of the loaded sample and runs it through a
//! fixed chain, every stage switched by that path's settings:
//!
//! ```text
//! sample ──► [Time Warp] ──► [Reverb] ──► [Feedback Delay] ──► [Reverse] ──► trim ──► normalize
//!            factor != 0     on, mix > 0   on, mix > 0         on
//! ```
//!
//! The stored result is trimmed and normalized on its own, so a path whose
//! level grew (echoes stacked on the dry signal) does not push the other one
//! down once they are joined.
//!
//! The two paths never share mutable state, so they can run on separate
//! threads. Each owns its own reverb, with its own IR memo.

use crate::buffer::{self, SampleBuffer};
use crate::dsp::convolution::{ConditionedImpulse, ConvolutionReverb};
use crate::dsp::feedback_delay::{self, DelayLimits};
use crate::dsp::time_warp::TimeWarp;
use crate::error::{Error, Result};
use crate::impulse::ImpulseResponse;
use crate::settings::{EffectSettings, PathKind};

/// Echo spacing in frames for a note-length index at the given tempo.
///
/// With `spb = ceil(60 / bpm * sample_rate)` and `note = 2^|index|`, positive
/// indices give `note * 4 * spb` and the rest give `ceil(spb / (note * 4))`.
pub fn delay_spacing(note_index: i32, bpm: f64, sample_rate: f32) -> Result<usize> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(Error::InvalidDelay(format!("tempo {bpm} BPM")));
    }

    let samples_per_beat = (60.0 / bpm * f64::from(sample_rate)).ceil();
    let note = 2.0_f64.powi(note_index.unsigned_abs() as i32);
    let spacing = if note_index > 0 {
        (note * 4.0 * samples_per_beat) as usize
    } else {
        (samples_per_beat / (note * 4.0)).ceil() as usize
    };
    Ok(spacing)
}

pub struct PathProcessor {
    kind: PathKind,
    /// Result of the last successful run.
    buffer: SampleBuffer,

    time_warp: TimeWarp,
    reverb: ConvolutionReverb,
    limits: DelayLimits,
    trim_threshold: f32,

    sample_rate: f32,
    bpm: f64,
}

impl PathProcessor {
    pub fn new(kind: PathKind) -> Self {
        let sample_rate = 48000.0;
        Self {
            kind,
            buffer: SampleBuffer::default(),
            time_warp: TimeWarp::new(sample_rate),
            reverb: ConvolutionReverb::new(),
            limits: DelayLimits::default(),
            trim_threshold: buffer::DEFAULT_TRIM_THRESHOLD,
            sample_rate,
            bpm: 120.0,
        }
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    /// Result of the last successful [`PathProcessor::process`].
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn prepare(
        &mut self,
        sample_rate: f32,
        bpm: f64,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<()> {
        self.sample_rate = sample_rate;
        self.bpm = bpm;
        self.time_warp.set_sample_rate(sample_rate);
        self.reverb.prepare(sample_rate, max_block_size, num_channels)
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    pub fn set_delay_limits(&mut self, limits: DelayLimits) {
        self.limits = limits;
    }

    pub fn set_trim_threshold(&mut self, threshold: f32) {
        self.trim_threshold = threshold;
    }

    /// See [`ConvolutionReverb::load_impulse_response`].
    pub fn load_impulse_response(&mut self, ir: &ImpulseResponse) -> Result<bool> {
        self.reverb.load_impulse_response(ir)
    }

    /// See [`ConvolutionReverb::condition_impulse`].
    pub fn condition_impulse(&self, ir: &ImpulseResponse) -> Result<Option<ConditionedImpulse>> {
        self.reverb.condition_impulse(ir)
    }

    pub fn install_impulse(&mut self, conditioned: ConditionedImpulse) {
        self.reverb.install(conditioned);
    }

    /// Length of the active reverb IR in frames.
    pub fn ir_len(&self) -> usize {
        self.reverb.ir_len()
    }

    /// Run the chain on a copy of `source`.
    ///
    /// The stored result is only replaced when every stage succeeds.
    pub fn process(
        &mut self,
        source: &SampleBuffer,
        settings: &EffectSettings,
    ) -> Result<&SampleBuffer> {
        let path = settings.path(self.kind);
        let mut buffer = source.clone();

        if path.time_warp != 0 {
            self.time_warp.apply(&mut buffer, path.time_warp)?;
        }

        let reverb_mix = settings.reverb_mix_normalized();
        if path.reverb && reverb_mix > 0.0 {
            self.reverb.process(&mut buffer, reverb_mix)?;
        }

        let delay_mix = settings.delay_mix_normalized();
        if path.delay && delay_mix > 0.0 {
            let spacing = delay_spacing(settings.delay_time, self.bpm, self.sample_rate)?;
            let mut base = buffer.clone();
            base.apply_gain(delay_mix);
            feedback_delay::apply(
                &mut buffer,
                &base,
                settings.delay_dampening(),
                spacing,
                &self.limits,
            )?;
        }

        if path.reverse {
            buffer.reverse();
        }

        let processed = buffer.num_frames();
        buffer::trim(&mut buffer, self.trim_threshold);
        buffer::normalize(&mut buffer);

        nih_plug::nih_trace!(
            "{:?} path: {} -> {} frames, {} after trim",
            self.kind,
            source.num_frames(),
            processed,
            buffer.num_frames()
        );
        self.buffer = buffer;
        Ok(&self.buffer)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
