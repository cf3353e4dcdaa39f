//! # Resonant Low/High-Pass Filter
//!
//! The playback path runs the rendered sample through one of these per
//! channel. It is a standard biquad (two-pole IIR) using the RBJ cookbook
//! coefficients, so it rolls off at 12 dB/octave and can add a resonant bump
//! at the cutoff when Q is raised above ~0.707.
//!
//! ## The Filter Equation (Direct Form II Transposed)
//!
//! ```text
//! y[n]  = b0 * x[n] + s1
//! s1    = b1 * x[n] - a1 * y[n] + s2
//! s2    = b2 * x[n] - a2 * y[n]
//! ```
//!
//! `s1` and `s2` are the filter's only memory. The coefficients are
//! normalized by `a0` when computed, so `a0` never appears here.

use std::f32::consts::PI;

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

/// Which side of the cutoff is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Enum, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    #[name = "LP"]
    LowPass,
    #[name = "HP"]
    HighPass,
}

impl FilterType {
    pub fn index(self) -> usize {
        match self {
            FilterType::LowPass => 0,
            FilterType::HighPass => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(FilterType::LowPass),
            1 => Some(FilterType::HighPass),
            _ => None,
        }
    }
}

/// Everything needed to compute a set of coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub kind: FilterType,
    pub cutoff_hz: f32,
    pub resonance: f32,
}

/// A biquad filter for one channel.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    s1: f32,
    s2: f32,
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BiquadFilter {
    /// A pass-through filter (`b0 = 1`, everything else 0).
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            s1: 0.0,
            s2: 0.0,
        }
    }

    /// Recompute coefficients. The filter memory is kept so that a moving
    /// cutoff doesn't click.
    pub fn set(&mut self, settings: FilterSettings, sample_rate: f32) {
        // Stay clear of DC and Nyquist, where the cookbook formulas blow up.
        let cutoff = settings.cutoff_hz.clamp(10.0, sample_rate * 0.49);
        let q = settings.resonance.max(0.01);

        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let a0 = 1.0 + alpha;

        match settings.kind {
            FilterType::LowPass => {
                self.b0 = ((1.0 - cos_omega) / 2.0) / a0;
                self.b1 = (1.0 - cos_omega) / a0;
                self.b2 = ((1.0 - cos_omega) / 2.0) / a0;
            }
            FilterType::HighPass => {
                self.b0 = ((1.0 + cos_omega) / 2.0) / a0;
                self.b1 = -(1.0 + cos_omega) / a0;
                self.b2 = ((1.0 + cos_omega) / 2.0) / a0;
            }
        }
        self.a1 = (-2.0 * cos_omega) / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.s1;
        self.s1 = self.b1 * input - self.a1 * output + self.s2;
        self.s2 = self.b2 * input - self.a2 * output;
        output
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        for sample in samples {
            *sample = self.process(*sample);
        }
    }

    /// Clear the filter memory.
    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
