//! # Time Warp (Tempo Change Without Pitch Change)
//!
//! Plain resampling changes speed and pitch together. To change only the
//! speed we cut the input into overlapping grains, lay them out at a
//! different spacing than they were read at, and crossfade them back
//! together. This is WSOLA (Waveform-Similarity Overlap-Add):
//!
//! ```text
//! input   |----A----|                 read hop  = hop * tempo
//!                   |----B----|
//! output  |----A----|                 write hop = hop
//!              |----B----|            (50% overlap, Hann crossfade)
//! ```
//!
//! Naively placing grain B where the tempo says it should come from causes
//! phase cancellation in the crossfade. WSOLA instead searches a small window
//! around that nominal read position for the grain that best continues what
//! grain A was already playing (maximum normalized cross-correlation), so the
//! overlap lines up in phase.
//!
//! The processor is streaming: [`TimeWarp::push`] input, [`TimeWarp::flush`]
//! at the end, [`TimeWarp::pull`] finished output. One instance handles one
//! channel at a time and must be [`TimeWarp::clear`]ed between channels.

use std::f32::consts::PI;

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};

/// Output hop (half a grain), in seconds.
const HOP_SECONDS: f32 = 0.02;
/// How far either side of the nominal read position we search.
const SEEK_SECONDS: f32 = 0.008;
/// Length of the region compared when searching.
const CORRELATION_SECONDS: f32 = 0.01;

/// Turn a time warp factor into a tempo multiplier.
///
/// `n > 0` speeds up `n` times, `-n` slows down `n` times. Zero means the
/// stage is disabled and is rejected.
pub fn tempo_for_factor(factor: i32) -> Result<f64> {
    match factor {
        0 => Err(Error::ZeroTimeWarp),
        f if f < 0 => Ok(1.0 / f64::from(f.unsigned_abs())),
        f => Ok(f64::from(f)),
    }
}

/// Streaming WSOLA tempo changer for a single channel.
pub struct TimeWarp {
    tempo: f64,

    /// Output hop in samples; grains are `2 * hop` long.
    hop: usize,
    seek: usize,
    correlation_len: usize,
    window: Vec<f32>,

    input: Vec<f32>,
    flushed: bool,
    /// Index of the next grain to place.
    grain: usize,
    /// Where in the input the previous grain was read from.
    prev_read: Option<usize>,
    /// Windowed grain sum and window sum, indexed by output position.
    accum: Vec<f32>,
    weight: Vec<f32>,
    emitted: usize,
}

impl TimeWarp {
    pub fn new(sample_rate: f32) -> Self {
        let mut warp = Self {
            tempo: 1.0,
            hop: 0,
            seek: 0,
            correlation_len: 0,
            window: Vec::new(),
            input: Vec::new(),
            flushed: false,
            grain: 0,
            prev_read: None,
            accum: Vec::new(),
            weight: Vec::new(),
            emitted: 0,
        };
        warp.set_sample_rate(sample_rate);
        warp
    }

    /// Resize the grains for a sample rate. Clears any pending audio.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.hop = ((sample_rate * HOP_SECONDS).round() as usize).max(16);
        self.seek = (sample_rate * SEEK_SECONDS).round() as usize;
        self.correlation_len = ((sample_rate * CORRELATION_SECONDS) as usize).clamp(8, self.hop);

        // Periodic Hann: at 50% overlap consecutive windows sum to exactly 1.
        let len = self.hop * 2;
        self.window = (0..len)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / len as f32).cos()))
            .collect();
        self.clear();
    }

    /// Set the tempo multiplier (> 0). 2.0 plays twice as fast.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo.max(f64::EPSILON);
    }

    /// Output samples produced per input sample.
    pub fn input_output_ratio(&self) -> f64 {
        1.0 / self.tempo
    }

    /// Number of output samples `input_len` input samples turn into.
    pub fn output_len(&self, input_len: usize) -> usize {
        // The epsilon absorbs 1/(1/n) not landing exactly on n.
        (input_len as f64 * self.input_output_ratio() - 1e-9)
            .ceil()
            .max(0.0) as usize
    }

    /// Feed more input and process every grain that is now complete.
    pub fn push(&mut self, samples: &[f32]) {
        self.input.extend_from_slice(samples);
        self.render();
    }

    /// Mark the end of input; the remaining output becomes available.
    pub fn flush(&mut self) {
        self.flushed = true;
        self.render();
    }

    /// Samples ready to be pulled.
    pub fn available(&self) -> usize {
        self.ready_end().saturating_sub(self.emitted)
    }

    /// Copy finished output into `out`. Returns how many samples were written.
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.available());
        for (i, slot) in out[..count].iter_mut().enumerate() {
            let pos = self.emitted + i;
            *slot = match (self.accum.get(pos), self.weight.get(pos)) {
                (Some(&sum), Some(&weight)) if weight > 1e-6 => sum / weight,
                (Some(&sum), Some(_)) => sum,
                _ => 0.0,
            };
        }
        self.emitted += count;
        count
    }

    /// Drop all buffered audio so the next channel starts clean.
    pub fn clear(&mut self) {
        self.input.clear();
        self.flushed = false;
        self.grain = 0;
        self.prev_read = None;
        self.accum.clear();
        self.weight.clear();
        self.emitted = 0;
    }

    /// Change the tempo of every channel of `buffer` by `factor` (see
    /// [`tempo_for_factor`]). The buffer is resized to the new length.
    pub fn apply(&mut self, buffer: &mut SampleBuffer, factor: i32) -> Result<()> {
        self.set_tempo(tempo_for_factor(factor)?);
        let frames = self.output_len(buffer.num_frames());

        let mut channels = Vec::with_capacity(buffer.num_channels());
        for data in buffer.channels() {
            self.push(data);
            self.flush();
            let mut out = vec![0.0; frames];
            self.pull(&mut out);
            self.clear();
            channels.push(out);
        }

        *buffer = SampleBuffer::from_channels(channels)?;
        Ok(())
    }

    // ─── Internals ───

    fn ready_end(&self) -> usize {
        if self.flushed {
            self.output_len(self.input.len())
        } else {
            // Nothing before the next grain's start will be touched again.
            (self.grain * self.hop).min(self.accum.len())
        }
    }

    #[inline]
    fn input_at(&self, pos: usize) -> f32 {
        self.input.get(pos).copied().unwrap_or(0.0)
    }

    fn render(&mut self) {
        let grain_len = self.hop * 2;
        loop {
            let out_start = self.grain * self.hop;
            if self.flushed && out_start >= self.output_len(self.input.len()) {
                break;
            }

            let nominal = (self.grain as f64 * self.hop as f64 * self.tempo).round() as usize;
            let natural = self.prev_read.map(|prev| prev + self.hop);

            if !self.flushed {
                let furthest = natural.unwrap_or(0).max(nominal + self.seek);
                if self.input.len() < furthest + grain_len {
                    break;
                }
            }

            let read = match natural {
                Some(natural) => self.best_read_position(natural, nominal),
                None => nominal,
            };

            if self.accum.len() < out_start + grain_len {
                self.accum.resize(out_start + grain_len, 0.0);
                self.weight.resize(out_start + grain_len, 0.0);
            }
            for i in 0..grain_len {
                let w = self.window[i];
                self.accum[out_start + i] += self.input_at(read + i) * w;
                self.weight[out_start + i] += w;
            }

            self.prev_read = Some(read);
            self.grain += 1;
        }
    }

    /// Search `nominal ± seek` for the read position whose start best matches
    /// the natural continuation of the previous grain.
    fn best_read_position(&self, natural: usize, nominal: usize) -> usize {
        let lo = nominal.saturating_sub(self.seek);
        let hi = nominal + self.seek;

        let mut best = nominal;
        let mut best_score = f32::NEG_INFINITY;
        for candidate in lo..=hi {
            let mut cross = 0.0_f32;
            let mut energy = 0.0_f32;
            for j in 0..self.correlation_len {
                let c = self.input_at(candidate + j);
                cross += self.input_at(natural + j) * c;
                energy += c * c;
            }
            let score = cross / (energy + 1e-9).sqrt();
            if score > best_score {
                best_score = score;
                best = candidate;
            }
        }
        best
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
