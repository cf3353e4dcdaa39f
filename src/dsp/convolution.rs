//! # Convolution Reverb
//!
//! Places a sound in a recorded space by convolving it with that space's
//! impulse response. The whole buffer is processed at once, so the output is
//! the full linear convolution: `n + m - 1` frames for an input of `n` frames
//! and an IR of `m` frames. Nothing of the tail is cut off.
//!
//! Convolution is done by FFT overlap-add. The input is cut into blocks of
//! the prepared block size, each block is multiplied with the IR spectrum, and
//! the results are summed back at their offsets.
//!
//! ## IR conditioning
//!
//! A freshly loaded IR is
//!
//! 1. reduced to one channel, or two when the reverb is prepared for more than
//!    one channel,
//! 2. trimmed of leading and trailing silence,
//! 3. resampled to the processing rate (band-limited, through rubato), and
//! 4. scaled to unit energy, so switching rooms does not change loudness.
//!
//! Loads are memoized on the payload's content key plus the mono/stereo mode.

use realfft::RealFftPlanner;
use rubato::{FftFixedIn, Resampler};

use crate::buffer::{self, SampleBuffer};
use crate::error::{Error, Result};
use crate::impulse::{ImpulseKey, ImpulseResponse};
use crate::loader;

/// Samples at or below this magnitude count as silence when trimming an IR.
pub const IR_TRIM_THRESHOLD: f32 = 1e-4;

/// Block size used until [`ConvolutionReverb::prepare`] is called.
const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Input chunk and sub-chunk count for IR resampling.
const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// A decoded and trimmed IR, kept at its native rate so it can be
/// re-conditioned when the processing rate changes.
#[derive(Clone)]
struct LoadedImpulse {
    key: ImpulseKey,
    stereo: bool,
    sample_rate: f32,
    channels: Vec<Vec<f32>>,
}

/// An IR decoded and conditioned for one processing context, ready to be
/// installed with [`ConvolutionReverb::install`]. Cloning it lets several
/// reverbs prepared alike share one decode.
#[derive(Clone)]
pub struct ConditionedImpulse {
    impulse: LoadedImpulse,
    sample_rate: f32,
    kernels: Vec<Vec<f32>>,
}

pub struct ConvolutionReverb {
    sample_rate: f32,
    block_size: usize,
    num_channels: usize,

    impulse: Option<LoadedImpulse>,
    /// The conditioned IR, one kernel per IR channel.
    kernels: Vec<Vec<f32>>,

    planner: RealFftPlanner<f32>,
}

impl Default for ConvolutionReverb {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvolutionReverb {
    pub fn new() -> Self {
        Self {
            sample_rate: 48000.0,
            block_size: DEFAULT_BLOCK_SIZE,
            num_channels: 2,
            impulse: None,
            kernels: Vec::new(),
            planner: RealFftPlanner::new(),
        }
    }

    /// Set the processing context. A rate change re-conditions the loaded IR.
    /// The channel count only takes effect on the next load.
    pub fn prepare(
        &mut self,
        sample_rate: f32,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<()> {
        let rate_changed = sample_rate != self.sample_rate;
        self.sample_rate = sample_rate;
        self.block_size = max_block_size.max(1);
        self.num_channels = num_channels;
        if rate_changed {
            self.kernels = match &self.impulse {
                Some(impulse) => condition(impulse, sample_rate)?,
                None => Vec::new(),
            };
        }
        Ok(())
    }

    /// Install an impulse response.
    ///
    /// Returns `Ok(false)` without decoding anything when the same payload is
    /// already loaded in the same mode. On error the previous IR stays active.
    pub fn load_impulse_response(&mut self, ir: &ImpulseResponse) -> Result<bool> {
        match self.condition_impulse(ir)? {
            Some(conditioned) => {
                self.install(conditioned);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode, trim and condition `ir` for the current context without
    /// touching the active IR. `None` if it is already loaded in this mode.
    pub fn condition_impulse(&self, ir: &ImpulseResponse) -> Result<Option<ConditionedImpulse>> {
        let stereo = self.num_channels > 1;
        if let Some(loaded) = &self.impulse {
            if loaded.key == ir.key() && loaded.stereo == stereo {
                nih_plug::nih_trace!("reverb: {:?} already loaded", ir.key());
                return Ok(None);
            }
        }

        let decoded = loader::decode_wav_bytes(ir.payload())?;
        let wanted = if stereo { 2 } else { 1 };
        let kept = SampleBuffer::from_channels(
            decoded
                .buffer
                .channels()
                .take(wanted)
                .map(<[f32]>::to_vec)
                .collect(),
        )?;

        let start = buffer::first_audible_frame(&kept, IR_TRIM_THRESHOLD);
        let end = audible_end(&kept, IR_TRIM_THRESHOLD);
        let trimmed = kept.slice(start..end.max(start));
        if trimmed.is_empty() {
            return Err(Error::ImpulseResponse("impulse response is silent".into()));
        }

        nih_plug::nih_log!(
            "reverb: decoded {:?}, {} channel(s), {} frames at {} Hz",
            ir.key(),
            trimmed.num_channels(),
            trimmed.num_frames(),
            decoded.sample_rate
        );
        let impulse = LoadedImpulse {
            key: ir.key(),
            stereo,
            sample_rate: decoded.sample_rate,
            channels: trimmed.channels().map(<[f32]>::to_vec).collect(),
        };
        let kernels = condition(&impulse, self.sample_rate)?;
        Ok(Some(ConditionedImpulse {
            impulse,
            sample_rate: self.sample_rate,
            kernels,
        }))
    }

    /// Make a conditioned IR the active one. It must have been conditioned
    /// by a reverb prepared at the same rate.
    pub fn install(&mut self, conditioned: ConditionedImpulse) {
        nih_plug::nih_debug_assert_eq!(conditioned.sample_rate, self.sample_rate);
        self.impulse = Some(conditioned.impulse);
        self.kernels = conditioned.kernels;
    }

    /// Length of the conditioned IR in frames, or 0 if none is loaded.
    pub fn ir_len(&self) -> usize {
        self.kernels.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Replace `buffer` with `mix * wet + (1 - mix) * dry`, where the dry
    /// signal is zero-padded to the wet length.
    ///
    /// Does nothing if no IR is loaded or the buffer has no frames. Buffer
    /// channel `c` is convolved with IR channel `min(c, ir_channels - 1)`.
    pub fn process(&mut self, buffer: &mut SampleBuffer, mix: f32) -> Result<()> {
        let m = self.ir_len();
        let n = buffer.num_frames();
        if m == 0 || n == 0 {
            return Ok(());
        }

        let out_len = n + m - 1;
        let block = self.block_size.min(n);
        let fft_size = (block + m - 1).next_power_of_two();
        let fft = self.planner.plan_fft_forward(fft_size);
        let ifft = self.planner.plan_fft_inverse(fft_size);
        let norm = 1.0 / fft_size as f32;
        let mix = mix.clamp(0.0, 1.0);

        let mut time = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut kernel_spectrum = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();
        let mut inverse_scratch = ifft.make_scratch_vec();

        let mut channels = Vec::with_capacity(buffer.num_channels());
        for (c, dry) in buffer.channels().enumerate() {
            let kernel = &self.kernels[c.min(self.kernels.len() - 1)];
            time.fill(0.0);
            time[..kernel.len()].copy_from_slice(kernel);
            fft.process_with_scratch(&mut time, &mut kernel_spectrum, &mut scratch)?;

            let mut wet = vec![0.0_f32; out_len];
            for start in (0..n).step_by(block) {
                let chunk = &dry[start..(start + block).min(n)];
                time.fill(0.0);
                time[..chunk.len()].copy_from_slice(chunk);
                fft.process_with_scratch(&mut time, &mut spectrum, &mut scratch)?;

                for (s, k) in spectrum.iter_mut().zip(&kernel_spectrum) {
                    *s *= *k;
                }
                // Rounding can leave a residue the inverse transform rejects.
                spectrum[0].im = 0.0;
                if let Some(last) = spectrum.last_mut() {
                    last.im = 0.0;
                }
                ifft.process_with_scratch(&mut spectrum, &mut time, &mut inverse_scratch)?;

                let span = chunk.len() + m - 1;
                for (w, t) in wet[start..start + span].iter_mut().zip(&time[..span]) {
                    *w += t * norm;
                }
            }

            for (i, w) in wet.iter_mut().enumerate() {
                let d = dry.get(i).copied().unwrap_or(0.0);
                *w = mix * *w + (1.0 - mix) * d;
            }
            channels.push(wet);
        }

        *buffer = SampleBuffer::from_channels(channels)?;
        Ok(())
    }
}

/// One past the last frame whose magnitude exceeds `threshold`, or 0.
fn audible_end(buffer: &SampleBuffer, threshold: f32) -> usize {
    (0..buffer.num_frames())
        .rev()
        .find(|&frame| buffer.channels().any(|data| data[frame].abs() > threshold))
        .map_or(0, |frame| frame + 1)
}

/// Resample an IR to `sample_rate` and scale it to unit energy.
fn condition(impulse: &LoadedImpulse, sample_rate: f32) -> Result<Vec<Vec<f32>>> {
    let mut kernels = resample(&impulse.channels, impulse.sample_rate, sample_rate)?;

    let energy = kernels
        .iter()
        .map(|k| k.iter().map(|s| s * s).sum::<f32>())
        .fold(0.0_f32, f32::max);
    if energy > 0.0 {
        let gain = 1.0 / energy.sqrt();
        for sample in kernels.iter_mut().flatten() {
            *sample *= gain;
        }
    }
    Ok(kernels)
}

/// Band-limited rate conversion of equally long channels.
///
/// The output has `ceil(frames * to / from)` frames and is aligned with the
/// input: the resampler's delay is cut from the front.
fn resample(channels: &[Vec<f32>], from: f32, to: f32) -> Result<Vec<Vec<f32>>> {
    let from_rate = from.round() as usize;
    let to_rate = to.round() as usize;
    let frames = channels.first().map_or(0, Vec::len);
    if frames == 0 || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return Ok(channels.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate,
        to_rate,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        channels.len(),
    )?;
    let delay = resampler.output_delay();
    let expected = (frames as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;

    let mut output: Vec<Vec<f32>> = (0..channels.len())
        .map(|_| Vec::with_capacity(expected + delay + RESAMPLE_CHUNK))
        .collect();
    let mut pos = 0;
    // Past the end the input is zero-padded, which flushes the filter.
    while output[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = channels
            .iter()
            .map(|data| {
                let mut chunk = vec![0.0_f32; needed];
                let end = (pos + needed).min(data.len());
                if pos < end {
                    chunk[..end - pos].copy_from_slice(&data[pos..end]);
                }
                chunk
            })
            .collect();
        let resampled = resampler.process(&chunk, None)?;
        for (out, data) in output.iter_mut().zip(resampled) {
            out.extend_from_slice(&data);
        }
        pos += needed;
    }

    for out in &mut output {
        out.drain(..delay);
        out.truncate(expected);
    }
    Ok(output)
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    fn ir_from(channels: Vec<Vec<f32>>, sample_rate: u32) -> ImpulseResponse {
        let buffer = SampleBuffer::from_channels(channels).unwrap();
        ImpulseResponse::from_bytes(loader::encode_wav_bytes(&buffer, sample_rate).unwrap())
    }

    fn direct_convolve(x: &[f32], h: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; x.len() + h.len() - 1];
        for (i, xv) in x.iter().enumerate() {
            for (j, hv) in h.iter().enumerate() {
                out[i + j] += xv * hv;
            }
        }
        out
    }

    fn test_signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i * 7 % 13) as f32 - 6.0) / 6.0)
            .collect()
    }

    /// Overlap-add across several blocks must equal textbook convolution.
    #[test]
    fn test_matches_direct_convolution() {
        let h = vec![0.8, -0.4, 0.3, 0.2, -0.1, 0.05, 0.5];
        let x = test_signal(50);

        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 8, 1).unwrap();
        assert!(reverb.load_impulse_response(&ir_from(vec![h.clone()], 48000)).unwrap());
        assert_eq!(reverb.ir_len(), h.len());

        let energy: f32 = h.iter().map(|s| s * s).sum();
        let normalized: Vec<f32> = h.iter().map(|s| s / energy.sqrt()).collect();
        let expected = direct_convolve(&x, &normalized);

        let mut buffer = SampleBuffer::from_channels(vec![x]).unwrap();
        reverb.process(&mut buffer, 1.0).unwrap();

        assert_eq!(buffer.num_frames(), 56);
        for (i, (got, want)) in buffer.channel(0).iter().zip(&expected).enumerate() {
            assert!((got - want).abs() < 1e-4, "Frame {i}: {got} vs {want}");
        }
    }

    #[test]
    fn test_dry_mix_is_zero_padded_input() {
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 1).unwrap();
        reverb
            .load_impulse_response(&ir_from(vec![vec![1.0, 0.5, 0.25]], 48000))
            .unwrap();

        let x = test_signal(10);
        let mut buffer = SampleBuffer::from_channels(vec![x.clone()]).unwrap();
        reverb.process(&mut buffer, 0.0).unwrap();

        assert_eq!(buffer.num_frames(), 12);
        assert_eq!(&buffer.channel(0)[..10], x.as_slice());
        assert_eq!(&buffer.channel(0)[10..], &[0.0, 0.0]);
    }

    #[test]
    fn test_stereo_ir_per_channel() {
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 2).unwrap();
        reverb
            .load_impulse_response(&ir_from(vec![vec![1.0, 0.5], vec![0.5, 1.0]], 48000))
            .unwrap();

        let mut buffer =
            SampleBuffer::from_channels(vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]]).unwrap();
        reverb.process(&mut buffer, 1.0).unwrap();

        let g = 1.0 / 1.25_f32.sqrt();
        let left = buffer.channel(0);
        let right = buffer.channel(1);
        assert!((left[0] - g).abs() < 1e-5 && (left[1] - 0.5 * g).abs() < 1e-5);
        assert!((right[0] - 0.5 * g).abs() < 1e-5 && (right[1] - g).abs() < 1e-5);
    }

    /// Reloading the same bytes in the same mode is free; a mode change is not.
    #[test]
    fn test_load_is_memoized() {
        let ir = ir_from(vec![vec![1.0, 0.5], vec![0.5, 1.0]], 48000);
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 2).unwrap();
        assert!(reverb.load_impulse_response(&ir).unwrap());
        assert!(!reverb.load_impulse_response(&ir).unwrap());

        reverb.prepare(SR, 4096, 1).unwrap();
        assert!(reverb.load_impulse_response(&ir).unwrap());
        assert!(!reverb.load_impulse_response(&ir).unwrap());
    }

    #[test]
    fn test_ir_silence_is_trimmed() {
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 1).unwrap();
        reverb
            .load_impulse_response(&ir_from(vec![vec![0.0, 0.0, 1.0, -0.5, 0.0, 0.0]], 48000))
            .unwrap();
        assert_eq!(reverb.ir_len(), 2);
    }

    #[test]
    fn test_silent_ir_rejected_and_previous_kept() {
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 1).unwrap();
        reverb
            .load_impulse_response(&ir_from(vec![vec![1.0, 0.5]], 48000))
            .unwrap();

        let result = reverb.load_impulse_response(&ir_from(vec![vec![0.0; 32]], 48000));
        assert!(matches!(result, Err(Error::ImpulseResponse(_))));
        assert_eq!(reverb.ir_len(), 2);
    }

    #[test]
    fn test_ir_resampled_to_processing_rate() {
        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(SR, 4096, 1).unwrap();
        reverb
            .load_impulse_response(&ir_from(vec![vec![1.0; 100]], 24000))
            .unwrap();
        assert_eq!(reverb.ir_len(), 200);

        reverb.prepare(24000.0, 4096, 1).unwrap();
        assert_eq!(reverb.ir_len(), 100);
    }

    /// Content above the new Nyquist is filtered out, not folded back.
    #[test]
    fn test_downsampling_does_not_alias() {
        use std::f32::consts::PI;

        let tone = |freq: f32, rate: f32, i: usize| (2.0 * PI * freq * i as f32 / rate).sin();
        let ir: Vec<f32> = (0..9600)
            .map(|i| 0.5 * tone(1000.0, 96000.0, i) + 0.5 * tone(30000.0, 96000.0, i))
            .collect();

        let mut reverb = ConvolutionReverb::new();
        reverb.prepare(44100.0, 4096, 1).unwrap();
        reverb.load_impulse_response(&ir_from(vec![ir], 96000)).unwrap();
        let kernel = &reverb.kernels[0];
        assert!((kernel.len() as i64 - 4410).abs() <= 1, "Got {} frames", kernel.len());

        // Magnitude of the component at `freq`, away from the edges.
        let level = |freq: f32| {
            let (mut re, mut im) = (0.0_f32, 0.0_f32);
            for i in 500..3900 {
                let phase = 2.0 * PI * freq * i as f32 / 44100.0;
                re += kernel[i] * phase.cos();
                im += kernel[i] * phase.sin();
            }
            (re * re + im * im).sqrt()
        };
        let kept = level(1000.0);
        // 30 kHz would fold to 44.1 - 30 = 14.1 kHz.
        let folded = level(14100.0);
        assert!(folded < 0.05 * kept, "Aliased {folded} vs tone {kept}");
    }

    #[test]
    fn test_noop_without_ir_or_frames() {
        let mut reverb = ConvolutionReverb::new();
        let mut buffer = SampleBuffer::from_channels(vec![test_signal(16)]).unwrap();
        let before = buffer.clone();
        reverb.process(&mut buffer, 1.0).unwrap();
        assert_eq!(buffer, before);

        reverb
            .load_impulse_response(&ir_from(vec![vec![1.0, 0.5]], 48000))
            .unwrap();
        let mut empty = SampleBuffer::new(2, 0);
        reverb.process(&mut empty, 1.0).unwrap();
        assert_eq!(empty.num_frames(), 0);
    }
}
