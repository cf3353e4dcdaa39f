//! # Pipeline
//!
//! [`Engine`] owns the loaded sample, both paths and the published result. A
//! full run looks like this:
//!
//! ```text
//!              ┌──► [Rise path] ──► trim ──► normalize ──┐
//! original ────┤                                         ├──► [Reassemble] ──► normalize ──► fades ──► publish
//!              └──► [Fall path] ──► trim ──► normalize ──┘
//! ```
//!
//! The two paths run in parallel on the rayon pool. A reassemble-only run
//! skips the paths and rejoins their last results, which is all a time
//! offset change needs.
//!
//! ## Threading
//!
//! Runs happen on a background thread (see `worker`). The audio thread only
//! ever touches [`Engine::snapshot`], which is a lock-free load of the last
//! published [`Rendered`] buffer. The snapshot before that is kept alive by
//! the engine until the next publish, so a reader that loaded it never ends
//! up freeing it.
//!
//! Only one run may be in flight. A run requested while another is active is
//! dropped and reported as [`RunOutcome::Busy`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::{ArcSwapOption, Guard};
use parking_lot::Mutex;

use crate::buffer::{self, SampleBuffer};
use crate::dsp::feedback_delay::DelayLimits;
use crate::error::Result;
use crate::impulse::{ImpulsePreset, ImpulseResponse, ImpulseSource};
use crate::loader::{self, LoadedSample};
use crate::path::PathProcessor;
use crate::reassemble;
use crate::settings::{EffectSettings, ParamEvent, PathKind, Scope};

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Silence threshold used when trimming a newly loaded sample.
    pub trim_threshold: f32,
    /// Fraction of the output faded in at the start and out at the end.
    pub fade_fraction: f32,
    pub delay: DelayLimits,
    /// Block size for the reverb's overlap-add convolution.
    pub convolution_block: usize,
    /// Output level of the playback driver.
    pub playback_gain: f32,
    /// Tempo used until the host reports one.
    pub default_bpm: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trim_threshold: buffer::DEFAULT_TRIM_THRESHOLD,
            fade_fraction: 0.1,
            delay: DelayLimits::default(),
            convolution_block: 288_000,
            playback_gain: 0.9,
            default_bpm: 120.0,
        }
    }
}

/// A finished output buffer.
#[derive(Debug)]
pub struct Rendered {
    /// Increases by one with every publish.
    pub generation: u64,
    pub sample_rate: f32,
    pub buffer: SampleBuffer,
}

/// What a run request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new buffer was published with this generation.
    Rendered(u64),
    /// Another run was in progress; nothing changed.
    Busy,
    NoSample,
    NotPrepared,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Context {
    sample_rate: f32,
    bpm: f64,
}

struct EngineState {
    context: Option<Context>,
    /// The loaded sample after normalizing and trimming.
    original: Option<SampleBuffer>,
    rise: PathProcessor,
    fall: PathProcessor,
    /// Channel count the paths were last prepared for.
    num_channels: usize,
    impulse: Option<(ImpulsePreset, ImpulseResponse)>,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Full,
    Reassemble,
}

pub struct Engine {
    config: PipelineConfig,
    impulses: Box<dyn ImpulseSource>,

    processing: AtomicBool,
    state: Mutex<EngineState>,

    output: ArcSwapOption<Rendered>,
    /// The snapshot published before the current one.
    retired: Mutex<Option<Arc<Rendered>>>,
    generation: AtomicU64,
}

impl Engine {
    pub fn new(config: PipelineConfig, impulses: Box<dyn ImpulseSource>) -> Self {
        let mut rise = PathProcessor::new(PathKind::Rise);
        let mut fall = PathProcessor::new(PathKind::Fall);
        for path in [&mut rise, &mut fall] {
            path.set_delay_limits(config.delay);
            path.set_trim_threshold(config.trim_threshold);
        }

        Self {
            config,
            impulses,
            processing: AtomicBool::new(false),
            state: Mutex::new(EngineState {
                context: None,
                original: None,
                rise,
                fall,
                num_channels: 2,
                impulse: None,
            }),
            output: ArcSwapOption::empty(),
            retired: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Set the processing rate and tempo. The first call also loads the
    /// selected impulse response.
    ///
    /// Returns true when a sample is loaded and its render is now stale.
    pub fn prepare(&self, sample_rate: f32, bpm: f64, settings: &EffectSettings) -> Result<bool> {
        let mut state = self.state.lock();
        let context = Context { sample_rate, bpm };
        let previous = state.context.replace(context);
        if previous == Some(context) {
            return Ok(false);
        }

        nih_plug::nih_log!("pipeline: prepared at {} Hz, {} BPM", sample_rate, bpm);
        let num_channels = state.num_channels;
        self.prepare_paths(&mut state, context, num_channels)?;

        if state.impulse.is_none() {
            if let Err(err) = self.load_impulse_locked(&mut state, settings.impulse_response) {
                nih_plug::nih_warn!("pipeline: reverb stays silent, {}", err);
            }
        }

        Ok(state.original.is_some())
    }

    /// Tempo used for delay spacing. Returns true when the render is stale.
    pub fn set_tempo(&self, bpm: f64) -> bool {
        let mut state = self.state.lock();
        let Some(context) = state.context.as_mut() else {
            return false;
        };
        if context.bpm == bpm {
            return false;
        }
        context.bpm = bpm;
        state.rise.set_tempo(bpm);
        state.fall.set_tempo(bpm);
        state.original.is_some()
    }

    /// Normalize and trim a new sample, then render it.
    pub fn load_sample(
        &self,
        sample: LoadedSample,
        settings: &EffectSettings,
    ) -> Result<RunOutcome> {
        let Some(_guard) = self.begin_run() else {
            return Ok(RunOutcome::Busy);
        };

        let mut original = sample.buffer;
        buffer::normalize(&mut original);
        let kept = buffer::trim(&mut original, self.config.trim_threshold);
        nih_plug::nih_log!(
            "pipeline: loaded {} channel(s) at {} Hz, kept frames {}..{}",
            original.num_channels(),
            sample.sample_rate,
            kept.start,
            kept.end
        );

        let mut state = self.state.lock();
        if original.num_channels() != state.num_channels && original.num_channels() > 0 {
            state.num_channels = original.num_channels();
            if let Some(context) = state.context {
                self.prepare_paths(&mut state, context, original.num_channels())?;
                self.reload_impulse_locked(&mut state)?;
            }
        }
        state.original = Some(original);

        self.run_locked(&mut state, settings, Stage::Full)
    }

    /// Decode a WAV file and load it. On failure nothing changes.
    pub fn load_sample_file(&self, path: &Path, settings: &EffectSettings) -> Result<RunOutcome> {
        let sample = loader::load_wav_file(path).map_err(|err| {
            nih_plug::nih_error!("pipeline: failed to load {}: {}", path.display(), err);
            err
        })?;
        self.load_sample(sample, settings)
    }

    /// Switch both paths to `preset`'s impulse response.
    pub fn load_impulse_response(&self, preset: ImpulsePreset) -> Result<()> {
        let mut state = self.state.lock();
        self.load_impulse_locked(&mut state, preset)
    }

    /// Full render: both paths, then reassembly.
    pub fn process(&self, settings: &EffectSettings) -> Result<RunOutcome> {
        let Some(_guard) = self.begin_run() else {
            nih_plug::nih_warn!("pipeline: run in progress, dropping render request");
            return Ok(RunOutcome::Busy);
        };
        let mut state = self.state.lock();
        self.run_locked(&mut state, settings, Stage::Full)
    }

    /// Rejoin the last path results with the current time offset.
    pub fn reassemble(&self, settings: &EffectSettings) -> Result<RunOutcome> {
        let Some(_guard) = self.begin_run() else {
            nih_plug::nih_warn!("pipeline: run in progress, dropping reassemble request");
            return Ok(RunOutcome::Busy);
        };
        let mut state = self.state.lock();
        self.run_locked(&mut state, settings, Stage::Reassemble)
    }

    /// React to a parameter change. `settings` must already contain the new
    /// value. Returns `None` when the event needs no work from the engine.
    pub fn handle_event(
        &self,
        event: &ParamEvent,
        settings: &EffectSettings,
    ) -> Result<Option<RunOutcome>> {
        let stage = match (event.id.scope(), event.gesture_end) {
            (Scope::Playback, _) | (Scope::ImpulseResponse, true) => return Ok(None),
            (Scope::ImpulseResponse, false) => {
                let Some(_guard) = self.begin_run() else {
                    return Ok(Some(RunOutcome::Busy));
                };
                let mut state = self.state.lock();
                self.load_impulse_locked(&mut state, settings.impulse_response)?;
                return self.run_locked(&mut state, settings, Stage::Full).map(Some);
            }
            (_, false) => return Ok(None),
            (Scope::Reassemble, true) => Stage::Reassemble,
            (Scope::Full, true) => Stage::Full,
        };

        match stage {
            Stage::Full => self.process(settings).map(Some),
            Stage::Reassemble => self.reassemble(settings).map(Some),
        }
    }

    /// The last published output. Lock-free and allocation-free, safe to call
    /// from the audio thread.
    pub fn snapshot(&self) -> Guard<Option<Arc<Rendered>>> {
        self.output.load()
    }

    /// Like [`Engine::snapshot`] but returns an owned reference.
    pub fn latest(&self) -> Option<Arc<Rendered>> {
        self.output.load_full()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn has_sample(&self) -> bool {
        self.state.lock().original.is_some()
    }

    fn begin_run(&self) -> Option<RunGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.processing))
    }

    fn prepare_paths(
        &self,
        state: &mut EngineState,
        context: Context,
        num_channels: usize,
    ) -> Result<()> {
        for path in [&mut state.rise, &mut state.fall] {
            path.prepare(
                context.sample_rate,
                context.bpm,
                self.config.convolution_block,
                num_channels,
            )?;
        }
        Ok(())
    }

    fn load_impulse_locked(&self, state: &mut EngineState, preset: ImpulsePreset) -> Result<()> {
        if let Some((loaded, _)) = &state.impulse {
            if *loaded == preset {
                return Ok(());
            }
        }

        let ir = self.impulses.fetch(preset)?;
        Self::install_impulse(state, &ir)?;
        nih_plug::nih_log!("pipeline: impulse response {:?} ({} bytes)", preset, ir.len());
        state.impulse = Some((preset, ir));
        Ok(())
    }

    /// Re-condition the current IR after a channel count change.
    fn reload_impulse_locked(&self, state: &mut EngineState) -> Result<()> {
        if let Some((_, ir)) = state.impulse.clone() {
            Self::install_impulse(state, &ir)?;
        }
        Ok(())
    }

    /// Decode once and give both paths the result, or leave both alone.
    fn install_impulse(state: &mut EngineState, ir: &ImpulseResponse) -> Result<()> {
        if let Some(conditioned) = state.rise.condition_impulse(ir)? {
            state.fall.install_impulse(conditioned.clone());
            state.rise.install_impulse(conditioned);
        }
        Ok(())
    }

    fn run_locked(
        &self,
        state: &mut EngineState,
        settings: &EffectSettings,
        stage: Stage,
    ) -> Result<RunOutcome> {
        let Some(context) = state.context else {
            return Ok(RunOutcome::NotPrepared);
        };
        let EngineState {
            original,
            rise,
            fall,
            ..
        } = state;
        let Some(original) = original.as_ref() else {
            return Ok(RunOutcome::NoSample);
        };

        let started = Instant::now();
        if stage == Stage::Full {
            let (rise_result, fall_result) = rayon::join(
                || rise.process(original, settings).map(|_| ()),
                || fall.process(original, settings).map(|_| ()),
            );
            if let Err(err) = rise_result.and(fall_result) {
                nih_plug::nih_error!("pipeline: render failed, keeping previous output: {}", err);
                return Err(err);
            }
        }

        let offset = reassemble::offset_frames(settings.time_offset, context.sample_rate);
        let mut output = reassemble::concatenate(rise.buffer(), fall.buffer(), offset);
        buffer::normalize(&mut output);
        self.apply_fades(&mut output);

        let frames = output.num_frames();
        let generation = self.publish(context.sample_rate, output);
        nih_plug::nih_log!(
            "pipeline: {:?} run #{} done, {} + {} -> {} frames in {:.1?}",
            stage,
            generation,
            rise.buffer().num_frames(),
            fall.buffer().num_frames(),
            frames,
            started.elapsed()
        );
        Ok(RunOutcome::Rendered(generation))
    }

    fn apply_fades(&self, output: &mut SampleBuffer) {
        let frames = output.num_frames();
        let fade = ((frames as f32 * self.config.fade_fraction) as usize).min(frames);
        output.apply_gain_ramp(0, fade, 0.0, 1.0);
        output.apply_gain_ramp(frames - fade, fade, 1.0, 0.0);
    }

    fn publish(&self, sample_rate: f32, buffer: SampleBuffer) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let rendered = Arc::new(Rendered {
            generation,
            sample_rate,
            buffer,
        });
        let previous = self.output.swap(Some(rendered));
        *self.retired.lock() = previous;
        generation
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse::SynthesizedRooms;
    use crate::settings::{ParamId, ParamValue};

    const SR: f32 = 8000.0;

    fn engine() -> Engine {
        Engine::new(
            PipelineConfig::default(),
            Box::new(SynthesizedRooms::new(8000)),
        )
    }

    /// Every stage off, no reversal.
    fn bypass() -> EffectSettings {
        EffectSettings {
            time_offset: 0,
            rise_reverse: false,
            fall_reverse: false,
            rise_reverb: false,
            rise_delay: false,
            fall_reverb: false,
            fall_delay: false,
            impulse_response: ImpulsePreset::ApartmentBedroom,
            ..EffectSettings::default()
        }
    }

    /// Always-positive so that trimming leaves it alone.
    fn tone(frames: usize, sample_rate: f32) -> LoadedSample {
        let data: Vec<f32> = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate;
                0.5 + 0.4 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            })
            .collect();
        LoadedSample {
            buffer: SampleBuffer::from_channels(vec![data.clone(), data]).unwrap(),
            sample_rate,
        }
    }

    fn output_frames(engine: &Engine) -> usize {
        engine.latest().map_or(0, |r| r.buffer.num_frames())
    }

    #[test]
    fn test_requires_prepare_and_sample() {
        let engine = engine();
        let settings = bypass();
        assert_eq!(engine.process(&settings).unwrap(), RunOutcome::NotPrepared);

        assert!(!engine.prepare(SR, 120.0, &settings).unwrap());
        assert_eq!(engine.process(&settings).unwrap(), RunOutcome::NoSample);
        assert!(engine.latest().is_none());
    }

    /// Rise forward, fall reversed, no gap: the second half mirrors the first.
    #[test]
    fn test_rise_and_fall_mirror() {
        let engine = engine();
        let settings = EffectSettings {
            fall_reverse: true,
            ..bypass()
        };
        engine.prepare(48000.0, 120.0, &settings).unwrap();
        let outcome = engine.load_sample(tone(48000, 48000.0), &settings).unwrap();
        assert_eq!(outcome, RunOutcome::Rendered(1));

        let rendered = engine.latest().unwrap();
        assert_eq!(rendered.generation, 1);
        assert_eq!(rendered.buffer.num_frames(), 96000);

        let left = rendered.buffer.channel(0);
        // Outside the 9600-frame fades the halves match exactly.
        for k in (0..38000).step_by(97) {
            assert_eq!(left[48000 + k], left[47999 - k], "Mismatch at k = {k}");
        }
        assert!((rendered.buffer.peak() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fades_at_both_ends() {
        let engine = engine();
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(4000, SR), &settings).unwrap();

        let rendered = engine.latest().unwrap();
        let left = rendered.buffer.channel(0);
        assert_eq!(left.len(), 8000);
        assert_eq!(left[0], 0.0);
        assert!(left[7999].abs() < 0.01);
    }

    /// A time offset change only rejoins the paths.
    #[test]
    fn test_offset_event_reassembles() {
        let engine = engine();
        let mut settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();
        assert_eq!(output_frames(&engine), 2000);

        settings.time_offset = 50;
        let event = ParamEvent::changed(ParamId::TimeOffset, ParamValue::Int(50));
        assert_eq!(engine.handle_event(&event, &settings).unwrap(), None);
        assert_eq!(output_frames(&engine), 2000);

        let event = ParamEvent::committed(ParamId::TimeOffset, ParamValue::Int(50));
        let outcome = engine.handle_event(&event, &settings).unwrap();
        assert_eq!(outcome, Some(RunOutcome::Rendered(2)));
        assert_eq!(output_frames(&engine), 2400);

        settings.time_offset = -50;
        engine.handle_event(&event, &settings).unwrap();
        assert_eq!(output_frames(&engine), 1600);
    }

    /// Each path is trimmed and normalized before the join, and a
    /// reassemble-only run reuses those results.
    #[test]
    fn test_paths_trimmed_and_normalized_before_join() {
        let engine = engine();
        let mut settings = EffectSettings {
            rise_delay: true,
            delay_time: -6,
            delay_feedback: 50.0,
            delay_mix: 100.0,
            ..bypass()
        };
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        // 16-frame spacing, ten echoes: the rise ends at the last echo, not
        // one spacing later.
        let rise_frames = 16 * 10 + 1000;
        let rendered = engine.latest().unwrap();
        assert_eq!(rendered.buffer.num_frames(), rise_frames + 1000);

        // The echoes raised the rise's peak; the fall is still at full scale.
        let fall_body = &rendered.buffer.channel(0)[rise_frames..rise_frames + 700];
        let fall_peak = fall_body.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        assert!(fall_peak > 0.98, "Fall peaks at {fall_peak}");

        settings.time_offset = 10;
        assert_eq!(engine.reassemble(&settings).unwrap(), RunOutcome::Rendered(2));
        assert_eq!(output_frames(&engine), rise_frames + 80 + 1000);
    }

    #[test]
    fn test_event_scopes() {
        let engine = engine();
        let mut settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        let filter = ParamEvent::committed(ParamId::FilterCutoff, ParamValue::Float(500.0));
        assert_eq!(engine.handle_event(&filter, &settings).unwrap(), None);

        settings.rise_time_warp = 2.0;
        let moving = ParamEvent::changed(ParamId::RiseTimeWarp, ParamValue::Float(2.0));
        assert_eq!(engine.handle_event(&moving, &settings).unwrap(), None);

        let released = ParamEvent::committed(ParamId::RiseTimeWarp, ParamValue::Float(2.0));
        assert_eq!(
            engine.handle_event(&released, &settings).unwrap(),
            Some(RunOutcome::Rendered(2))
        );
        // The warped rise loses its weightless first frame to the trim.
        let frames = output_frames(&engine);
        assert!(frames.abs_diff(1500) <= 2, "Got {frames} frames");
    }

    #[test]
    fn test_impulse_change_reprocesses() {
        let engine = engine();
        let mut settings = EffectSettings {
            rise_reverb: true,
            reverb_mix: 100.0,
            ..bypass()
        };
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();
        let with_bedroom = output_frames(&engine);
        assert!(with_bedroom > 2000);

        settings.impulse_response = ImpulsePreset::Stairwell;
        let value = ParamValue::Choice(ImpulsePreset::Stairwell.index());
        let released = ParamEvent::committed(ParamId::ImpulseResponse, value);
        assert_eq!(engine.handle_event(&released, &settings).unwrap(), None);

        let changed = ParamEvent::changed(ParamId::ImpulseResponse, value);
        assert_eq!(
            engine.handle_event(&changed, &settings).unwrap(),
            Some(RunOutcome::Rendered(2))
        );
        assert!(output_frames(&engine) > with_bedroom);
    }

    /// Serves a silent, unusable recording for the stairwell.
    struct SilentStairwell(SynthesizedRooms);

    impl ImpulseSource for SilentStairwell {
        fn fetch(&self, preset: ImpulsePreset) -> Result<ImpulseResponse> {
            if preset == ImpulsePreset::Stairwell {
                let silence = SampleBuffer::new(2, 64);
                return Ok(ImpulseResponse::from_bytes(loader::encode_wav_bytes(&silence, 8000)?));
            }
            self.0.fetch(preset)
        }
    }

    /// A rejected IR leaves both paths on the previous one.
    #[test]
    fn test_bad_impulse_response_changes_neither_path() {
        let engine = Engine::new(
            PipelineConfig::default(),
            Box::new(SilentStairwell(SynthesizedRooms::new(8000))),
        );
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        let before = engine.state.lock().rise.ir_len();
        assert!(before > 0);

        assert!(engine.load_impulse_response(ImpulsePreset::Stairwell).is_err());

        let state = engine.state.lock();
        assert_eq!(state.rise.ir_len(), before);
        assert_eq!(state.fall.ir_len(), before);
        assert_eq!(
            state.impulse.as_ref().map(|(preset, _)| *preset),
            Some(ImpulsePreset::ApartmentBedroom)
        );
    }

    #[test]
    fn test_busy_drops_request() {
        let engine = engine();
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        engine.processing.store(true, Ordering::Release);
        assert!(engine.is_processing());
        assert_eq!(engine.process(&settings).unwrap(), RunOutcome::Busy);
        assert_eq!(engine.reassemble(&settings).unwrap(), RunOutcome::Busy);
        assert_eq!(engine.latest().unwrap().generation, 1);

        engine.processing.store(false, Ordering::Release);
        assert_eq!(engine.process(&settings).unwrap(), RunOutcome::Rendered(2));
        assert!(!engine.is_processing());
    }

    #[test]
    fn test_runaway_delay_keeps_previous_output() {
        let config = PipelineConfig {
            delay: DelayLimits {
                max_taps: 2,
                ..DelayLimits::default()
            },
            ..PipelineConfig::default()
        };
        let engine = Engine::new(config, Box::new(SynthesizedRooms::new(8000)));
        let mut settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        settings.fall_delay = true;
        settings.delay_time = -6;
        settings.delay_mix = 100.0;
        assert!(engine.process(&settings).is_err());
        assert!(!engine.is_processing());

        let rendered = engine.latest().unwrap();
        assert_eq!(rendered.generation, 1);
        assert_eq!(rendered.buffer.num_frames(), 2000);
    }

    #[test]
    fn test_bad_file_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.wav");
        std::fs::write(&bad, b"RIFF but not really").unwrap();

        let engine = engine();
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        assert!(engine.load_sample_file(&bad, &settings).is_err());
        assert!(engine.has_sample());
        assert_eq!(engine.latest().unwrap().generation, 1);

        let good = dir.path().join("good.wav");
        loader::write_wav_file(&good, &tone(500, SR).buffer, 8000).unwrap();
        assert_eq!(
            engine.load_sample_file(&good, &settings).unwrap(),
            RunOutcome::Rendered(2)
        );
        assert_eq!(output_frames(&engine), 1000);
    }

    /// Silence trims to nothing and still renders a valid buffer.
    #[test]
    fn test_silent_sample() {
        let engine = engine();
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        let silent = LoadedSample {
            buffer: SampleBuffer::new(2, 1000),
            sample_rate: SR,
        };
        assert_eq!(engine.load_sample(silent, &settings).unwrap(), RunOutcome::Rendered(1));
        let rendered = engine.latest().unwrap();
        assert_eq!(rendered.buffer.num_frames(), 1);
        assert_eq!(rendered.buffer.channel(0), &[0.0]);
    }

    #[test]
    fn test_prepare_and_tempo_report_staleness() {
        let engine = engine();
        let settings = bypass();
        assert!(!engine.set_tempo(90.0));
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();

        assert!(!engine.prepare(SR, 120.0, &settings).unwrap());
        assert!(engine.prepare(16000.0, 120.0, &settings).unwrap());
        assert!(engine.set_tempo(90.0));
        assert!(!engine.set_tempo(90.0));
    }

    /// The previous snapshot outlives a publish.
    #[test]
    fn test_previous_snapshot_retained() {
        let engine = engine();
        let settings = bypass();
        engine.prepare(SR, 120.0, &settings).unwrap();
        engine.load_sample(tone(1000, SR), &settings).unwrap();
        let first = engine.latest().unwrap();
        engine.process(&settings).unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.as_deref().map(|r| r.generation), Some(2));
        assert_eq!(Arc::strong_count(&first), 2);
    }
}
