//! # Plugin Parameters
//!
//! Everything the host can automate, plus the persisted path of the loaded
//! sample. The string IDs are the engine's parameter IDs, so saved sessions
//! and the engine's settings document use the same names. Once published,
//! never change them.
//!
//! ## Change notification
//!
//! Nothing is rendered from a parameter callback. Each callback posts a
//! [`Command::Param`] to the worker and returns; the worker reads the new
//! values back through [`RiseAndFallParams::settings`]. `try_send` on the
//! bounded channel never blocks or allocates, so automation on the audio
//! thread is safe. If the queue is full the change is dropped; a later
//! change of the same parameter will carry the value.

use std::sync::Arc;

use crossbeam_channel::Sender;
use nih_plug::prelude::*;
use parking_lot::RwLock;

use crate::dsp::filter::{FilterSettings, FilterType};
use crate::impulse::ImpulsePreset;
use crate::settings::{
    EffectSettings, ParamId, DELAY_FEEDBACK_RANGE, DELAY_TIME_RANGE, FILTER_CUTOFF_RANGE,
    FILTER_RESONANCE_RANGE, MIX_RANGE, TIME_OFFSET_RANGE, TIME_WARP_RANGE,
};
use crate::worker::{Command, SettingsSource};

#[derive(Params)]
pub struct RiseAndFallParams {
    /// Path of the loaded sample, reloaded when a session is restored.
    #[persist = "sample-path"]
    pub sample_path: Arc<RwLock<Option<String>>>,

    /// **Time Offset**: silence between rise and fall (positive) or how far
    /// they overlap (negative).
    #[id = "timeOffset"]
    pub time_offset: IntParam,

    #[id = "riseReverse"]
    pub rise_reverse: BoolParam,
    #[id = "fallReverse"]
    pub fall_reverse: BoolParam,
    #[id = "riseReverb"]
    pub rise_reverb: BoolParam,
    #[id = "riseDelay"]
    pub rise_delay: BoolParam,
    #[id = "fallReverb"]
    pub fall_reverb: BoolParam,
    #[id = "fallDelay"]
    pub fall_delay: BoolParam,

    /// **Time Warp**: tempo change without pitch change. Positive values
    /// speed up by that factor, negative values slow down, 0 is off.
    #[id = "riseTimeWarp"]
    pub rise_time_warp: FloatParam,
    #[id = "fallTimeWarp"]
    pub fall_time_warp: FloatParam,

    /// **Delay Time**: note-length index of the echo spacing, relative to
    /// the host tempo.
    #[id = "delayTime"]
    pub delay_time: IntParam,

    /// **Delay Feedback**: level of each echo relative to the one before.
    /// Capped below 100% so the echo train always dies out.
    #[id = "delayFeedback"]
    pub delay_feedback: FloatParam,

    #[id = "impulseResponse"]
    pub impulse_response: EnumParam<ImpulsePreset>,

    #[id = "reverbMix"]
    pub reverb_mix: FloatParam,
    #[id = "delayMix"]
    pub delay_mix: FloatParam,

    /// The playback filter. These never trigger a render.
    #[id = "filterType"]
    pub filter_type: EnumParam<FilterType>,
    #[id = "filterCutoff"]
    pub filter_cutoff: FloatParam,
    #[id = "filterResonance"]
    pub filter_resonance: FloatParam,

    /// **Loop**: wrap around at the end instead of stopping.
    #[id = "loop"]
    pub looping: BoolParam,
}

/// A parameter callback that tells the worker `id` changed.
fn notify<T: 'static>(events: &Option<Sender<Command>>, id: ParamId) -> Arc<dyn Fn(T) + Send + Sync> {
    let events = events.clone();
    Arc::new(move |_| {
        if let Some(events) = &events {
            let _ = events.try_send(Command::Param(id));
        }
    })
}

fn percent(name: &str, default: f32, events: &Option<Sender<Command>>, id: ParamId) -> FloatParam {
    FloatParam::new(
        name,
        default,
        FloatRange::Linear {
            min: MIX_RANGE.0,
            max: MIX_RANGE.1,
        },
    )
    .with_unit("%")
    .with_step_size(0.1)
    .with_callback(notify(events, id))
}

fn time_warp(name: &str, events: &Option<Sender<Command>>, id: ParamId) -> FloatParam {
    FloatParam::new(
        name,
        0.0,
        FloatRange::Linear {
            min: TIME_WARP_RANGE.0,
            max: TIME_WARP_RANGE.1,
        },
    )
    .with_step_size(2.0)
    .with_value_to_string(Arc::new(|value| match value.round() as i32 {
        0 => "Off".to_string(),
        n if n > 0 => format!("{n}x faster"),
        n => format!("{}x slower", -n),
    }))
    .with_callback(notify(events, id))
}

fn toggle(name: &str, default: bool, events: &Option<Sender<Command>>, id: ParamId) -> BoolParam {
    BoolParam::new(name, default).with_callback(notify(events, id))
}

impl Default for RiseAndFallParams {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RiseAndFallParams {
    /// Parameters that report changes to `events`, if given.
    pub fn new(events: Option<Sender<Command>>) -> Self {
        let defaults = EffectSettings::default();
        let events = &events;

        Self {
            sample_path: Arc::new(RwLock::new(None)),

            time_offset: IntParam::new(
                "Time Offset",
                defaults.time_offset,
                IntRange::Linear {
                    min: TIME_OFFSET_RANGE.0,
                    max: TIME_OFFSET_RANGE.1,
                },
            )
            .with_unit(" ms")
            .with_callback(notify(events, ParamId::TimeOffset)),

            rise_reverse: toggle("Rise Reverse", defaults.rise_reverse, events, ParamId::RiseReverse),
            fall_reverse: toggle("Fall Reverse", defaults.fall_reverse, events, ParamId::FallReverse),
            rise_reverb: toggle("Rise Reverb", defaults.rise_reverb, events, ParamId::RiseReverb),
            rise_delay: toggle("Rise Delay", defaults.rise_delay, events, ParamId::RiseDelay),
            fall_reverb: toggle("Fall Reverb", defaults.fall_reverb, events, ParamId::FallReverb),
            fall_delay: toggle("Fall Delay", defaults.fall_delay, events, ParamId::FallDelay),

            rise_time_warp: time_warp("Rise Time Warp", events, ParamId::RiseTimeWarp),
            fall_time_warp: time_warp("Fall Time Warp", events, ParamId::FallTimeWarp),

            delay_time: IntParam::new(
                "Delay Time",
                defaults.delay_time,
                IntRange::Linear {
                    min: DELAY_TIME_RANGE.0,
                    max: DELAY_TIME_RANGE.1,
                },
            )
            .with_callback(notify(events, ParamId::DelayTime)),

            delay_feedback: FloatParam::new(
                "Delay Feedback",
                defaults.delay_feedback,
                FloatRange::Linear {
                    min: DELAY_FEEDBACK_RANGE.0,
                    max: DELAY_FEEDBACK_RANGE.1,
                },
            )
            .with_unit("%")
            .with_step_size(0.1)
            .with_callback(notify(events, ParamId::DelayFeedback)),

            impulse_response: EnumParam::new("Impulse Response", defaults.impulse_response)
                .with_callback(notify(events, ParamId::ImpulseResponse)),

            reverb_mix: percent("Reverb Mix", defaults.reverb_mix, events, ParamId::ReverbMix),
            delay_mix: percent("Delay Mix", defaults.delay_mix, events, ParamId::DelayMix),

            filter_type: EnumParam::new("Filter Type", defaults.filter_type)
                .with_callback(notify(events, ParamId::FilterType)),

            filter_cutoff: FloatParam::new(
                "Filter Cutoff",
                defaults.filter_cutoff,
                FloatRange::Skewed {
                    min: FILTER_CUTOFF_RANGE.0,
                    max: FILTER_CUTOFF_RANGE.1,
                    // Frequency perception is roughly logarithmic.
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_unit(" Hz")
            .with_step_size(1.0)
            .with_callback(notify(events, ParamId::FilterCutoff)),

            filter_resonance: FloatParam::new(
                "Filter Resonance",
                defaults.filter_resonance,
                FloatRange::Linear {
                    min: FILTER_RESONANCE_RANGE.0,
                    max: FILTER_RESONANCE_RANGE.1,
                },
            )
            .with_step_size(0.01)
            .with_callback(notify(events, ParamId::FilterResonance)),

            looping: BoolParam::new("Loop", false),
        }
    }

    /// Snapshot of every engine parameter.
    pub fn settings(&self) -> EffectSettings {
        EffectSettings {
            time_offset: self.time_offset.value(),
            rise_reverse: self.rise_reverse.value(),
            fall_reverse: self.fall_reverse.value(),
            rise_reverb: self.rise_reverb.value(),
            rise_delay: self.rise_delay.value(),
            fall_reverb: self.fall_reverb.value(),
            fall_delay: self.fall_delay.value(),
            rise_time_warp: self.rise_time_warp.value(),
            fall_time_warp: self.fall_time_warp.value(),
            delay_time: self.delay_time.value(),
            delay_feedback: self.delay_feedback.value(),
            impulse_response: self.impulse_response.value(),
            reverb_mix: self.reverb_mix.value(),
            delay_mix: self.delay_mix.value(),
            filter_type: self.filter_type.value(),
            filter_cutoff: self.filter_cutoff.value(),
            filter_resonance: self.filter_resonance.value(),
        }
    }

    /// Current playback filter. Cheap enough to call every block.
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            kind: self.filter_type.value(),
            cutoff_hz: self.filter_cutoff.value(),
            resonance: self.filter_resonance.value(),
        }
    }

    pub fn sample_path(&self) -> Option<String> {
        self.sample_path.read().clone()
    }

    pub fn set_sample_path(&self, path: Option<String>) {
        *self.sample_path.write() = path;
    }
}

impl SettingsSource for RiseAndFallParams {
    fn settings(&self) -> EffectSettings {
        RiseAndFallParams::settings(self)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
