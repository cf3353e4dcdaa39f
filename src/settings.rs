//! # Effect Settings
//!
//! A plain-data mirror of every user parameter, keyed by the same string IDs
//! the host sees. The rendering engine never touches nih-plug parameter
//! objects directly; it works from an [`EffectSettings`] snapshot taken when a
//! render starts, so a knob moving mid-render cannot tear the result.
//!
//! The same struct doubles as the persisted settings document: it serializes
//! to a flat JSON object keyed by parameter ID. Unknown keys are ignored and
//! missing keys fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::dsp::filter::FilterType;
use crate::error::{Error, Result};
use crate::impulse::ImpulsePreset;

/// Every parameter the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    TimeOffset,
    RiseReverse,
    FallReverse,
    RiseReverb,
    RiseDelay,
    FallReverb,
    FallDelay,
    RiseTimeWarp,
    FallTimeWarp,
    DelayTime,
    DelayFeedback,
    ImpulseResponse,
    ReverbMix,
    DelayMix,
    FilterType,
    FilterCutoff,
    FilterResonance,
}

/// How much work a committed parameter change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    /// Only the playback filter changes; the rendered buffer stays.
    Playback,
    /// Only the rise/fall placement changes; re-run the reassembly.
    Reassemble,
    /// Both paths must be rendered again from the original sample.
    Full,
    /// A new impulse response must be loaded, then everything re-rendered.
    ImpulseResponse,
}

impl ParamId {
    pub const ALL: [ParamId; 17] = [
        ParamId::TimeOffset,
        ParamId::RiseReverse,
        ParamId::FallReverse,
        ParamId::RiseReverb,
        ParamId::RiseDelay,
        ParamId::FallReverb,
        ParamId::FallDelay,
        ParamId::RiseTimeWarp,
        ParamId::FallTimeWarp,
        ParamId::DelayTime,
        ParamId::DelayFeedback,
        ParamId::ImpulseResponse,
        ParamId::ReverbMix,
        ParamId::DelayMix,
        ParamId::FilterType,
        ParamId::FilterCutoff,
        ParamId::FilterResonance,
    ];

    /// The stable string ID. Presets and saved sessions depend on these.
    pub const fn as_str(self) -> &'static str {
        match self {
            ParamId::TimeOffset => "timeOffset",
            ParamId::RiseReverse => "riseReverse",
            ParamId::FallReverse => "fallReverse",
            ParamId::RiseReverb => "riseReverb",
            ParamId::RiseDelay => "riseDelay",
            ParamId::FallReverb => "fallReverb",
            ParamId::FallDelay => "fallDelay",
            ParamId::RiseTimeWarp => "riseTimeWarp",
            ParamId::FallTimeWarp => "fallTimeWarp",
            ParamId::DelayTime => "delayTime",
            ParamId::DelayFeedback => "delayFeedback",
            ParamId::ImpulseResponse => "impulseResponse",
            ParamId::ReverbMix => "reverbMix",
            ParamId::DelayMix => "delayMix",
            ParamId::FilterType => "filterType",
            ParamId::FilterCutoff => "filterCutoff",
            ParamId::FilterResonance => "filterResonance",
        }
    }

    pub fn from_str_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|param| param.as_str() == id)
    }

    pub const fn scope(self) -> Scope {
        match self {
            ParamId::FilterType | ParamId::FilterCutoff | ParamId::FilterResonance => {
                Scope::Playback
            }
            ParamId::TimeOffset => Scope::Reassemble,
            ParamId::ImpulseResponse => Scope::ImpulseResponse,
            _ => Scope::Full,
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Bool(bool),
    Float(f32),
    /// Index into the parameter's list of choices.
    Choice(usize),
}

/// A parameter change notification.
///
/// `gesture_end` marks the end of a user gesture (mouse released, automation
/// settled). Most parameters only trigger a re-render on gesture end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEvent {
    pub id: ParamId,
    pub value: ParamValue,
    pub gesture_end: bool,
}

impl ParamEvent {
    pub fn changed(id: ParamId, value: ParamValue) -> Self {
        Self {
            id,
            value,
            gesture_end: false,
        }
    }

    pub fn committed(id: ParamId, value: ParamValue) -> Self {
        Self {
            id,
            value,
            gesture_end: true,
        }
    }
}

/// Which of the two transformation chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Rise,
    Fall,
}

/// The four per-path controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSettings {
    pub reverb: bool,
    pub delay: bool,
    /// Time warp factor; 0 disables the stage.
    pub time_warp: i32,
    pub reverse: bool,
}

/// A snapshot of every parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectSettings {
    /// Gap (positive) or overlap (negative) between rise and fall, in ms.
    pub time_offset: i32,
    pub rise_reverse: bool,
    pub fall_reverse: bool,
    pub rise_reverb: bool,
    pub rise_delay: bool,
    pub fall_reverb: bool,
    pub fall_delay: bool,
    pub rise_time_warp: f32,
    pub fall_time_warp: f32,
    /// Musical note-length index of the delay spacing.
    pub delay_time: i32,
    /// Percent, 0 to 99.
    pub delay_feedback: f32,
    pub impulse_response: ImpulsePreset,
    /// Percent, 0 to 100.
    pub reverb_mix: f32,
    /// Percent, 0 to 100.
    pub delay_mix: f32,
    pub filter_type: FilterType,
    /// Hz.
    pub filter_cutoff: f32,
    /// Filter Q.
    pub filter_resonance: f32,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            time_offset: 1,
            rise_reverse: true,
            fall_reverse: false,
            rise_reverb: true,
            rise_delay: true,
            fall_reverb: true,
            fall_delay: true,
            rise_time_warp: 0.0,
            fall_time_warp: 0.0,
            delay_time: 0,
            delay_feedback: 50.0,
            impulse_response: ImpulsePreset::default(),
            reverb_mix: 50.0,
            delay_mix: 50.0,
            filter_type: FilterType::default(),
            filter_cutoff: 20000.0,
            filter_resonance: 1.0,
        }
    }
}

pub const TIME_OFFSET_RANGE: (i32, i32) = (-1024, 1024);
pub const TIME_WARP_RANGE: (f32, f32) = (-4.0, 4.0);
pub const DELAY_TIME_RANGE: (i32, i32) = (-6, 2);
pub const DELAY_FEEDBACK_RANGE: (f32, f32) = (0.0, 99.0);
pub const MIX_RANGE: (f32, f32) = (0.0, 100.0);
pub const FILTER_CUTOFF_RANGE: (f32, f32) = (20.0, 20000.0);
pub const FILTER_RESONANCE_RANGE: (f32, f32) = (0.1, 10.0);

impl EffectSettings {
    pub fn path(&self, kind: PathKind) -> PathSettings {
        match kind {
            PathKind::Rise => PathSettings {
                reverb: self.rise_reverb,
                delay: self.rise_delay,
                time_warp: self.rise_time_warp.round() as i32,
                reverse: self.rise_reverse,
            },
            PathKind::Fall => PathSettings {
                reverb: self.fall_reverb,
                delay: self.fall_delay,
                time_warp: self.fall_time_warp.round() as i32,
                reverse: self.fall_reverse,
            },
        }
    }

    /// Reverb wet amount, 0.0 to 1.0.
    pub fn reverb_mix_normalized(&self) -> f32 {
        self.reverb_mix / 100.0
    }

    /// Delay tap level, 0.0 to 1.0.
    pub fn delay_mix_normalized(&self) -> f32 {
        self.delay_mix / 100.0
    }

    /// Per-echo attenuation, 0.0 to 0.99.
    pub fn delay_dampening(&self) -> f32 {
        self.delay_feedback / 100.0
    }

    pub fn get(&self, id: ParamId) -> ParamValue {
        match id {
            ParamId::TimeOffset => ParamValue::Int(self.time_offset),
            ParamId::RiseReverse => ParamValue::Bool(self.rise_reverse),
            ParamId::FallReverse => ParamValue::Bool(self.fall_reverse),
            ParamId::RiseReverb => ParamValue::Bool(self.rise_reverb),
            ParamId::RiseDelay => ParamValue::Bool(self.rise_delay),
            ParamId::FallReverb => ParamValue::Bool(self.fall_reverb),
            ParamId::FallDelay => ParamValue::Bool(self.fall_delay),
            ParamId::RiseTimeWarp => ParamValue::Float(self.rise_time_warp),
            ParamId::FallTimeWarp => ParamValue::Float(self.fall_time_warp),
            ParamId::DelayTime => ParamValue::Int(self.delay_time),
            ParamId::DelayFeedback => ParamValue::Float(self.delay_feedback),
            ParamId::ImpulseResponse => ParamValue::Choice(self.impulse_response.index()),
            ParamId::ReverbMix => ParamValue::Float(self.reverb_mix),
            ParamId::DelayMix => ParamValue::Float(self.delay_mix),
            ParamId::FilterType => ParamValue::Choice(self.filter_type.index()),
            ParamId::FilterCutoff => ParamValue::Float(self.filter_cutoff),
            ParamId::FilterResonance => ParamValue::Float(self.filter_resonance),
        }
    }

    /// Set one parameter, clamping to its range. Fails if the value has the
    /// wrong kind for `id` or names a choice that doesn't exist.
    pub fn set(&mut self, id: ParamId, value: ParamValue) -> Result<()> {
        let wrong_type = || Error::ParamType { id };
        let int = |value: ParamValue, (min, max): (i32, i32)| match value {
            ParamValue::Int(v) => Ok(v.clamp(min, max)),
            _ => Err(wrong_type()),
        };
        let float = |value: ParamValue, (min, max): (f32, f32)| match value {
            ParamValue::Float(v) => Ok(v.clamp(min, max)),
            ParamValue::Int(v) => Ok((v as f32).clamp(min, max)),
            _ => Err(wrong_type()),
        };
        let boolean = |value: ParamValue| match value {
            ParamValue::Bool(v) => Ok(v),
            _ => Err(wrong_type()),
        };
        let choice = |value: ParamValue| match value {
            ParamValue::Choice(v) => Ok(v),
            _ => Err(wrong_type()),
        };

        match id {
            ParamId::TimeOffset => self.time_offset = int(value, TIME_OFFSET_RANGE)?,
            ParamId::RiseReverse => self.rise_reverse = boolean(value)?,
            ParamId::FallReverse => self.fall_reverse = boolean(value)?,
            ParamId::RiseReverb => self.rise_reverb = boolean(value)?,
            ParamId::RiseDelay => self.rise_delay = boolean(value)?,
            ParamId::FallReverb => self.fall_reverb = boolean(value)?,
            ParamId::FallDelay => self.fall_delay = boolean(value)?,
            ParamId::RiseTimeWarp => self.rise_time_warp = float(value, TIME_WARP_RANGE)?,
            ParamId::FallTimeWarp => self.fall_time_warp = float(value, TIME_WARP_RANGE)?,
            ParamId::DelayTime => self.delay_time = int(value, DELAY_TIME_RANGE)?,
            ParamId::DelayFeedback => {
                self.delay_feedback = float(value, DELAY_FEEDBACK_RANGE)?
            }
            ParamId::ImpulseResponse => {
                self.impulse_response =
                    ImpulsePreset::from_index(choice(value)?).ok_or_else(wrong_type)?
            }
            ParamId::ReverbMix => self.reverb_mix = float(value, MIX_RANGE)?,
            ParamId::DelayMix => self.delay_mix = float(value, MIX_RANGE)?,
            ParamId::FilterType => {
                self.filter_type = FilterType::from_index(choice(value)?).ok_or_else(wrong_type)?
            }
            ParamId::FilterCutoff => self.filter_cutoff = float(value, FILTER_CUTOFF_RANGE)?,
            ParamId::FilterResonance => {
                self.filter_resonance = float(value, FILTER_RESONANCE_RANGE)?
            }
        }
        Ok(())
    }

    /// Serialize as the flat persisted document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Restore from a persisted document.
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
