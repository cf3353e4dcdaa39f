//! # Rise & Fall: An AU/VST3/CLAP Sample Mangler
//!
//! Load a sample, and the plugin renders a "rise" and a "fall" from it and
//! butts them together into one sound. Play it with any MIDI note. Built
//! with [nih-plug](https://github.com/robbert-vdh/nih-plug), exported as
//! CLAP, VST3 and (through clap-wrapper) AUv2.
//!
//! ## Signal Flow
//!
//! ```text
//!                     ┌─► RISE: [Time Warp] ► [Reverb] ► [Delay] ► [Reverse] ─┐
//! sample ─► normalize │                                                       ├─► concatenate ─► normalize ─► fades
//!           trim ─────┴─► FALL: [Time Warp] ► [Reverb] ► [Delay] ► [Reverse] ─┘   (time offset)
//!                                                                                        │
//!                                                                                    published
//!                                                                                        │
//! MIDI note ──────────────────────────────────────► playback × 0.9 ─► [LP/HP Filter] ─► Output
//! ```
//!
//! Everything above the "published" line is offline work. It runs on the
//! [`worker`] thread whenever a parameter settles. The audio thread only
//! reads the last published render.

pub mod buffer;
pub mod dsp;
pub mod error;
pub mod impulse;
pub mod loader;
pub mod params;
pub mod path;
pub mod pipeline;
pub mod playback;
pub mod reassemble;
pub mod settings;
pub mod worker;

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use nih_plug::prelude::*;

use impulse::SynthesizedRooms;
use params::RiseAndFallParams;
use pipeline::{Engine, PipelineConfig};
use playback::Playback;
use worker::{Command, Worker};

/// The main plugin struct.
///
/// The render engine is shared with the worker thread. `playback` is owned
/// by the audio thread and only touched in `process()`.
pub struct RiseAndFall {
    params: Arc<RiseAndFallParams>,
    engine: Arc<Engine>,

    /// `None` if the thread could not be started. The plugin then stays
    /// silent instead of failing to load.
    worker: Option<Worker>,
    commands: Sender<Command>,

    playback: Playback,
    /// Last tempo forwarded to the engine.
    bpm: f64,
}

impl Default for RiseAndFall {
    fn default() -> Self {
        let (commands, receiver) = worker::channel();
        let params = Arc::new(RiseAndFallParams::new(Some(commands.clone())));

        let config = PipelineConfig::default();
        let playback = Playback::new(config.playback_gain);
        let bpm = config.default_bpm;
        let engine = Arc::new(Engine::new(config, Box::new(SynthesizedRooms::default())));

        let worker = match Worker::spawn(commands.clone(), receiver, engine.clone(), params.clone()) {
            Ok(worker) => Some(worker),
            Err(err) => {
                nih_error!("Could not start the render worker: {}", err);
                None
            }
        };

        Self {
            params,
            engine,
            worker,
            commands,
            playback,
            bpm,
        }
    }
}

impl RiseAndFall {
    /// Remember `path` and load it in the background.
    pub fn load_sample(&self, path: PathBuf) {
        self.params
            .set_sample_path(Some(path.to_string_lossy().into_owned()));
        self.send(Command::LoadSample(path));
    }

    fn send(&self, command: Command) {
        if self.worker.is_none() {
            return;
        }
        if self.commands.try_send(command).is_err() {
            nih_warn!("Render queue full, command dropped");
        }
    }
}

impl Plugin for RiseAndFall {
    const NAME: &'static str = "Rise & Fall";
    const VENDOR: &'static str = "Loveless Audio";
    const URL: &'static str = "";
    const EMAIL: &'static str = "steve.loveless@gmail.com";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    // No audio input: the source material is the loaded sample.
    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: None,
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
        AudioIOLayout {
            main_input_channels: None,
            main_output_channels: NonZeroU32::new(1),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
    ];

    // Note on starts playback, note off stops it. Pitch is ignored.
    const MIDI_INPUT: MidiConfig = MidiConfig::Basic;

    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    /// Size the playback state and hand the rate and tempo to the engine.
    ///
    /// A restored session only brings back the sample path, so the sample
    /// itself is reloaded here.
    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        let sample_rate = buffer_config.sample_rate;
        let num_channels = audio_io_layout
            .main_output_channels
            .map_or(2, |c| c.get() as usize);

        self.playback.prepare(sample_rate, num_channels);
        self.send(Command::Prepare {
            sample_rate,
            bpm: self.bpm,
        });

        if !self.engine.has_sample() {
            if let Some(path) = self.params.sample_path() {
                nih_log!("Restoring sample {}", path);
                self.send(Command::LoadSample(PathBuf::from(path)));
            }
        }

        true
    }

    fn reset(&mut self) {
        self.playback.reset();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        if let Some(bpm) = context.transport().tempo {
            if bpm > 0.0 && bpm != self.bpm {
                self.bpm = bpm;
                self.send(Command::Tempo(bpm));
            }
        }

        // Block-accurate: the whole block follows the last note event.
        while let Some(event) = context.next_event() {
            match event {
                NoteEvent::NoteOn { .. } => self.playback.note_on(),
                NoteEvent::NoteOff { .. } => self.playback.note_off(),
                _ => {}
            }
        }

        let rendered = self.engine.snapshot();
        self.playback.render(
            buffer.as_slice(),
            rendered.as_deref(),
            Some(self.params.filter_settings()),
            self.params.looping.value(),
        );

        ProcessStatus::KeepAlive
    }
}

// ─────────────────────────────────────────────────────────────────────
// Plugin format trait implementations
// ─────────────────────────────────────────────────────────────────────

impl ClapPlugin for RiseAndFall {
    const CLAP_ID: &'static str = "com.loveless-audio.rise-and-fall-v1";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Renders a reversed, reverberated rise and a fall from one sample");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::Instrument,
        ClapFeature::Sampler,
        ClapFeature::Stereo,
    ];
}

impl Vst3Plugin for RiseAndFall {
    const VST3_CLASS_ID: [u8; 16] = *b"LvlssRiseFall001";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Instrument, Vst3SubCategory::Sampler];
}

// ─────────────────────────────────────────────────────────────────────
// Export macros
// ─────────────────────────────────────────────────────────────────────

nih_export_clap!(RiseAndFall);
nih_export_vst3!(RiseAndFall);

// AUv2 entry point for Logic Pro.
clap_wrapper::export_auv2!();
