//! # Playback
//!
//! Plays the published render on MIDI notes. Note-on starts from the top,
//! note-off stops and rewinds. When the end is reached playback either wraps
//! around or stops, depending on the loop switch.
//!
//! Everything here runs on the audio thread: no allocation after
//! [`Playback::prepare`], no locks.

use crate::dsp::filter::{BiquadFilter, FilterSettings};
use crate::pipeline::Rendered;

pub struct Playback {
    gain: f32,
    sample_rate: f32,

    playing: bool,
    position: usize,
    /// Generation of the render `position` refers to.
    generation: u64,

    /// One filter per output channel.
    filters: Vec<BiquadFilter>,
    filter_settings: Option<FilterSettings>,
}

impl Playback {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            sample_rate: 44100.0,
            playing: false,
            position: 0,
            generation: 0,
            filters: Vec::new(),
            filter_settings: None,
        }
    }

    /// Allocate per-channel state. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f32, num_channels: usize) {
        self.sample_rate = sample_rate;
        self.filters = vec![BiquadFilter::new(); num_channels];
        self.filter_settings = None;
    }

    pub fn note_on(&mut self) {
        self.position = 0;
        self.playing = true;
    }

    pub fn note_off(&mut self) {
        self.playing = false;
        self.position = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self) {
        self.note_off();
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    /// Fill `outputs` with the next block.
    ///
    /// Output channel `c` plays channel `c % n` of an `n`-channel render.
    /// With `filter` set, each output channel then runs through its filter.
    pub fn render(
        &mut self,
        outputs: &mut [&mut [f32]],
        rendered: Option<&Rendered>,
        filter: Option<FilterSettings>,
        looping: bool,
    ) {
        for out in outputs.iter_mut() {
            out.fill(0.0);
        }

        if filter.is_some() && filter != self.filter_settings {
            if let Some(settings) = filter {
                for f in &mut self.filters {
                    f.set(settings, self.sample_rate);
                }
            }
            self.filter_settings = filter;
        }

        if let Some(rendered) = rendered {
            if rendered.generation != self.generation {
                self.generation = rendered.generation;
                self.position = 0;
            }
            if self.playing {
                self.copy_block(outputs, rendered, looping);
            }
        }

        if filter.is_some() {
            for (out, f) in outputs.iter_mut().zip(&mut self.filters) {
                f.process_block(out);
            }
        }
    }

    fn copy_block(&mut self, outputs: &mut [&mut [f32]], rendered: &Rendered, looping: bool) {
        let source = &rendered.buffer;
        let frames = source.num_frames();
        if source.is_empty() {
            self.playing = false;
            return;
        }

        let block = outputs.first().map_or(0, |out| out.len());
        let mut written = 0;
        while written < block && self.playing {
            let count = (block - written).min(frames - self.position);
            for (c, out) in outputs.iter_mut().enumerate() {
                let data = &source.channel(c % source.num_channels())[self.position..];
                for (o, s) in out[written..written + count].iter_mut().zip(data) {
                    *o = s * self.gain;
                }
            }
            written += count;
            self.position += count;

            if self.position >= frames {
                self.position = 0;
                self.playing = looping;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
