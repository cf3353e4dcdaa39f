//! # Impulse Responses
//!
//! The reverb stage convolves with one of six recorded spaces. An
//! [`ImpulseSource`] turns a preset into a raw WAV payload; the reverb decodes
//! it. Payloads are identified by the SHA-256 of their bytes, so resolving the
//! same preset twice (or two presets that happen to be identical) never causes
//! a second decode.
//!
//! Two sources ship with the crate:
//!
//! - [`DirectorySource`] reads the original recordings from a directory.
//! - [`SynthesizedRooms`] renders a decaying-noise approximation of each
//!   space in memory. This is what the plugin uses out of the box.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use nih_plug::prelude::Enum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};
use crate::loader;

/// The selectable spaces, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Enum, Serialize, Deserialize)]
pub enum ImpulsePreset {
    #[default]
    #[name = "Terry's Factory Warehouse"]
    Warehouse,
    #[name = "York Minster"]
    YorkMinster,
    #[name = "R1 Nuclear Reactor Hall"]
    NuclearReactorHall,
    #[name = "St. George's Episcopal Church"]
    StGeorges,
    #[name = "Empty Apartment Bedroom"]
    ApartmentBedroom,
    #[name = "Stairway, University of York"]
    Stairwell,
}

impl ImpulsePreset {
    pub const ALL: [ImpulsePreset; 6] = [
        ImpulsePreset::Warehouse,
        ImpulsePreset::YorkMinster,
        ImpulsePreset::NuclearReactorHall,
        ImpulsePreset::StGeorges,
        ImpulsePreset::ApartmentBedroom,
        ImpulsePreset::Stairwell,
    ];

    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|&preset| preset == self)
            .unwrap_or_default()
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// File name of the recording inside a [`DirectorySource`].
    pub fn file_name(self) -> &'static str {
        match self {
            ImpulsePreset::Warehouse => "warehouse48khznormtrim.wav",
            ImpulsePreset::YorkMinster => "york_minster48khznormtrim.wav",
            ImpulsePreset::NuclearReactorHall => "nuclear_reactor_hall48khznormtrim.wav",
            ImpulsePreset::StGeorges => "st_georges48khznormtrim.wav",
            ImpulsePreset::ApartmentBedroom => "empty_apartment_bedroom48khznormtrim.wav",
            ImpulsePreset::Stairwell => "university_of_york_stairwell48khznormtrim.wav",
        }
    }
}

/// Content identity of an impulse response payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImpulseKey([u8; 32]);

impl fmt::Debug for ImpulseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("…")
    }
}

/// An undecoded impulse response: WAV bytes plus their content key.
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    payload: Arc<[u8]>,
    key: ImpulseKey,
}

impl ImpulseResponse {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let payload = bytes.into();
        let key = ImpulseKey(Sha256::digest(&payload).into());
        Self { payload, key }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn key(&self) -> ImpulseKey {
        self.key
    }
}

/// Resolves presets to payloads.
pub trait ImpulseSource: Send + Sync {
    fn fetch(&self, preset: ImpulsePreset) -> Result<ImpulseResponse>;
}

/// Reads `<root>/<preset file name>`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImpulseSource for DirectorySource {
    fn fetch(&self, preset: ImpulsePreset) -> Result<ImpulseResponse> {
        let path = self.root.join(preset.file_name());
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::ImpulseResponse(format!("{}: {e}", path.display())))?;
        Ok(ImpulseResponse::from_bytes(bytes))
    }
}

/// Shape of a synthesized room.
struct Room {
    /// Time for the tail to fall by 60 dB.
    rt60: f32,
    length: f32,
    pre_delay: f32,
    /// One-pole smoothing applied to the noise; higher is darker.
    darkness: f32,
}

/// Renders stereo decaying noise for each preset, seeded per preset so the
/// same preset always produces the same bytes.
#[derive(Debug, Clone)]
pub struct SynthesizedRooms {
    sample_rate: u32,
}

impl Default for SynthesizedRooms {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
        }
    }
}

impl SynthesizedRooms {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn room(preset: ImpulsePreset) -> Room {
        let (rt60, length, pre_delay, darkness) = match preset {
            ImpulsePreset::Warehouse => (1.8, 2.0, 0.012, 0.35),
            ImpulsePreset::YorkMinster => (3.5, 4.0, 0.030, 0.55),
            ImpulsePreset::NuclearReactorHall => (2.5, 3.0, 0.020, 0.25),
            ImpulsePreset::StGeorges => (1.6, 2.0, 0.015, 0.50),
            ImpulsePreset::ApartmentBedroom => (0.4, 0.6, 0.002, 0.30),
            ImpulsePreset::Stairwell => (1.2, 1.5, 0.006, 0.15),
        };
        Room {
            rt60,
            length,
            pre_delay,
            darkness,
        }
    }

    fn render(&self, preset: ImpulsePreset) -> SampleBuffer {
        let room = Self::room(preset);
        let sr = self.sample_rate as f32;
        let frames = (room.length * sr) as usize;
        let pre_delay = (room.pre_delay * sr) as usize;
        // exp(-6.9078) = 0.001, i.e. -60 dB at t = rt60.
        let decay_per_sample = (-6.9078 / (room.rt60 * sr)).exp();

        let mut rng = StdRng::seed_from_u64(preset.index() as u64 + 1);
        let channels = (0..2)
            .map(|_| {
                let mut data = vec![0.0; frames];
                data[0] = 1.0;
                let mut envelope = 0.5;
                let mut smoothed = 0.0;
                for sample in data.iter_mut().skip(pre_delay.max(1)) {
                    let noise: f32 = rng.gen_range(-1.0..1.0);
                    smoothed = room.darkness * smoothed + (1.0 - room.darkness) * noise;
                    *sample = smoothed * envelope;
                    envelope *= decay_per_sample;
                }
                data
            })
            .collect();

        SampleBuffer::from_channels(channels).unwrap_or_default()
    }
}

impl ImpulseSource for SynthesizedRooms {
    fn fetch(&self, preset: ImpulsePreset) -> Result<ImpulseResponse> {
        let bytes = loader::encode_wav_bytes(&self.render(preset), self.sample_rate)?;
        Ok(ImpulseResponse::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_indices() {
        for (i, preset) in ImpulsePreset::ALL.into_iter().enumerate() {
            assert_eq!(preset.index(), i);
            assert_eq!(ImpulsePreset::from_index(i), Some(preset));
        }
        assert_eq!(ImpulsePreset::from_index(6), None);
    }

    /// Same preset, same bytes, same key. Different presets differ.
    #[test]
    fn test_synthesized_rooms_are_deterministic() {
        let rooms = SynthesizedRooms::new(8000);
        let a = rooms.fetch(ImpulsePreset::ApartmentBedroom).unwrap();
        let b = rooms.fetch(ImpulsePreset::ApartmentBedroom).unwrap();
        let c = rooms.fetch(ImpulsePreset::Stairwell).unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.len(), a.payload().len());
    }

    #[test]
    fn test_synthesized_room_decodes_and_decays() {
        let rooms = SynthesizedRooms::new(8000);
        let ir = rooms.fetch(ImpulsePreset::ApartmentBedroom).unwrap();
        let decoded = loader::decode_wav_bytes(ir.payload()).unwrap();

        assert_eq!(decoded.sample_rate, 8000.0);
        assert_eq!(decoded.buffer.num_channels(), 2);
        assert_eq!(decoded.buffer.num_frames(), 4800);

        let data = decoded.buffer.channel(0);
        let head = data[..800].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let tail = data[4000..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(tail < head * 0.01, "Tail {tail} should be far below head {head}");
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let rooms = SynthesizedRooms::new(8000);
        let bytes = rooms.fetch(ImpulsePreset::YorkMinster).unwrap();
        std::fs::write(
            dir.path().join(ImpulsePreset::YorkMinster.file_name()),
            bytes.payload(),
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());
        let read = source.fetch(ImpulsePreset::YorkMinster).unwrap();
        assert_eq!(read.key(), bytes.key());
        assert!(matches!(
            source.fetch(ImpulsePreset::Warehouse),
            Err(Error::ImpulseResponse(_))
        ));
    }
}
