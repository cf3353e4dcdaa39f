//! WAV decoding and encoding.
//!
//! Samples and impulse responses both arrive as WAV data, either from disk or
//! from an in-memory payload. Everything is converted to `f32` in `[-1, 1]`
//! and de-interleaved into a [`SampleBuffer`].

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};

/// A decoded file: its audio and the rate it was recorded at.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSample {
    pub buffer: SampleBuffer,
    pub sample_rate: f32,
}

/// Decode a WAV file from disk.
pub fn load_wav_file(path: impl AsRef<Path>) -> Result<LoadedSample> {
    let reader = WavReader::open(path.as_ref())?;
    decode(reader)
}

/// Decode a WAV payload held in memory.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<LoadedSample> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    decode(reader)
}

fn decode<R: Read>(mut reader: WavReader<R>) -> Result<LoadedSample> {
    let spec = reader.spec();
    let num_channels = usize::from(spec.channels);
    if num_channels == 0 {
        return Err(Error::UnsupportedFormat("zero channels".into()));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
        (format, bits) => {
            return Err(Error::UnsupportedFormat(format!("{format:?} at {bits} bits")));
        }
    };

    let frames = interleaved.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (data, &sample) in channels.iter_mut().zip(frame) {
            data.push(sample);
        }
    }

    Ok(LoadedSample {
        buffer: SampleBuffer::from_channels(channels)?,
        sample_rate: spec.sample_rate as f32,
    })
}

fn encode<W: Write + Seek>(writer: W, buffer: &SampleBuffer, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::new(writer, spec)?;
    for frame in 0..buffer.num_frames() {
        for data in buffer.channels() {
            writer.write_sample(data[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Write a buffer to disk as 32-bit float WAV.
pub fn write_wav_file(path: impl AsRef<Path>, buffer: &SampleBuffer, sample_rate: u32) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    encode(file, buffer, sample_rate)
}

/// Encode a buffer as an in-memory 32-bit float WAV payload.
pub fn encode_wav_bytes(buffer: &SampleBuffer, sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode(&mut cursor, buffer, sample_rate)?;
    Ok(cursor.into_inner())
}
