//! Error types for the offline rendering engine.

use thiserror::Error;

use crate::settings::ParamId;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The WAV decoder rejected the data.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Decodable, but not a sample layout we can turn into floats.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Channels of a buffer must all have the same frame count.
    #[error("Ragged buffer: channel {channel} has {frames} frames, expected {expected}")]
    RaggedChannels {
        channel: usize,
        frames: usize,
        expected: usize,
    },

    /// A time warp factor of zero means "disabled" and must be skipped by the caller.
    #[error("Time warp factor must be non-zero")]
    ZeroTimeWarp,

    /// Delay settings that can never converge or make no sense.
    #[error("Invalid delay settings: {0}")]
    InvalidDelay(String),

    /// The echo recursion did not decay within the configured bounds.
    #[error("Feedback delay did not decay after {taps} taps ({frames} frames)")]
    RunawayDelay { taps: usize, frames: usize },

    /// FFT planning/processing error.
    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),

    /// The resampler could not be built for this rate pair.
    #[error("Resampler setup error: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    /// Sample rate conversion failed.
    #[error("Resample error: {0}")]
    Resample(#[from] rubato::ResampleError),

    /// Impulse response resource could not be resolved.
    #[error("Impulse response not available: {0}")]
    ImpulseResponse(String),

    /// Settings document could not be read or written.
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    /// A parameter received a value of the wrong kind.
    #[error("Parameter {id:?} does not accept this value")]
    ParamType { id: ParamId },
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
