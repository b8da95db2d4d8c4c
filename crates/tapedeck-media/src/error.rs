// crates/tapedeck-media/src/error.rs
//
// Load-time failures. These surface once, while a file is being opened;
// nothing here ever crosses into the render tick or the audio callback;
// mid-stream decode errors are absorbed by the decoders as missing tiers.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not open {path}: {source}")]
    Open {
        path:   PathBuf,
        source: ffmpeg_the_third::Error,
    },

    #[error("no video stream in {0}")]
    NoVideo(PathBuf),

    #[error("no audio stream in {0}")]
    NoAudio(PathBuf),

    /// HEVC is refused outright: decode cost on the target hardware makes
    /// smooth shuttling impossible. The loader reports it and returns to the
    /// no-file state rather than limping along.
    #[error("unsupported codec {codec} in {path}; convert to H.264 first")]
    UnsupportedCodec {
        path:  PathBuf,
        codec: String,
    },

    #[error("audio output device failed after retries: {0}")]
    AudioDevice(String),

    #[error("audio stream has no usable duration or sample rate")]
    BadAudioParams,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
