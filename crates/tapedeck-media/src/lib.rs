// crates/tapedeck-media/src/lib.rs
//
// Everything that touches ffmpeg or the audio device: the frame index and
// its per-slot tier storage, the three decoders and their managers, the
// mmap-backed audio engine, and the frame selector the render driver asks
// each tick.

pub mod audio;
pub mod cache;
pub mod decode;
pub mod error;
pub mod index;
pub mod manage;
pub mod probe;
pub mod select;

pub use error::LoadError;
