// crates/tapedeck-media/src/audio/mod.rs
//
// The audio engine: decode the whole stream once into a file-backed mmap,
// then serve it to a cpal output callback at any rate from ~0 to ±24x with
// Catmull-Rom interpolation. The callback's fractional sample index is the
// player's authoritative clock; video follows audio, never the other way.
//
// Two mappings of one temp file: the decode thread writes through MmapMut,
// the callback reads a read-only Mmap. `decoded_samples` (release/acquire)
// is the fence between them.

pub mod callback;
mod decode;

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use memmap2::{Mmap, MmapMut};
use tempfile::TempPath;

use tapedeck_core::state::{AtomicF64, PlaybackState};

use crate::error::LoadError;
use crate::probe::probe_duration;
use callback::{render_buffer, BeepState, RenderParams};

/// Size margin over the container's duration estimate. Duration headers are
/// approximate; the margin absorbs the usual undercount, and an overflow
/// past it stops the decode gracefully rather than remapping.
const SIZE_MARGIN: f64 = 1.1;

/// State shared between the decode thread, the callback and seek.
pub struct AudioShared {
    map:                 Mmap,
    /// Mapping capacity in i16 samples.
    pub total_samples:   usize,
    pub sample_rate:     u32,
    /// i16 samples published by the decode thread. Monotonic.
    pub decoded_samples: AtomicUsize,
    /// Fractional stereo-pair read index, the playhead.
    pub position:        AtomicF64,
}

impl AudioShared {
    /// The mapping viewed as i16 samples. The mmap is page-aligned, so the
    /// alignment requirement of i16 always holds.
    fn samples(&self) -> &[i16] {
        unsafe {
            std::slice::from_raw_parts(self.map.as_ptr() as *const i16, self.total_samples)
        }
    }
}

pub struct AudioEngine {
    shared:        Arc<AudioShared>,
    state:         Arc<PlaybackState>,
    stream:        Option<cpal::Stream>,
    decode_stop:   Arc<AtomicBool>,
    decode_thread: Option<JoinHandle<()>>,
    /// Unlinks the temp file when dropped.
    temp_path:     Option<TempPath>,
}

impl AudioEngine {
    /// Open the file's audio, size and map the temp buffer, start the decode
    /// thread and the output stream.
    pub fn start(path: &Path, state: Arc<PlaybackState>) -> Result<Self, LoadError> {
        let sample_rate = probe_sample_rate(path)?;
        let duration = probe_duration(path);
        if duration <= 0.0 || sample_rate == 0 {
            return Err(LoadError::BadAudioParams);
        }

        let total_samples =
            (duration * SIZE_MARGIN * f64::from(sample_rate) * 2.0 + 0.5) as usize;
        let bytes = total_samples * 2;

        let temp = tempfile::Builder::new()
            .prefix("tapedeck_audio_")
            .suffix(".pcm")
            .tempfile()?;
        temp.as_file().set_len(bytes as u64)?;
        eprintln!(
            "[audio] mapped {:.1} MB for {:.1}s at {sample_rate} Hz",
            bytes as f64 / (1024.0 * 1024.0),
            duration
        );

        let writer_map = unsafe { MmapMut::map_mut(temp.as_file())? };
        let reader_map = unsafe { Mmap::map(&File::open(temp.path())?)? };
        let temp_path = temp.into_temp_path();

        let shared = Arc::new(AudioShared {
            map: reader_map,
            total_samples,
            sample_rate,
            decoded_samples: AtomicUsize::new(0),
            position: AtomicF64::new(0.0),
        });

        let decode_stop = Arc::new(AtomicBool::new(false));
        let decode_thread = {
            let job = decode::DecodeJob {
                path:   path.to_path_buf(),
                map:    writer_map,
                shared: Arc::clone(&shared),
                stop:   Arc::clone(&decode_stop),
            };
            thread::Builder::new()
                .name("audio-decode".into())
                .spawn(move || decode::run(job))
                .expect("spawn audio decode")
        };

        let stream = match build_stream(&shared, &state, None) {
            Ok(s) => s,
            Err(e) => {
                decode_stop.store(true, Ordering::Release);
                let _ = decode_thread.join();
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            state,
            stream: Some(stream),
            decode_stop,
            decode_thread: Some(decode_thread),
            temp_path: Some(temp_path),
        })
    }

    /// Move the playhead. No buffer work: the mmap serves any position
    /// immediately; starved positions render silence until decode catches up.
    pub fn seek(&self, target_secs: f64) {
        let total_dur = self.state.total_duration.load();
        let target = if total_dur > 0.0 {
            target_secs.clamp(0.0, total_dur)
        } else {
            target_secs.max(0.0)
        };

        let pairs = self.shared.total_samples / 2;
        let mut index = target * f64::from(self.shared.sample_rate);
        if pairs > 0 {
            index = index.min((pairs - 1) as f64);
        }
        self.shared.position.store(index.max(0.0));
        self.state.current_time.store(target);
        self.state.seek_requested.store(true, Ordering::Release);
        eprintln!("[audio] seek → {target:.3}s");
    }

    /// Tear down the output stream and rebuild it on the named device. The
    /// mapping, position and rates carry over untouched.
    pub fn switch_device(&mut self, name: &str) -> Result<(), LoadError> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
        }
        let stream = build_stream(&self.shared, &self.state, Some(name))?;
        self.stream = Some(stream);
        eprintln!("[audio] output device → {name}");
        Ok(())
    }

    /// Ordered teardown: silence, let in-flight callbacks drain, stop the
    /// stream, stop and join the decode thread, unlink the temp file.
    pub fn shutdown(&mut self) {
        if self.stream.is_none() && self.decode_thread.is_none() {
            return;
        }
        self.state.volume.store(0.0);
        thread::sleep(Duration::from_millis(50));

        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
        }
        self.decode_stop.store(true, Ordering::Release);
        if let Some(t) = self.decode_thread.take() {
            let _ = t.join();
        }
        self.temp_path.take();
        eprintln!("[audio] engine shut down");
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Names of every available output device, for the device-switch command.
pub fn output_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

fn probe_sample_rate(path: &Path) -> Result<u32, LoadError> {
    let ictx = ffmpeg_the_third::format::input(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let stream = ictx
        .streams()
        .best(ffmpeg_the_third::media::Type::Audio)
        .ok_or_else(|| LoadError::NoAudio(path.to_path_buf()))?;
    let rate = unsafe { (*stream.parameters().as_ptr()).sample_rate };
    if rate <= 0 {
        return Err(LoadError::BadAudioParams);
    }
    Ok(rate as u32)
}

/// Open the output stream with up to three attempts, 1 s apart. Devices
/// mid-hotplug or held exclusively by another app commonly succeed on the
/// second try.
fn build_stream(
    shared: &Arc<AudioShared>,
    state: &Arc<PlaybackState>,
    device_name: Option<&str>,
) -> Result<cpal::Stream, LoadError> {
    let mut last_err = String::from("no attempt made");
    for attempt in 0..3 {
        if attempt > 0 {
            thread::sleep(Duration::from_secs(1));
        }
        match try_build_stream(shared, state, device_name) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                eprintln!("[audio] output open attempt {} failed: {e}", attempt + 1);
                last_err = e;
            }
        }
    }
    Err(LoadError::AudioDevice(last_err))
}

fn try_build_stream(
    shared: &Arc<AudioShared>,
    state: &Arc<PlaybackState>,
    device_name: Option<&str>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| e.to_string())?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("no output device named {name}"))?,
        None => host
            .default_output_device()
            .ok_or_else(|| String::from("no default output device"))?,
    };

    let config = cpal::StreamConfig {
        channels:    2,
        sample_rate: cpal::SampleRate(shared.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let cb_shared = Arc::clone(shared);
    let cb_state = Arc::clone(state);
    let mut beep = BeepState::new();
    let data_fn = move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let params = RenderParams {
            rate:            cb_state.playback_rate.load(),
            target_rate:     cb_state.target_rate.load(),
            reverse:         cb_state.is_reverse.load(Ordering::Acquire),
            volume:          cb_state.volume.load(),
            sample_rate:     cb_shared.sample_rate,
            decoded_samples: cb_shared.decoded_samples.load(Ordering::Acquire),
            total_pairs:     cb_shared.total_samples / 2,
        };
        let pos = cb_shared.position.load();
        let new_pos = render_buffer(out, cb_shared.samples(), pos, &params, &mut beep);
        cb_shared.position.store(new_pos);

        // Publish the clock.
        let mut t = new_pos / f64::from(cb_shared.sample_rate);
        let dur = cb_state.total_duration.load();
        if dur > 0.0 {
            t = t.min(dur - 0.01);
        }
        cb_state.current_time.store(t.max(0.0));
    };
    let err_fn = |e: cpal::StreamError| eprintln!("[audio] stream error: {e}");

    let stream = device
        .build_output_stream(&config, data_fn, err_fn, None)
        .map_err(|e| e.to_string())?;
    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}
