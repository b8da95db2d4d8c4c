// crates/tapedeck-media/src/audio/decode.rs
//
// One-shot decode of the file's audio into the writable mapping: serial
// packet walk, native format → interleaved stereo int16 with saturating
// rounding, `decoded_samples` bumped with release ordering after every
// frame so the callback never reads bytes that aren't flushed yet.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::format::sample::{Sample, Type as SampleType};
use ffmpeg::media::Type;
use memmap2::MmapMut;

use super::AudioShared;

pub(crate) struct DecodeJob {
    pub path:   PathBuf,
    pub map:    MmapMut,
    pub shared: Arc<AudioShared>,
    pub stop:   Arc<AtomicBool>,
}

pub(crate) fn run(job: DecodeJob) {
    let DecodeJob { path, mut map, shared, stop } = job;

    let Ok(mut ictx) = input(&path) else {
        eprintln!("[audio] decode open failed: {}", path.display());
        return;
    };
    let Some(stream_index) = ictx.streams().best(Type::Audio).map(|s| s.index()) else {
        eprintln!("[audio] no audio stream: {}", path.display());
        return;
    };

    let decoder = (|| -> Result<ffmpeg::decoder::Audio, ffmpeg::Error> {
        let ictx2 = input(&path)?;
        let stream = ictx2.stream(stream_index).ok_or(ffmpeg::Error::StreamNotFound)?;
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        ctx.decoder().audio()
    })();
    let Ok(mut decoder) = decoder else {
        eprintln!("[audio] decoder init failed: {}", path.display());
        return;
    };

    let total = shared.total_samples;
    let mut write_offset = 0usize; // in i16 samples
    let mut frame = ffmpeg::util::frame::audio::Audio::empty();
    let mut warned_format = false;

    'read: for (stream, packet) in ictx.packets().flatten() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut frame).is_ok() {
            if !write_frame(&frame, &mut map, &shared, &mut write_offset, total, &mut warned_format)
            {
                break 'read;
            }
        }
    }

    // Flush the delayed frames out of the codec.
    if decoder.send_eof().is_ok() {
        while decoder.receive_frame(&mut frame).is_ok() {
            if !write_frame(&frame, &mut map, &shared, &mut write_offset, total, &mut warned_format)
            {
                break;
            }
        }
    }

    if let Err(e) = map.flush() {
        eprintln!("[audio] msync failed: {e}");
    }
    eprintln!(
        "[audio] decode finished: {} samples ({:.1}s)",
        write_offset,
        write_offset as f64 / f64::from(shared.sample_rate.max(1)) / 2.0
    );
}

/// Convert one decoded frame into the mapping. Returns false when the
/// estimate overflowed; decode stops gracefully and the published count
/// stays at the true number of samples written.
fn write_frame(
    frame: &ffmpeg::util::frame::audio::Audio,
    map: &mut MmapMut,
    shared: &AudioShared,
    write_offset: &mut usize,
    total: usize,
    warned_format: &mut bool,
) -> bool {
    let samples = frame.samples();
    if samples == 0 {
        return true;
    }
    let channels = unsafe { (*frame.as_ptr()).ch_layout.nb_channels } as usize;
    if channels == 0 {
        return true;
    }
    let format = frame.format();
    if !format_supported(format) {
        if !*warned_format {
            eprintln!("[audio] unsupported sample format {format:?}, frames skipped");
            *warned_format = true;
        }
        return true;
    }

    let out_samples = samples * 2;
    if *write_offset + out_samples > total {
        eprintln!(
            "[audio] decoded samples exceed the estimated mapping ({total}), stopping decode"
        );
        return false;
    }

    // Downmix policy: left = channel 0, right = channel 1 (or channel 0
    // again for mono).
    let right_ch = channels.saturating_sub(1).min(1);
    for i in 0..samples {
        let l = sample_as_i16(frame, format, channels, 0, i);
        let r = sample_as_i16(frame, format, channels, right_ch, i);
        let byte = (*write_offset + i * 2) * 2;
        map[byte..byte + 2].copy_from_slice(&l.to_ne_bytes());
        map[byte + 2..byte + 4].copy_from_slice(&r.to_ne_bytes());
    }

    *write_offset += out_samples;
    shared
        .decoded_samples
        .store(*write_offset, Ordering::Release);
    true
}

fn format_supported(format: Sample) -> bool {
    matches!(
        format,
        Sample::F32(_) | Sample::I16(_) | Sample::I32(_)
    )
}

#[inline]
fn saturate(v: f32) -> i16 {
    v.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Read sample (`ch`, `i`) from whatever layout the codec produced and
/// scale it to i16.
fn sample_as_i16(
    frame: &ffmpeg::util::frame::audio::Audio,
    format: Sample,
    channels: usize,
    ch: usize,
    i: usize,
) -> i16 {
    match format {
        Sample::I16(SampleType::Planar) => {
            let d = frame.data(ch);
            let off = i * 2;
            i16::from_ne_bytes([d[off], d[off + 1]])
        }
        Sample::I16(SampleType::Packed) => {
            let d = frame.data(0);
            let off = (i * channels + ch) * 2;
            i16::from_ne_bytes([d[off], d[off + 1]])
        }
        Sample::F32(SampleType::Planar) => {
            let d = frame.data(ch);
            let off = i * 4;
            let v = f32::from_ne_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]]);
            saturate(v * 32767.0)
        }
        Sample::F32(SampleType::Packed) => {
            let d = frame.data(0);
            let off = (i * channels + ch) * 4;
            let v = f32::from_ne_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]]);
            saturate(v * 32767.0)
        }
        Sample::I32(SampleType::Planar) => {
            let d = frame.data(ch);
            let off = i * 4;
            let v = i32::from_ne_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]]);
            saturate(v as f32 / 65536.0)
        }
        Sample::I32(SampleType::Packed) => {
            let d = frame.data(0);
            let off = (i * channels + ch) * 4;
            let v = i32::from_ne_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]]);
            saturate(v as f32 / 65536.0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_clamps_both_rails() {
        assert_eq!(saturate(40000.0), i16::MAX);
        assert_eq!(saturate(-40000.0), i16::MIN);
        assert_eq!(saturate(0.4), 0);
        assert_eq!(saturate(0.6), 1);
        assert_eq!(saturate(-32768.0), i16::MIN);
    }
}
