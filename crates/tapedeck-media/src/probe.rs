// crates/tapedeck-media/src/probe.rs
//
// In-process ffmpeg probing: frame rate and duration. Both run once during
// the load sequence, before any decoder spins up.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;

/// Frame rate of the best video stream, with the two NTSC rates snapped to
/// their exact rational values (29.97 → 30000/1001, 59.94 → 60000/1001) so
/// timecode math doesn't drift over an hour of material. Falls back to 25
/// when nothing usable is found.
pub fn probe_fps(path: &Path) -> f64 {
    let Ok(ictx) = input(path) else { return 25.0 };
    let Some(stream) = ictx.streams().best(Type::Video) else {
        return 25.0;
    };

    let avg = stream.avg_frame_rate();
    let rate = if avg.denominator() != 0 {
        f64::from(avg.numerator()) / f64::from(avg.denominator())
    } else {
        let r = stream.rate();
        if r.denominator() != 0 {
            f64::from(r.numerator()) / f64::from(r.denominator())
        } else {
            return 25.0;
        }
    };

    if (rate - 29.97).abs() < 0.01 {
        30000.0 / 1001.0
    } else if (rate - 59.94).abs() < 0.01 {
        60000.0 / 1001.0
    } else {
        rate
    }
}

/// Container duration in seconds, falling back to the best stream's own
/// duration when the container header has none.
pub fn probe_duration(path: &Path) -> f64 {
    let Ok(ictx) = input(path) else { return 0.0 };

    let dur = ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
    if dur > 0.0 {
        return dur;
    }

    if let Some(stream) = ictx
        .streams()
        .best(Type::Video)
        .or_else(|| ictx.streams().best(Type::Audio))
    {
        let tb = stream.time_base();
        let d = stream.duration() as f64 * f64::from(tb.numerator())
            / f64::from(tb.denominator());
        if d > 0.0 {
            return d;
        }
    }
    0.0
}
