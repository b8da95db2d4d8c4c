// crates/tapedeck-core/src/timecode.rs
//
// "HHMMSSFF" timecode entry and HH:MM:SS:FF display formatting.
//
// Entry accepts up to 8 digits and left-pads the rest, standard deck
// behavior: typing "130" means 00:00:01:30 is invalid, but "13000" is
// 00:01:30:00. Frames are validated against the file's frame rate, so the
// same keystrokes mean different times on 25 fps and 23.976 fps material.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TimecodeError {
    #[error("timecode must contain only digits")]
    NonDigit,
    #[error("hours, minutes, or seconds out of range")]
    FieldRange,
    #[error("frames exceed frame rate")]
    FrameRange,
}

/// Parse a timecode entry into seconds at the given frame rate.
///
/// Shorter entries are left-padded with zeros to 8 digits; longer entries
/// are truncated to the first 8.
///
/// ```
/// use tapedeck_core::timecode::parse_timecode;
/// assert!((parse_timecode("01020304", 25.0).unwrap() - 3723.16).abs() < 1e-9);
/// assert_eq!(parse_timecode("500", 25.0).unwrap(), 5.0);
/// ```
pub fn parse_timecode(entry: &str, fps: f64) -> Result<f64, TimecodeError> {
    let mut padded: String = entry.chars().take(8).collect();
    if !padded.chars().all(|c| c.is_ascii_digit()) {
        return Err(TimecodeError::NonDigit);
    }
    while padded.len() < 8 {
        padded.insert(0, '0');
    }

    let field = |range: std::ops::Range<usize>| -> u32 {
        padded[range].parse().unwrap_or(0)
    };
    let hours = field(0..2);
    let minutes = field(2..4);
    let seconds = field(4..6);
    let frames = field(6..8);

    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(TimecodeError::FieldRange);
    }
    if f64::from(frames) >= fps {
        return Err(TimecodeError::FrameRange);
    }

    Ok(f64::from(hours) * 3600.0
        + f64::from(minutes) * 60.0
        + f64::from(seconds)
        + f64::from(frames) / fps)
}

/// Format a time in seconds as `HH:MM:SS:FF`, clamped to `[0, total_dur]`.
///
/// A non-positive `fps` falls back to 25 so the OSD never divides by zero
/// while a file is still probing.
///
/// ```
/// use tapedeck_core::timecode::format_timecode;
/// assert_eq!(format_timecode(3723.16, 25.0, 7200.0), "01:02:03:04");
/// assert_eq!(format_timecode(-5.0, 25.0, 7200.0), "00:00:00:00");
/// ```
pub fn format_timecode(time: f64, fps: f64, total_dur: f64) -> String {
    let fps = if fps > 0.0 { fps } else { 25.0 };
    let mut t = time.clamp(0.0, total_dur.max(0.0));

    let hours = (t / 3600.0) as u32;
    t -= f64::from(hours) * 3600.0;
    let minutes = (t / 60.0) as u32;
    t -= f64::from(minutes) * 60.0;
    let seconds = t as u32;
    let fractional = t - f64::from(seconds);

    // The epsilon keeps a frame count sitting a few ulps under an integer
    // from truncating down a whole frame; the clamp pins rounding noise at
    // the top of the second to the last frame.
    let mut frames = (fractional * fps + 1e-6) as u32;
    if frames >= fps as u32 {
        frames = fps as u32 - 1;
    }

    format!("{hours:02}:{minutes:02}:{seconds:02}:{frames:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_entry_at_25fps() {
        // 1h 2m 3s 4f @ 25 fps = 3723 + 4/25
        let t = parse_timecode("01020304", 25.0).unwrap();
        assert!((t - 3723.16).abs() < 1e-9);
    }

    #[test]
    fn parse_pads_short_entries() {
        assert_eq!(parse_timecode("0", 25.0).unwrap(), 0.0);
        assert_eq!(parse_timecode("100", 25.0).unwrap(), 1.0);
        assert_eq!(parse_timecode("13000", 25.0).unwrap(), 90.0);
    }

    #[test]
    fn parse_truncates_long_entries() {
        let a = parse_timecode("010203049999", 25.0).unwrap();
        let b = parse_timecode("01020304", 25.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_at_ntsc_film_rate() {
        // 23s + 23 frames at 24000/1001 fps ≈ 23.95929 s
        let fps = 24000.0 / 1001.0;
        let t = parse_timecode("00002323", fps).unwrap();
        assert!((t - (23.0 + 23.0 / fps)).abs() < 1e-9);
        // Frame 24 does not exist at 23.976.
        assert_eq!(parse_timecode("00002324", fps), Err(TimecodeError::FrameRange));
    }

    #[test]
    fn parse_rejects_bad_fields() {
        assert_eq!(parse_timecode("24000000", 25.0), Err(TimecodeError::FieldRange));
        assert_eq!(parse_timecode("00600000", 25.0), Err(TimecodeError::FieldRange));
        assert_eq!(parse_timecode("00006000", 25.0), Err(TimecodeError::FieldRange));
        assert_eq!(parse_timecode("00000025", 25.0), Err(TimecodeError::FrameRange));
        assert_eq!(parse_timecode("12:00:00", 25.0), Err(TimecodeError::NonDigit));
    }

    #[test]
    fn format_round_trips_parse() {
        let t = parse_timecode("01020304", 25.0).unwrap();
        assert_eq!(format_timecode(t, 25.0, 7200.0), "01:02:03:04");
    }

    #[test]
    fn format_clamps_to_duration() {
        assert_eq!(format_timecode(99999.0, 25.0, 10.0), "00:00:10:00");
        assert_eq!(format_timecode(-1.0, 25.0, 10.0), "00:00:00:00");
    }

    #[test]
    fn format_survives_zero_fps() {
        // fps unknown during probe, falls back to 25.
        assert_eq!(format_timecode(1.0, 0.0, 10.0), "00:00:01:00");
    }
}
