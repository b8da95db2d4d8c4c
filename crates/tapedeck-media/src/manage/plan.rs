// crates/tapedeck-media/src/manage/plan.rs
//
// Pure planning maths for the three managers: which segments to hold, how
// often to reload, how big the full-res window is and where it sits. Kept
// free of threads and ffmpeg so every policy number is pinned by a test.

use std::time::Duration;

/// Segment sizes (in slots). Low-res refills chase the playhead in larger
/// strides than the cached anchors.
pub const LOW_RES_SEGMENT_SIZE: usize = 2750;

/// Cached-tier segment size scaled so a segment covers a constant stretch of
/// content regardless of frame rate: 2500 slots at 25 fps, clamped to
/// [1250, 3000].
pub fn cached_segment_size(fps: f64) -> usize {
    if fps <= 0.0 {
        return 2500;
    }
    ((fps * 100.0) as usize).clamp(1250, 3000)
}

pub fn segment_count(slot_count: usize, segment_size: usize) -> usize {
    if segment_size == 0 {
        return 0;
    }
    slot_count.div_ceil(segment_size)
}

/// Low-res target set: the current segment plus the directional neighbor,
/// and one more ahead once the transport is moving at 1.8x or faster.
pub fn low_res_targets(
    current_segment: usize,
    total_segments: usize,
    reverse: bool,
    rate_abs: f64,
) -> Vec<usize> {
    let mut targets = vec![current_segment];
    if reverse {
        if current_segment > 0 {
            targets.push(current_segment - 1);
        }
    } else {
        if current_segment + 1 < total_segments {
            targets.push(current_segment + 1);
        }
        if rate_abs >= 1.8 && current_segment + 2 < total_segments {
            targets.push(current_segment + 2);
        }
    }
    targets
}

/// Cached target set: current segment plus the directional neighbor.
pub fn cached_targets(current_segment: usize, total_segments: usize, reverse: bool) -> Vec<usize> {
    let mut targets = vec![current_segment];
    if reverse {
        if current_segment > 0 {
            targets.push(current_segment - 1);
        }
    } else if current_segment + 1 < total_segments {
        targets.push(current_segment + 1);
    }
    targets
}

/// Preload hint once the playhead has crossed 75% of the current segment
/// (or the mirrored threshold in reverse): the next segment over, if any.
pub fn cached_preload_hint(
    frame_in_segment: usize,
    segment_size: usize,
    current_segment: usize,
    total_segments: usize,
    reverse: bool,
) -> Option<usize> {
    let threshold = segment_size * 3 / 4;
    if reverse {
        (frame_in_segment < segment_size - threshold && current_segment > 0)
            .then(|| current_segment - 1)
    } else {
        (frame_in_segment >= threshold && current_segment + 1 < total_segments)
            .then(|| current_segment + 1)
    }
}

/// How long between low-res refills when nothing forces an update. Faster
/// transport burns through coverage sooner; below 0.9x coverage never goes
/// stale on its own.
pub fn low_res_update_interval(rate_abs: f64) -> Option<Duration> {
    if rate_abs < 0.9 {
        None
    } else if rate_abs <= 1.0 {
        Some(Duration::from_secs(10))
    } else if rate_abs <= 1.8 {
        Some(Duration::from_secs(5))
    } else if rate_abs <= 3.8 {
        Some(Duration::from_millis(2500))
    } else {
        Some(Duration::from_millis(1250))
    }
}

/// A rate change this large forces a low-res reconcile regardless of the
/// interval.
pub const SIGNIFICANT_RATE_DELTA: f64 = 0.5;

// ── Full-res window ───────────────────────────────────────────────────────────

/// Full-res window size by frame rate. Roughly a constant wall-clock span.
pub fn full_res_window_size(fps: f64) -> usize {
    if fps > 55.0 {
        1400
    } else if fps > 45.0 {
        1200
    } else if fps > 28.0 {
        700
    } else {
        600
    }
}

/// The window around `current`, right-biased for forward playback: 10% of
/// the slots behind the playhead, 90% ahead. Returns an inclusive range
/// clamped to the index.
pub fn full_res_window(
    current: usize,
    window_size: usize,
    slot_count: usize,
) -> Option<(usize, usize)> {
    if slot_count == 0 || window_size == 0 {
        return None;
    }
    let behind = window_size / 10;
    let ahead = window_size - behind;
    let start = current.saturating_sub(behind);
    let end = (current + ahead).min(slot_count - 1);
    (start <= end).then_some((start, end))
}

/// Re-decode cadence for the full-res window while conditions hold.
pub const FULL_RES_UPDATE_INTERVAL: Duration = Duration::from_secs(18);

/// Full-res decoding runs only at ~1.0x forward.
pub fn full_res_conditions_met(rate: f64, reverse: bool) -> bool {
    (rate.abs() - 1.0).abs() < 0.01 && !reverse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_res_targets_forward() {
        assert_eq!(low_res_targets(3, 10, false, 1.0), vec![3, 4]);
        // At 1.8x and above, two segments ahead.
        assert_eq!(low_res_targets(3, 10, false, 1.8), vec![3, 4, 5]);
        assert_eq!(low_res_targets(3, 10, false, 7.8), vec![3, 4, 5]);
        // Clamped at the tail.
        assert_eq!(low_res_targets(9, 10, false, 3.0), vec![9]);
        assert_eq!(low_res_targets(8, 10, false, 3.0), vec![8, 9]);
    }

    #[test]
    fn low_res_targets_reverse() {
        assert_eq!(low_res_targets(3, 10, true, 1.0), vec![3, 2]);
        assert_eq!(low_res_targets(0, 10, true, 5.0), vec![0]);
    }

    #[test]
    fn cached_targets_follow_direction() {
        assert_eq!(cached_targets(2, 10, false), vec![2, 3]);
        assert_eq!(cached_targets(2, 10, true), vec![2, 1]);
        assert_eq!(cached_targets(0, 10, true), vec![0]);
        assert_eq!(cached_targets(9, 10, false), vec![9]);
    }

    #[test]
    fn preload_hint_fires_past_three_quarters() {
        assert_eq!(cached_preload_hint(1874, 2500, 0, 4, false), None);
        assert_eq!(cached_preload_hint(1875, 2500, 0, 4, false), Some(1));
        // Last segment has nothing ahead.
        assert_eq!(cached_preload_hint(2400, 2500, 3, 4, false), None);
        // Reverse mirrors the threshold.
        assert_eq!(cached_preload_hint(600, 2500, 2, 4, true), Some(1));
        assert_eq!(cached_preload_hint(700, 2500, 2, 4, true), None);
    }

    #[test]
    fn update_interval_table() {
        assert_eq!(low_res_update_interval(0.5), None);
        assert_eq!(low_res_update_interval(1.0), Some(Duration::from_secs(10)));
        assert_eq!(low_res_update_interval(1.8), Some(Duration::from_secs(5)));
        assert_eq!(low_res_update_interval(3.8), Some(Duration::from_millis(2500)));
        assert_eq!(low_res_update_interval(7.8), Some(Duration::from_millis(1250)));
        assert_eq!(low_res_update_interval(12.0), Some(Duration::from_millis(1250)));
    }

    #[test]
    fn window_size_table() {
        assert_eq!(full_res_window_size(60.0), 1400);
        assert_eq!(full_res_window_size(50.0), 1200);
        assert_eq!(full_res_window_size(30.0), 700);
        assert_eq!(full_res_window_size(25.0), 600);
        assert_eq!(full_res_window_size(23.976), 600);
    }

    #[test]
    fn window_is_right_biased() {
        let (start, end) = full_res_window(5000, 600, 100_000).unwrap();
        assert_eq!(start, 5000 - 60);
        assert_eq!(end, 5000 + 540);
    }

    #[test]
    fn window_clamps_at_edges() {
        let (start, end) = full_res_window(0, 600, 100_000).unwrap();
        assert_eq!((start, end), (0, 540));
        let (start, end) = full_res_window(99_990, 600, 100_000).unwrap();
        assert_eq!((start, end), (99_930, 99_999));
        assert_eq!(full_res_window(0, 600, 0), None);
    }

    #[test]
    fn conditions_require_unity_forward() {
        assert!(full_res_conditions_met(1.0, false));
        assert!(full_res_conditions_met(1.005, false));
        assert!(!full_res_conditions_met(1.0, true));
        assert!(!full_res_conditions_met(1.02, false));
        assert!(!full_res_conditions_met(0.0, false));
        assert!(!full_res_conditions_met(3.0, false));
    }

    #[test]
    fn cached_segment_size_scales_with_fps() {
        assert_eq!(cached_segment_size(25.0), 2500);
        assert_eq!(cached_segment_size(30.0), 3000);
        assert_eq!(cached_segment_size(60.0), 3000);
        assert_eq!(cached_segment_size(12.0), 1250);
        assert_eq!(cached_segment_size(0.0), 2500);
    }

    #[test]
    fn segment_count_rounds_up() {
        assert_eq!(segment_count(0, 2750), 0);
        assert_eq!(segment_count(2750, 2750), 1);
        assert_eq!(segment_count(2751, 2750), 2);
    }
}
