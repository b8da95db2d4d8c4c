// crates/tapedeck-media/src/manage/low_cached.rs
//
// Low-res coverage: a sliding window of 2750-slot segments around the
// playhead, fed by the three-thread range decoder. Above the speed
// threshold (16x, or 24x while a reset-to-normal is in flight) low-res is
// abandoned entirely: eviction frees the memory and the cached anchors
// take over the screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tapedeck_core::state::PlaybackState;

use super::plan::{
    low_res_targets, low_res_update_interval, segment_count, LOW_RES_SEGMENT_SIZE,
    SIGNIFICANT_RATE_DELTA,
};
use super::Tracking;
use crate::decode::low_res::LowResDecoder;
use crate::index::SharedIndex;

struct Inner {
    slots:   SharedIndex,
    state:   Arc<PlaybackState>,
    decoder: LowResDecoder,
    /// Full-res window size, threaded through to decode_range so the skip
    /// policy has the window bounds when a caller enables it.
    window_size: usize,
    stop:    AtomicBool,
    sync:    Mutex<Tracking>,
    wake:    Condvar,
}

pub struct LowCachedManager {
    inner:  Arc<Inner>,
    thread: Option<JoinHandle<()>>,
}

impl LowCachedManager {
    pub fn spawn(
        decoder: LowResDecoder,
        slots: SharedIndex,
        state: Arc<PlaybackState>,
        window_size: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            slots,
            state,
            decoder,
            window_size,
            stop: AtomicBool::new(false),
            sync: Mutex::new(Tracking::new()),
            wake: Condvar::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("lowres-manager".into())
            .spawn(move || thread_inner.run())
            .expect("spawn lowres manager");
        Self {
            inner,
            thread: Some(thread),
        }
    }

    pub fn notify_frame_change(&self) {
        self.inner.wake.notify_one();
    }

    pub fn stop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.decoder.request_stop();
        self.inner.wake.notify_one();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for LowCachedManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn run(&self) {
        // Warm the segment under the initial playhead before entering the
        // wait loop, so the first seconds of playback have a tier better
        // than the sparse anchors.
        let initial = self.state.current_frame.load(Ordering::Acquire) / LOW_RES_SEGMENT_SIZE;
        self.load_segment(initial);

        let mut previous_rate = self.state.playback_rate.load().abs();
        let mut previous_reverse = self.state.is_reverse.load(Ordering::Acquire);
        let mut previous_segment: Option<usize> = Some(initial);
        let mut last_update = Instant::now();

        while !self.stop.load(Ordering::Acquire) {
            let current_frame = match self.wait_for_change() {
                Some(f) => f,
                None => continue,
            };
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let rate_abs = self.state.playback_rate.load().abs();
            let reverse = self.state.is_reverse.load(Ordering::Acquire);
            let rate_delta = (rate_abs - previous_rate).abs();
            previous_rate = rate_abs;

            // Speed gate: past the threshold the tier can't keep up, free it.
            if rate_abs >= self.state.speed_threshold.load() {
                self.evict_everything();
                previous_segment = None;
                previous_reverse = reverse;
                continue;
            }

            let total = segment_count(self.slots.len(), LOW_RES_SEGMENT_SIZE);
            if total == 0 {
                continue;
            }
            let current_segment = (current_frame / LOW_RES_SEGMENT_SIZE).min(total - 1);
            let targets = low_res_targets(current_segment, total, reverse, rate_abs);

            let segment_changed = previous_segment != Some(current_segment);
            let direction_changed = reverse != previous_reverse;
            previous_reverse = reverse;

            if segment_changed || direction_changed {
                self.reconcile(&targets, current_segment);
                previous_segment = Some(current_segment);
                last_update = Instant::now();
                continue;
            }

            // Same segment, same direction: only refill on the rate-keyed
            // interval, or when the rate jumped enough to change the plan.
            let interval_elapsed = low_res_update_interval(rate_abs)
                .map(|iv| last_update.elapsed() >= iv)
                .unwrap_or(false);
            if interval_elapsed || rate_delta > SIGNIFICANT_RATE_DELTA {
                let missing = self.missing_targets(&targets);
                if !missing.is_empty() {
                    for seg in ordered_for_load(&missing, current_segment) {
                        self.load_segment(seg);
                    }
                    last_update = Instant::now();
                }
            }
            previous_segment = Some(current_segment);
        }
    }

    /// Sleep until stopped or the playhead moved to a new slot. Returns the
    /// new frame, or None when the wait timed out with nothing to do.
    fn wait_for_change(&self) -> Option<usize> {
        let guard = self.sync.lock().unwrap();
        let (mut guard, _) = self
            .wake
            .wait_timeout_while(guard, Duration::from_millis(100), |t| {
                !self.stop.load(Ordering::Acquire)
                    && Some(self.state.current_frame.load(Ordering::Acquire)) == t.last_frame
            })
            .unwrap();
        if self.stop.load(Ordering::Acquire) {
            return None;
        }
        let current = self.state.current_frame.load(Ordering::Acquire);
        if Some(current) == guard.last_frame {
            return None;
        }
        guard.last_frame = Some(current);
        Some(current)
    }

    /// Forced update on a segment or direction change: unload everything not
    /// in the target set, then load the current segment before its
    /// neighbors.
    fn reconcile(&self, targets: &[usize], current_segment: usize) {
        let (to_load, to_unload) = {
            let tracking = self.sync.lock().unwrap();
            let to_load: Vec<usize> = targets
                .iter()
                .copied()
                .filter(|seg| !tracking.loaded.contains(seg))
                .collect();
            let to_unload: Vec<usize> = tracking
                .loaded
                .iter()
                .copied()
                .filter(|seg| !targets.contains(seg))
                .collect();
            (to_load, to_unload)
        };

        for seg in to_unload {
            self.unload_segment(seg);
        }
        for seg in ordered_for_load(&to_load, current_segment) {
            self.load_segment(seg);
        }
    }

    fn missing_targets(&self, targets: &[usize]) -> Vec<usize> {
        let tracking = self.sync.lock().unwrap();
        targets
            .iter()
            .copied()
            .filter(|seg| !tracking.loaded.contains(seg))
            .collect()
    }

    fn segment_bounds(&self, segment: usize) -> Option<(usize, usize)> {
        if self.slots.is_empty() {
            return None;
        }
        let start = segment * LOW_RES_SEGMENT_SIZE;
        if start >= self.slots.len() {
            return None;
        }
        let end = (start + LOW_RES_SEGMENT_SIZE - 1).min(self.slots.len() - 1);
        Some((start, end))
    }

    fn load_segment(&self, segment: usize) {
        {
            let tracking = self.sync.lock().unwrap();
            if tracking.loaded.contains(&segment) {
                return;
            }
        }
        let Some((start, end)) = self.segment_bounds(segment) else { return };

        // The current high-res window, for the (dormant) skip policy.
        let current = self.state.current_frame.load(Ordering::Acquire);
        let half = self.window_size / 2;
        let hr_start = current.saturating_sub(half);
        let hr_end = (current + half).min(self.slots.len().saturating_sub(1));

        if self
            .decoder
            .decode_range(&self.slots, start, end, hr_start, hr_end, false)
        {
            self.sync.lock().unwrap().loaded.insert(segment);
        } else {
            eprintln!("[lowres] segment {segment} failed to load");
        }
    }

    fn unload_segment(&self, segment: usize) {
        let was_loaded = self.sync.lock().unwrap().loaded.remove(&segment);
        if was_loaded {
            if let Some((start, end)) = self.segment_bounds(segment) {
                LowResDecoder::remove_range(&self.slots, start, end);
            }
        }
    }

    fn evict_everything(&self) {
        let loaded: Vec<usize> = {
            let mut tracking = self.sync.lock().unwrap();
            let segs = tracking.loaded.iter().copied().collect();
            tracking.loaded.clear();
            segs
        };
        if loaded.is_empty() {
            return;
        }
        eprintln!("[lowres] speed gate hit, evicting {} segments", loaded.len());
        for seg in loaded {
            if let Some((start, end)) = self.segment_bounds(seg) {
                LowResDecoder::remove_range(&self.slots, start, end);
            }
        }
    }
}

/// Load order: current segment first, then the rest ascending.
fn ordered_for_load(segments: &[usize], current: usize) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(segments.len());
    if segments.contains(&current) {
        out.push(current);
    }
    let mut rest: Vec<usize> = segments.iter().copied().filter(|&s| s != current).collect();
    rest.sort_unstable();
    out.extend(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_order_puts_current_first() {
        assert_eq!(ordered_for_load(&[5, 3, 4], 4), vec![4, 3, 5]);
        assert_eq!(ordered_for_load(&[5, 3], 4), vec![3, 5]);
        assert!(ordered_for_load(&[], 4).is_empty());
    }
}
