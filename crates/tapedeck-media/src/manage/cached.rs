// crates/tapedeck-media/src/manage/cached.rs
//
// Anchor coverage: larger segments of sparse cached frames, the only tier
// maintained at full shuttle speed. The decoder is stateful (persistent
// demuxer + codec), so it lives on the manager thread; the public handle
// keeps only its stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tapedeck_core::state::PlaybackState;

use super::plan::{cached_preload_hint, cached_targets, segment_count};
use super::Tracking;
use crate::decode::cached::CachedDecoder;
use crate::index::SharedIndex;

struct Inner {
    slots:        SharedIndex,
    state:        Arc<PlaybackState>,
    segment_size: usize,
    stop:         AtomicBool,
    sync:         Mutex<Tracking>,
    wake:         Condvar,
}

pub struct CachedManager {
    inner:        Arc<Inner>,
    decoder_stop: Arc<AtomicBool>,
    thread:       Option<JoinHandle<()>>,
}

impl CachedManager {
    pub fn spawn(
        decoder: CachedDecoder,
        slots: SharedIndex,
        state: Arc<PlaybackState>,
        segment_size: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            slots,
            state,
            segment_size: segment_size.max(1),
            stop: AtomicBool::new(false),
            sync: Mutex::new(Tracking::new()),
            wake: Condvar::new(),
        });
        let decoder_stop = decoder.stop_handle();
        let thread_inner = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("cached-manager".into())
            .spawn(move || thread_inner.run(decoder))
            .expect("spawn cached manager");
        Self {
            inner,
            decoder_stop,
            thread: Some(thread),
        }
    }

    pub fn notify_frame_change(&self) {
        self.inner.wake.notify_one();
    }

    pub fn stop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        self.decoder_stop.store(true, Ordering::Release);
        self.inner.wake.notify_one();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for CachedManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn run(&self, mut decoder: CachedDecoder) {
        let mut previous_segment: Option<usize> = None;
        let mut previous_reverse = self.state.is_reverse.load(Ordering::Acquire);

        while !self.stop.load(Ordering::Acquire) {
            let current_frame = match self.wait_for_change() {
                Some(f) => f,
                None => continue,
            };
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let total = segment_count(self.slots.len(), self.segment_size);
            if total == 0 {
                continue;
            }
            let current_segment = (current_frame / self.segment_size).min(total - 1);
            let frame_in_segment = current_frame % self.segment_size;
            let reverse = self.state.is_reverse.load(Ordering::Acquire);

            let direction_changed = reverse != previous_reverse;
            previous_reverse = reverse;
            let segment_changed = previous_segment != Some(current_segment);
            previous_segment = Some(current_segment);

            let mut targets = cached_targets(current_segment, total, reverse);
            if let Some(preload) = cached_preload_hint(
                frame_in_segment,
                self.segment_size,
                current_segment,
                total,
                reverse,
            ) {
                if !targets.contains(&preload) {
                    targets.push(preload);
                }
            }

            // On a segment or direction flip, evict first so the decode that
            // follows isn't competing with stale coverage for memory.
            let (to_load, to_unload) = {
                let tracking = self.sync.lock().unwrap();
                let to_load: Vec<usize> = targets
                    .iter()
                    .copied()
                    .filter(|seg| !tracking.loaded.contains(seg))
                    .collect();
                let to_unload: Vec<usize> = if segment_changed || direction_changed {
                    tracking
                        .loaded
                        .iter()
                        .copied()
                        .filter(|seg| !targets.contains(seg))
                        .collect()
                } else {
                    Vec::new()
                };
                (to_load, to_unload)
            };

            for seg in to_unload {
                self.unload_segment(seg);
            }
            for seg in to_load {
                self.load_segment(&mut decoder, seg);
            }
        }
    }

    fn wait_for_change(&self) -> Option<usize> {
        let guard = self.sync.lock().unwrap();
        let (mut guard, _) = self
            .wake
            .wait_timeout_while(guard, Duration::from_millis(200), |t| {
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

    fn segment_bounds(&self, segment: usize) -> Option<(usize, usize)> {
        if self.slots.is_empty() {
            return None;
        }
        let start = segment * self.segment_size;
        if start >= self.slots.len() {
            return None;
        }
        let end = (start + self.segment_size - 1).min(self.slots.len() - 1);
        Some((start, end))
    }

    fn load_segment(&self, decoder: &mut CachedDecoder, segment: usize) {
        {
            let tracking = self.sync.lock().unwrap();
            if tracking.loaded.contains(&segment) {
                return;
            }
        }
        let Some((start, end)) = self.segment_bounds(segment) else { return };
        if decoder.decode_range(&self.slots, start, end) {
            self.sync.lock().unwrap().loaded.insert(segment);
        } else {
            eprintln!("[cached] segment {segment} failed to load");
        }
    }

    fn unload_segment(&self, segment: usize) {
        let was_loaded = self.sync.lock().unwrap().loaded.remove(&segment);
        if was_loaded {
            if let Some((start, end)) = self.segment_bounds(segment) {
                CachedDecoder::remove_range(&self.slots, start, end);
            }
        }
    }
}
