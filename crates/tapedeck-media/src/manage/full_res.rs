// crates/tapedeck-media/src/manage/full_res.rs
//
// Full-res coverage: a single right-biased window around the playhead,
// maintained only at ~1.0x forward. The window is re-decoded on the rising
// edge of that condition and every 18 s while it holds; slots outside the
// window are evicted every pass, and leaving the condition (speed change,
// reverse) clears the tier outright.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tapedeck_core::state::PlaybackState;

use super::plan::{
    full_res_conditions_met, full_res_window, FULL_RES_UPDATE_INTERVAL,
};
use crate::decode::full_res::FullResDecoder;
use crate::index::SharedIndex;

struct Inner {
    slots:       SharedIndex,
    state:       Arc<PlaybackState>,
    window_size: usize,
    stop:        AtomicBool,
    /// Last frame the loop processed; the manager is windowed, not
    /// segmented, so there is no loaded-set to track.
    last_frame:  Mutex<Option<usize>>,
    wake:        Condvar,
}

pub struct FullResManager {
    inner:        Arc<Inner>,
    decoder_stop: Arc<AtomicBool>,
    thread:       Option<JoinHandle<()>>,
}

impl FullResManager {
    pub fn spawn(
        decoder: FullResDecoder,
        slots: SharedIndex,
        state: Arc<PlaybackState>,
        window_size: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            slots,
            state,
            window_size,
            stop: AtomicBool::new(false),
            last_frame: Mutex::new(None),
            wake: Condvar::new(),
        });
        let decoder_stop = decoder.stop_handle();
        let thread_inner = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("fullres-manager".into())
            .spawn(move || thread_inner.run(decoder))
            .expect("spawn fullres manager");
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

impl Drop for FullResManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn run(&self, mut decoder: FullResDecoder) {
        // Initial decode centered on frame 0 so the player has a good first
        // frame the moment the window opens.
        if let Some((start, end)) = full_res_window(0, self.window_size, self.slots.len()) {
            decoder.decode_range(&self.slots, start, end);
        }
        let mut next_decode = Instant::now() + FULL_RES_UPDATE_INTERVAL;
        let mut conditions_were_met = false;

        while !self.stop.load(Ordering::Acquire) {
            let current_frame = match self.wait_for_change() {
                Some(f) => f,
                None => continue,
            };
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let rate = self.state.playback_rate.load();
            let reverse = self.state.is_reverse.load(Ordering::Acquire);
            let conditions_met = full_res_conditions_met(rate, reverse);
            let rising_edge = conditions_met && !conditions_were_met;
            let falling_edge = !conditions_met && conditions_were_met;
            conditions_were_met = conditions_met;

            if falling_edge {
                // The window is no longer maintained; release the whole
                // tier rather than leaving a stale band of frames pinned.
                FullResDecoder::clear_all(&self.slots);
                continue;
            }

            let Some((start, end)) =
                full_res_window(current_frame, self.window_size, self.slots.len())
            else {
                continue;
            };

            if conditions_met && (rising_edge || Instant::now() >= next_decode) {
                decoder.decode_range(&self.slots, start, end);
                next_decode = Instant::now() + FULL_RES_UPDATE_INTERVAL;
            }

            // Evict outside the window on every pass that moved the frame.
            if start > 0 {
                FullResDecoder::remove_outside_window(&self.slots, 0, start - 1, start, end);
            }
            if end + 1 < self.slots.len() {
                FullResDecoder::remove_outside_window(
                    &self.slots,
                    end + 1,
                    self.slots.len() - 1,
                    start,
                    end,
                );
            }
        }
    }

    fn wait_for_change(&self) -> Option<usize> {
        let guard = self.last_frame.lock().unwrap();
        let (mut guard, _) = self
            .wake
            .wait_timeout_while(guard, Duration::from_millis(200), |last| {
                !self.stop.load(Ordering::Acquire)
                    && Some(self.state.current_frame.load(Ordering::Acquire)) == *last
            })
            .unwrap();
        if self.stop.load(Ordering::Acquire) {
            return None;
        }
        let current = self.state.current_frame.load(Ordering::Acquire);
        if Some(current) == *guard {
            return None;
        }
        *guard = Some(current);
        Some(current)
    }
}
