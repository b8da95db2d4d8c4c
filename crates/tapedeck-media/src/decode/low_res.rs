// crates/tapedeck-media/src/decode/low_res.rs
//
// Range decoder for the 640px companion file. Fills the `low_res` tier of a
// slot range by fanning the range out across three worker threads, each with
// its own demuxer + decoder (no shared ffmpeg state, nothing to contend on).
//
// Slot assignment is a plain counter advance: after the seek, the Nth
// decoded frame in a worker's sub-range lands in slot start+N. That skips
// PTS matching entirely: the companion is a clean one-packet-per-frame
// H.264 transcode, so the counter stays honest, and counter advance is what
// makes a 2750-frame refill fast enough to chase the playhead.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use ffmpeg_the_third as ffmpeg;

use super::{
    frame_has_decode_errors, frame_pts, ms_to_stream_ts, open_video_decoder, seek_backward,
    stream_ts_to_ms, SEEK_SLACK_MS,
};
use crate::index::FrameSlot;

const WORKER_COUNT: usize = 3;

pub struct LowResDecoder {
    path: PathBuf,
    stop: Arc<AtomicBool>,
}

impl LowResDecoder {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag, held by the owning manager so it can abort a
    /// mid-range decode from its own stop().
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Decode slots `[start, end]` into the `low_res` tier.
    ///
    /// When `skip_high_res_window` is set, slots inside
    /// `[high_res_start, high_res_end]` are left untouched so an existing
    /// full-res window isn't shadowed. Current callers pass `false`; the
    /// parameter is retained as policy surface for the managers.
    pub fn decode_range(
        &self,
        slots: &[FrameSlot],
        start: usize,
        end: usize,
        high_res_start: usize,
        high_res_end: usize,
        skip_high_res_window: bool,
    ) -> bool {
        if slots.is_empty() {
            return true;
        }
        let start = start.min(slots.len() - 1);
        let end = end.min(slots.len() - 1);
        if start > end {
            return false;
        }

        let total = end - start + 1;
        let per_worker = total / WORKER_COUNT;
        let ok = AtomicBool::new(true);

        thread::scope(|scope| {
            let mut sub_start = start;
            for worker in 0..WORKER_COUNT {
                let sub_end = if worker == WORKER_COUNT - 1 {
                    end
                } else {
                    (sub_start + per_worker).saturating_sub(1).min(end)
                };
                if sub_start > sub_end {
                    continue;
                }
                let ok = &ok;
                let range = (sub_start, sub_end);
                scope.spawn(move || {
                    if !self.decode_sub_range(
                        slots,
                        range.0,
                        range.1,
                        high_res_start,
                        high_res_end,
                        skip_high_res_window,
                    ) {
                        ok.store(false, Ordering::Release);
                    }
                });
                sub_start = sub_end + 1;
            }
        });

        ok.load(Ordering::Acquire)
    }

    fn decode_sub_range(
        &self,
        slots: &[FrameSlot],
        start: usize,
        end: usize,
        high_res_start: usize,
        high_res_end: usize,
        skip_high_res_window: bool,
    ) -> bool {
        let Ok((mut ictx, stream_index, mut decoder)) = open_video_decoder(&self.path) else {
            eprintln!("[lowres] failed to open {}", self.path.display());
            return false;
        };
        let time_base = ictx.stream(stream_index).map(|s| s.time_base());
        let Some(time_base) = time_base else { return false };

        // Seek to the first slot in the sub-range that has a valid time.
        let seek_target_ms = slots[start..=end]
            .iter()
            .map(|s| s.time_ms)
            .find(|&ms| ms >= 0)
            .unwrap_or(-1);
        if seek_target_ms >= 0 {
            let ts = ms_to_stream_ts(seek_target_ms, time_base);
            if seek_backward(&mut ictx, stream_index, ts, "lowres") {
                decoder.flush();
            }
        }

        let mut next_slot = start;
        let mut decoded = ffmpeg::util::frame::video::Video::empty();

        for (stream, packet) in ictx.packets().flatten() {
            if self.stop.load(Ordering::Acquire) {
                return true;
            }
            if stream.index() != stream_index {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            while decoder.receive_frame(&mut decoded).is_ok() {
                if self.stop.load(Ordering::Acquire) {
                    return true;
                }
                if frame_has_decode_errors(&decoded) {
                    continue;
                }

                let frame_ms = frame_pts(&decoded)
                    .map(|pts| stream_ts_to_ms(pts, time_base))
                    .unwrap_or(-1);

                // Pre-roll from the backward seek: frames clearly before the
                // target don't consume a slot.
                if seek_target_ms >= 0 && frame_ms < seek_target_ms - SEEK_SLACK_MS {
                    continue;
                }

                if next_slot <= end {
                    let in_window = skip_high_res_window
                        && next_slot >= high_res_start
                        && next_slot <= high_res_end;
                    if !in_window {
                        let slot = &slots[next_slot];
                        slot.is_decoding.store(true, Ordering::Release);
                        {
                            let mut px = slot.pixels();
                            if px.low_res.is_none() {
                                px.low_res = Some(Arc::new(decoded.clone()));
                                px.refresh_tier();
                            }
                        }
                        slot.is_decoding.store(false, Ordering::Release);
                    }
                    next_slot += 1;
                }

                if next_slot > end {
                    return true;
                }
            }
        }
        true
    }

    /// Drop the `low_res` tier across `[start, end]`, downgrading each
    /// slot's tag to the best tier still present.
    pub fn remove_range(slots: &[FrameSlot], start: usize, end: usize) {
        if slots.is_empty() {
            return;
        }
        let end = end.min(slots.len() - 1);
        for slot in &slots[start.min(end)..=end] {
            let mut px = slot.pixels();
            if px.low_res.take().is_some() {
                px.refresh_tier();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Tier;
    use ffmpeg::Rational;

    fn slot() -> FrameSlot {
        FrameSlot::new(0, 0, Rational(1, 1000))
    }

    #[test]
    fn remove_range_downgrades_tier() {
        let slots: Vec<FrameSlot> = (0..4).map(|_| slot()).collect();
        let frame = Arc::new(ffmpeg::util::frame::video::Video::empty());

        for s in &slots {
            let mut px = s.pixels();
            px.low_res = Some(frame.clone());
            px.refresh_tier();
        }
        {
            // Slot 2 also has a cached anchor underneath.
            let mut px = slots[2].pixels();
            px.cached = Some(frame.clone());
            px.refresh_tier();
        }

        LowResDecoder::remove_range(&slots, 1, 2);

        assert_eq!(slots[0].pixels().tier, Tier::LowRes);
        assert_eq!(slots[1].pixels().tier, Tier::Empty);
        assert_eq!(slots[2].pixels().tier, Tier::Cached);
        assert_eq!(slots[3].pixels().tier, Tier::LowRes);
    }

    #[test]
    fn remove_range_clamps_out_of_bounds() {
        let slots: Vec<FrameSlot> = (0..2).map(|_| slot()).collect();
        // Must not panic on a range past the end.
        LowResDecoder::remove_range(&slots, 0, 100);
    }

    #[test]
    fn stop_flag_is_shared() {
        let d = LowResDecoder::new(Path::new("/nonexistent.mp4"));
        let handle = d.stop_handle();
        d.request_stop();
        assert!(handle.load(Ordering::Acquire));
    }
}
