// crates/tapedeck-media/src/decode/cached.rs
//
// Sparse anchor decoder. Walks the low-res companion and keeps roughly one
// frame per 0.2 s of content, placed by nearest-timestamp into the `cached`
// tier. Anchors are what the screen falls back to at 16-24x, where no other
// tier can keep up with the playhead.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::Rational;

use super::{
    frame_has_decode_errors, frame_pts, ms_to_stream_ts, open_video_decoder, seek_backward,
    stream_ts_to_ms, SEEK_SLACK_MS,
};
use crate::index::{find_slot_by_time_ms, FrameSlot};

/// Frames decoded and discarded right after a seek. Some codecs hand back
/// green or garbage frames for the first few decodes out of a flush.
const WARMUP_FRAMES: usize = 4;

/// Anchor spacing in decoded frames for a given rate: ~0.2 s of content per
/// anchor, with explicit values for the common broadcast rates.
pub fn adaptive_stride(fps: f64) -> usize {
    if fps <= 0.0 {
        return 10;
    }
    if (59.0..=60.0).contains(&fps) {
        12
    } else if (49.0..=50.0).contains(&fps) {
        10
    } else if (29.0..=30.0).contains(&fps) {
        6
    } else if (24.0..=25.0).contains(&fps) {
        5
    } else if (23.0..24.0).contains(&fps) {
        4
    } else {
        ((fps / 5.0) as usize).clamp(3, 15)
    }
}

pub struct CachedDecoder {
    path:         PathBuf,
    ictx:         Input,
    stream_index: usize,
    decoder:      ffmpeg::decoder::Video,
    time_base:    Rational,
    start_time:   i64,
    stride:       usize,
    stop:         Arc<AtomicBool>,
}

// SAFETY: the decoder is moved into its manager thread at spawn and only
// ever used from there; the raw pointers inside the ffmpeg contexts are
// never shared across threads.
unsafe impl Send for CachedDecoder {}

impl CachedDecoder {
    pub fn open(path: &Path, fps: f64) -> Result<Self, ffmpeg::Error> {
        let (ictx, stream_index, decoder) = open_video_decoder(path)?;
        let (time_base, start_time) = {
            let stream = ictx.stream(stream_index).ok_or(ffmpeg::Error::StreamNotFound)?;
            let start = stream.start_time();
            (stream.time_base(), if start == i64::MIN { 0 } else { start })
        };
        let stride = adaptive_stride(fps);
        eprintln!("[cached] stride {stride} at {fps:.2} fps ← {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            stream_index,
            decoder,
            time_base,
            start_time,
            stride,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode anchors across slots `[start, end]`.
    ///
    /// The first stored frame must be a keyframe at or past the seek target
    /// (everything out of the warm-up is suspect); after that a plain frame
    /// counter enforces the stride. Frames are placed by nearest `time_ms`,
    /// never at an index before the first store, and only into empty
    /// `cached` slots.
    pub fn decode_range(&mut self, slots: &[FrameSlot], start: usize, end: usize) -> bool {
        if slots.is_empty() {
            return false;
        }
        let start = start.min(slots.len() - 1);
        let end = end.min(slots.len() - 1);
        if start > end {
            return false;
        }

        let seek_target_ms = slots[start].time_ms.max(0);
        let seek_ms = (seek_target_ms - 1000).max(0);
        let ts = ms_to_stream_ts(seek_ms, self.time_base) + self.start_time;
        if seek_backward(&mut self.ictx, self.stream_index, ts, "cached") {
            self.decoder.flush();
            self.discard_warmup_frames();
        }

        let mut first_stored: Option<usize> = None;
        let mut frames_since_store = 0usize;
        let mut decoded = ffmpeg::util::frame::video::Video::empty();

        for (stream, packet) in self.ictx.packets().flatten() {
            if self.stop.load(Ordering::Acquire) {
                return true;
            }
            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if self.stop.load(Ordering::Acquire) {
                    return true;
                }
                if frame_has_decode_errors(&decoded) {
                    continue;
                }

                let Some(pts) = frame_pts(&decoded) else { continue };
                let frame_ms = stream_ts_to_ms(pts - self.start_time, self.time_base);
                let slot_index = find_slot_by_time_ms(slots, frame_ms);

                if slot_index > end {
                    return true;
                }
                if slot_index < start {
                    continue;
                }

                let store = match first_stored {
                    None => {
                        // Anchor zero must be trustworthy: a keyframe at or
                        // past the seek target.
                        decoded.is_key() && frame_ms >= seek_target_ms - SEEK_SLACK_MS
                    }
                    Some(first) => {
                        frames_since_store += 1;
                        frames_since_store >= self.stride && slot_index >= first
                    }
                };

                if store && frame_is_sane(&decoded) {
                    let slot = &slots[slot_index];
                    slot.is_decoding.store(true, Ordering::Release);
                    {
                        let mut px = slot.pixels();
                        if px.cached.is_none() {
                            px.cached = Some(Arc::new(decoded.clone()));
                            px.refresh_tier();
                        }
                    }
                    slot.is_decoding.store(false, Ordering::Release);
                    if first_stored.is_none() {
                        first_stored = Some(slot_index);
                    }
                    frames_since_store = 0;
                }
            }
        }
        true
    }

    fn discard_warmup_frames(&mut self) {
        let mut frame = ffmpeg::util::frame::video::Video::empty();
        let mut discarded = 0;
        for (stream, packet) in self.ictx.packets().flatten() {
            if discarded >= WARMUP_FRAMES || self.stop.load(Ordering::Acquire) {
                break;
            }
            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            while self.decoder.receive_frame(&mut frame).is_ok() {
                discarded += 1;
            }
        }
    }

    /// Drop the `cached` tier across `[start, end]`, downgrading tags.
    pub fn remove_range(slots: &[FrameSlot], start: usize, end: usize) {
        if slots.is_empty() {
            return;
        }
        let end = end.min(slots.len() - 1);
        for slot in &slots[start.min(end)..=end] {
            let mut px = slot.pixels();
            if px.cached.take().is_some() {
                px.refresh_tier();
            }
        }
    }
}

/// Reject structurally broken clones before they reach a slot: all three
/// planes of a software YUV frame must have data and positive strides.
fn frame_is_sane(frame: &ffmpeg::util::frame::video::Video) -> bool {
    if frame.width() == 0 || frame.height() == 0 || frame.planes() < 3 {
        return false;
    }
    (0..3).all(|p| !frame.data(p).is_empty() && frame.stride(p) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Tier;

    #[test]
    fn stride_table_matches_broadcast_rates() {
        assert_eq!(adaptive_stride(60.0), 12);
        assert_eq!(adaptive_stride(59.94), 12);
        assert_eq!(adaptive_stride(50.0), 10);
        assert_eq!(adaptive_stride(30.0), 6);
        assert_eq!(adaptive_stride(29.97), 6);
        assert_eq!(adaptive_stride(25.0), 5);
        assert_eq!(adaptive_stride(24.0), 5);
        assert_eq!(adaptive_stride(23.976), 4);
    }

    #[test]
    fn stride_formula_clamps() {
        assert_eq!(adaptive_stride(10.0), 3, "fps/5 floored at 3");
        assert_eq!(adaptive_stride(40.0), 8);
        assert_eq!(adaptive_stride(120.0), 15, "capped at 15");
        assert_eq!(adaptive_stride(0.0), 10, "unknown fps default");
    }

    #[test]
    fn remove_range_downgrades_only_cached() {
        let slots: Vec<FrameSlot> = (0..3)
            .map(|i| FrameSlot::new(i, i * 40, Rational(1, 1000)))
            .collect();
        let frame = Arc::new(ffmpeg::util::frame::video::Video::empty());
        for s in &slots {
            let mut px = s.pixels();
            px.cached = Some(frame.clone());
            px.refresh_tier();
        }
        {
            let mut px = slots[1].pixels();
            px.low_res = Some(frame.clone());
            px.refresh_tier();
        }

        CachedDecoder::remove_range(&slots, 0, 2);
        assert_eq!(slots[0].pixels().tier, Tier::Empty);
        assert_eq!(slots[1].pixels().tier, Tier::LowRes);
        assert_eq!(slots[2].pixels().tier, Tier::Empty);
    }

    #[test]
    fn empty_video_frame_is_not_sane() {
        let frame = ffmpeg::util::frame::video::Video::empty();
        assert!(!frame_is_sane(&frame));
    }
}
