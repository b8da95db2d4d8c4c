// crates/tapedeck-media/src/index.rs
//
// The frame index: one slot per source video frame, sorted by presentation
// time, each slot holding up to three cached pixel representations (tiers).
// Built once per file from a packet walk; the slot vector never changes
// length afterwards, so slots can be shared immutably while their contents
// are guarded per-slot.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::{Rational, Rescale};
use parking_lot::{Mutex, MutexGuard};

use crate::error::LoadError;

/// A decoded frame shared between a decoder (writer) and the renderer
/// (reader). The renderer clones the Arc under the slot mutex and keeps the
/// frame alive for as long as it is on screen, whatever the slot does next.
pub type FrameHandle = Arc<ffmpeg::util::frame::video::Video>;

// ── Tiers ─────────────────────────────────────────────────────────────────────

/// Image quality tiers, ordered by preference. A slot's `tier` tag always
/// names the best representation actually present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Empty,
    /// Sparse anchor frame from the low-res file; enough to show *something*
    /// while shuttling at 16-24x.
    Cached,
    /// Frame from the 640px companion file.
    LowRes,
    /// Source-resolution frame, possibly a hardware surface.
    FullRes,
}

// ── Slot ──────────────────────────────────────────────────────────────────────

/// The mutable interior of a slot: the three tier handles plus the derived
/// tag and pixel format. Only ever touched under the slot mutex.
pub struct SlotPixels {
    pub full_res: Option<FrameHandle>,
    pub low_res:  Option<FrameHandle>,
    pub cached:   Option<FrameHandle>,
    pub tier:     Tier,
    /// Pixel format of the best frame present. Recorded here so the
    /// renderer can branch HW-surface vs planar YUV without ever touching a
    /// codec context.
    pub format:   Pixel,
}

impl SlotPixels {
    fn empty() -> Self {
        Self {
            full_res: None,
            low_res:  None,
            cached:   None,
            tier:     Tier::Empty,
            format:   Pixel::None,
        }
    }

    /// Re-derive `tier` and `format` from whichever handles are present.
    /// Called after every store or eviction so the tag never lies.
    pub fn refresh_tier(&mut self) {
        let (tier, format) = if let Some(f) = &self.full_res {
            (Tier::FullRes, f.format())
        } else if let Some(f) = &self.low_res {
            (Tier::LowRes, f.format())
        } else if let Some(f) = &self.cached {
            (Tier::Cached, f.format())
        } else {
            (Tier::Empty, Pixel::None)
        };
        self.tier = tier;
        self.format = format;
    }

    /// Handle for a specific tier, if present.
    pub fn handle(&self, tier: Tier) -> Option<&FrameHandle> {
        match tier {
            Tier::FullRes => self.full_res.as_ref(),
            Tier::LowRes => self.low_res.as_ref(),
            Tier::Cached => self.cached.as_ref(),
            Tier::Empty => None,
        }
    }
}

/// One slot per source frame. `time_ms` is the sort key and is immutable
/// after index construction; the pixel handles live behind the mutex.
pub struct FrameSlot {
    pub pts:       i64,
    pub time_base: Rational,
    /// Presentation time in ms relative to stream start.
    pub time_ms:   i64,
    /// Set by a decoder while it is writing this slot; the selector skips
    /// slots mid-write rather than waiting on the mutex.
    pub is_decoding: AtomicBool,
    pixels: Mutex<SlotPixels>,
}

impl FrameSlot {
    pub fn new(pts: i64, time_ms: i64, time_base: Rational) -> Self {
        Self {
            pts,
            time_base,
            time_ms,
            is_decoding: AtomicBool::new(false),
            pixels: Mutex::new(SlotPixels::empty()),
        }
    }

    pub fn pixels(&self) -> MutexGuard<'_, SlotPixels> {
        self.pixels.lock()
    }
}

/// Shared, fixed-length view of the index. Built once, handed to the three
/// managers, the decoders and the render driver.
pub type SharedIndex = Arc<Vec<FrameSlot>>;

// ── Construction ──────────────────────────────────────────────────────────────

/// Walk the container's video packets and build the sorted slot vector.
///
/// Packets arrive in decode order; with B-frames that is not presentation
/// order, so the vector is sorted by `time_ms` after the walk. Packets
/// without a PTS are skipped (they would sort as negative time). HEVC input
/// is refused; see [`LoadError::UnsupportedCodec`].
pub fn build_frame_index(path: &Path) -> Result<Vec<FrameSlot>, LoadError> {
    let mut ictx = input(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let (stream_index, time_base, start_time) = {
        let stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| LoadError::NoVideo(path.to_path_buf()))?;

        let codec_id = stream.parameters().id();
        if codec_id == ffmpeg::codec::Id::HEVC {
            return Err(LoadError::UnsupportedCodec {
                path:  path.to_path_buf(),
                codec: format!("{codec_id:?}"),
            });
        }

        let start = stream.start_time();
        (stream.index(), stream.time_base(), start)
    };

    let micros = Rational(1, 1_000_000);
    let start_us = if start_time == i64::MIN {
        0
    } else {
        start_time.rescale(time_base, micros)
    };

    let mut slots = Vec::new();
    for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != stream_index {
            continue;
        }
        let Some(pts) = packet.pts() else { continue };

        // Millisecond timing through a microsecond intermediate: rescaling
        // straight to 1/1000 loses up to half a frame at 1/90000 timebases.
        let rel_us = pts.rescale(time_base, micros) - start_us;
        let time_ms = (rel_us + 500) / 1000;

        slots.push(FrameSlot::new(pts, time_ms, time_base));
    }

    sort_by_time_ms(&mut slots);

    let inconsistent = count_order_violations(&slots);
    if inconsistent > 0 {
        eprintln!("[index] {inconsistent} timestamp inconsistencies remain after sorting");
    }
    eprintln!("[index] {} frames ← {}", slots.len(), path.display());

    Ok(slots)
}

/// Sort slots into presentation order. Decode-order input (B-frames) comes
/// out display-ordered; the sort is stable so equal timestamps keep their
/// packet order.
pub fn sort_by_time_ms(slots: &mut [FrameSlot]) {
    slots.sort_by_key(|s| s.time_ms);
}

fn count_order_violations(slots: &[FrameSlot]) -> usize {
    slots.windows(2).filter(|w| w[1].time_ms < w[0].time_ms).count()
}

// ── Lookup ────────────────────────────────────────────────────────────────────

/// Map a time in ms to the closest slot index.
///
/// Lower-bound on the sorted `time_ms` sequence, then the nearer of the two
/// bracketing slots wins. Used every render tick and by the cached decoder
/// to place sparse anchors.
pub fn find_slot_by_time_ms(slots: &[FrameSlot], target_ms: i64) -> usize {
    if slots.is_empty() {
        return 0;
    }
    let at_or_after = slots.partition_point(|s| s.time_ms < target_ms);
    if at_or_after == 0 {
        return 0;
    }
    if at_or_after >= slots.len() {
        return slots.len() - 1;
    }
    let before = at_or_after - 1;
    let d_before = (target_ms - slots[before].time_ms).abs();
    let d_after = (slots[at_or_after].time_ms - target_ms).abs();
    if d_before <= d_after {
        before
    } else {
        at_or_after
    }
}
