// crates/tapedeck-media/src/decode/full_res.rs
//
// Source-resolution decoder for the narrow window around the playhead at
// ~1x forward. Tries VideoToolbox hardware decode on macOS first; falls
// back to a single-threaded software context. Frames stored by this decoder
// may be hardware surfaces; the slot records the actual pixel format so
// the renderer branches on that, never on the tier.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::format::input;
use ffmpeg::Rational;

use super::{
    frame_has_decode_errors, frame_pts, ms_to_stream_ts, seek_backward, stream_ts_to_ms,
    SEEK_SLACK_MS,
};
use crate::index::FrameSlot;

pub struct FullResDecoder {
    path:           PathBuf,
    ictx:           Input,
    stream_index:   usize,
    decoder:        ffmpeg::decoder::Video,
    time_base:      Rational,
    start_time:     i64,
    hw_accelerated: bool,
    stop:           Arc<AtomicBool>,
}

// SAFETY: the decoder is moved into its manager thread at spawn and only
// ever used from there; the raw pointers inside the ffmpeg contexts are
// never shared across threads.
unsafe impl Send for FullResDecoder {}

impl FullResDecoder {
    pub fn open(path: &Path) -> Result<Self, ffmpeg::Error> {
        let ictx = input(path)?;
        let (stream_index, time_base, start_time) = {
            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or(ffmpeg::Error::StreamNotFound)?;
            let start = stream.start_time();
            (
                stream.index(),
                stream.time_base(),
                if start == i64::MIN { 0 } else { start },
            )
        };

        let (decoder, hw_accelerated) = Self::open_decoder(path, stream_index)?;
        eprintln!(
            "[fullres] initialized ({}) ← {}",
            if hw_accelerated { "videotoolbox" } else { "software" },
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            stream_index,
            decoder,
            time_base,
            start_time,
            hw_accelerated,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn hw_accelerated(&self) -> bool {
        self.hw_accelerated
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Hardware path first, software fallback. Returns the opened decoder
    /// plus whether the hardware path won.
    fn open_decoder(
        path: &Path,
        stream_index: usize,
    ) -> Result<(ffmpeg::decoder::Video, bool), ffmpeg::Error> {
        #[cfg(target_os = "macos")]
        {
            let ictx = input(path)?;
            if let Some(stream) = ictx.stream(stream_index) {
                if let Some(decoder) = hw::try_videotoolbox(&stream) {
                    return Ok((decoder, true));
                }
            }
            eprintln!("[fullres] videotoolbox unavailable, using software decode");
        }

        // Software fallback decodes single-threaded; the counter store
        // needs frames strictly in presentation order.
        let ictx = input(path)?;
        let stream = ictx
            .stream(stream_index)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let mut ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        unsafe {
            (*ctx.as_mut_ptr()).thread_count = 1;
        }
        Ok((ctx.decoder().video()?, false))
    }

    /// Decode slots `[start, end]` into the `full_res` tier.
    ///
    /// Seeks 1 s before the window start (clamped to 0) so the GOP containing
    /// the first frame is fully decodable, then assigns qualifying frames to
    /// successive output slots.
    pub fn decode_range(&mut self, slots: &[FrameSlot], start: usize, end: usize) -> bool {
        if slots.is_empty() {
            return true;
        }
        let start = start.min(slots.len() - 1);
        let end = end.min(slots.len() - 1);
        if start > end {
            return false;
        }

        let window_start_ms = slots[start].time_ms;
        let mut seek_ok = false;
        if window_start_ms >= 0 {
            let seek_ms = (window_start_ms - 1000).max(0);
            let ts = ms_to_stream_ts(seek_ms, self.time_base) + self.start_time;
            seek_ok = seek_backward(&mut self.ictx, self.stream_index, ts, "fullres");
            if seek_ok {
                self.decoder.flush();
            }
        }

        let mut next_slot = start;
        let mut stored = 0usize;
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

                let frame_ms = frame_pts(&decoded)
                    .map(|pts| stream_ts_to_ms(pts - self.start_time, self.time_base))
                    .unwrap_or(-1);

                // With a good seek, burn through pre-roll frames before the
                // window; with a failed seek, trust the counter alone.
                if seek_ok && frame_ms < window_start_ms - SEEK_SLACK_MS {
                    continue;
                }

                if next_slot <= end {
                    let slot = &slots[next_slot];
                    slot.is_decoding.store(true, Ordering::Release);
                    {
                        let mut px = slot.pixels();
                        px.full_res = Some(Arc::new(decoded.clone()));
                        px.refresh_tier();
                    }
                    slot.is_decoding.store(false, Ordering::Release);
                    stored += 1;
                    next_slot += 1;
                }
                if next_slot > end {
                    eprintln!("[fullres] decoded {stored} frames for [{start}-{end}]");
                    return true;
                }
            }
        }
        eprintln!("[fullres] decoded {stored} frames for [{start}-{end}] (stream end)");
        true
    }

    /// Drop `full_res` from every slot in `[start, end]` that lies outside
    /// `[window_start, window_end]`, downgrading tags.
    pub fn remove_outside_window(
        slots: &[FrameSlot],
        start: usize,
        end: usize,
        window_start: usize,
        window_end: usize,
    ) {
        if slots.is_empty() {
            return;
        }
        let end = end.min(slots.len() - 1);
        for (i, slot) in slots.iter().enumerate().take(end + 1).skip(start.min(end)) {
            if i >= window_start && i <= window_end {
                continue;
            }
            let mut px = slot.pixels();
            if px.full_res.take().is_some() {
                px.refresh_tier();
            }
        }
    }

    /// Drop `full_res` everywhere. Used on speed-crossing events, when the
    /// 1x-forward window stops being maintained at all.
    pub fn clear_all(slots: &[FrameSlot]) {
        for slot in slots {
            let mut px = slot.pixels();
            if px.full_res.take().is_some() {
                px.refresh_tier();
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ── VideoToolbox setup ────────────────────────────────────────────────────────

#[cfg(target_os = "macos")]
mod hw {
    use ffmpeg_the_third as ffmpeg;
    use ffmpeg::ffi;

    /// `get_format` callback: accept the VideoToolbox surface format only if
    /// the decoder actually offers it for this stream.
    unsafe extern "C" fn get_videotoolbox_format(
        _ctx: *mut ffi::AVCodecContext,
        mut formats: *const ffi::AVPixelFormat,
    ) -> ffi::AVPixelFormat {
        while *formats != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *formats == ffi::AVPixelFormat::AV_PIX_FMT_VIDEOTOOLBOX {
                return *formats;
            }
            formats = formats.add(1);
        }
        ffi::AVPixelFormat::AV_PIX_FMT_NONE
    }

    /// Build a decoder with a VideoToolbox device context attached, or None
    /// if any step refuses (codec has no HW config, device creation fails,
    /// open fails). The caller falls back to software.
    pub fn try_videotoolbox(stream: &ffmpeg::Stream<'_>) -> Option<ffmpeg::decoder::Video> {
        unsafe {
            let codec_id = (*stream.parameters().as_ptr()).codec_id;
            let codec = ffi::avcodec_find_decoder(codec_id);
            if codec.is_null() {
                return None;
            }

            let mut supported = false;
            let mut i = 0;
            loop {
                let config = ffi::avcodec_get_hw_config(codec, i);
                if config.is_null() {
                    break;
                }
                if ((*config).methods & ffi::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
                    && (*config).device_type
                        == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX
                {
                    supported = true;
                    break;
                }
                i += 1;
            }
            if !supported {
                return None;
            }

            let mut device: *mut ffi::AVBufferRef = std::ptr::null_mut();
            if ffi::av_hwdevice_ctx_create(
                &mut device,
                ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            ) < 0
            {
                return None;
            }

            let mut ctx =
                match ffmpeg::codec::context::Context::from_parameters(stream.parameters()) {
                    Ok(c) => c,
                    Err(_) => {
                        ffi::av_buffer_unref(&mut device);
                        return None;
                    }
                };
            let raw = ctx.as_mut_ptr();
            (*raw).hw_device_ctx = ffi::av_buffer_ref(device);
            (*raw).get_format = Some(get_videotoolbox_format);
            // The codec context holds its own reference now.
            ffi::av_buffer_unref(&mut device);

            ctx.decoder().video().ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Tier;
    use ffmpeg::Rational;

    fn slots_with_full_res(n: usize) -> Vec<FrameSlot> {
        let frame = Arc::new(ffmpeg::util::frame::video::Video::empty());
        let slots: Vec<FrameSlot> = (0..n)
            .map(|i| FrameSlot::new(i as i64, i as i64 * 40, Rational(1, 1000)))
            .collect();
        for s in &slots {
            let mut px = s.pixels();
            px.full_res = Some(frame.clone());
            px.refresh_tier();
        }
        slots
    }

    #[test]
    fn eviction_spares_the_window() {
        let slots = slots_with_full_res(10);
        FullResDecoder::remove_outside_window(&slots, 0, 9, 3, 6);
        for (i, s) in slots.iter().enumerate() {
            let expected = if (3..=6).contains(&i) { Tier::FullRes } else { Tier::Empty };
            assert_eq!(s.pixels().tier, expected, "slot {i}");
        }
    }

    #[test]
    fn eviction_downgrades_to_low_res_when_present() {
        let slots = slots_with_full_res(3);
        let frame = Arc::new(ffmpeg::util::frame::video::Video::empty());
        {
            let mut px = slots[0].pixels();
            px.low_res = Some(frame);
            px.refresh_tier();
        }
        // Window far away: everything evicts.
        FullResDecoder::remove_outside_window(&slots, 0, 2, 100, 200);
        assert_eq!(slots[0].pixels().tier, Tier::LowRes);
        assert_eq!(slots[1].pixels().tier, Tier::Empty);
    }

    #[test]
    fn clear_all_sweeps_every_slot() {
        let slots = slots_with_full_res(5);
        FullResDecoder::clear_all(&slots);
        assert!(slots.iter().all(|s| s.pixels().tier == Tier::Empty));
    }
}
