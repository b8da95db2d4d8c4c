// crates/tapedeck-media/src/decode/mod.rs
//
// The three decoder tiers and the ffmpeg plumbing they share. Each decoder
// is driven synchronously from its manager thread; cancellation is a stop
// flag checked per packet and per frame.

pub mod cached;
pub mod full_res;
pub mod low_res;

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use ffmpeg::{Rational, Rescale};

/// Slack allowed when matching decoded frames against a seek target: a
/// backward seek lands on a keyframe before the target, and timestamps on
/// the way up can sit just under it after rescaling.
pub(crate) const SEEK_SLACK_MS: i64 = 50;

/// Open `path` and build a video decoder for its best video stream.
///
/// Two format contexts are opened: one to walk packets, one purely to read
/// the codec parameters (the parameters borrow from their context, which
/// would otherwise conflict with seeking the packet context).
pub(crate) fn open_video_decoder(
    path: &Path,
) -> Result<(Input, usize, ffmpeg::decoder::Video), ffmpeg::Error> {
    let ictx = input(path)?;
    let stream_index = ictx
        .streams()
        .best(Type::Video)
        .ok_or(ffmpeg::Error::StreamNotFound)?
        .index();

    let ictx2 = input(path)?;
    let stream = ictx2
        .stream(stream_index)
        .ok_or(ffmpeg::Error::StreamNotFound)?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    let decoder = ctx.decoder().video()?;

    Ok((ictx, stream_index, decoder))
}

/// Seek the demuxer to the keyframe at or before `target_ts` (stream
/// timebase units) on one stream.
///
/// Soft-fails: a failed seek is logged and the caller decodes from wherever
/// the demuxer is, trusting its PTS filter to skip pre-roll.
pub(crate) fn seek_backward(ictx: &mut Input, stream_index: usize, target_ts: i64, tag: &str) -> bool {
    let ret = unsafe {
        ffmpeg::ffi::av_seek_frame(
            ictx.as_mut_ptr(),
            stream_index as i32,
            target_ts,
            ffmpeg::ffi::AVSEEK_FLAG_BACKWARD as i32,
        )
    };
    if ret < 0 {
        eprintln!("[{tag}] seek to ts {target_ts} failed, decoding from current position");
        false
    } else {
        true
    }
}

/// Stream-timebase timestamp for a millisecond position.
pub(crate) fn ms_to_stream_ts(time_ms: i64, time_base: Rational) -> i64 {
    time_ms.rescale(Rational(1, 1000), time_base)
}

/// Millisecond position for a raw stream timestamp.
pub(crate) fn stream_ts_to_ms(ts: i64, time_base: Rational) -> i64 {
    ts.rescale(time_base, Rational(1, 1000))
}

/// Best-effort presentation timestamp of a decoded frame.
pub(crate) fn frame_pts(frame: &ffmpeg::util::frame::video::Video) -> Option<i64> {
    frame.timestamp().or_else(|| frame.pts())
}

/// Whether the decoder flagged errors on this frame (macroblock damage,
/// truncated slices). Damaged frames are skipped rather than cached; a
/// stale good frame beats a fresh broken one.
pub(crate) fn frame_has_decode_errors(frame: &ffmpeg::util::frame::video::Video) -> bool {
    unsafe { (*frame.as_ptr()).decode_error_flags != 0 }
}
