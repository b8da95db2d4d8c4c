// crates/tapedeck-player/src/sink.rs
//
// The seam to the display layer. The GUI shell (window, textures, OSD) is a
// separate surface; the engine only promises to hand it a selected frame
// per tick with its tier and pixel format. A renderer must branch on the
// recorded format; a full-res frame may be an opaque hardware surface.

use tapedeck_core::timecode::format_timecode;
use tapedeck_media::index::Tier;
use tapedeck_media::select::SelectedFrame;

pub trait VideoSink {
    fn present(&mut self, frame: &SelectedFrame, time_s: f64);

    /// The playhead slot had nothing displayable this tick.
    fn starved(&mut self, _time_s: f64) {}
}

/// Headless sink: logs tier transitions so scrub behavior is observable
/// without a window.
pub struct ConsoleSink {
    fps:       f64,
    duration:  f64,
    last_tier: Option<Tier>,
}

impl ConsoleSink {
    pub fn new(fps: f64, duration: f64) -> Self {
        Self {
            fps,
            duration,
            last_tier: None,
        }
    }
}

impl VideoSink for ConsoleSink {
    fn present(&mut self, frame: &SelectedFrame, time_s: f64) {
        if self.last_tier != Some(frame.tier) {
            eprintln!(
                "[display] {} {:?} {}x{} {:?}",
                format_timecode(time_s, self.fps, self.duration),
                frame.tier,
                frame.frame.width(),
                frame.frame.height(),
                frame.format,
            );
            self.last_tier = Some(frame.tier);
        }
    }

    fn starved(&mut self, time_s: f64) {
        if self.last_tier.take().is_some() {
            eprintln!(
                "[display] {} no frame available",
                format_timecode(time_s, self.fps, self.duration)
            );
        }
    }
}
