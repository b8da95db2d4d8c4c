// crates/tapedeck-core/src/state.rs
//
// PlaybackState: every runtime flag and rate the player threads share,
// collected into one struct of atomics passed around by Arc. The audio
// callback, the three decoder managers, the speed controller and the render
// driver all read/write through this; no mutex on the hot path.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Fixed jog rate while shift+arrow (or the remote jog wheel) is held.
pub const JOG_SPEED: f64 = 0.25;

/// Low-res coverage is abandoned at or above this rate; only cached anchors
/// are cheap enough to keep up. Temporarily raised to
/// [`RESET_SPEED_THRESHOLD`] while a reset-to-normal is in flight so the
/// low-res tier isn't evicted during the ramp back down from 24x.
pub const BASE_SPEED_THRESHOLD: f64 = 16.0;
pub const RESET_SPEED_THRESHOLD: f64 = 24.0;

// ── Atomic f64 ────────────────────────────────────────────────────────────────

/// An `f64` stored as its bit pattern in an `AtomicU64`.
///
/// Rust has no `AtomicF64`; every float the realtime audio callback touches
/// (rate, volume, clock) goes through this instead of a lock.
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

// ── PlaybackState ─────────────────────────────────────────────────────────────

/// Shared playback state. One instance per loaded file, `Arc`-shared into
/// every component.
///
/// `current_time` is the authoritative playhead: the audio callback publishes
/// it from its fractional sample index after every buffer, and video derives
/// from it. Everything else is either user intent (`target_rate`, direction,
/// jog flags) or controller output (`playback_rate`, `volume`).
pub struct PlaybackState {
    /// Authoritative playhead in seconds, written by the audio callback.
    pub current_time:   AtomicF64,
    /// Actual rate the audio callback advances at. Written by the speed
    /// controller only.
    pub playback_rate:  AtomicF64,
    /// Rate the user asked for. Written by command dispatch.
    pub target_rate:    AtomicF64,
    pub volume:         AtomicF64,
    pub is_reverse:     AtomicBool,
    pub jog_forward:    AtomicBool,
    pub jog_backward:   AtomicBool,
    /// Set by seeks; the render driver notifies managers and forces a frame
    /// re-selection, then clears it.
    pub seek_requested: AtomicBool,
    pub should_exit:    AtomicBool,

    pub total_duration: AtomicF64,
    pub fps:            AtomicF64,
    /// Slot index derived from `current_time` each render tick.
    pub current_frame:  AtomicUsize,

    /// Low-res manager speed gate, see [`BASE_SPEED_THRESHOLD`].
    pub speed_threshold:       AtomicF64,
    /// True between reset_to_normal_speed() and the rate settling near 1.0;
    /// the speed controller restores the threshold and clears this.
    pub speed_reset_requested: AtomicBool,
    /// False until the first unpause. The first play always gets the
    /// overshoot curve; later unpauses roll for it.
    pub first_play_done:       AtomicBool,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            current_time:   AtomicF64::new(0.0),
            playback_rate:  AtomicF64::new(0.0),
            target_rate:    AtomicF64::new(0.0),
            volume:         AtomicF64::new(1.0),
            is_reverse:     AtomicBool::new(false),
            jog_forward:    AtomicBool::new(false),
            jog_backward:   AtomicBool::new(false),
            seek_requested: AtomicBool::new(false),
            should_exit:    AtomicBool::new(false),
            total_duration: AtomicF64::new(0.0),
            fps:            AtomicF64::new(0.0),
            current_frame:  AtomicUsize::new(0),
            speed_threshold:       AtomicF64::new(BASE_SPEED_THRESHOLD),
            speed_reset_requested: AtomicBool::new(false),
            first_play_done:       AtomicBool::new(false),
        }
    }

    /// Flip target between paused (0.0) and normal play (1.0).
    pub fn toggle_pause(&self) {
        if self.target_rate.load() == 0.0 {
            self.target_rate.store(1.0);
        } else {
            self.target_rate.store(0.0);
        }
    }

    /// Come back from a high rate to 1.0x forward. Raises the low-res speed
    /// gate to 24 for the duration of the ramp so coverage survives the way
    /// down; the speed controller restores it once the rate settles near 1.
    pub fn reset_to_normal_speed(&self) {
        self.speed_reset_requested.store(true, Ordering::Release);
        self.speed_threshold.store(RESET_SPEED_THRESHOLD);
        self.target_rate.store(1.0);
        self.is_reverse.store(false, Ordering::Release);
    }

    pub fn start_jog_forward(&self) {
        self.jog_forward.store(true, Ordering::Release);
        self.jog_backward.store(false, Ordering::Release);
        self.target_rate.store(JOG_SPEED);
        self.is_reverse.store(false, Ordering::Release);
    }

    pub fn start_jog_backward(&self) {
        self.jog_backward.store(true, Ordering::Release);
        self.jog_forward.store(false, Ordering::Release);
        self.target_rate.store(JOG_SPEED);
        self.is_reverse.store(true, Ordering::Release);
    }

    /// Jog release is a hard stop: rate and volume drop immediately rather
    /// than interpolating, matching a finger coming off the wheel.
    pub fn stop_jog(&self) {
        self.jog_forward.store(false, Ordering::Release);
        self.jog_backward.store(false, Ordering::Release);
        self.target_rate.store(0.0);
        self.playback_rate.store(0.0);
        self.volume.store(0.0);
    }

    pub fn is_jogging(&self) -> bool {
        self.jog_forward.load(Ordering::Acquire) || self.jog_backward.load(Ordering::Acquire)
    }

    pub fn increase_volume(&self) {
        self.volume.store((self.volume.load() + 0.1).min(1.0));
    }

    pub fn decrease_volume(&self) {
        self.volume.store((self.volume.load() - 0.1).max(0.0));
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f64_round_trips() {
        let a = AtomicF64::new(1.5);
        assert_eq!(a.load(), 1.5);
        a.store(-23.981);
        assert_eq!(a.load(), -23.981);
    }

    #[test]
    fn toggle_pause_flips_target() {
        let s = PlaybackState::new();
        s.toggle_pause();
        assert_eq!(s.target_rate.load(), 1.0);
        s.toggle_pause();
        assert_eq!(s.target_rate.load(), 0.0);
    }

    #[test]
    fn reset_to_normal_raises_threshold() {
        let s = PlaybackState::new();
        s.target_rate.store(24.0);
        s.reset_to_normal_speed();
        assert_eq!(s.target_rate.load(), 1.0);
        assert!(!s.is_reverse.load(Ordering::Acquire));
        assert_eq!(s.speed_threshold.load(), RESET_SPEED_THRESHOLD);
        assert!(s.speed_reset_requested.load(Ordering::Acquire));
    }

    #[test]
    fn jog_release_is_a_hard_stop() {
        let s = PlaybackState::new();
        s.start_jog_backward();
        assert!(s.is_jogging());
        assert!(s.is_reverse.load(Ordering::Acquire));
        assert_eq!(s.target_rate.load(), JOG_SPEED);
        s.stop_jog();
        assert!(!s.is_jogging());
        assert_eq!(s.playback_rate.load(), 0.0);
        assert_eq!(s.volume.load(), 0.0);
    }

    #[test]
    fn volume_clamps_to_unit_range() {
        let s = PlaybackState::new();
        s.increase_volume();
        assert_eq!(s.volume.load(), 1.0);
        for _ in 0..12 {
            s.decrease_volume();
        }
        assert_eq!(s.volume.load(), 0.0);
    }
}
