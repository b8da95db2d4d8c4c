// crates/tapedeck-core/src/commands.rs
//
// The unified command surface. Keyboard, remote surface and menu all reduce
// to this enum; tapedeck-player dispatches it in one place so every producer
// has identical semantics.

use serde::{Deserialize, Serialize};

pub const MARKER_COUNT: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Space: pause/unpause, or reset to 1.0x forward first when shuttling
    /// above 1.1x.
    TogglePause,
    /// Plain right arrow: 1.0x forward regardless of current state.
    PlayForward,
    ToggleReverse,
    /// Up/down arrows walk the fixed speed ladder.
    SpeedUp,
    SpeedDown,
    JogForward,
    JogBackward,
    JogRelease,
    /// "HHMMSSFF" (or shorter, left-padded) timecode entry.
    SeekTimecode(String),
    SeekSeconds(f64),
    VolumeUp,
    VolumeDown,
    SetMarker(usize),
    JumpToMarker(usize),
    SwitchAudioDevice(String),
    Quit,
}

// ── Speed ladder ──────────────────────────────────────────────────────────────

/// The fixed shuttle ladder. Up/down commands move one rung; a
/// reset-to-normal lands back on 1.0x.
pub const SPEED_STEPS: [f64; 5] = [0.5, 1.0, 3.0, 10.0, 24.0];

/// Position on [`SPEED_STEPS`]; starts at 1.0x.
#[derive(Clone, Copy, Debug)]
pub struct SpeedLadder {
    index: usize,
}

impl SpeedLadder {
    pub fn new() -> Self {
        Self { index: 1 }
    }

    pub fn current(&self) -> f64 {
        SPEED_STEPS[self.index]
    }

    pub fn step_up(&mut self) -> f64 {
        if self.index < SPEED_STEPS.len() - 1 {
            self.index += 1;
        }
        self.current()
    }

    pub fn step_down(&mut self) -> f64 {
        if self.index > 0 {
            self.index -= 1;
        }
        self.current()
    }

    /// Snap back to the 1.0x rung (used by reset-to-normal).
    pub fn reset(&mut self) {
        self.index = 1;
    }
}

impl Default for SpeedLadder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Memory markers ────────────────────────────────────────────────────────────

/// Five deck-style memory positions. Negative = unset. Serialized into the
/// player settings so marks survive a restart.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MemoryMarkers {
    slots: [f64; MARKER_COUNT],
}

impl MemoryMarkers {
    pub fn new() -> Self {
        Self { slots: [-1.0; MARKER_COUNT] }
    }

    pub fn set(&mut self, index: usize, time: f64) {
        if index < MARKER_COUNT {
            self.slots[index] = time.max(0.0);
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        let t = *self.slots.get(index)?;
        (t >= 0.0).then_some(t)
    }

    pub fn clear(&mut self) {
        self.slots = [-1.0; MARKER_COUNT];
    }
}

impl Default for MemoryMarkers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_starts_at_unity() {
        assert_eq!(SpeedLadder::new().current(), 1.0);
    }

    #[test]
    fn ladder_walks_and_clamps() {
        let mut l = SpeedLadder::new();
        assert_eq!(l.step_up(), 3.0);
        assert_eq!(l.step_up(), 10.0);
        assert_eq!(l.step_up(), 24.0);
        assert_eq!(l.step_up(), 24.0, "clamped at the top rung");
        l.reset();
        assert_eq!(l.current(), 1.0);
        assert_eq!(l.step_down(), 0.5);
        assert_eq!(l.step_down(), 0.5, "clamped at the bottom rung");
    }

    #[test]
    fn markers_set_get_and_ignore_out_of_range() {
        let mut m = MemoryMarkers::new();
        assert_eq!(m.get(0), None);
        m.set(0, 12.5);
        m.set(4, 0.0);
        m.set(9, 99.0); // out of range, dropped
        assert_eq!(m.get(0), Some(12.5));
        assert_eq!(m.get(4), Some(0.0));
        assert_eq!(m.get(9), None);
        m.clear();
        assert_eq!(m.get(0), None);
    }
}
