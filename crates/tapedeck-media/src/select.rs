// crates/tapedeck-media/src/select.rs
//
// Frame selection for the render tick: which tier of the current slot goes
// on screen. At normal speed the selector prefers the best tier present but
// holds the previously displayed tier across single-tick gaps so the image
// doesn't flicker between tiers while decoders fill in around the playhead.
// At shuttle speed it takes low-res or cached, searching nearby slots in
// the direction of travel when the current slot is bare.

use ffmpeg_the_third::format::Pixel;

use crate::index::{FrameHandle, FrameSlot, Tier};

/// Consecutive "wants to change" ticks required before switching tiers at
/// normal speed. Force-update (after seeks) bypasses it.
const TRANSITION_THRESHOLD: u32 = 1;

/// How far from the current slot the shuttle fallback searches.
const SEARCH_RANGE: usize = 15;

/// Above this |rate| the selector switches to shuttle behavior.
const SHUTTLE_RATE: f64 = 1.1;

pub struct SelectedFrame {
    pub frame:  FrameHandle,
    pub tier:   Tier,
    pub format: Pixel,
}

pub struct FrameSelector {
    last_tier:          Tier,
    transition_counter: u32,
}

impl FrameSelector {
    pub fn new() -> Self {
        Self {
            last_tier:          Tier::Empty,
            transition_counter: 0,
        }
    }

    /// Forget the displayed-tier history (file reload).
    pub fn reset(&mut self) {
        self.last_tier = Tier::Empty;
        self.transition_counter = 0;
    }

    /// Pick a frame for `index`. `rate` is signed: negative while playing in
    /// reverse, which flips the shuttle search direction. Returns None when
    /// the slot (and, at shuttle speed, its neighborhood) has nothing
    /// displayable.
    pub fn select(
        &mut self,
        slots: &[FrameSlot],
        index: usize,
        rate: f64,
        force_update: bool,
    ) -> Option<SelectedFrame> {
        let slot = slots.get(index)?;

        let result = if rate.abs() <= SHUTTLE_RATE {
            self.select_normal_speed(slot, force_update)
        } else {
            self.select_shuttle(slots, index, rate)
        };

        match &result {
            Some(sel) => self.last_tier = sel.tier,
            None => self.transition_counter = 0,
        }
        result
    }

    fn select_normal_speed(
        &mut self,
        slot: &FrameSlot,
        force_update: bool,
    ) -> Option<SelectedFrame> {
        if slot.is_decoding.load(std::sync::atomic::Ordering::Acquire) {
            return None;
        }
        let px = slot.pixels();

        let mut held: Option<SelectedFrame> = None;
        let mut wants_transition = false;

        if force_update {
            wants_transition = true;
            self.transition_counter = TRANSITION_THRESHOLD;
        } else {
            match self.last_tier {
                Tier::FullRes => match px.handle(Tier::FullRes) {
                    Some(f) => held = Some(selected(f, Tier::FullRes)),
                    None => wants_transition = true,
                },
                Tier::LowRes => match px.handle(Tier::LowRes) {
                    Some(f) => {
                        held = Some(selected(f, Tier::LowRes));
                        // A better tier appeared; start the transition.
                        if px.full_res.is_some() {
                            wants_transition = true;
                        }
                    }
                    None => wants_transition = true,
                },
                Tier::Cached => {
                    if px.full_res.is_some() || px.low_res.is_some() {
                        // Anchors upgrade without hysteresis.
                        wants_transition = true;
                        self.transition_counter = TRANSITION_THRESHOLD;
                    } else if let Some(f) = px.handle(Tier::Cached) {
                        held = Some(selected(f, Tier::Cached));
                    } else {
                        wants_transition = true;
                    }
                }
                Tier::Empty => wants_transition = true,
            }
        }

        if wants_transition {
            self.transition_counter += 1;
            if self.transition_counter >= TRANSITION_THRESHOLD {
                self.transition_counter = 0;
                return best_of(&px).or(held);
            }
        } else {
            self.transition_counter = 0;
        }
        held
    }

    fn select_shuttle(
        &mut self,
        slots: &[FrameSlot],
        index: usize,
        rate: f64,
    ) -> Option<SelectedFrame> {
        {
            let slot = &slots[index];
            if !slot.is_decoding.load(std::sync::atomic::Ordering::Acquire) {
                let px = slot.pixels();
                if let Some(f) = px.handle(Tier::LowRes) {
                    return Some(selected(f, Tier::LowRes));
                }
                if self.last_tier == Tier::Cached {
                    if let Some(f) = px.handle(Tier::Cached) {
                        return Some(selected(f, Tier::Cached));
                    }
                }
            }
        }

        // Nothing at the playhead slot: scan ahead in the direction of
        // travel for anything displayable.
        let forward = rate >= 0.0;
        for step in 1..=SEARCH_RANGE {
            let candidate = if forward {
                index.checked_add(step).filter(|&i| i < slots.len())
            } else {
                index.checked_sub(step)
            };
            let Some(i) = candidate else { break };
            let slot = &slots[i];
            if slot.is_decoding.load(std::sync::atomic::Ordering::Acquire) {
                continue;
            }
            let px = slot.pixels();
            if let Some(f) = px.handle(Tier::LowRes) {
                return Some(selected(f, Tier::LowRes));
            }
            if let Some(f) = px.handle(Tier::Cached) {
                return Some(selected(f, Tier::Cached));
            }
        }
        None
    }
}

impl Default for FrameSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn selected(frame: &FrameHandle, tier: Tier) -> SelectedFrame {
    SelectedFrame {
        frame:  frame.clone(),
        tier,
        format: frame.format(),
    }
}

fn best_of(px: &crate::index::SlotPixels) -> Option<SelectedFrame> {
    for tier in [Tier::FullRes, Tier::LowRes, Tier::Cached] {
        if let Some(f) = px.handle(tier) {
            return Some(selected(f, tier));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_the_third as ffmpeg;
    use ffmpeg::Rational;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn empty_slots(n: usize) -> Vec<FrameSlot> {
        (0..n)
            .map(|i| FrameSlot::new(i as i64, i as i64 * 40, Rational(1, 1000)))
            .collect()
    }

    fn put(slots: &[FrameSlot], index: usize, tier: Tier) {
        let frame = Arc::new(ffmpeg::util::frame::video::Video::empty());
        let mut px = slots[index].pixels();
        match tier {
            Tier::FullRes => px.full_res = Some(frame),
            Tier::LowRes => px.low_res = Some(frame),
            Tier::Cached => px.cached = Some(frame),
            Tier::Empty => {}
        }
        px.refresh_tier();
    }

    #[test]
    fn picks_best_tier_on_first_call() {
        let slots = empty_slots(3);
        put(&slots, 1, Tier::Cached);
        put(&slots, 1, Tier::FullRes);
        let mut sel = FrameSelector::new();
        let got = sel.select(&slots, 1, 1.0, false).unwrap();
        assert_eq!(got.tier, Tier::FullRes);
    }

    #[test]
    fn holds_displayed_tier_while_present() {
        let slots = empty_slots(2);
        put(&slots, 0, Tier::LowRes);
        let mut sel = FrameSelector::new();
        assert_eq!(sel.select(&slots, 0, 1.0, false).unwrap().tier, Tier::LowRes);
        // Next slot has low-res too, so it keeps showing.
        put(&slots, 1, Tier::LowRes);
        assert_eq!(sel.select(&slots, 1, 1.0, false).unwrap().tier, Tier::LowRes);
    }

    #[test]
    fn upgrades_when_better_tier_appears() {
        let slots = empty_slots(1);
        put(&slots, 0, Tier::LowRes);
        let mut sel = FrameSelector::new();
        assert_eq!(sel.select(&slots, 0, 1.0, false).unwrap().tier, Tier::LowRes);
        put(&slots, 0, Tier::FullRes);
        assert_eq!(sel.select(&slots, 0, 1.0, false).unwrap().tier, Tier::FullRes);
    }

    #[test]
    fn cached_upgrades_immediately() {
        let slots = empty_slots(1);
        put(&slots, 0, Tier::Cached);
        let mut sel = FrameSelector::new();
        assert_eq!(sel.select(&slots, 0, 1.0, false).unwrap().tier, Tier::Cached);
        put(&slots, 0, Tier::LowRes);
        assert_eq!(sel.select(&slots, 0, 1.0, false).unwrap().tier, Tier::LowRes);
    }

    #[test]
    fn force_update_takes_best_available() {
        let slots = empty_slots(1);
        put(&slots, 0, Tier::Cached);
        put(&slots, 0, Tier::FullRes);
        let mut sel = FrameSelector::new();
        sel.last_tier = Tier::Cached;
        let got = sel.select(&slots, 0, 1.0, true).unwrap();
        assert_eq!(got.tier, Tier::FullRes);
    }

    #[test]
    fn decoding_slot_yields_nothing_at_normal_speed() {
        let slots = empty_slots(1);
        put(&slots, 0, Tier::LowRes);
        slots[0].is_decoding.store(true, Ordering::Release);
        let mut sel = FrameSelector::new();
        assert!(sel.select(&slots, 0, 1.0, false).is_none());
    }

    #[test]
    fn shuttle_prefers_low_res_over_cached() {
        let slots = empty_slots(1);
        put(&slots, 0, Tier::Cached);
        put(&slots, 0, Tier::LowRes);
        put(&slots, 0, Tier::FullRes);
        let mut sel = FrameSelector::new();
        let got = sel.select(&slots, 0, 5.0, false).unwrap();
        assert_eq!(got.tier, Tier::LowRes);
    }

    #[test]
    fn shuttle_searches_forward() {
        let slots = empty_slots(20);
        put(&slots, 7, Tier::Cached);
        let mut sel = FrameSelector::new();
        let got = sel.select(&slots, 0, 10.0, false).unwrap();
        assert_eq!(got.tier, Tier::Cached);
    }

    #[test]
    fn shuttle_searches_backward_in_reverse() {
        let slots = empty_slots(20);
        put(&slots, 3, Tier::LowRes);
        let mut sel = FrameSelector::new();
        // Negative rate = reverse travel; slot 10 is bare, slot 3 is behind.
        let got = sel.select(&slots, 10, -10.0, false).unwrap();
        assert_eq!(got.tier, Tier::LowRes);
        // Forward from slot 10 finds nothing within range.
        assert!(sel.select(&slots, 10, 10.0, false).is_none());
    }

    #[test]
    fn shuttle_search_respects_range_limit() {
        let slots = empty_slots(40);
        put(&slots, 20, Tier::LowRes);
        let mut sel = FrameSelector::new();
        // 20 - 4 = 16 > 15: out of range.
        assert!(sel.select(&slots, 4, 10.0, false).is_none());
        // 20 - 5 = 15: exactly in range.
        assert!(sel.select(&slots, 5, 10.0, false).is_some());
    }
}
