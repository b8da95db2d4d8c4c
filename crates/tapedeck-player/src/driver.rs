// crates/tapedeck-player/src/driver.rs
//
// Render-tick pacing: the 60 Hz frame budget, the hybrid sleep/spin that
// hits it without overshoot, and the deep-pause throttle that drops the
// tick to ~2 Hz after 15 s sitting at rate 0. Any command or seek defeats
// the throttle: an external input must always produce an immediate visual
// change.

use std::time::{Duration, Instant};

/// Normal tick budget: 60 Hz.
pub const FRAME_BUDGET: Duration = Duration::from_micros(16_667);

/// Deep-pause tick budget: ~2 Hz, enough to keep the OSD clock honest.
pub const DEEP_PAUSE_BUDGET: Duration = Duration::from_millis(500);

/// How long the transport must sit at rate 0 before the throttle engages.
pub const DEEP_PAUSE_AFTER: Duration = Duration::from_secs(15);

/// Tracks how long playback has been fully stopped and whether the render
/// loop may throttle.
pub struct DeepPause {
    threshold:    Duration,
    paused_since: Option<Instant>,
    active:       bool,
}

impl DeepPause {
    pub fn new() -> Self {
        Self::with_threshold(DEEP_PAUSE_AFTER)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            threshold,
            paused_since: None,
            active: false,
        }
    }

    /// Call once per tick with the actual and target rates.
    pub fn update(&mut self, rate: f64, target_rate: f64) {
        if rate == 0.0 && target_rate == 0.0 {
            let since = *self.paused_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.threshold {
                self.active = true;
            }
        } else {
            self.paused_since = None;
            self.active = false;
        }
    }

    /// An external event (command, seek) happened: wake up and restart the
    /// idle timer.
    pub fn interrupt(&mut self) {
        self.paused_since = Some(Instant::now());
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn frame_budget(&self) -> Duration {
        if self.active {
            DEEP_PAUSE_BUDGET
        } else {
            FRAME_BUDGET
        }
    }
}

impl Default for DeepPause {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep most of the way to `deadline`, then spin the last stretch. Plain
/// sleep alone overshoots the 16.67 ms budget by whatever the scheduler
/// feels like; spinning the final ~2 ms lands the tick on time.
pub fn pace_until(deadline: Instant) {
    const SPIN_WINDOW: Duration = Duration::from_millis(2);
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_WINDOW {
            std::thread::sleep(remaining - SPIN_WINDOW);
        } else {
            std::hint::spin_loop();
        }
    }
}
