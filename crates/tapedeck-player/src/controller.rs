// crates/tapedeck-player/src/controller.rs
//
// The speed controller thread: couples user intent (target_rate, jog flags)
// to the actual rate the audio callback advances at. Interpolation steps,
// the unpause overshoot/ramp envelopes and the volume curve all come from
// tapedeck_core::speed; this thread only sequences them in time.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use tapedeck_core::speed::{
    plan_resume, ramp_rate_at, step_toward, volume_for_rate, OvershootCurve, ResumePlan,
    CONTROLLER_FAST_TICK_MS, CONTROLLER_TICK_MS, CURVE_STEP_MS, RAMP_MS,
};
use tapedeck_core::state::{PlaybackState, BASE_SPEED_THRESHOLD, JOG_SPEED};

pub fn spawn(state: Arc<PlaybackState>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("speed-controller".into())
        .spawn(move || run(state))
        .expect("spawn speed controller")
}

fn run(state: Arc<PlaybackState>) {
    let mut rng = StdRng::from_entropy();

    while !state.should_exit.load(Ordering::Acquire) {
        let current = state.playback_rate.load();
        let target = state.target_rate.load();

        if state.is_jogging() {
            state.playback_rate.store(JOG_SPEED);
            state.volume.store(volume_for_rate(JOG_SPEED));
        } else if current.abs() < 0.001 && target > 0.0 {
            resume_from_pause(&state, &mut rng);
        } else if current != target {
            let pausing = target == 0.0 && current > 0.0;
            let next = step_toward(current, target, pausing);
            state.playback_rate.store(next);
            state.volume.store(volume_for_rate(next));
        }

        // A reset-to-normal raised the low-res speed gate to 24; restore it
        // once the rate has settled near 1.0.
        if state.speed_reset_requested.load(Ordering::Acquire)
            && (state.playback_rate.load() - 1.0).abs() < 0.1
        {
            state.speed_threshold.store(BASE_SPEED_THRESHOLD);
            state.speed_reset_requested.store(false, Ordering::Release);
        }

        // 3.0x runs a finer tick: the coarse envelope was audible there.
        let tick = if (target - 3.0).abs() < 0.01 {
            CONTROLLER_FAST_TICK_MS
        } else {
            CONTROLLER_TICK_MS
        };
        thread::sleep(Duration::from_millis(tick));
    }
}

/// Play the unpause envelope to completion: the overshoot curve (always on
/// the very first play, 1-in-10 after), or the plain 100 ms ramp. Either
/// way the transport lands exactly on 1.0x.
fn resume_from_pause(state: &PlaybackState, rng: &mut StdRng) {
    let first_play = !state.first_play_done.swap(true, Ordering::AcqRel);
    state.volume.store(1.0);

    match plan_resume(first_play, rng) {
        ResumePlan::Overshoot(curve) => play_overshoot(state, &curve),
        ResumePlan::Ramp => play_ramp(state),
    }

    state.playback_rate.store(1.0);
    state.target_rate.store(1.0);
    state.volume.store(volume_for_rate(1.0));
}

fn play_overshoot(state: &PlaybackState, curve: &OvershootCurve) {
    let start = Instant::now();
    loop {
        if state.should_exit.load(Ordering::Acquire) {
            return;
        }
        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed >= curve.total_ms {
            return;
        }
        let rate = curve.rate_at(elapsed);
        state.playback_rate.store(rate);
        state.volume.store(volume_for_rate(rate));
        thread::sleep(Duration::from_millis(CURVE_STEP_MS));
    }
}

fn play_ramp(state: &PlaybackState) {
    let start = Instant::now();
    loop {
        if state.should_exit.load(Ordering::Acquire) {
            return;
        }
        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed >= RAMP_MS {
            return;
        }
        let rate = ramp_rate_at(elapsed);
        state.playback_rate.store(rate);
        state.volume.store(volume_for_rate(rate));
        thread::sleep(Duration::from_millis(CURVE_STEP_MS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// End-to-end through the real thread: from a fresh (first-play) state,
    /// unpausing must overshoot past 1.0 quickly and settle on exactly 1.0.
    #[test]
    fn first_unpause_overshoots_then_settles() {
        let state = Arc::new(PlaybackState::new());
        let handle = spawn(Arc::clone(&state));

        state.target_rate.store(1.0);

        let start = Instant::now();
        let mut peak: f64 = 0.0;
        while start.elapsed() < Duration::from_millis(400) {
            peak = peak.max(state.playback_rate.load());
            thread::sleep(Duration::from_millis(2));
        }
        assert!(peak > 1.0, "first play must overshoot, peaked at {peak}");
        assert_eq!(state.playback_rate.load(), 1.0, "settled on exactly 1.0");

        state.should_exit.store(true, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn rate_converges_to_ladder_target() {
        let state = Arc::new(PlaybackState::new());
        state.playback_rate.store(1.0);
        state.target_rate.store(1.0);
        state.first_play_done.store(true, Ordering::Release);
        let handle = spawn(Arc::clone(&state));

        state.target_rate.store(10.0);
        let start = Instant::now();
        while state.playback_rate.load() != 10.0 && start.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(state.playback_rate.load(), 10.0);
        // Volume curve applied: 10x sits at the 0.15 knee.
        assert!((state.volume.load() - 0.15).abs() < 0.05);

        state.should_exit.store(true, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn threshold_restored_after_reset_settles() {
        let state = Arc::new(PlaybackState::new());
        state.playback_rate.store(10.0);
        state.target_rate.store(10.0);
        state.first_play_done.store(true, Ordering::Release);
        let handle = spawn(Arc::clone(&state));

        state.reset_to_normal_speed();
        let start = Instant::now();
        while state.speed_reset_requested.load(Ordering::Acquire)
            && start.elapsed() < Duration::from_secs(5)
        {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!state.speed_reset_requested.load(Ordering::Acquire));
        assert_eq!(state.speed_threshold.load(), BASE_SPEED_THRESHOLD);

        state.should_exit.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}
