// crates/tapedeck-core/src/speed.rs
//
// Rate interpolation and the unpause "overshoot" envelope.
//
// The speed controller thread (tapedeck-player) ticks these pure functions;
// keeping the maths here means the curve shapes are unit-testable without
// spinning up a thread. The overshoot curve mimics a mechanical tape
// transport leaving pause: shoot past 1.0, dip below, settle.

use rand::Rng;

/// Controller cadence. 14 ms normally; 4 ms when the target is 3.0x, where
/// the coarser tick was audible as zipper noise on the rate envelope.
pub const CONTROLLER_TICK_MS: u64 = 14;
pub const CONTROLLER_FAST_TICK_MS: u64 = 4;

/// Sampling step while an overshoot curve or ramp is being played out.
pub const CURVE_STEP_MS: u64 = 5;

/// Plain ramp duration when no overshoot is rolled.
pub const RAMP_MS: u64 = 100;

// ── Volume envelope ───────────────────────────────────────────────────────────

/// Volume as a function of |rate|.
///
/// Fades out toward pause (below 0.3x), full through the normal band, then
/// steps down through the scrub range so 10x-24x shuttling is present but
/// quiet: 1.0 → 0.15 over 7x-10x, 0.15 → 0.05 over 10x-24x, floor 0.05.
pub fn volume_for_rate(rate: f64) -> f64 {
    let rate = rate.abs();
    if rate <= 0.3 {
        rate / 0.3
    } else if rate < 7.0 {
        1.0
    } else if rate < 10.0 {
        let t = (rate - 7.0) / 3.0;
        1.0 - t * 0.85
    } else {
        let clamped = rate.min(24.0);
        let t = (clamped - 10.0) / 14.0;
        0.15 + (0.05 - 0.15) * t
    }
}

// ── Step interpolation ────────────────────────────────────────────────────────

/// One controller step from `current` toward `target`.
///
/// Step size is proportional to the remaining gap (10%, or 15% when pausing
/// so the stop feels firmer), floored at 0.01 so the tail doesn't asymptote.
/// Snaps exactly to `target` once within 0.01.
pub fn step_toward(current: f64, target: f64, pausing: bool) -> f64 {
    let diff = target - current;
    let multiplier = if pausing { 0.15 } else { 0.1 };
    let step = diff.abs().min((diff.abs() * multiplier).max(0.01));
    let next = if diff > 0.0 { current + step } else { current - step };
    if (next - target).abs() < 0.01 {
        target
    } else {
        next
    }
}

// ── Overshoot curve ───────────────────────────────────────────────────────────

/// Base shape the randomized curve is scaled from: peak at 50 ms, dip to 0.7
/// by 75 ms, recover to 1.0 by 125 ms, over a 350 ms envelope.
const BASE_TOTAL_MS: f64 = 350.0;
const BASE_PEAK_MS: f64 = 50.0;
const BASE_DIP_MS: f64 = 75.0;
const BASE_RECOVER_MS: f64 = 125.0;
const DIP_RATE: f64 = 0.7;

/// The unpause overshoot envelope, fully determined by `peak` and `total_ms`
/// so tests can pin both and assert sample-exact output.
#[derive(Clone, Copy, Debug)]
pub struct OvershootCurve {
    pub peak:       f64,
    pub total_ms:   u64,
    peak_ms:        f64,
    dip_ms:         f64,
    recover_ms:     f64,
}

impl OvershootCurve {
    /// Build a curve with explicit parameters. `peak` is the rate reached at
    /// the top of the initial kick; `total_ms` scales the whole envelope.
    pub fn with(peak: f64, total_ms: u64) -> Self {
        let scale = total_ms as f64 / BASE_TOTAL_MS;
        Self {
            peak,
            total_ms,
            peak_ms:    BASE_PEAK_MS * scale,
            dip_ms:     BASE_DIP_MS * scale,
            recover_ms: BASE_RECOVER_MS * scale,
        }
    }

    /// Draw randomized parameters: peak uniform in [1.2, 1.7], total
    /// duration uniform in [250, 300] ms.
    pub fn sample(rng: &mut impl Rng) -> Self {
        let peak = rng.gen_range(1.2..=1.7);
        let total_ms = rng.gen_range(250..=300u64);
        Self::with(peak, total_ms)
    }

    /// Rate at `elapsed_ms` into the curve. Past `total_ms` the caller snaps
    /// to 1.0 and stops sampling.
    pub fn rate_at(&self, elapsed_ms: u64) -> f64 {
        let t = elapsed_ms as f64;
        if t < self.peak_ms {
            let p = if self.peak_ms > 0.0 { t / self.peak_ms } else { 1.0 };
            self.peak * (1.0 - (1.0 - p).powi(2))
        } else if t < self.dip_ms {
            let span = self.dip_ms - self.peak_ms;
            let p = if span > 0.0 { (t - self.peak_ms) / span } else { 1.0 };
            self.peak + (DIP_RATE - self.peak) * p.powi(2)
        } else if t < self.recover_ms {
            let span = self.recover_ms - self.dip_ms;
            let p = if span > 0.0 { (t - self.dip_ms) / span } else { 1.0 };
            DIP_RATE + (1.0 - DIP_RATE) * p.powi(2)
        } else {
            1.0
        }
    }
}

/// How an unpause plays out: the overshoot curve, or a plain linear ramp.
pub enum ResumePlan {
    Overshoot(OvershootCurve),
    Ramp,
}

/// Decide the resume envelope. The very first play always overshoots;
/// after that it's a 1-in-10 roll.
pub fn plan_resume(first_play: bool, rng: &mut impl Rng) -> ResumePlan {
    if first_play || rng.gen_range(1..=10) == 1 {
        ResumePlan::Overshoot(OvershootCurve::sample(rng))
    } else {
        ResumePlan::Ramp
    }
}

/// Rate at `elapsed_ms` into the linear 0 → 1 ramp.
pub fn ramp_rate_at(elapsed_ms: u64) -> f64 {
    (elapsed_ms as f64 / RAMP_MS as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn volume_anchor_points() {
        assert_eq!(volume_for_rate(0.0), 0.0);
        assert!((volume_for_rate(0.15) - 0.5).abs() < 1e-9);
        assert_eq!(volume_for_rate(1.0), 1.0);
        assert_eq!(volume_for_rate(6.9), 1.0);
        assert!((volume_for_rate(10.0) - 0.15).abs() < 1e-9);
        assert!((volume_for_rate(24.0) - 0.05).abs() < 1e-9);
        assert!((volume_for_rate(30.0) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn volume_uses_rate_magnitude() {
        assert_eq!(volume_for_rate(-1.0), volume_for_rate(1.0));
        assert_eq!(volume_for_rate(-12.0), volume_for_rate(12.0));
    }

    #[test]
    fn step_converges_and_snaps() {
        let mut rate = 0.5;
        let mut prev_gap = (3.0f64 - rate).abs();
        let mut ticks = 0;
        while rate != 3.0 {
            rate = step_toward(rate, 3.0, false);
            let gap = (3.0f64 - rate).abs();
            assert!(gap < prev_gap, "gap must shrink every tick");
            prev_gap = gap;
            ticks += 1;
            assert!(ticks < 500, "failed to converge");
        }
        assert_eq!(rate, 3.0);
    }

    #[test]
    fn pause_step_is_faster() {
        let normal = 1.0 - step_toward(1.0, 0.0, false);
        let pausing = 1.0 - step_toward(1.0, 0.0, true);
        assert!(pausing > normal);
    }

    #[test]
    fn overshoot_shape() {
        let c = OvershootCurve::with(1.5, 350);
        assert_eq!(c.rate_at(0), 0.0);
        assert!((c.rate_at(50) - 1.5).abs() < 1e-9, "peak at peak time");
        assert!((c.rate_at(75) - 0.7).abs() < 1e-9, "dip rate at dip time");
        assert!((c.rate_at(125) - 1.0).abs() < 1e-9, "recovered by recover time");
        assert_eq!(c.rate_at(349), 1.0);
        // Rising through the kick, above 1.0 somewhere before the dip.
        assert!(c.rate_at(25) < c.rate_at(50));
        assert!(c.rate_at(40) > 1.0);
    }

    #[test]
    fn overshoot_scales_with_duration() {
        let c = OvershootCurve::with(1.2, 250);
        // Peak lands at 50 * 250/350 ≈ 35.7 ms.
        let scaled_peak_ms = (50.0 * 250.0 / 350.0) as u64;
        assert!((c.rate_at(scaled_peak_ms) - 1.2).abs() < 0.01);
        assert_eq!(c.rate_at(250), 1.0);
    }

    #[test]
    fn sampled_curve_within_spec_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let c = OvershootCurve::sample(&mut rng);
            assert!((1.2..=1.7).contains(&c.peak));
            assert!((250..=300).contains(&c.total_ms));
        }
    }

    #[test]
    fn first_play_always_overshoots() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert!(matches!(plan_resume(true, &mut rng), ResumePlan::Overshoot(_)));
        }
    }

    #[test]
    fn later_plays_mostly_ramp() {
        let mut rng = StdRng::seed_from_u64(1);
        let overshoots = (0..1000)
            .filter(|_| matches!(plan_resume(false, &mut rng), ResumePlan::Overshoot(_)))
            .count();
        // 1-in-10 roll; allow generous slack.
        assert!(overshoots > 40 && overshoots < 200, "got {overshoots}");
    }

    #[test]
    fn ramp_is_linear_to_one() {
        assert_eq!(ramp_rate_at(0), 0.0);
        assert!((ramp_rate_at(50) - 0.5).abs() < 1e-9);
        assert_eq!(ramp_rate_at(100), 1.0);
        assert_eq!(ramp_rate_at(250), 1.0);
    }
}
