// crates/tapedeck-media/src/audio/callback.rs
//
// The realtime render path, as pure functions over the mapped int16 buffer.
// Everything here is called from the audio callback: no locks, no
// allocation, no syscalls. The cpal glue in mod.rs supplies the slice and
// the atomics' current values and stores the returned position back.

/// Boundary beep: 2 kHz at 0.02 amplitude (−34 dB), 48 ms on / 48 ms off,
/// only while the *target* rate is a real shuttle (≥ 1.5x). The beep is the
/// "you've hit the end of the reel" cue and ignores the main volume.
const BEEP_HZ: f64 = 2000.0;
const BEEP_AMPLITUDE: f32 = 0.02;
const BEEP_ON_SECS: f64 = 0.048;
const BEEP_PERIOD_SECS: f64 = 0.096;
const BEEP_RATE_GATE: f64 = 1.5;

/// Oscillator + duty-cycle state for the boundary beep. Lives in the
/// callback closure; reset whenever the playhead leaves the boundary.
pub struct BeepState {
    phase:   f64,
    counter: u64,
}

impl BeepState {
    pub fn new() -> Self {
        Self { phase: 0.0, counter: 0 }
    }

    /// Next beep sample, or None in the off half of the duty cycle.
    fn next(&mut self, sample_rate: u32) -> Option<f32> {
        let sr = f64::from(sample_rate);
        self.counter += 1;
        if (self.counter as f64) < sr * BEEP_ON_SECS {
            self.phase += 2.0 * std::f64::consts::PI * BEEP_HZ / sr;
            if self.phase >= 2.0 * std::f64::consts::PI {
                self.phase -= 2.0 * std::f64::consts::PI;
            }
            Some(self.phase.sin() as f32 * BEEP_AMPLITUDE)
        } else {
            if (self.counter as f64) >= sr * BEEP_PERIOD_SECS {
                self.counter = 0;
            }
            None
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.counter = 0;
    }
}

impl Default for BeepState {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the shared state for one callback invocation.
pub struct RenderParams {
    pub rate:            f64,
    pub target_rate:     f64,
    pub reverse:         bool,
    pub volume:          f64,
    pub sample_rate:     u32,
    /// int16 samples the decode thread has published (acquire-loaded).
    pub decoded_samples: usize,
    /// Capacity of the mapping in stereo pairs.
    pub total_pairs:     usize,
}

/// Catmull-Rom cubic through p1..p2 at fraction `t`.
#[inline]
pub fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

#[inline]
fn int16_to_float(s: i16) -> f32 {
    f32::from(s) / 32768.0
}

/// Fill one interleaved-stereo output buffer, advancing the fractional
/// stereo-pair index `pos` by ±rate per output frame. Returns the new
/// position.
///
/// Guarantees the callback relies on:
/// - never reads past `decoded_samples`; starved frames are exactly zero;
/// - rate below 0.001 produces pure silence and does not move the position;
/// - position stays clamped to `[0, available_pairs - 1]`.
pub fn render_buffer(
    out: &mut [f32],
    samples: &[i16],
    mut pos: f64,
    p: &RenderParams,
    beep: &mut BeepState,
) -> f64 {
    if samples.is_empty() || p.total_pairs == 0 || p.rate.abs() < 0.001 {
        out.fill(0.0);
        return pos;
    }

    let available_pairs = p.decoded_samples / 2;

    // Boundary detection keys off the *target* rate: the beep should sound
    // while the user is still commanding fast-wind into the stop, not while
    // the actual rate is easing down.
    let shuttling = p.target_rate.abs() >= BEEP_RATE_GATE;
    let at_start = shuttling && pos <= 0.1;
    let at_end = shuttling && available_pairs > 0 && pos >= (available_pairs - 1) as f64;
    let at_boundary = at_start || at_end;
    if !at_boundary {
        beep.reset();
    }

    let volume = p.volume as f32;
    for frame in out.chunks_exact_mut(2) {
        if at_boundary {
            if let Some(tone) = beep.next(p.sample_rate) {
                frame[0] = tone;
                frame[1] = tone;
                continue;
            }
        }

        if p.reverse {
            pos = (pos - p.rate).max(0.0);
        } else {
            pos += p.rate;
            if available_pairs > 0 {
                pos = pos.min((available_pairs - 1) as f64);
            }
        }

        let i1 = pos as usize;
        let frac = (pos - i1 as f64) as f32;
        let i0 = i1.saturating_sub(1);
        let i2 = i1 + 1;
        let i3 = i1 + 2;

        // The furthest sample Catmull-Rom needs; if the decode thread hasn't
        // published it yet, this frame is silence, not a stale read.
        let max_needed = i3 * 2 + 1;
        let (mut left, mut right) = (0.0f32, 0.0f32);
        if i3 < p.total_pairs && max_needed < p.decoded_samples {
            let l0 = int16_to_float(samples[i0 * 2]);
            let l1 = int16_to_float(samples[i1 * 2]);
            let l2 = int16_to_float(samples[i2 * 2]);
            let l3 = int16_to_float(samples[i3 * 2]);
            let r0 = int16_to_float(samples[i0 * 2 + 1]);
            let r1 = int16_to_float(samples[i1 * 2 + 1]);
            let r2 = int16_to_float(samples[i2 * 2 + 1]);
            let r3 = int16_to_float(samples[i3 * 2 + 1]);
            left = catmull_rom(l0, l1, l2, l3, frac);
            right = catmull_rom(r0, r1, r2, r3, frac);
        }

        frame[0] = left * volume;
        frame[1] = right * volume;
    }

    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rate: f64, decoded: usize, total_pairs: usize) -> RenderParams {
        RenderParams {
            rate,
            target_rate: rate,
            reverse: false,
            volume: 1.0,
            sample_rate: 48_000,
            decoded_samples: decoded,
            total_pairs,
        }
    }

    /// A constant-value stereo buffer of `pairs` pairs.
    fn constant_buffer(pairs: usize, value: i16) -> Vec<i16> {
        vec![value; pairs * 2]
    }

    #[test]
    fn catmull_rom_hits_endpoints() {
        assert_eq!(catmull_rom(0.0, 0.25, 0.75, 1.0, 0.0), 0.25);
        assert_eq!(catmull_rom(0.0, 0.25, 0.75, 1.0, 1.0), 0.75);
        // Equal control points interpolate to the same value everywhere.
        for t in [0.0, 0.3, 0.5, 0.9] {
            assert!((catmull_rom(0.5, 0.5, 0.5, 0.5, t) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn paused_rate_emits_silence_and_holds_position() {
        let samples = constant_buffer(1000, 1000);
        let mut out = vec![1.0f32; 128];
        let mut beep = BeepState::new();
        let p = params(0.0, samples.len(), 1000);
        let pos = render_buffer(&mut out, &samples, 42.0, &p, &mut beep);
        assert_eq!(pos, 42.0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unit_rate_advances_one_pair_per_frame() {
        let samples = constant_buffer(1000, 16384); // 0.5 after scaling
        let mut out = vec![0.0f32; 64];
        let mut beep = BeepState::new();
        let p = params(1.0, samples.len(), 1000);
        let pos = render_buffer(&mut out, &samples, 10.0, &p, &mut beep);
        assert_eq!(pos, 10.0 + 32.0);
        for &s in &out {
            assert!((s - 0.5).abs() < 1e-3, "constant input renders constant output");
        }
    }

    #[test]
    fn reverse_rate_walks_back_and_clamps_at_zero() {
        let samples = constant_buffer(1000, 0);
        let mut out = vec![0.0f32; 64];
        let mut beep = BeepState::new();
        let mut p = params(1.0, samples.len(), 1000);
        p.reverse = true;
        let pos = render_buffer(&mut out, &samples, 8.0, &p, &mut beep);
        assert_eq!(pos, 0.0, "8 frames back then clamped for the rest");
    }

    #[test]
    fn starved_read_is_exact_silence() {
        // Only 20 pairs decoded out of a large mapping.
        let samples = constant_buffer(1000, 12345);
        let mut out = vec![9.9f32; 32];
        let mut beep = BeepState::new();
        let p = params(1.0, 40, 1000);
        // Position near the decode frontier: lookahead pairs are missing.
        render_buffer(&mut out, &samples, 18.0, &p, &mut beep);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn boundary_beep_is_toned_and_duty_cycled() {
        let sr = 48_000u32;
        let samples = constant_buffer(1000, 0);
        let pairs_on = (f64::from(sr) * 0.048) as usize; // 2304 frames on
        let mut out = vec![0.0f32; (pairs_on + 10) * 2];
        let mut beep = BeepState::new();
        let mut p = params(0.5, samples.len(), 1000);
        p.target_rate = 2.0; // shuttle command into the stop
        render_buffer(&mut out, &samples, 0.0, &p, &mut beep);

        // On-phase: a tone with peak close to the beep amplitude.
        let on = &out[..pairs_on * 2];
        let peak = on.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!((peak - 0.02).abs() < 0.002, "peak {peak}");
        // Off-phase afterwards: the position is clamped at the start, and
        // the tone stops.
        let off = &out[(pairs_on + 2) * 2..];
        assert!(off.iter().all(|&s| s.abs() < 0.001));
    }

    #[test]
    fn no_beep_below_shuttle_gate() {
        let samples = constant_buffer(1000, 0);
        let mut out = vec![0.0f32; 64];
        let mut beep = BeepState::new();
        let p = params(1.0, samples.len(), 1000); // target 1.0 < 1.5
        render_buffer(&mut out, &samples, 0.0, &p, &mut beep);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn volume_scales_output() {
        let samples = constant_buffer(1000, 16384);
        let mut loud = vec![0.0f32; 32];
        let mut quiet = vec![0.0f32; 32];
        let mut beep = BeepState::new();
        let p = params(1.0, samples.len(), 1000);
        render_buffer(&mut loud, &samples, 10.0, &p, &mut beep);
        let mut p_quiet = params(1.0, samples.len(), 1000);
        p_quiet.volume = 0.5;
        render_buffer(&mut quiet, &samples, 10.0, &p_quiet, &mut beep);
        for (l, q) in loud.iter().zip(&quiet) {
            assert!((l * 0.5 - q).abs() < 1e-6);
        }
    }
}
