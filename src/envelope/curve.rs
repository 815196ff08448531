//! Shared piecewise envelope curve
//!
//! Attack rises from 0 to 1, decay mixes from 1 to the sustain amplitude
//! while the key is held, and release mixes from the level reached at
//! key-off down to 0. The shape exponent bends every segment; a shape of
//! zero or below makes all of them linear.

use super::PhaseTimes;

/// Smallest phase duration in seconds
pub const MIN_PHASE_S: f64 = 1e-6;

/// dB value reported for zero or near-zero amplitude
pub const DB_FLOOR: f64 = -120.0;

const MIN_SHAPE: f64 = 1e-3;

/// Normalized exponential rise over `x` in [0, 1]; reaches exactly 1 at x = 1
pub fn rise(x: f64, shape: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    if shape <= 0.0 {
        return x;
    }
    let s = shape.max(MIN_SHAPE);
    (1.0 - (-x / s).exp()) / (1.0 - (-1.0 / s).exp())
}

/// Shaped interpolation from `a` to `b`
pub fn mix(a: f64, b: f64, x: f64, shape: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    if shape <= 0.0 {
        return a + (b - a) * x;
    }
    a + (b - a) * x.powf(1.0 / shape.max(MIN_SHAPE))
}

/// Linear amplitude to dB relative to full scale, floored at [`DB_FLOOR`]
pub fn amp_to_db(amp: f64) -> f64 {
    if amp > 0.0 {
        (20.0 * amp.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

/// Level `dt` seconds after key-on while the key is still held
fn held_level(dt: f64, times: &PhaseTimes, sustain: f64, shape: f64) -> f64 {
    let ta = times.attack.max(MIN_PHASE_S);
    if dt < ta {
        return rise(dt / ta, shape);
    }
    let td = times.decay.max(MIN_PHASE_S);
    let dd = dt - ta;
    if dd < td {
        mix(1.0, sustain, dd / td, shape)
    } else {
        sustain
    }
}

/// Amplitude at absolute time `t` for a note keyed on at `t_on` and off at `t_off`
pub fn amplitude_at(
    t: f64,
    t_on: f64,
    t_off: f64,
    times: &PhaseTimes,
    sustain: f64,
    shape: f64,
) -> f64 {
    if t <= t_on {
        return 0.0;
    }
    let sustain = sustain.clamp(0.0, 1.0);
    if t < t_off {
        return held_level(t - t_on, times, sustain, shape).clamp(0.0, 1.0);
    }
    let tr = times.release.max(MIN_PHASE_S);
    let since_off = t - t_off;
    if since_off >= tr {
        return 0.0;
    }
    let level_off = held_level((t_off - t_on).max(0.0), times, sustain, shape);
    mix(level_off, 0.0, since_off / tr, shape).clamp(0.0, 1.0)
}
