// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.D Pulse-width / divisor solver

use crate::error::{PwmError, Result};

/// PLLD, the PWM clock manager's fixed source frequency (spec §3).
pub const SOURCE_CLOCK_HZ: f64 = 500_000_000.0;

const NOMINAL_RANGE: f64 = 100.0;
const MIN_PULSE_WIDTH_US: f64 = 0.4;
const MAX_PULSE_WIDTH_US: f64 = 3.5e10;
const MIN_DIVISOR: u32 = 1;
const MAX_DIVISOR: u32 = 4095;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivisorSolution {
    pub divisor: u32,
    pub pwm_range: u32,
    pub pulse_width_us: f64,
}

/// Computes the PWM clock divisor and range that realize `requested_pw_us`, maximizing
/// `pwm_range` toward 100 to keep the controller's own duty resolution near 1% while the
/// divisor carries the dynamic range (spec §4.D).
pub fn solve_pulse_width(requested_pw_us: f64) -> Result<DivisorSolution> {
    if !(requested_pw_us > MIN_PULSE_WIDTH_US && requested_pw_us <= MAX_PULSE_WIDTH_US) {
        return Err(PwmError::InvalidPulseWidth(requested_pw_us));
    }

    let requested_pw_s = requested_pw_us / 1e6;
    let mut divisor = (requested_pw_s / NOMINAL_RANGE * SOURCE_CLOCK_HZ).round();

    let mut pwm_range = NOMINAL_RANGE;
    if divisor < MIN_DIVISOR as f64 {
        divisor = MIN_DIVISOR as f64;
        pwm_range = requested_pw_s * (SOURCE_CLOCK_HZ / divisor);
    } else if divisor > MAX_DIVISOR as f64 {
        divisor = MAX_DIVISOR as f64;
        pwm_range = requested_pw_s * (SOURCE_CLOCK_HZ / divisor);
    }

    if pwm_range < 1.0 {
        return Err(PwmError::InvalidPulseWidth(requested_pw_us));
    }

    let divisor = divisor as u32;
    let pwm_range = pwm_range.round() as u32;
    let pulse_width_us = (pwm_range as f64) / (SOURCE_CLOCK_HZ / divisor as f64) * 1e6;

    Ok(DivisorSolution {
        divisor,
        pwm_range,
        pulse_width_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pulse_width_at_lower_bound() {
        assert!(matches!(solve_pulse_width(0.4), Err(PwmError::InvalidPulseWidth(_))));
    }

    #[test]
    fn accepts_pulse_width_just_above_lower_bound() {
        assert!(solve_pulse_width(0.401).is_ok());
    }

    #[test]
    fn rejects_pulse_width_above_upper_bound() {
        assert!(matches!(
            solve_pulse_width(3.5e10 + 1.0),
            Err(PwmError::InvalidPulseWidth(_))
        ));
    }

    #[test]
    fn led_scenario_5000_us_yields_divisor_2500_range_100() {
        let solution = solve_pulse_width(5000.0).unwrap();
        assert_eq!(solution.divisor, 2500);
        assert_eq!(solution.pwm_range, 100);
        assert!((solution.pulse_width_us - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn servo_scenario_50_us_yields_divisor_25_range_100() {
        let solution = solve_pulse_width(50.0).unwrap();
        assert_eq!(solution.divisor, 25);
        assert_eq!(solution.pwm_range, 100);
    }

    #[test]
    fn near_floor_pulse_width_does_not_need_low_clamp() {
        // At the domain floor the nominal-range divisor already rounds to 2, so the
        // divisor < 1 clamp branch is only reached defensively, never for any value the
        // (0.4, 3.5e10] domain actually admits.
        let solution = solve_pulse_width(0.401).unwrap();
        assert!(solution.divisor >= 1);
        assert_eq!(solution.pwm_range, 100);
    }

    #[test]
    fn max_pulse_width_clamps_divisor_to_4095() {
        let solution = solve_pulse_width(3.5e10).unwrap();
        assert_eq!(solution.divisor, 4095);
        assert!(solution.pwm_range >= 1);
    }

    #[test]
    fn achieved_pulse_width_is_within_one_tick_quantum() {
        for pw in [1.0, 7.3, 50.0, 5000.0, 123_456.0] {
            let solution = solve_pulse_width(pw).unwrap();
            let tick_quantum = 1e6 * (solution.divisor as f64 / SOURCE_CLOCK_HZ);
            assert!(
                (solution.pulse_width_us - pw).abs() <= tick_quantum + 1e-6,
                "pw={} actual={} quantum={}",
                pw,
                solution.pulse_width_us,
                tick_quantum
            );
        }
    }

    #[test]
    fn divisor_stays_within_hardware_bounds() {
        for pw in [0.401, 1.0, 100.0, 10_000.0, 3.5e10] {
            let solution = solve_pulse_width(pw).unwrap();
            assert!(solution.divisor >= 1 && solution.divisor <= 4095);
            assert!(solution.pwm_range >= 1);
        }
    }
}
