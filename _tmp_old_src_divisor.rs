// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

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
