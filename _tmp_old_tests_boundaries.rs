// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Boundary conditions transcribed from spec.md §8 "Boundaries".

mod common;

use std::sync::Arc;

use bcm283x_pwm_dma::{Engine, PwmError, UncachedAllocator};
use common::{FakeAllocator, FakeMapper, FixedBoard};

fn engine_with(pages: usize, pw_us: f64) -> Engine {
    let allocator: Arc<dyn UncachedAllocator> = Arc::new(FakeAllocator::new());
    Engine::bring_up(&FixedBoard("BCM2837"), &FakeMapper, allocator, pages, pw_us).unwrap()
}

#[test]
fn pulse_width_at_lower_bound_is_rejected() {
    let allocator: Arc<dyn UncachedAllocator> = Arc::new(FakeAllocator::new());
    let err = Engine::bring_up(&FixedBoard("BCM2837"), &FakeMapper, allocator, 16, 0.4).unwrap_err();
    assert!(matches!(err, PwmError::InvalidPulseWidth(_)));
}

#[test]
fn pulse_width_just_above_lower_bound_is_accepted() {
    let engine = engine_with(16, 0.401);
    assert_eq!(engine.pwm_range(), 100);
    assert!(engine.clock_divisor() >= 1);
}

#[test]
fn pulse_width_at_upper_bound_clamps_divisor() {
    let engine = engine_with(16, 3.5e10);
    assert_eq!(engine.clock_divisor(), 4095);
}

#[test]
fn frequency_too_high_for_pulse_width_is_rejected() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    let err = engine.set(ch, &[26], 200.0, 50.0).unwrap_err();
    assert!(matches!(err, PwmError::FrequencyNotMet(_)));
}

#[test]
fn frequency_needing_more_pages_than_allocated_is_rejected() {
    let mut engine = engine_with(1, 5000.0);
    let ch = engine.request().unwrap();
    let err = engine.set(ch, &[26], 0.5, 50.0).unwrap_err();
    assert!(matches!(err, PwmError::OutOfMemory { .. }));
}

#[test]
fn duty_zero_and_hundred_are_exact_no_rounding() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    engine.set(ch, &[26], 1.0, 0.0).unwrap();
    assert_eq!(engine.duty_of(ch).unwrap(), 0.0);

    engine.set(ch, &[26], 1.0, 100.0).unwrap();
    assert_eq!(engine.duty_of(ch).unwrap(), 100.0);
}

#[test]
fn duty_out_of_range_is_rejected() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    assert!(matches!(engine.set(ch, &[26], 1.0, 100.5).unwrap_err(), PwmError::InvalidDuty(_)));
    assert!(matches!(engine.set(ch, &[26], 1.0, -0.1).unwrap_err(), PwmError::InvalidDuty(_)));
}

#[test]
fn gpio_out_of_range_is_rejected() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    let err = engine.set(ch, &[32], 1.0, 50.0).unwrap_err();
    assert!(matches!(err, PwmError::InvalidGpio(32)));
}

#[test]
fn invalid_channel_index_is_rejected() {
    let mut engine = engine_with(16, 5000.0);
    let err = engine.set(100, &[26], 1.0, 50.0).unwrap_err();
    assert!(matches!(err, PwmError::InvalidChannel(100)));
}

#[test]
fn enable_before_set_is_rejected() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    let err = engine.enable(ch).unwrap_err();
    assert!(matches!(err, PwmError::PwmNotSet(_)));
}

#[test]
fn no_free_channel_after_exhausting_the_table() {
    let mut engine = engine_with(16, 5000.0);
    let mut taken = Vec::new();
    loop {
        match engine.request() {
            Ok(ch) => taken.push(ch),
            Err(PwmError::NoFreeChannel) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(!taken.is_empty());
    assert!(matches!(engine.request().unwrap_err(), PwmError::NoFreeChannel));
}


