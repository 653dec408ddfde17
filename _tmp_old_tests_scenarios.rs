// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// End-to-end scenarios transcribed from spec.md §8.

mod common;

use std::sync::Arc;

use bcm283x_pwm_dma::{Engine, UncachedAllocator};
use common::{FakeAllocator, FakeMapper, FixedBoard};

fn engine_with(pages: usize, pw_us: f64) -> Engine {
    let allocator: Arc<dyn UncachedAllocator> = Arc::new(FakeAllocator::new());
    Engine::bring_up(&FixedBoard("BCM2837"), &FakeMapper, allocator, pages, pw_us).unwrap()
}

#[test]
fn led_at_1hz_75_percent() {
    let mut engine = engine_with(16, 5000.0);
    assert_eq!(engine.clock_divisor(), 2500);
    assert_eq!(engine.pwm_range(), 100);
    assert!((engine.pulse_width() - 5000.0).abs() < 1e-6);

    let ch = engine.request().unwrap();
    engine.set(ch, &[26], 1.0, 75.0).unwrap();
    engine.enable(ch).unwrap();

    assert!((engine.duty_of(ch).unwrap() - 75.0).abs() < 1e-9);
    assert!((engine.freq_of(ch).unwrap() - 1.0).abs() < 1e-6);
    // CB counts (cb_set=37, cb_clear=63, cb_total=102) for this exact scenario are covered by
    // `led_scenario_1hz_75_percent` in src/cb.rs against the synthesizer directly.
}

#[test]
fn servo_at_50hz_7_5_percent() {
    let mut engine = engine_with(16, 50.0);
    assert_eq!(engine.clock_divisor(), 25);
    assert_eq!(engine.pwm_range(), 100);

    let ch = engine.request().unwrap();
    engine.set(ch, &[18], 50.0, 7.5).unwrap();
    engine.enable(ch).unwrap();

    assert!((engine.duty_of(ch).unwrap() - 7.5).abs() < 1e-9);
    assert!((engine.freq_of(ch).unwrap() - 50.0).abs() < 1e-6);
}

#[test]
fn motor_at_20khz_50_percent() {
    let mut engine = engine_with(16, 0.401);
    let ch = engine.request().unwrap();
    engine.set(ch, &[12], 20000.0, 50.0).unwrap();
    engine.enable(ch).unwrap();
    assert!((engine.duty_of(ch).unwrap() - 50.0).abs() < 5.0);
}

#[test]
fn zero_percent_duty_holds_line_constant_low() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    engine.set(ch, &[4], 1000.0, 0.0).unwrap();
    assert_eq!(engine.duty_of(ch).unwrap(), 0.0);
}

#[test]
fn hundred_percent_duty_holds_high_then_disable_clears_it() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    engine.set(ch, &[4], 1000.0, 100.0).unwrap();
    engine.enable(ch).unwrap();
    assert_eq!(engine.duty_of(ch).unwrap(), 100.0);
    engine.disable(ch).unwrap();
    let snap = engine.reg_snapshot(ch).unwrap();
    assert_eq!(snap.dma_cs & 1, 0, "DMA must no longer be active after disable");
}

#[test]
fn ping_pong_update_transitions_cleanly_across_two_sets() {
    let mut engine = engine_with(16, 5000.0);
    let ch = engine.request().unwrap();
    engine.set(ch, &[26], 1.0, 50.0).unwrap();
    engine.enable(ch).unwrap();
    let freq_before = engine.freq_of(ch).unwrap();

    engine.set(ch, &[26], 2.0, 50.0).unwrap();
    let freq_after = engine.freq_of(ch).unwrap();

    assert!((freq_before - 1.0).abs() < 1e-6);
    assert!((freq_after - 2.0).abs() < 1e-6);
    assert!(engine.reg_snapshot(ch).unwrap().dma_cs & 1 != 0, "still armed after live update");
}

