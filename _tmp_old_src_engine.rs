// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.H Global bring-up & shutdown, §4.I Validation, §4.J Introspection

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::board::{self, BoardProfile};
use crate::cb::PAGE_SIZE;
use crate::channel::Channel;
use crate::channels::{ChannelTable, NUM_CHANNELS};
use crate::collaborators::{BoardIdentifier, MappedRegion, PeripheralMapper, UncachedAllocator};
use crate::divisor;
use crate::error::{PwmError, Result};
use crate::regs::clock::PwmClock;
use crate::regs::gpio::Gpio;
use crate::regs::pwm::Pwm;

const REGISTER_SETTLE: Duration = Duration::from_micros(10);

fn validate_duty(duty_pct: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&duty_pct) {
        return Err(PwmError::InvalidDuty(duty_pct));
    }
    Ok(())
}

fn validate_gpios(gpios: &[u8]) -> Result<()> {
    for &pin in gpios {
        if pin > 31 {
            return Err(PwmError::InvalidGpio(pin));
        }
    }
    Ok(())
}

/// A snapshot of the key registers for one channel (spec §4.J).
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterSnapshot {
    pub pwm_ctl: u32,
    pub pwm_sta: u32,
    pub pwm_dmac: u32,
    pub pwm_clock_ctl: u32,
    pub pwm_clock_div: u32,
    pub dma_cs: u32,
    pub dma_debug: u32,
}

/// Process-wide engine state (spec §3). Constructed once via `bring_up`, used from a single
/// thread (or serialized externally — spec §5); never re-initialized.
pub struct Engine {
    board: BoardProfile,
    gpio: Gpio,
    pwm: Pwm,
    pwm_clock: PwmClock,
    dma_controller_base: usize,
    // Kept alive for the process's lifetime: unmapping during signal-driven shutdown is unsafe
    // and offers no benefit (spec §5 "Memory ownership").
    _gpio_region: MappedRegion,
    _dma_region: MappedRegion,
    _pwm_region: MappedRegion,
    _pwm_clock_region: MappedRegion,
    allocator: Arc<dyn UncachedAllocator>,
    clock_divisor: u32,
    pwm_range: u32,
    pulse_width_us: f64,
    allocated_pages_per_buffer: usize,
    channel_table: ChannelTable,
    channels: [Option<Channel>; NUM_CHANNELS],
}

impl Engine {
    /// One-time init (spec §4.H, steps 2-6; step 1 "install signal handler" is the caller's
    /// responsibility since it is process-global state this struct has no business owning).
    pub fn bring_up(
        board_identifier: &dyn BoardIdentifier,
        mapper: &dyn PeripheralMapper,
        allocator: Arc<dyn UncachedAllocator>,
        allocated_pages_per_buffer: usize,
        pulse_width_us: f64,
    ) -> Result<Self> {
        let allocated_pages_per_buffer = allocated_pages_per_buffer.max(1);
        let solution = divisor::solve_pulse_width(pulse_width_us)?;
        let board = board::resolve_board_profile(board_identifier)?;

        let gpio_region = mapper.map_peripheral(board.gpio_phys(), PAGE_SIZE)?;
        let dma_region = mapper.map_peripheral(board.dma_phys(), PAGE_SIZE)?;
        let pwm_region = mapper.map_peripheral(board.pwm_phys(), PAGE_SIZE)?;
        let pwm_clock_region = mapper.map_peripheral(board.pwm_clock_phys(), PAGE_SIZE)?;

        // SAFETY: each region is a live mapping of exactly the peripheral window its typed view
        // interprets, held alive in `_*_region` for as long as this `Engine` lives.
        let gpio = unsafe { Gpio::new(gpio_region.as_mut_ptr() as usize) };
        let dma_controller_base = dma_region.as_mut_ptr() as usize;
        let pwm = unsafe { Pwm::new(pwm_region.as_mut_ptr() as usize) };
        let pwm_clock = unsafe { PwmClock::new(pwm_clock_region.as_mut_ptr() as usize) };

        // Step 4: PWM clock manager programming, each write followed by the settle delay.
        pwm_clock.disable();
        thread::sleep(REGISTER_SETTLE);
        pwm_clock.select_source_disabled();
        thread::sleep(REGISTER_SETTLE);
        pwm_clock.set_divisor(solution.divisor);
        thread::sleep(REGISTER_SETTLE);
        pwm_clock.enable();
        thread::sleep(REGISTER_SETTLE);

        // Step 5: PWM controller programming.
        pwm.bring_up(solution.pwm_range);

        Ok(Engine {
            board,
            gpio,
            pwm,
            pwm_clock,
            dma_controller_base,
            _gpio_region: gpio_region,
            _dma_region: dma_region,
            _pwm_region: pwm_region,
            _pwm_clock_region: pwm_clock_region,
            allocator,
            clock_divisor: solution.divisor,
            pwm_range: solution.pwm_range,
            pulse_width_us: solution.pulse_width_us,
            allocated_pages_per_buffer,
            channel_table: ChannelTable::new(),
            channels: std::array::from_fn(|_| None),
        })
    }

    /// Re-derives divisor/range for a new `(pages, pw_us)` pair (spec §4.G `config_global`).
    /// Only permitted while every channel is free; takes effect for channels requested from now
    /// on (already-initialized hardware is not reprogrammed).
    pub fn config_global(&mut self, pages: usize, pw_us: f64) -> Result<()> {
        if !self.channel_table.all_free() {
            return Err(PwmError::ChannelAlreadyRequested);
        }
        let solution = divisor::solve_pulse_width(pw_us)?;
        self.allocated_pages_per_buffer = pages.max(1);
        self.clock_divisor = solution.divisor;
        self.pwm_range = solution.pwm_range;
        self.pulse_width_us = solution.pulse_width_us;
        Ok(())
    }

    pub fn request(&mut self) -> Result<usize> {
        let slot = self.channel_table.acquire()?;
        let hw_index = ChannelTable::hw_index(slot);
        match Channel::request(
            slot,
            hw_index,
            self.dma_controller_base,
            &self.allocator,
            self.allocated_pages_per_buffer,
        ) {
            Ok(channel) => {
                self.channels[slot] = Some(channel);
                Ok(slot)
            }
            Err(err) => {
                self.channel_table.release(slot);
                Err(err)
            }
        }
    }

    pub fn set(&mut self, ch: usize, gpios: &[u8], freq_hz: f64, duty_pct: f64) -> Result<()> {
        self.channel_table.check(ch)?;
        validate_duty(duty_pct)?;
        validate_gpios(gpios)?;
        let board = self.board;
        let pulse_width_us = self.pulse_width_us;
        let pages = self.allocated_pages_per_buffer;
        let gpio = &self.gpio;
        let channel = self.channels[ch].as_mut().ok_or(PwmError::InvalidChannel(ch))?;
        channel.set(gpio, &board, pages, gpios, freq_hz, duty_pct, pulse_width_us)
    }

    pub fn enable(&mut self, ch: usize) -> Result<()> {
        self.channel_table.check(ch)?;
        self.channels[ch]
            .as_mut()
            .ok_or(PwmError::InvalidChannel(ch))?
            .enable()
    }

    pub fn disable(&mut self, ch: usize) -> Result<()> {
        self.channel_table.check(ch)?;
        let gpio = &self.gpio;
        self.channels[ch]
            .as_mut()
            .ok_or(PwmError::InvalidChannel(ch))?
            .disable(gpio)
    }

    pub fn free(&mut self, ch: usize) -> Result<()> {
        self.channel_table.check(ch)?;
        let gpio = &self.gpio;
        let result = self.channels[ch]
            .as_mut()
            .ok_or(PwmError::InvalidChannel(ch))?
            .free(gpio);
        self.channels[ch] = None;
        self.channel_table.release(ch);
        result
    }

    pub fn freq_of(&self, ch: usize) -> Result<f64> {
        self.channel_table.check(ch)?;
        Ok(self.channels[ch]
            .as_ref()
            .ok_or(PwmError::InvalidChannel(ch))?
            .freq_act())
    }

    pub fn duty_of(&self, ch: usize) -> Result<f64> {
        self.channel_table.check(ch)?;
        Ok(self.channels[ch]
            .as_ref()
            .ok_or(PwmError::InvalidChannel(ch))?
            .duty_act())
    }

    pub fn pulse_width(&self) -> f64 {
        self.pulse_width_us
    }

    pub fn reg_snapshot(&self, ch: usize) -> Result<RegisterSnapshot> {
        self.channel_table.check(ch)?;
        let channel = self.channels[ch].as_ref().ok_or(PwmError::InvalidChannel(ch))?;
        let (dma_cs, dma_debug) = channel.dma_snapshot();
        Ok(RegisterSnapshot {
            pwm_ctl: self.pwm.ctl.get(),
            pwm_sta: self.pwm.sta.get(),
            pwm_dmac: self.pwm.dmac.get(),
            pwm_clock_ctl: self.pwm_clock.control.get(),
            pwm_clock_div: self.pwm_clock.divisor.get(),
            dma_cs,
            dma_debug,
        })
    }

    /// Shutdown path run from the termination-signal handler (spec §4.H): frees every live
    /// channel, idempotent on already-free slots. Best-effort — a single channel's failure does
    /// not stop the rest from being torn down.
    pub fn shutdown_all_channels(&mut self) {
        for slot in 0..NUM_CHANNELS {
            if !self.channel_table.is_free(slot) {
                let _ = self.free(slot);
            }
        }
    }

    pub fn clock_divisor(&self) -> u32 {
        self.clock_divisor
    }

    pub fn pwm_range(&self) -> u32 {
        self.pwm_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::test_support::FakeAllocator;
    use std::sync::Mutex;

    struct FixedBoard;
    impl BoardIdentifier for FixedBoard {
        fn board_revision(&self) -> Result<String> {
            Ok("BCM2837".to_string())
        }
    }

    /// In-memory stand-in for `/dev/mem`: hands out boxed, leaked, zeroed buffers instead of
    /// real mmaps so the engine's bring-up path is exercisable without root or hardware.
    struct FakeMapper {
        calls: Mutex<usize>,
    }

    impl FakeMapper {
        fn new() -> Self {
            FakeMapper { calls: Mutex::new(0) }
        }
    }

    impl PeripheralMapper for FakeMapper {
        fn map_peripheral(&self, _phys_addr: usize, size: usize) -> Result<MappedRegion> {
            *self.calls.lock().unwrap() += 1;
            let mut buf = vec![0u8; size].into_boxed_slice();
            let ptr = buf.as_mut_ptr();
            Ok(MappedRegion::new(ptr, size, Box::new(buf)))
        }
    }

    fn bring_up_test_engine() -> Engine {
        let allocator: Arc<dyn UncachedAllocator> = FakeAllocator::new();
        Engine::bring_up(&FixedBoard, &FakeMapper::new(), allocator, 16, 5000.0).unwrap()
    }

    #[test]
    fn bring_up_programs_divisor_and_range_from_pulse_width() {
        let engine = bring_up_test_engine();
        assert_eq!(engine.clock_divisor(), 2500);
        assert_eq!(engine.pwm_range(), 100);
        assert!((engine.pulse_width() - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn request_set_enable_round_trip() {
        let mut engine = bring_up_test_engine();
        let ch = engine.request().unwrap();
        engine.set(ch, &[26], 1.0, 75.0).unwrap();
        engine.enable(ch).unwrap();
        assert!((engine.freq_of(ch).unwrap() - 1.0).abs() < 1e-6);
        assert!((engine.duty_of(ch).unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_channel_rejected_before_request() {
        let engine = bring_up_test_engine();
        assert!(matches!(engine.freq_of(0), Err(PwmError::InvalidChannel(0))));
    }

    #[test]
    fn set_rejects_out_of_range_duty_and_gpio() {
        let mut engine = bring_up_test_engine();
        let ch = engine.request().unwrap();
        assert!(matches!(engine.set(ch, &[4], 1.0, 150.0), Err(PwmError::InvalidDuty(_))));
        assert!(matches!(engine.set(ch, &[40], 1.0, 50.0), Err(PwmError::InvalidGpio(40))));
    }

    #[test]
    fn config_global_rejected_while_a_channel_is_live() {
        let mut engine = bring_up_test_engine();
        let _ch = engine.request().unwrap();
        assert!(matches!(
            engine.config_global(16, 50.0),
            Err(PwmError::ChannelAlreadyRequested)
        ));
    }

    #[test]
    fn config_global_updates_future_pulse_width_once_all_free() {
        let mut engine = bring_up_test_engine();
        engine.config_global(16, 50.0).unwrap();
        assert_eq!(engine.clock_divisor(), 25);
        assert_eq!(engine.pwm_range(), 100);
    }

    #[test]
    fn no_free_channel_once_all_seven_slots_taken() {
        let mut engine = bring_up_test_engine();
        for _ in 0..NUM_CHANNELS {
            engine.request().unwrap();
        }
        assert!(matches!(engine.request(), Err(PwmError::NoFreeChannel)));
    }

    #[test]
    fn free_returns_slot_to_the_pool() {
        let mut engine = bring_up_test_engine();
        let ch = engine.request().unwrap();
        engine.free(ch).unwrap();
        assert!(matches!(engine.freq_of(ch), Err(PwmError::InvalidChannel(_))));
        // the slot is usable again
        assert_eq!(engine.request().unwrap(), ch);
    }

    #[test]
    fn shutdown_all_channels_frees_every_live_slot() {
        let mut engine = bring_up_test_engine();
        let a = engine.request().unwrap();
        let b = engine.request().unwrap();
        engine.set(a, &[4], 1.0, 50.0).unwrap();
        engine.enable(a).unwrap();
        engine.shutdown_all_channels();
        assert!(engine.channel_table.all_free());
        let _ = b;
    }

    #[test]
    fn unreachable_board_fails_bring_up_without_mutating_anything() {
        struct UnknownBoard;
        impl BoardIdentifier for UnknownBoard {
            fn board_revision(&self) -> Result<String> {
                Ok("BCM9999".to_string())
            }
        }
        let allocator: Arc<dyn UncachedAllocator> = FakeAllocator::new();
        let err = Engine::bring_up(&UnknownBoard, &FakeMapper::new(), allocator, 16, 5000.0)
            .unwrap_err();
        assert!(matches!(err, PwmError::NoBoardIdentifier));
    }
}


