// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.H Global bring-up & shutdown, §4.I Validation, §4.J Introspection

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::board::{self, BoardProfile};
use crate::cb::PAGE_SIZE;
use crate::channel::Channel;
use crate::channels::{ChannelTable, NUM_CHANNELS};
use crate::collaborators::{BoardIdentifier, MappedRegion, PeripheralMapper, UncachedAllocator};
use crate::config::EngineConfig;
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
    /// Raw GPCLR0 contents, i.e. the mask last written to clear pins (spec §8 property 7). Real
    /// hardware treats GPCLR0 as write-only (it self-clears to 0 once the write takes effect);
    /// this snapshot instead reflects whatever was last written to the backing memory cell, which
    /// is exactly what the test fakes in `tests/` need to verify `disable()` actually wrote it.
    pub gpio_gpclr0: u32,
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
        log::debug!("bring-up: pages_per_buffer={allocated_pages_per_buffer} pulse_width_us={pulse_width_us}");
        let allocated_pages_per_buffer = allocated_pages_per_buffer.max(1);
        let solution = divisor::solve_pulse_width(pulse_width_us)?;
        let board = board::resolve_board_profile(board_identifier)?;

        let gpio_region = mapper.map_peripheral(board.gpio_phys(), PAGE_SIZE).map_err(|e| {
            log::error!("failed to map GPIO peripheral: {e}");
            e
        })?;
        let dma_region = mapper.map_peripheral(board.dma_phys(), PAGE_SIZE).map_err(|e| {
            log::error!("failed to map DMA controller peripheral: {e}");
            e
        })?;
        let pwm_region = mapper.map_peripheral(board.pwm_phys(), PAGE_SIZE).map_err(|e| {
            log::error!("failed to map PWM controller peripheral: {e}");
            e
        })?;
        let pwm_clock_region = mapper.map_peripheral(board.pwm_clock_phys(), PAGE_SIZE).map_err(|e| {
            log::error!("failed to map PWM clock manager peripheral: {e}");
            e
        })?;

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
        log::debug!(
            "bring-up complete: board={:?} divisor={} pwm_range={}",
            board, solution.divisor, solution.pwm_range
        );

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

    /// Same as `bring_up`, reading `pages_per_buffer`/`pulse_width_us` out of an `EngineConfig`
    /// (spec §4.L/M). `config`'s `devmem_path`/`vcio_path` are consumed by the caller when it
    /// constructs `mapper`/`allocator` (e.g. `DevMemMapper::with_path`), not here: this
    /// constructor only needs the already-built collaborators plus the two numeric knobs.
    pub fn bring_up_with_config(
        board_identifier: &dyn BoardIdentifier,
        mapper: &dyn PeripheralMapper,
        allocator: Arc<dyn UncachedAllocator>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::bring_up(
            board_identifier,
            mapper,
            allocator,
            config.pages_per_buffer,
            config.pulse_width_us,
        )
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
        let slot = self.channel_table.acquire().map_err(|e| {
            log::error!("request() failed: {e}");
            e
        })?;
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
                log::debug!("channel {slot} requested (hw_index={hw_index})");
                Ok(slot)
            }
            Err(err) => {
                log::error!("channel {slot} request failed: {err}");
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
        if let Err(ref e) = result {
            log::warn!("channel {ch} free() encountered an error releasing its regions: {e}");
        }
        self.channels[ch] = None;
        self.channel_table.release(ch);
        log::debug!("channel {ch} freed");
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
            gpio_gpclr0: self.gpio.GPCLR0.get(),
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
