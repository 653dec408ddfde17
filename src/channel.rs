// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.G Channel lifecycle engine

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::board::BoardProfile;
use crate::cb::{self, PAGE_SIZE};
use crate::collaborators::UncachedAllocator;
use crate::error::{PwmError, Result};
use crate::mem::UncachedMemory;
use crate::regs::dma::DmaChannel;
use crate::regs::gpio::Gpio;

/// Abort/reset writes are followed by a 10 µs settle delay per the data sheet (spec §4.G, §5).
const REGISTER_SETTLE: Duration = Duration::from_micros(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Requested,
    Configured,
    Running,
    Disabled,
}

/// One ping-pong half: a CB ring plus the two 4-byte GPIO mask regions it references by bus
/// address (spec §3 `Channel`).
struct BufferHalf {
    cb_region: UncachedMemory,
    set_mask_region: UncachedMemory,
    clear_mask_region: UncachedMemory,
}

impl BufferHalf {
    fn alloc(allocator: &Arc<dyn UncachedAllocator>, pages: usize) -> Result<Self> {
        Ok(BufferHalf {
            cb_region: UncachedMemory::alloc(allocator.clone(), pages * PAGE_SIZE, PAGE_SIZE)?,
            set_mask_region: UncachedMemory::alloc(allocator.clone(), 4, 4)?,
            clear_mask_region: UncachedMemory::alloc(allocator.clone(), 4, 4)?,
        })
    }

    /// Releases all three regions, even if one fails; the first error encountered is returned
    /// after every region has been given a chance to release (spec invariant 6).
    fn release(&mut self) -> Result<()> {
        let a = self.cb_region.release();
        let b = self.set_mask_region.release();
        let c = self.clear_mask_region.release();
        a.and(b).and(c)
    }
}

pub struct Channel {
    slot: usize,
    dma_reg: DmaChannel,
    buffers: [BufferHalf; 2],
    active_buf: usize,
    sequence_built: bool,
    enabled: bool,
    state: ChannelState,

    freq_des: f64,
    duty_des: f64,
    freq_act: f64,
    duty_act: f64,
    duty_resolution_pct: f64,
    subcycle_us: f64,
    cb_total: usize,
    cb_set_wait: u32,
    cb_clear_wait: u32,
    last_set_mask: u32,
}

impl Channel {
    /// `request()`'s per-slot work (spec §4.G): allocate both ping-pong buffer halves and bind
    /// this slot's DMA channel register bank.
    pub fn request(
        slot: usize,
        hw_index: usize,
        dma_controller_base: usize,
        allocator: &Arc<dyn UncachedAllocator>,
        pages: usize,
    ) -> Result<Self> {
        let a = BufferHalf::alloc(allocator, pages);
        let a = match a {
            Ok(a) => a,
            Err(e) => return Err(e),
        };
        let b = match BufferHalf::alloc(allocator, pages) {
            Ok(b) => b,
            Err(e) => {
                let mut a = a;
                let _ = a.release();
                return Err(e);
            }
        };

        Ok(Channel {
            slot,
            // SAFETY: `dma_controller_base` is the live DMA controller mapping held by the
            // engine for the lifetime of this channel.
            dma_reg: unsafe { DmaChannel::new(dma_controller_base, hw_index) },
            buffers: [a, b],
            active_buf: 0,
            sequence_built: false,
            enabled: false,
            state: ChannelState::Requested,
            freq_des: 0.0,
            duty_des: 0.0,
            freq_act: 0.0,
            duty_act: 0.0,
            duty_resolution_pct: 0.0,
            subcycle_us: 0.0,
            cb_total: 0,
            cb_set_wait: 0,
            cb_clear_wait: 0,
            last_set_mask: 0,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Builds a new CB ring into the inactive buffer and, if currently enabled, atomically
    /// swaps DMA onto it (spec §4.G `set`).
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &mut self,
        gpio: &Gpio,
        board: &BoardProfile,
        allocated_pages_per_buffer: usize,
        gpios: &[u8],
        freq_hz: f64,
        duty_pct: f64,
        pulse_width_us: f64,
    ) -> Result<()> {
        let inactive = 1 - self.active_buf;
        let half = &mut self.buffers[inactive];
        let seq = cb::synthesize(
            gpio,
            board,
            &mut half.cb_region,
            &mut half.set_mask_region,
            &mut half.clear_mask_region,
            allocated_pages_per_buffer,
            gpios,
            freq_hz,
            duty_pct,
            pulse_width_us,
        )?;

        self.freq_des = freq_hz;
        self.duty_des = duty_pct;
        self.freq_act = seq.freq_act;
        self.duty_act = seq.duty_act;
        self.duty_resolution_pct = seq.duty_resolution_pct;
        self.subcycle_us = seq.subcycle_us;
        self.cb_total = seq.cb_total;
        self.cb_set_wait = seq.cb_set_wait;
        self.cb_clear_wait = seq.cb_clear_wait;
        self.last_set_mask = seq.set_mask;
        self.active_buf = inactive;
        self.sequence_built = true;
        self.state = ChannelState::Configured;
        log::debug!("channel {} configured: buf={} cb_total={}", self.slot, self.active_buf, self.cb_total);

        if self.enabled {
            self.enable()?;
        }
        Ok(())
    }

    fn abort_and_reset(&self) {
        self.dma_reg.abort();
        thread::sleep(REGISTER_SETTLE);
        self.dma_reg.clear_active();
        self.dma_reg.clear_end_latch();
        self.dma_reg.reset();
        thread::sleep(REGISTER_SETTLE);
    }

    /// Arms DMA on the active buffer's first CB (spec §4.G `enable`, steps 1-7).
    pub fn enable(&mut self) -> Result<()> {
        if !self.sequence_built {
            log::error!("channel {} enable() called before set()", self.slot);
            return Err(PwmError::PwmNotSet(self.slot));
        }
        self.abort_and_reset();
        let first_cb = self.buffers[self.active_buf].cb_region.bus_addr();
        self.dma_reg.arm(first_cb);
        self.dma_reg.set_active();
        self.enabled = true;
        self.state = ChannelState::Running;
        log::debug!("channel {} enabled, armed at buf {}", self.slot, self.active_buf);
        Ok(())
    }

    /// Aborts DMA and forces every pin last driven high back low (spec §4.G `disable`).
    /// Idempotent. GPCLR0 is write-1-to-clear per bit, so every previously-set pin is issued its
    /// clear in a single register write (spec §8 property 7).
    pub fn disable(&mut self, gpio: &Gpio) -> Result<()> {
        self.abort_and_reset();
        if self.last_set_mask != 0 {
            gpio.GPCLR0.set(self.last_set_mask);
        }
        self.enabled = false;
        if self.state == ChannelState::Running {
            self.state = ChannelState::Disabled;
        }
        Ok(())
    }

    /// Disables the channel, then releases both buffers' uncached regions (spec §4.G `free`).
    pub fn free(&mut self, gpio: &Gpio) -> Result<()> {
        self.disable(gpio)?;
        let a = self.buffers[0].release();
        let b = self.buffers[1].release();
        a.and(b)
    }

    pub fn last_set_mask(&self) -> u32 {
        self.last_set_mask
    }

    pub fn sequence_built(&self) -> bool {
        self.sequence_built
    }

    pub fn active_buf(&self) -> usize {
        self.active_buf
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn freq_act(&self) -> f64 {
        self.freq_act
    }

    pub fn duty_act(&self) -> f64 {
        self.duty_act
    }

    pub fn subcycle_us(&self) -> f64 {
        self.subcycle_us
    }

    pub fn cb_total(&self) -> usize {
        self.cb_total
    }

    pub fn cb_counts(&self) -> (u32, u32) {
        (self.cb_set_wait, self.cb_clear_wait)
    }

    pub fn dma_snapshot(&self) -> (u32, u32) {
        self.dma_reg.snapshot()
    }

    /// Reads back CB 0 of the active buffer for ring-closure / boundary tests.
    pub fn read_active_cb_u32(&self, index: usize, byte_offset: usize) -> u32 {
        self.buffers[self.active_buf]
            .cb_region
            .read_u32(index * cb::CB_SIZE + byte_offset)
    }

    pub fn active_cb_bus_addr(&self) -> u32 {
        self.buffers[self.active_buf].cb_region.bus_addr()
    }
}
