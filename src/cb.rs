// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.F CB-sequence synthesizer

use crate::board::BoardProfile;
use crate::error::{PwmError, Result};
use crate::mem::UncachedMemory;
use crate::regs::dma::ti;
use crate::regs::gpio::{Gpio, GpioFunction};

pub const PAGE_SIZE: usize = 4096;
pub const CB_SIZE: usize = 32;
const CBS_PER_PAGE: usize = PAGE_SIZE / CB_SIZE;

/// One 32-byte DMA control block, natural hardware layout (spec §3).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBlock {
    pub info: u32,
    pub source_ad: u32,
    pub dest_ad: u32,
    pub length: u32,
    pub stride: u32,
    pub next_cb: u32,
    pub _reserved: [u32; 2],
}

fn write_cb(region: &mut UncachedMemory, index: usize, cb: ControlBlock) {
    let base = index * CB_SIZE;
    region.write_u32(base, cb.info);
    region.write_u32(base + 4, cb.source_ad);
    region.write_u32(base + 8, cb.dest_ad);
    region.write_u32(base + 12, cb.length);
    region.write_u32(base + 16, cb.stride);
    region.write_u32(base + 20, cb.next_cb);
    region.write_u32(base + 24, 0);
    region.write_u32(base + 28, 0);
}

/// Results of building a CB ring for one `set()` call: the realized properties recorded on the
/// channel (spec §3 `Channel` "Realized properties" and "CB counts") plus the bus address DMA
/// must be armed at.
#[derive(Debug, Clone, Copy)]
pub struct CbSequence {
    pub freq_act: f64,
    pub duty_act: f64,
    pub duty_resolution_pct: f64,
    pub subcycle_us: f64,
    pub wait_ticks: u32,
    pub cb_set_wait: u32,
    pub cb_clear_wait: u32,
    pub cb_total: usize,
    pub first_cb_bus_addr: u32,
    /// The set mask written into this buffer's `set_mask_region`, retained so `disable()` can
    /// issue a GPCLR0 write for every bit that was last set (spec §4.G, §8 property 7).
    pub set_mask: u32,
}

/// Builds the circular CB list implementing one PWM period for `gpios` at `freq_hz`/`duty_pct`
/// into the given (inactive) buffer halves, and programs those pins as GPIO outputs.
///
/// Callers are responsible for routing this to the *inactive* ping-pong buffer (spec §4.G
/// `set`); this function has no notion of which buffer is currently live.
#[allow(clippy::too_many_arguments)]
pub fn synthesize(
    gpio: &Gpio,
    board: &BoardProfile,
    cb_region: &mut UncachedMemory,
    set_mask_region: &mut UncachedMemory,
    clear_mask_region: &mut UncachedMemory,
    allocated_pages_per_buffer: usize,
    gpios: &[u8],
    freq_hz: f64,
    duty_pct: f64,
    pulse_width_us: f64,
) -> Result<CbSequence> {
    log::debug!("synthesizing CB sequence: freq_hz={freq_hz} duty_pct={duty_pct} gpios={gpios:?}");

    let subcycle_us = 1e6 / freq_hz;
    // Division by 2 reflects that each PWM FIFO DREQ corresponds to two pulse widths (spec §4.F).
    let wait_ticks = (subcycle_us / pulse_width_us / 2.0).floor();
    if wait_ticks < 1.0 {
        log::error!("frequency {freq_hz} Hz cannot be met at pulse width {pulse_width_us} us");
        return Err(PwmError::FrequencyNotMet(freq_hz));
    }
    let wait_ticks = wait_ticks as u32;

    let pages_needed = (wait_ticks as usize + CBS_PER_PAGE - 1) / CBS_PER_PAGE;
    if pages_needed > allocated_pages_per_buffer {
        log::error!(
            "CB sequence needs {pages_needed} page(s), only {allocated_pages_per_buffer} allocated"
        );
        return Err(PwmError::OutOfMemory {
            needed: pages_needed,
            available: allocated_pages_per_buffer,
        });
    }

    let duty_resolution_pct = 100.0 / wait_ticks as f64;
    let duty_act = if duty_pct == 0.0 || duty_pct == 100.0 {
        duty_pct
    } else {
        (duty_pct / duty_resolution_pct).round() * duty_resolution_pct
    };

    let wait_set = (wait_ticks as f64 * duty_act / 100.0 / 2.0).floor() as u32;
    let wait_clear = (wait_ticks as i64 - wait_set as i64).unsigned_abs() as u32;
    // Keyed on the *requested* duty, not the quantized `duty_act` (spec §4.F): a raw duty that
    // rounds to exactly 0%/100% is still the general nonzero case and must keep its clear CB.
    let has_clear_cb = duty_pct != 0.0 && duty_pct != 100.0;
    let cb_total = wait_ticks as usize + if has_clear_cb { 2 } else { 1 };

    let mut set_mask: u32 = 0;
    let mut clear_mask: u32 = 0;
    for &pin in gpios {
        gpio.set_function(pin, GpioFunction::Output);
        set_mask |= 1 << pin;
        clear_mask |= 1 << pin;
    }
    set_mask_region.write_u32(0, set_mask);
    clear_mask_region.write_u32(0, clear_mask);

    let bus = |index: usize| cb_region.bus_addr_of(index * CB_SIZE);

    // i=0: head. Picks GPSET0 (duty > 0) or GPCLR0 (duty == 0) so the waveform starts correct
    // regardless of the "set first" convention below (spec §4.F). Keyed on `duty_pct`, same
    // reasoning as `has_clear_cb` above.
    let head = if duty_pct > 0.0 {
        ControlBlock {
            info: ti::NO_WIDE_BURSTS | ti::WAIT_RESP,
            source_ad: set_mask_region.bus_addr(),
            dest_ad: board.gpset0_bus(),
            length: 4,
            stride: 0,
            next_cb: bus(1),
            _reserved: [0; 2],
        }
    } else {
        ControlBlock {
            info: ti::NO_WIDE_BURSTS | ti::WAIT_RESP,
            source_ad: clear_mask_region.bus_addr(),
            dest_ad: board.gpclr0_bus(),
            length: 4,
            stride: 0,
            next_cb: bus(1),
            _reserved: [0; 2],
        }
    };
    write_cb(cb_region, 0, head);

    let dreq_info = ti::NO_WIDE_BURSTS | ti::WAIT_RESP | ti::DEST_DREQ | ti::permap(5);
    // DREQ-paced CBs write a throwaway word to the PWM FIFO purely to consume a DREQ tick; the
    // source content is irrelevant since the PWM peripheral is never used as a signal source
    // here (spec §1 Non-goals). Reusing the set-mask region avoids a dedicated sentinel region.
    let sentinel_source = set_mask_region.bus_addr();

    let mut index = 1usize;
    for _ in 0..wait_set {
        let next = bus(index + 1);
        write_cb(
            cb_region,
            index,
            ControlBlock {
                info: dreq_info,
                source_ad: sentinel_source,
                dest_ad: board.pwm_fif1_bus(),
                length: 4,
                stride: 0,
                next_cb: next,
                _reserved: [0; 2],
            },
        );
        index += 1;
    }

    if has_clear_cb {
        let next = bus(index + 1);
        write_cb(
            cb_region,
            index,
            ControlBlock {
                info: ti::NO_WIDE_BURSTS | ti::WAIT_RESP,
                source_ad: clear_mask_region.bus_addr(),
                dest_ad: board.gpclr0_bus(),
                length: 4,
                stride: 0,
                next_cb: next,
                _reserved: [0; 2],
            },
        );
        index += 1;
    }

    for _ in 0..wait_clear {
        let next = bus(index + 1);
        write_cb(
            cb_region,
            index,
            ControlBlock {
                info: dreq_info,
                source_ad: sentinel_source,
                dest_ad: board.pwm_fif1_bus(),
                length: 4,
                stride: 0,
                next_cb: next,
                _reserved: [0; 2],
            },
        );
        index += 1;
    }

    debug_assert_eq!(index, cb_total);
    // Close the ring: the last CB written above has `next = bus(index)`, i.e. one past the last
    // valid slot; patch it to point back at CB 0.
    let last = index - 1;
    let last_base = last * CB_SIZE;
    cb_region.write_u32(last_base + 20, bus(0));

    let freq_act = 1e6 / (wait_ticks as f64 * pulse_width_us * 2.0);
    log::debug!("CB sequence built: cb_total={cb_total} freq_act={freq_act} duty_act={duty_act}");

    Ok(CbSequence {
        freq_act,
        duty_act,
        duty_resolution_pct,
        subcycle_us,
        wait_ticks,
        cb_set_wait: wait_set,
        cb_clear_wait: wait_clear,
        cb_total,
        first_cb_bus_addr: bus(0),
        set_mask,
    })
}
