// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: BCM2837 ARM Peripherals v2.1 - 9 Pulse Width Modulator
//
// Used here solely as a paced DREQ generator for DMA throttling (spec §1 Non-goals) — channel 1
// is configured once at bring-up and never touched again per-waveform.

use core::ops::Deref;
use register::{mmio::ReadWrite, register_bitfields};

register_bitfields! { u32,
    DMAC [
        DREQ OFFSET(0) NUMBITS(8) [],
        PANIC OFFSET(8) NUMBITS(8) [],
        ENAB OFFSET(31) NUMBITS(1) []
    ]
}

#[allow(non_snake_case)]
#[repr(C)]
pub struct RegisterBlock {
    pub ctl: ReadWrite<u32>,
    pub sta: ReadWrite<u32>,
    pub dmac: ReadWrite<u32, DMAC::Register>,
    _reserved_0: u32,
    pub rng1: ReadWrite<u32>,
}

const CTL_PWEN1: u32 = 1 << 0;
const CTL_USEF1: u32 = 1 << 5;
const CTL_CLRF1: u32 = 1 << 6;

pub struct Pwm {
    base_addr: usize,
}

impl Pwm {
    /// # Safety
    /// `base_addr` must point at a live mapping of the PWM controller register window.
    pub unsafe fn new(base_addr: usize) -> Self {
        Pwm { base_addr }
    }

    /// Bring-up sequence step (spec §4.H.5): `ctl ← 0; rng1 ← pwm_range; dmac ← DMA_ENABLE |
    /// DREQ_THRESH(15) | PANIC_THRESH(15); ctl ← CLEAR_FIFO; ctl ← USE_FIFO | CH1_ENABLE`.
    pub fn bring_up(&self, pwm_range: u32) {
        self.ctl.set(0);
        self.rng1.set(pwm_range);
        self.dmac
            .write(DMAC::ENAB::SET + DMAC::DREQ.val(15) + DMAC::PANIC.val(15));
        self.ctl.set(CTL_CLRF1);
        self.ctl.set(CTL_USEF1 | CTL_PWEN1);
    }

    fn ptr(&self) -> *const RegisterBlock {
        self.base_addr as *const _
    }
}

impl Deref for Pwm {
    type Target = RegisterBlock;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.ptr() }
    }
}
