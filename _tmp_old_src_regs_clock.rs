// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// SPEC: BCM2837 ARM Peripherals v2.1 - 6.3 General Purpose GPIO Clocks
//
// Only the PWM clock-manager instance is needed here (spec §4.H.4); the generic per-instance
// offset the teacher crate models isn't required since this engine only ever drives one clock.

use core::ops::Deref;
use register::{mmio::ReadWrite, register_bitfields};

register_bitfields! { u32,
    Control [
        SRC OFFSET(0) NUMBITS(4) [],
        ENAB OFFSET(4) NUMBITS(1) [],
        PASSWD OFFSET(24) NUMBITS(8) []
    ],
    Divisor [
        DIVF OFFSET(0) NUMBITS(12) [],
        DIVI OFFSET(12) NUMBITS(12) [],
        PASSWD OFFSET(24) NUMBITS(8) []
    ]
}

pub const CLOCK_PASSWORD: u32 = 0x5a;
pub const SRC_PLLD: u32 = 6; // 500 MHz

#[allow(non_snake_case)]
#[repr(C)]
pub struct RegisterBlock {
    pub control: ReadWrite<u32, Control::Register>,
    pub divisor: ReadWrite<u32, Divisor::Register>,
}

pub struct PwmClock {
    base_addr: usize,
}

impl PwmClock {
    /// # Safety
    /// `base_addr` must point at a live mapping of the PWM clock-manager register window.
    pub unsafe fn new(base_addr: usize) -> Self {
        PwmClock { base_addr }
    }

    /// Bring-up sequence (spec §4.H.4), each write followed by the mandated 10 µs settle delay
    /// applied by the caller: disable, select PLLD while disabled, program the divisor, enable.
    pub fn disable(&self) {
        self.control.write(Control::PASSWD.val(CLOCK_PASSWORD));
    }

    pub fn select_source_disabled(&self) {
        self.control
            .write(Control::PASSWD.val(CLOCK_PASSWORD) + Control::SRC.val(SRC_PLLD));
    }

    pub fn set_divisor(&self, divisor: u32) {
        self.divisor
            .write(Divisor::PASSWD.val(CLOCK_PASSWORD) + Divisor::DIVI.val(divisor));
    }

    pub fn enable(&self) {
        self.control.write(
            Control::PASSWD.val(CLOCK_PASSWORD)
                + Control::SRC.val(SRC_PLLD)
                + Control::ENAB::SET,
        );
    }

    fn ptr(&self) -> *const RegisterBlock {
        self.base_addr as *const _
    }
}

impl Deref for PwmClock {
    type Target = RegisterBlock;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.ptr() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_divisor_writes_password_and_integer_part() {
        let mut backing = [0u32; 4];
        let clock = unsafe { PwmClock::new(backing.as_mut_ptr() as usize) };
        clock.set_divisor(2500);
        assert_eq!(clock.divisor.get() >> 24, CLOCK_PASSWORD);
        assert_eq!((clock.divisor.get() >> 12) & 0xfff, 2500);
    }

    #[test]
    fn enable_sets_plld_source_and_enable_bit() {
        let mut backing = [0u32; 4];
        let clock = unsafe { PwmClock::new(backing.as_mut_ptr() as usize) };
        clock.enable();
        assert!(clock.control.is_set(Control::ENAB));
        assert_eq!(clock.control.read(Control::SRC), SRC_PLLD);
    }
}


