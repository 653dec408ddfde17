// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: BCM2837 ARM Peripherals v2.1 - 6 General Purpose I/O (GPIO)

use core::ops::Deref;
use register::mmio::ReadWrite;

/// GPIO pin-function codes (spec §4.F: pins driven by a CB ring must be configured `Output`).
#[allow(unused)]
#[derive(Copy, Clone)]
pub enum GpioFunction {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

#[allow(non_snake_case)]
#[repr(C)]
pub struct RegisterBlock {
    pub GPFSEL0: ReadWrite<u32>,
    pub GPFSEL1: ReadWrite<u32>,
    pub GPFSEL2: ReadWrite<u32>,
    pub GPFSEL3: ReadWrite<u32>,
    pub GPFSEL4: ReadWrite<u32>,
    pub GPFSEL5: ReadWrite<u32>,
    __reserved_0: u32,
    pub GPSET0: ReadWrite<u32>,
    pub GPSET1: ReadWrite<u32>,
    __reserved_1: u32,
    pub GPCLR0: ReadWrite<u32>,
    pub GPCLR1: ReadWrite<u32>,
}

pub struct Gpio {
    base_addr: usize,
}

impl Gpio {
    /// # Safety
    /// `base_addr` must point at a live mapping of the GPIO register window for at least the
    /// lifetime of this value (spec §4.B).
    pub unsafe fn new(base_addr: usize) -> Self {
        Gpio { base_addr }
    }

    /// Sets pin `pin`'s function-select field (spec §4.F: clear the 3-bit field at
    /// `(pin % 10) * 3` in word `pin / 10`, then OR in the new function).
    pub fn set_function(&self, pin: u8, function: GpioFunction) {
        let word = (pin / 10) as usize;
        let shift = (pin % 10) * 3;
        let mask = 0b111u32 << shift;
        let value = (function as u32) << shift;
        let reg = self.fsel_register(word);
        let before = reg.get();
        reg.set((before & !mask) | value);
    }

    fn fsel_register(&self, word: usize) -> &ReadWrite<u32> {
        match word {
            0 => &self.GPFSEL0,
            1 => &self.GPFSEL1,
            2 => &self.GPFSEL2,
            3 => &self.GPFSEL3,
            4 => &self.GPFSEL4,
            5 => &self.GPFSEL5,
            _ => unreachable!("GPIO pin out of [0,31] range was validated before reaching here"),
        }
    }

    fn ptr(&self) -> *const RegisterBlock {
        self.base_addr as *const _
    }
}

impl Deref for Gpio {
    type Target = RegisterBlock;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.ptr() }
    }
}
