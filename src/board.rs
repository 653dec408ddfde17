// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.A Board-profile resolver

use crate::collaborators::BoardIdentifier;
use crate::error::{PwmError, Result};

/// Peripheral byte offsets from `peri_phys_base`, fixed across all three SoC families.
pub mod offset {
    pub const GPIO: usize = 0x0020_0000;
    pub const DMA: usize = 0x0000_7000;
    pub const PWM: usize = 0x0020_c000;
    pub const PWM_CLOCK: usize = 0x0010_1000;
}

/// Bus-address constants used only by the DMA control blocks (never read/written by the CPU
/// directly, hence expressed relative to `peri_bus_base` rather than a mapped register view).
pub mod bus_offset {
    pub const GPSET0: usize = 0x0020_001c;
    pub const GPCLR0: usize = 0x0020_0028;
    pub const PWM_FIF1: usize = 0x0020_c018;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    pub peri_phys_base: usize,
    pub peri_bus_base: usize,
}

impl BoardProfile {
    pub fn gpio_phys(&self) -> usize {
        self.peri_phys_base + offset::GPIO
    }

    pub fn dma_phys(&self) -> usize {
        self.peri_phys_base + offset::DMA
    }

    pub fn pwm_phys(&self) -> usize {
        self.peri_phys_base + offset::PWM
    }

    pub fn pwm_clock_phys(&self) -> usize {
        self.peri_phys_base + offset::PWM_CLOCK
    }

    pub fn gpset0_bus(&self) -> u32 {
        (self.peri_bus_base + bus_offset::GPSET0) as u32
    }

    pub fn gpclr0_bus(&self) -> u32 {
        (self.peri_bus_base + bus_offset::GPCLR0) as u32
    }

    pub fn pwm_fif1_bus(&self) -> u32 {
        (self.peri_bus_base + bus_offset::PWM_FIF1) as u32
    }
}

/// Maps a detected board identifier to `{peri_phys_base, peri_bus_base}` (spec §4.A table).
pub fn resolve_board_profile(identifier: &dyn BoardIdentifier) -> Result<BoardProfile> {
    let code = identifier.board_revision()?;
    match code.as_str() {
        "BCM2835" => Ok(BoardProfile {
            peri_phys_base: 0x2000_0000,
            peri_bus_base: 0x7e00_0000,
        }),
        "BCM2837" => Ok(BoardProfile {
            peri_phys_base: 0x3f00_0000,
            peri_bus_base: 0x7e00_0000,
        }),
        "BCM2711" => Ok(BoardProfile {
            peri_phys_base: 0xfe00_0000,
            peri_bus_base: 0x7e00_0000,
        }),
        _ => Err(PwmError::NoBoardIdentifier),
    }
}
