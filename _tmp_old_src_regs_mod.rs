// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! Typed, volatile views over the memory-mapped GPIO / DMA-controller / PWM-controller /
//! PWM-clock register windows (spec §4.B). Each view wraps the base address of an already
//! mapped window (see `crate::collaborators::MappedRegion`) and exposes hardware fields through
//! `register`'s `register_bitfields!`/`ReadWrite` machinery, the same style the teacher crate
//! uses for its bare-metal register blocks.

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod pwm;


