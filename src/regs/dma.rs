// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: BCM2837 ARM Peripherals v2.1 - 4 DMA Controller

use core::ops::Deref;
use register::{mmio::ReadWrite, register_bitfields};

register_bitfields! { u32,
    CS [
        ACTIVE OFFSET(0) NUMBITS(1) [],
        END OFFSET(1) NUMBITS(1) [],
        INT OFFSET(2) NUMBITS(1) [],
        DREQ OFFSET(3) NUMBITS(1) [],
        PAUSED OFFSET(4) NUMBITS(1) [],
        DREQ_STOPS_DMA OFFSET(5) NUMBITS(1) [],
        WAITING_FOR_OUTSTANDING_WRITES OFFSET(6) NUMBITS(1) [],
        ERROR OFFSET(8) NUMBITS(1) [],
        PRIORITY OFFSET(16) NUMBITS(4) [],
        PANIC_PRIORITY OFFSET(20) NUMBITS(4) [],
        WAIT_FOR_OUTSTANDING_WRITES OFFSET(28) NUMBITS(1) [],
        DISDEBUG OFFSET(29) NUMBITS(1) [],
        ABORT OFFSET(30) NUMBITS(1) [],
        RESET OFFSET(31) NUMBITS(1) []
    ]
}

/// `TI`/transfer-information bit positions used when building control blocks (spec §4.F).
/// Control blocks are written into plain uncached memory rather than through a register view,
/// so these are exposed as bit-shift constants instead of a `register_bitfields!` block.
pub mod ti {
    pub const WAIT_RESP: u32 = 1 << 3;
    pub const DEST_DREQ: u32 = 1 << 6;
    pub const SRC_DREQ: u32 = 1 << 10;
    pub const NO_WIDE_BURSTS: u32 = 1 << 26;

    pub const fn permap(peripheral: u32) -> u32 {
        peripheral << 16
    }
}

#[allow(non_snake_case)]
#[repr(C)]
pub struct DmaChannelRegisterBlock {
    pub cs: ReadWrite<u32, CS::Register>,
    pub conblk_ad: ReadWrite<u32>,
    pub ti: ReadWrite<u32>,
    pub source_ad: ReadWrite<u32>,
    pub dest_ad: ReadWrite<u32>,
    pub txfr_len: ReadWrite<u32>,
    pub stride: ReadWrite<u32>,
    pub nextconbk: ReadWrite<u32>,
    pub debug: ReadWrite<u32>,
}

/// One DMA channel's register bank, at `controller_base + channel_hw_index * 0x100`
/// (spec §3 data model: `dma_reg` pointer).
pub struct DmaChannel {
    base_addr: usize,
}

impl DmaChannel {
    /// # Safety
    /// `controller_base` must point at a live mapping of the DMA controller register window,
    /// large enough to cover channel `hw_index`'s bank at `controller_base + hw_index * 0x100`.
    pub unsafe fn new(controller_base: usize, hw_index: usize) -> Self {
        DmaChannel {
            base_addr: controller_base + hw_index * 0x100,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cs.is_set(CS::ACTIVE)
    }

    /// Abort the in-flight CB, step 1 of the enable/disable sequence (spec §4.G). Read-modify-
    /// write (`cs |= ABORT`): a plain `write` would also clear PRIORITY/PANIC_PRIORITY.
    pub fn abort(&self) {
        self.cs.modify(CS::ABORT::SET);
    }

    pub fn clear_active(&self) {
        self.cs.modify(CS::ACTIVE::CLEAR);
    }

    /// Clear the transfer-complete latch, step 3 of the enable sequence.
    pub fn clear_end_latch(&self) {
        self.cs.modify(CS::END::SET);
    }

    pub fn reset(&self) {
        self.cs.modify(CS::RESET::SET);
    }

    /// Steps 5-6 of enable: program `CONBLK_AD` then arm priority/outstanding-writes, without
    /// yet asserting `ACTIVE` (spec §4.G).
    pub fn arm(&self, first_cb_bus_addr: u32) {
        self.conblk_ad.set(first_cb_bus_addr);
        self.cs.write(
            CS::PANIC_PRIORITY.val(7)
                + CS::PRIORITY.val(7)
                + CS::WAIT_FOR_OUTSTANDING_WRITES::SET,
        );
    }

    /// Step 7 of enable: `cs |= ACTIVE`, the linearization point at which the new CB ring
    /// becomes effective (spec §5).
    pub fn set_active(&self) {
        self.cs.modify(CS::ACTIVE::SET);
    }

    pub fn snapshot(&self) -> (u32, u32) {
        (self.cs.get(), self.debug.get())
    }

    fn ptr(&self) -> *const DmaChannelRegisterBlock {
        self.base_addr as *const _
    }
}

impl Deref for DmaChannel {
    type Target = DmaChannelRegisterBlock;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.ptr() }
    }
}
