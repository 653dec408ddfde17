// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// SPEC: spec.md §3 data model ("uncached buffer") and §9 design note ("ownership is affine").

use std::sync::Arc;

use crate::collaborators::{UncachedAllocator, UncachedHandle};
use crate::error::Result;

/// One uncached (bus-addressable) allocation, owned affinely: released at most once, either
/// through `release()` or, as a safety net for callers that forget, on `Drop`.
///
/// CBs and the channel layer reference this memory by *bus* address, never by virtual pointer,
/// because the DMA controller walks the CB ring via bus addresses (spec §9).
pub struct UncachedMemory {
    allocator: Arc<dyn UncachedAllocator>,
    handle: UncachedHandle,
    released: bool,
}

impl UncachedMemory {
    pub fn alloc(allocator: Arc<dyn UncachedAllocator>, size: usize, alignment: usize) -> Result<Self> {
        let handle = allocator.alloc(size, alignment)?;
        Ok(UncachedMemory {
            allocator,
            handle,
            released: false,
        })
    }

    pub fn size(&self) -> usize {
        self.handle.size
    }

    /// Virtual pointer to byte 0, valid for `size()` bytes. The caller (the CB synthesizer and
    /// channel layer) is responsible for not mutating this memory while it is the inactive
    /// buffer being traversed by a running channel (spec invariant 1).
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.handle.virt_ptr
    }

    pub fn bus_addr(&self) -> u32 {
        self.allocator.bus_addr_of(&self.handle, 0)
    }

    pub fn bus_addr_of(&self, byte_offset: usize) -> u32 {
        self.allocator.bus_addr_of(&self.handle, byte_offset)
    }

    /// Writes a 32-bit word at `byte_offset`, for the set/clear GPIO mask regions and the CB
    /// array (spec §4.F).
    ///
    /// # Panics
    /// If `byte_offset + 4 > size()`.
    pub fn write_u32(&mut self, byte_offset: usize, value: u32) {
        assert!(byte_offset + 4 <= self.size(), "uncached write out of bounds");
        unsafe {
            let ptr = self.handle.virt_ptr.add(byte_offset) as *mut u32;
            ptr.write_volatile(value);
        }
    }

    pub fn read_u32(&self, byte_offset: usize) -> u32 {
        assert!(byte_offset + 4 <= self.size(), "uncached read out of bounds");
        unsafe {
            let ptr = self.handle.virt_ptr.add(byte_offset) as *const u32;
            ptr.read_volatile()
        }
    }

    /// Explicit release (spec invariant 6: every allocation is released exactly once, including
    /// at `free(ch)` and during signal-driven shutdown).
    pub fn release(&mut self) -> Result<()> {
        if !self.released {
            self.allocator.free(&self.handle)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for UncachedMemory {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.allocator.free(&self.handle) {
                log::warn!("uncached memory leaked on drop: {}", err);
            }
        }
    }
}
