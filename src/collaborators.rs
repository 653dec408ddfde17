// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

//! External collaborator interfaces (spec §6): board identification, `/dev/mem`-style
//! peripheral mapping, and mailbox-backed uncached memory allocation. These are out of scope
//! for the core engine per spec §1 — the engine consumes them only through the traits below,
//! so the CB synthesizer and channel lifecycle engine can be exercised against in-memory fakes
//! in tests without root privileges or real hardware.

use crate::error::Result;

/// Resolves the board identifier, e.g. by reading `/proc/cpuinfo`.
pub trait BoardIdentifier {
    /// Returns a short board code such as `"BCM2835"`, `"BCM2837"`, or `"BCM2711"`.
    fn board_revision(&self) -> Result<String>;
}

/// A live mapping of one peripheral register window.
///
/// Owns whatever keeps the mapping valid (an mmap, a boxed buffer in tests, ...). `as_mut_ptr`
/// is valid for `size` bytes for as long as this value lives.
pub struct MappedRegion {
    ptr: *mut u8,
    size: usize,
    _keep_alive: Box<dyn std::any::Any>,
}

impl MappedRegion {
    pub fn new(ptr: *mut u8, size: usize, keep_alive: Box<dyn std::any::Any>) -> Self {
        MappedRegion {
            ptr,
            size,
            _keep_alive: keep_alive,
        }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

// The mapping is only ever touched while holding the process-wide engine lock (spec §5); the
// raw pointer itself has no interior thread affinity.
unsafe impl Send for MappedRegion {}

/// Maps a peripheral's physical address window into the process (spec §6's "peripheral
/// mapper"; equivalent to `mmap("/dev/mem", ..., PROT_READ|PROT_WRITE, MAP_SHARED, ...)`).
pub trait PeripheralMapper {
    fn map_peripheral(&self, phys_addr: usize, size: usize) -> Result<MappedRegion>;
}

/// A single allocation of uncached (bus-addressable) memory.
///
/// Ownership is affine per spec §9: a handle is released at most once, either explicitly via
/// `UncachedAllocator::free` or by `UncachedMemory`'s `Drop` safety net (§SPEC_FULL component C).
#[derive(Debug)]
pub struct UncachedHandle {
    pub virt_ptr: *mut u8,
    pub size: usize,
    /// Bus address of byte 0 of this allocation, as the DMA controller would address it.
    pub bus_addr: u32,
    /// Allocator-defined token identifying this allocation (e.g. a mailbox memory handle).
    pub token: u32,
    /// Alignment `alloc` actually allocated with; `free` must dealloc with the same value
    /// (the `Layout` contract requires alloc/dealloc to agree).
    pub alignment: usize,
}

// Same reasoning as `MappedRegion`: exclusivity is enforced by the engine's process-wide lock.
unsafe impl Send for UncachedHandle {}

/// Allocates memory the ARM core does not cache, so that DMA control-block writes are
/// immediately visible to the DMA engine (spec §6's "uncached allocator", backed in production
/// by the VideoCore mailbox "direct | coherent" alias).
pub trait UncachedAllocator {
    fn alloc(&self, size: usize, alignment: usize) -> Result<UncachedHandle>;
    fn free(&self, handle: &UncachedHandle) -> Result<()>;
    /// Bus address of `handle`'s memory at `byte_offset`, as the DMA controller would address it.
    fn bus_addr_of(&self, handle: &UncachedHandle, byte_offset: usize) -> u32;
}
