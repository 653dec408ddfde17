// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// Shared fakes for the integration suites: an in-memory stand-in for each external collaborator
// (spec §6), so a whole engine can be brought up and driven without root or real hardware.

use std::collections::HashSet;
use std::sync::Mutex;

use bcm283x_pwm_dma::{BoardIdentifier, MappedRegion, PeripheralMapper, Result, UncachedAllocator, UncachedHandle};

/// Routes the crate's `log::debug!`/`log::warn!`/`log::error!` calls to stderr when `RUST_LOG`
/// is set, so a failing test's bring-up/teardown trace is visible. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off")).try_init();
}

pub struct FixedBoard(pub &'static str);

impl BoardIdentifier for FixedBoard {
    fn board_revision(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Hands out boxed, leaked, zeroed buffers instead of real `/dev/mem` mmaps.
pub struct FakeMapper;

impl PeripheralMapper for FakeMapper {
    fn map_peripheral(&self, _phys_addr: usize, size: usize) -> Result<MappedRegion> {
        let mut buf = vec![0u8; size].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        Ok(MappedRegion::new(ptr, size, Box::new(buf)))
    }
}

/// Plain-heap `UncachedAllocator`, tracking live/freed tokens for invariant 6 ("every region
/// released exactly once").
pub struct FakeAllocator {
    next_token: Mutex<u32>,
    live: Mutex<HashSet<u32>>,
    freed: Mutex<Vec<u32>>,
}

impl FakeAllocator {
    pub fn new() -> Self {
        FakeAllocator {
            next_token: Mutex::new(1),
            live: Mutex::new(HashSet::new()),
            freed: Mutex::new(Vec::new()),
        }
    }

    pub fn freed_tokens(&self) -> Vec<u32> {
        self.freed.lock().unwrap().clone()
    }
}

impl UncachedAllocator for FakeAllocator {
    fn alloc(&self, size: usize, alignment: usize) -> Result<UncachedHandle> {
        let layout = std::alloc::Layout::from_size_align(size.max(1), alignment.max(1)).unwrap();
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let mut token = self.next_token.lock().unwrap();
        let this_token = *token;
        *token += 1;
        self.live.lock().unwrap().insert(this_token);
        Ok(UncachedHandle {
            virt_ptr: ptr,
            size,
            bus_addr: 0x4000_0000 + (this_token << 16),
            token: this_token,
            alignment: alignment.max(1),
        })
    }

    fn free(&self, handle: &UncachedHandle) -> Result<()> {
        let mut live = self.live.lock().unwrap();
        if !live.remove(&handle.token) {
            panic!("double free of token {}", handle.token);
        }
        self.freed.lock().unwrap().push(handle.token);
        let layout =
            std::alloc::Layout::from_size_align(handle.size.max(1), handle.alignment).unwrap();
        unsafe { std::alloc::dealloc(handle.virt_ptr, layout) };
        Ok(())
    }

    fn bus_addr_of(&self, handle: &UncachedHandle, byte_offset: usize) -> u32 {
        handle.bus_addr.wrapping_add(byte_offset as u32)
    }
}
