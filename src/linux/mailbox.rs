// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: https://github.com/raspberrypi/firmware/wiki/Mailbox-property-interface
//
// Same property-tag protocol as the teacher crate's `device::mbox::Mbox`, but carried over
// `/dev/vcio` (a Linux character device exposing a single ioctl) instead of bare-metal mailbox
// MMIO registers, since userspace has no direct access to the VideoCore mailbox peripheral.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::collaborators::{MappedRegion, PeripheralMapper, UncachedAllocator, UncachedHandle};
use crate::error::{PwmError, Result};

const MBOX_ALIGNMENT: usize = 16;

const MEM_FLAG_DIRECT: u32 = 1 << 2;
const MEM_FLAG_COHERENT: u32 = 1 << 3;

const TAG_ALLOCATE_MEMORY: u32 = 0x0003_000c;
const TAG_LOCK_MEMORY: u32 = 0x0003_000d;
const TAG_UNLOCK_MEMORY: u32 = 0x0003_000e;
const TAG_RELEASE_MEMORY: u32 = 0x0003_000f;

const CODE_REQUEST: u32 = 0x0000_0000;
const CODE_RESPONSE_SUCCESS: u32 = 0x8000_0000;
const TAG_END: u32 = 0;

/// Allocates uncached, bus-addressable memory through the VideoCore mailbox property interface
/// over `/dev/vcio`.
pub struct VideoCoreMailbox {
    file: Mutex<File>,
    /// Keeps each allocation's `/dev/mem` mapping alive until `free` unmaps it explicitly;
    /// without this the mapping would otherwise have to be leaked (spec §9 affine ownership).
    regions: Mutex<HashMap<u32, MappedRegion>>,
}

impl VideoCoreMailbox {
    pub fn open() -> Result<Self> {
        Self::open_path(PathBuf::from("/dev/vcio"))
    }

    pub fn open_path(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path).map_err(|e| {
            log::error!("failed to open {:?}: {e}", path);
            PwmError::AllocatorFailed(format!("open {:?}: {}", path, e))
        })?;
        Ok(VideoCoreMailbox {
            file: Mutex::new(file),
            regions: Mutex::new(HashMap::new()),
        })
    }

    /// Issues one property-tag call, filling `buffer` in place the way `Mbox::property` does
    /// in the teacher crate, and returns the tag's response words.
    fn property(&self, tag: u32, request: &[u32]) -> Result<Vec<u32>> {
        let mut buffer: Vec<u32> = Vec::with_capacity(6 + request.len() + 1);
        buffer.push(0); // overall size, patched below
        buffer.push(CODE_REQUEST);
        buffer.push(tag);
        buffer.push((request.len() * std::mem::size_of::<u32>()) as u32);
        buffer.push((request.len() * std::mem::size_of::<u32>()) as u32);
        buffer.extend_from_slice(request);
        buffer.push(TAG_END);
        let total_bytes = buffer.len() * std::mem::size_of::<u32>();
        buffer[0] = total_bytes as u32;

        let file = self.file.lock().unwrap();
        let request_code = mbox_property_request_code();
        let ret = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                request_code,
                buffer.as_mut_ptr() as *mut libc::c_void,
            )
        };
        if ret < 0 {
            log::error!("mailbox ioctl failed for tag 0x{tag:08x}");
            return Err(PwmError::AllocatorFailed("mailbox ioctl failed".to_string()));
        }
        if buffer[1] != CODE_RESPONSE_SUCCESS {
            log::error!("mailbox request for tag 0x{tag:08x} failed, code=0x{:08x}", buffer[1]);
            return Err(PwmError::AllocatorFailed(format!(
                "mailbox request failed, code=0x{:08x}",
                buffer[1]
            )));
        }
        Ok(buffer[5..5 + request.len()].to_vec())
    }
}

/// Builds the `_IOWR(100, 0, char *)` request code for the architecture's pointer width, mirroring
/// the `IOCTL_MBOX_PROPERTY` constant from the Raspberry Pi firmware's userland mailbox client.
fn mbox_property_request_code() -> libc::c_ulong {
    const IOC_READ: u32 = 2;
    const IOC_WRITE: u32 = 1;
    const MAJOR: u32 = 100;
    const NR: u32 = 0;
    let size = std::mem::size_of::<*mut u8>() as u32;
    let dir = IOC_READ | IOC_WRITE;
    (((dir << 30) | (size << 16) | (MAJOR << 8) | NR) as libc::c_ulong)
}

impl UncachedAllocator for VideoCoreMailbox {
    fn alloc(&self, size: usize, alignment: usize) -> Result<UncachedHandle> {
        let aligned_size = round_up(size, alignment.max(MBOX_ALIGNMENT));
        let handle_words = self.property(
            TAG_ALLOCATE_MEMORY,
            &[
                aligned_size as u32,
                alignment.max(MBOX_ALIGNMENT) as u32,
                MEM_FLAG_DIRECT | MEM_FLAG_COHERENT,
            ],
        )?;
        let handle = handle_words[0];
        let bus_addr_words = self.property(TAG_LOCK_MEMORY, &[handle])?;
        let bus_addr = bus_addr_words[0];
        // The "direct | coherent" alias maps bus address 0x4000_0000-and-up back into an
        // uncached virtual window; userspace instead mmaps that alias through /dev/mem at the
        // bus address with the top alias bits masked off, which is exactly what the channel
        // layer needs: a virtual pointer usable by the CPU and a bus address usable by the DMA
        // engine, both backed by the same physical page.
        let phys_addr = bus_addr & 0x3fff_ffff;
        let mapper = crate::linux::DevMemMapper::new();
        let region = mapper.map_peripheral(phys_addr as usize, aligned_size)?;
        let virt_ptr = region.as_mut_ptr();
        self.regions.lock().unwrap().insert(handle, region);
        Ok(UncachedHandle {
            virt_ptr,
            size: aligned_size,
            bus_addr,
            token: handle,
            alignment: alignment.max(MBOX_ALIGNMENT),
        })
    }

    fn free(&self, handle: &UncachedHandle) -> Result<()> {
        self.property(TAG_UNLOCK_MEMORY, &[handle.token])?;
        self.property(TAG_RELEASE_MEMORY, &[handle.token])?;
        // Dropping the removed region unmaps it; if it's already gone (double free past the
        // mailbox calls above, which would themselves have errored) there's nothing left to do.
        self.regions.lock().unwrap().remove(&handle.token);
        Ok(())
    }

    fn bus_addr_of(&self, handle: &UncachedHandle, byte_offset: usize) -> u32 {
        handle.bus_addr.wrapping_add(byte_offset as u32)
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_code_is_readwrite_with_pointer_size() {
        let code = mbox_property_request_code();
        let size_field = (code >> 16) & 0x3fff;
        assert_eq!(size_field as usize, std::mem::size_of::<*mut u8>());
    }

    #[test]
    fn round_up_rounds_to_alignment() {
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 16), 32);
    }
}
