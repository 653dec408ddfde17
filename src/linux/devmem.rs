// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapOptions;

use crate::collaborators::{MappedRegion, PeripheralMapper};
use crate::error::{PwmError, Result};

/// Maps peripheral register windows by `mmap`-ing `/dev/mem` `PROT_READ | PROT_WRITE |
/// MAP_SHARED`, the standard Linux idiom for userspace access to memory-mapped I/O.
pub struct DevMemMapper {
    path: PathBuf,
}

impl DevMemMapper {
    pub fn new() -> Self {
        DevMemMapper {
            path: PathBuf::from("/dev/mem"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        DevMemMapper { path }
    }
}

impl Default for DevMemMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralMapper for DevMemMapper {
    fn map_peripheral(&self, phys_addr: usize, size: usize) -> Result<MappedRegion> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path).map_err(|e| {
            log::error!("failed to open {:?}: {e}", self.path);
            PwmError::MapFailed(phys_addr)
        })?;
        let mut map = unsafe {
            MmapOptions::new().offset(phys_addr as u64).len(size).map_mut(&file).map_err(|e| {
                log::error!("failed to mmap {:?} at phys_addr=0x{phys_addr:x} size={size}: {e}", self.path);
                PwmError::MapFailed(phys_addr)
            })?
        };
        let ptr = map.as_mut_ptr();
        Ok(MappedRegion::new(ptr, size, Box::new(map)))
    }
}
