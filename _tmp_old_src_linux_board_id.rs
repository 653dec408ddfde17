// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fs;
use std::path::PathBuf;

use crate::collaborators::BoardIdentifier;
use crate::error::{PwmError, Result};

/// Reads the board revision code out of `/proc/cpuinfo` and maps it to a short board name.
///
/// The revision field's upper nibbles encode the SoC on "new-style" (post-2012) revision codes;
/// we only need to distinguish the three SoC families the board-profile resolver cares about.
pub struct ProcCpuinfoBoardIdentifier {
    path: PathBuf,
}

impl ProcCpuinfoBoardIdentifier {
    pub fn new() -> Self {
        ProcCpuinfoBoardIdentifier {
            path: PathBuf::from("/proc/cpuinfo"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        ProcCpuinfoBoardIdentifier { path }
    }
}

impl Default for ProcCpuinfoBoardIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardIdentifier for ProcCpuinfoBoardIdentifier {
    fn board_revision(&self) -> Result<String> {
        let text = fs::read_to_string(&self.path).map_err(|_| PwmError::NoBoardIdentifier)?;
        let revision = text
            .lines()
            .find_map(|line| line.strip_prefix("Revision"))
            .and_then(|rest| rest.split(':').nth(1))
            .map(|s| s.trim())
            .ok_or(PwmError::NoBoardIdentifier)?;
        let code = u32::from_str_radix(revision, 16).map_err(|_| PwmError::NoBoardIdentifier)?;
        // New-style revision codes: bits [12:8] select the processor.
        if code & (1 << 23) != 0 {
            match (code >> 12) & 0xf {
                0 => Ok("BCM2835".to_string()),
                1 | 2 => Ok("BCM2837".to_string()),
                3 => Ok("BCM2711".to_string()),
                _ => Err(PwmError::NoBoardIdentifier),
            }
        } else {
            // Old-style codes predate the BCM2711/2837 and are all BCM2835-based.
            Ok("BCM2835".to_string())
        }
    }
}
