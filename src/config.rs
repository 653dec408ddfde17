// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

// SPEC: spec.md §4.D/§4.H defaults, SPEC_FULL.md §3 ambient data model / component M

use std::path::PathBuf;

/// Bring-up knobs consumed by `Engine::bring_up_with_config` and the top-level `config()`
/// operation. Defaults mirror the hard-coded constants the original program used: `/dev/mem`,
/// `/dev/vcio`, 16 pages per buffer, 5 µs pulse width.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pages_per_buffer: usize,
    pub pulse_width_us: f64,
    /// Overrides the `/dev/mem`-equivalent path `DevMemMapper` opens; `None` keeps its default.
    pub devmem_path: Option<PathBuf>,
    /// Overrides the `/dev/vcio`-equivalent path `VideoCoreMailbox` opens; `None` keeps its
    /// default.
    pub vcio_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pages_per_buffer: 16,
            pulse_width_us: 5.0,
            devmem_path: None,
            vcio_path: None,
        }
    }
}
