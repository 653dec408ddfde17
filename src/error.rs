// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

use thiserror::Error;

/// Error taxonomy for every public operation (spec §7).
///
/// Every fallible operation in this crate returns one of these variants; none of the public
/// surface panics or unwraps on a reachable path.
#[derive(Debug, Error)]
pub enum PwmError {
    #[error("config() called while a channel is not free")]
    ChannelAlreadyRequested,

    #[error("pulse width {0} us is out of the accepted (0.4, 3.5e10] range or has no valid divisor/range solution")]
    InvalidPulseWidth(f64),

    #[error("no free DMA channel available")]
    NoFreeChannel,

    #[error("invalid channel index {0}")]
    InvalidChannel(usize),

    #[error("invalid duty cycle {0}, must be in [0, 100]")]
    InvalidDuty(f64),

    #[error("invalid gpio pin {0}, must be in [0, 31]")]
    InvalidGpio(u8),

    #[error("frequency {0} Hz cannot be met at the configured pulse width (wait_ticks would be 0)")]
    FrequencyNotMet(f64),

    #[error("enable() called on channel {0} before set()")]
    PwmNotSet(usize),

    #[error("could not determine board revision")]
    NoBoardIdentifier,

    #[error("failed to map peripheral region at physical address {0:#x}")]
    MapFailed(usize),

    #[error("failed to install termination-signal handler")]
    SignalHandlerFailed,

    #[error("control-block sequence needs {needed} page(s) but only {available} are allocated per buffer")]
    OutOfMemory { needed: usize, available: usize },

    #[error("uncached memory allocator failed: {0}")]
    AllocatorFailed(String),
}

pub type Result<T> = std::result::Result<T, PwmError>;
