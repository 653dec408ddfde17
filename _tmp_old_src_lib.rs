// This file is part of bcm283x-pwm-dma.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! Userspace, DMA-driven PWM engine for the Raspberry Pi (BCM283x/BCM2711).
//!
//! Drives arbitrary GPIO pins with configurable frequency and duty cycle by chaining DMA
//! control blocks that alternately set/clear GPIO output registers and wait on the PWM
//! peripheral's DREQ line; the CPU is uninvolved once a channel is armed.
//!
//! The process-wide [`Engine`] is exposed both as a type you can own directly (recommended when
//! you control your own collaborators, e.g. in tests) and, for parity with the flat C-style API
//! this crate's design is modeled on, as a lazily-initialized global singleton behind the
//! free functions in this module. Requires root (for `/dev/mem` and the mailbox device).

pub mod board;
pub mod cb;
pub mod channel;
pub mod channels;
pub mod collaborators;
pub mod divisor;
pub mod engine;
pub mod error;
pub mod linux;
pub mod mem;
pub mod regs;

pub use collaborators::{BoardIdentifier, MappedRegion, PeripheralMapper, UncachedAllocator, UncachedHandle};
pub use engine::{Engine, RegisterSnapshot};
pub use error::{PwmError, Result};

use std::sync::{Arc, Mutex, OnceLock};

use nix::sys::signal::{self, SigHandler, Signal};

/// Matches spec §3's stated default for `allocated_pages_per_buffer`.
const DEFAULT_ALLOCATED_PAGES_PER_BUFFER: usize = 16;
/// Not specified by the design for the case where `config()` is never called before the first
/// `request()`; 100 µs keeps `divisor`/`pwm_range` comfortably mid-range (divisor 50, range 100).
const DEFAULT_PULSE_WIDTH_US: f64 = 100.0;

static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();
static PENDING_CONFIG: Mutex<(usize, f64)> =
    Mutex::new((DEFAULT_ALLOCATED_PAGES_PER_BUFFER, DEFAULT_PULSE_WIDTH_US));

/// Bounded retry count for the signal handler's `try_lock` loop. A plain `Mutex` cannot be made
/// truly async-signal-safe in safe Rust; this bounds how long the handler spins waiting for the
/// caller's thread to leave a critical section before giving up and exiting anyway (spec §5,
/// §9 — see DESIGN.md for the accepted tradeoff).
const SIGNAL_HANDLER_LOCK_ATTEMPTS: u32 = 10_000;

extern "C" fn handle_termination_signal(signum: i32) {
    if let Some(mutex) = ENGINE.get() {
        for _ in 0..SIGNAL_HANDLER_LOCK_ATTEMPTS {
            if let Ok(mut engine) = mutex.try_lock() {
                engine.shutdown_all_channels();
                break;
            }
            std::hint::spin_loop();
        }
    }
    std::process::exit(128 + signum);
}

/// Installs handlers for HUP, INT, QUIT, TERM that route into the shutdown path (spec §4.H
/// step 1, §6 "Signals caught"). No heap allocation and no stdio on the signal-handler side.
fn install_signal_handlers() -> Result<()> {
    let handler = SigHandler::Handler(handle_termination_signal);
    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM] {
        unsafe { signal::signal(sig, handler) }.map_err(|_| PwmError::SignalHandlerFailed)?;
    }
    Ok(())
}

/// Performs one-time bring-up against the real Linux collaborators on first use (spec §4.H).
fn ensure_initialized() -> Result<()> {
    if ENGINE.get().is_some() {
        return Ok(());
    }
    install_signal_handlers()?;
    let board_identifier = linux::ProcCpuinfoBoardIdentifier::new();
    let mapper = linux::DevMemMapper::new();
    let allocator: Arc<dyn UncachedAllocator> = Arc::new(linux::VideoCoreMailbox::open()?);
    let (pages, pulse_width_us) = *PENDING_CONFIG.lock().expect("pending config poisoned");
    let engine = Engine::bring_up(&board_identifier, &mapper, allocator, pages, pulse_width_us)?;
    // Another thread may have raced us; in the single-threaded usage this crate targets (spec
    // §5) this never happens; if it does, keep whichever engine won and drop ours.
    let _ = ENGINE.set(Mutex::new(engine));
    Ok(())
}

fn with_engine<T>(f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
    ensure_initialized()?;
    let mutex = ENGINE.get().expect("engine initialized above");
    let mut engine = mutex.lock().expect("engine mutex poisoned");
    f(&mut engine)
}

/// Sets `allocated_pages_per_buffer` and the target pulse width for channels requested from now
/// on (spec §4.G `config_global`). Before the engine is initialized this just records the
/// values for the first `request()`'s bring-up; afterward it requires every channel to be free.
pub fn config(pages: usize, pw_us: f64) -> Result<()> {
    if let Some(mutex) = ENGINE.get() {
        let mut engine = mutex.lock().expect("engine mutex poisoned");
        return engine.config_global(pages, pw_us);
    }
    divisor::solve_pulse_width(pw_us)?;
    let mut pending = PENDING_CONFIG.lock().expect("pending config poisoned");
    *pending = (pages.max(1), pw_us);
    Ok(())
}

/// Requests a free channel, triggering engine bring-up on the very first call (spec §4.H, §6).
pub fn request() -> Result<usize> {
    with_engine(|engine| engine.request())
}

/// Builds and (if the channel is enabled) atomically swaps in a new CB ring (spec §4.F, §4.G).
pub fn set(ch: usize, gpios: &[u8], freq_hz: f64, duty_pct: f64) -> Result<()> {
    with_engine(|engine| engine.set(ch, gpios, freq_hz, duty_pct))
}

pub fn enable(ch: usize) -> Result<()> {
    with_engine(|engine| engine.enable(ch))
}

pub fn disable(ch: usize) -> Result<()> {
    with_engine(|engine| engine.disable(ch))
}

pub fn free(ch: usize) -> Result<()> {
    with_engine(|engine| engine.free(ch))
}

pub fn freq_of(ch: usize) -> Result<f64> {
    with_engine(|engine| engine.freq_of(ch))
}

pub fn duty_of(ch: usize) -> Result<f64> {
    with_engine(|engine| engine.duty_of(ch))
}

/// Always succeeds (spec §6): the achieved per-tick pulse width, defaulted if `config()` was
/// never called.
pub fn pulse_width() -> f64 {
    match ENGINE.get() {
        Some(mutex) => mutex.lock().expect("engine mutex poisoned").pulse_width(),
        None => PENDING_CONFIG.lock().expect("pending config poisoned").1,
    }
}

pub fn reg_snapshot(ch: usize) -> Result<RegisterSnapshot> {
    with_engine(|engine| engine.reg_snapshot(ch))
}


