use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rv_mem::Device;
use rv_types::{Exception, Width};

/// Sentinel store values recognised by the SYSCON device. The device's own
/// address range is `[poweroff, reboot]`: the two sentinels double as the
/// base/end of its one-word MMIO window.
pub const POWEROFF: u64 = 0x5555;
pub const REBOOT: u64 = 0x7777;

/// Result of a store to the SYSCON device, for the host front-end that
/// owns the process (argument parsing and process exit live entirely with
/// the embedder). The core never calls `exit` itself;
/// it reports the request and lets the embedder act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    PowerOff,
    Reboot,
}

const NONE: u8 = 0;
const POWER_OFF: u8 = 1;
const REBOOT_BIT: u8 = 2;

/// A pending power request shared with the embedder's run loop, mirroring
/// [`crate::uart::KeyboardCell`]'s pattern so it can be read back after
/// `Syscon` is boxed into the generic bus.
#[derive(Clone, Default)]
pub struct PowerCell(Arc<AtomicU8>);

impl PowerCell {
    pub fn new() -> Self {
        PowerCell(Arc::new(AtomicU8::new(NONE)))
    }

    fn push(&self, req: PowerRequest) {
        let bit = match req {
            PowerRequest::PowerOff => POWER_OFF,
            PowerRequest::Reboot => REBOOT_BIT,
        };
        self.0.store(bit, Ordering::Release);
    }

    /// Takes and clears the last power request observed, for the
    /// embedder's run loop to act on once per step.
    pub fn take(&self) -> Option<PowerRequest> {
        match self.0.swap(NONE, Ordering::AcqRel) {
            POWER_OFF => Some(PowerRequest::PowerOff),
            REBOOT_BIT => Some(PowerRequest::Reboot),
            _ => None,
        }
    }
}

/// The power-management sentinel device: a store of `0x5555` requests
/// power-off, `0x7777` requests reboot. Reads always return zero.
pub struct Syscon {
    request: PowerCell,
}

impl Syscon {
    pub fn new(request: PowerCell) -> Self {
        Syscon { request }
    }
}

impl Device for Syscon {
    fn load(&mut self, _addr: u64, _width: Width) -> Result<u64, Exception> {
        Ok(0)
    }

    fn store(&mut self, _addr: u64, _width: Width, value: u64) -> Result<(), Exception> {
        match value {
            POWEROFF => {
                tracing::info!("SYSCON: power-off requested");
                self.request.push(PowerRequest::PowerOff);
            }
            REBOOT => {
                tracing::info!("SYSCON: reboot requested");
                self.request.push(PowerRequest::Reboot);
            }
            _ => {}
        }
        Ok(())
    }
}
