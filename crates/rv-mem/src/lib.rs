//! The device bus: address-to-device routing, fixed-width
//! load/store dispatch, and the per-instruction tick fan-out.

mod ram;

pub use ram::Ram;

use std::ops::Range;

use rv_types::{Exception, Width};
use thiserror::Error;

/// A memory-mapped device. Every bus member — RAM, CLINT, PLIC, UART,
/// virtio, syscon — implements this identical interface.
pub trait Device: Send {
    /// Read `width` bits starting at `addr`, which is relative to the
    /// device's own base (the bus has already subtracted it).
    fn load(&mut self, addr: u64, width: Width) -> Result<u64, Exception>;

    /// Write the low `width` bits of `value` at `addr`.
    fn store(&mut self, addr: u64, width: Width, value: u64) -> Result<(), Exception>;

    /// Advance device-internal state by `elapsed_ms` host milliseconds;
    /// called once per retired instruction. Devices
    /// with no time-driven behavior (RAM, syscon) can use the default.
    fn tick(&mut self, _elapsed_ms: u64) {}

    /// The IRQ number this device is currently asserting on the PLIC, if
    /// any (the driver polls every interrupting peripheral once per
    /// step). Devices with no interrupt line (RAM, syscon) use the default.
    fn pending_irq(&self) -> Option<u32> {
        None
    }
}

/// A peripheral whose periodic behavior needs to reach the rest of the
/// bus rather than just elapsed wall-clock time — virtio-blk's delayed
/// disk access is the one example. Kept outside the generic `Bus`
/// attachment, the same way CLINT/PLIC are (both tightly coupled to the
/// trap machinery), so the driver can reach it through a
/// concrete trait object instead of downcasting a `dyn Device`.
pub trait BusPeripheral: Device {
    fn poll(&mut self, bus: &mut Bus) -> Result<(), Exception>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("device range {new:#x}..{new_end:#x} overlaps existing device range {existing:#x}..{existing_end:#x}")]
    Overlap {
        new: u64,
        new_end: u64,
        existing: u64,
        existing_end: u64,
    },
}

struct Slot {
    range: Range<u64>,
    device: Box<dyn Device>,
}

/// An ordered collection of devices, each claiming a disjoint half-open
/// physical address interval. Lookup is linear and
/// preserves insertion order, as the invariant requires; this is never
/// reordered for correctness, only (optionally) for expected-frequency
/// performance tuning by a caller that owns device placement.
#[derive(Default)]
pub struct Bus {
    slots: Vec<Slot>,
}

impl Bus {
    pub fn new() -> Self {
        Bus { slots: Vec::new() }
    }

    /// Register a device at `[base, base + size)`. Fails if the range
    /// overlaps a device already registered.
    pub fn attach(&mut self, base: u64, size: u64, device: Box<dyn Device>) -> Result<(), BusError> {
        let new_end = base.checked_add(size).expect("device range overflow");
        for slot in &self.slots {
            if base < slot.range.end && slot.range.start < new_end {
                return Err(BusError::Overlap {
                    new: base,
                    new_end,
                    existing: slot.range.start,
                    existing_end: slot.range.end,
                });
            }
        }
        self.slots.push(Slot {
            range: base..new_end,
            device,
        });
        Ok(())
    }

    fn find_mut(&mut self, addr: u64) -> Option<(&mut Slot, u64)> {
        self.slots
            .iter_mut()
            .find(|s| s.range.contains(&addr))
            .map(|s| {
                let offset = addr - s.range.start;
                (s, offset)
            })
    }

    pub fn load(&mut self, addr: u64, width: Width) -> Result<u64, Exception> {
        match self.find_mut(addr) {
            Some((slot, offset)) => slot.device.load(offset, width),
            None => {
                tracing::warn!(addr, ?width, "load access fault: no device at address");
                Err(Exception::LoadAccessFault)
            }
        }
    }

    pub fn store(&mut self, addr: u64, width: Width, value: u64) -> Result<(), Exception> {
        match self.find_mut(addr) {
            Some((slot, offset)) => slot.device.store(offset, width, value),
            None => {
                tracing::warn!(addr, ?width, "store access fault: no device at address");
                Err(Exception::StoreAccessFault)
            }
        }
    }

    /// Fan out one instruction-retire tick to every attached device.
    /// Callers on the hot path (the hart driver) may instead tick only
    /// the time-driven peripherals directly.
    pub fn tick(&mut self, elapsed_ms: u64) {
        for slot in &mut self.slots {
            slot.device.tick(elapsed_ms);
        }
    }

    /// Collects the IRQ numbers every attached device is currently
    /// asserting, for the driver to hand to the PLIC via
    /// `update_pending`.
    pub fn poll_interrupts(&self) -> Vec<u32> {
        self.slots
            .iter()
            .filter_map(|slot| slot.device.pending_irq())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_devices_are_rejected() {
        let mut bus = Bus::new();
        bus.attach(0x1000, 0x100, Box::new(Ram::new(0x100))).unwrap();
        let err = bus
            .attach(0x1080, 0x100, Box::new(Ram::new(0x100)))
            .unwrap_err();
        assert!(matches!(err, BusError::Overlap { .. }));
    }

    #[test]
    fn adjacent_devices_do_not_overlap() {
        let mut bus = Bus::new();
        bus.attach(0x1000, 0x100, Box::new(Ram::new(0x100))).unwrap();
        bus.attach(0x1100, 0x100, Box::new(Ram::new(0x100))).unwrap();
    }

    #[test]
    fn unmapped_access_raises_fault() {
        let mut bus = Bus::new();
        assert_eq!(bus.load(0x1000, Width::Byte), Err(Exception::LoadAccessFault));
        assert_eq!(
            bus.store(0x1000, Width::Byte, 0),
            Err(Exception::StoreAccessFault)
        );
    }
}
