use rv_interrupts::{Clint, Plic};
use rv_mem::{Bus, BusPeripheral, Device};
use rv_types::{Exception, Width};

/// Everything a physical load/store from the hart needs to reach: the
/// generic device bus (RAM, UART, syscon) plus the peripherals kept
/// outside it because the driver needs concrete (not `dyn Device`)
/// access to them — CLINT/PLIC for their CSR-facing half, tightly coupled
/// to the trap machinery, and virtio-blk for its bus-needing delayed disk
/// access. A
/// fresh one is built by the caller every step from borrows it already
/// holds; it owns nothing.
pub struct SystemBus<'a> {
    pub bus: &'a mut Bus,
    pub clint: &'a mut Clint,
    pub clint_base: u64,
    pub plic: &'a mut Plic,
    pub plic_base: u64,
    pub virtio: Option<&'a mut dyn BusPeripheral>,
    pub virtio_base: u64,
}

impl<'a> SystemBus<'a> {
    fn clint_range(&self) -> std::ops::Range<u64> {
        self.clint_base..self.clint_base + 0x10000
    }

    fn plic_range(&self) -> std::ops::Range<u64> {
        self.plic_base..self.plic_base + 0x208000
    }

    fn virtio_range(&self) -> std::ops::Range<u64> {
        self.virtio_base..self.virtio_base + 0x1000
    }

    pub fn load(&mut self, addr: u64, width: Width) -> Result<u64, Exception> {
        if self.clint_range().contains(&addr) {
            self.clint.load(addr - self.clint_base, width)
        } else if self.plic_range().contains(&addr) {
            self.plic.load(addr - self.plic_base, width)
        } else if self.virtio.is_some() && self.virtio_range().contains(&addr) {
            self.virtio.as_deref_mut().unwrap().load(addr - self.virtio_base, width)
        } else {
            self.bus.load(addr, width)
        }
    }

    pub fn store(&mut self, addr: u64, width: Width, value: u64) -> Result<(), Exception> {
        if self.clint_range().contains(&addr) {
            self.clint.store(addr - self.clint_base, width, value)
        } else if self.plic_range().contains(&addr) {
            self.plic.store(addr - self.plic_base, width, value)
        } else if self.virtio.is_some() && self.virtio_range().contains(&addr) {
            self.virtio
                .as_deref_mut()
                .unwrap()
                .store(addr - self.virtio_base, width, value)
        } else {
            self.bus.store(addr, width, value)
        }
    }
}
