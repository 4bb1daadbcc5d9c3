use rv_csr::CsrFile;
use rv_cpu_core::{Hart, StepOutcome, SystemBus};
use rv_devices::{KeyboardCell, PowerCell, PowerRequest, SerialOutput, Syscon, Uart, VirtioBlk};
use rv_interrupts::{Clint, Plic};
use rv_mem::{Bus, Ram};
use rv_mmu::Mmu;
use rv_types::{PrivilegeMode, Width};

use crate::config::{MachineConfig, DTB_RESERVED, SYSCON_BASE, SYSCON_END, UART_SIZE};
use crate::error::MachineError;

/// Owns every piece of architectural and peripheral state for one hart
/// and drives it forward one step at a time. Wiring the
/// components together — base addresses, the boot protocol, RAM/DTB
/// loading — is this crate's entire job; the instruction-level semantics
/// live in `rv-cpu-core`.
pub struct Machine {
    hart: Hart,
    mmu: Mmu,
    bus: Bus,
    clint: Clint,
    plic: Plic,
    virtio: Option<VirtioBlk>,
    clint_base: u64,
    plic_base: u64,
    virtio_base: u64,
    dram_base: u64,
    ram_size: u64,
    keyboard: KeyboardCell,
    serial_out: SerialOutput,
    power: PowerCell,
}

impl Machine {
    /// Builds a machine with RAM, CLINT, PLIC, UART, SYSCON, and
    /// (optionally) a virtio-blk device wired at `config`'s base
    /// addresses, and the hart reset per the boot protocol
    /// with no DTB yet supplied (`x11 = 0`). Call [`Machine::set_dtb`]
    /// afterwards to supply one.
    pub fn new(config: &MachineConfig) -> Result<Machine, MachineError> {
        let mut bus = Bus::new();

        let ram = Ram::new(config.ram_size as usize);
        bus.attach(config.dram_base, config.ram_size, Box::new(ram))?;

        let keyboard = KeyboardCell::new();
        let serial_out = SerialOutput::new();
        let uart = Uart::new(keyboard.clone(), serial_out.clone());
        bus.attach(config.uart_base, UART_SIZE, Box::new(uart))?;

        let power = PowerCell::new();
        let syscon = Syscon::new(power.clone());
        bus.attach(SYSCON_BASE, SYSCON_END - SYSCON_BASE, Box::new(syscon))?;

        let virtio = if config.virtio_image.is_empty() {
            None
        } else {
            Some(VirtioBlk::new(config.virtio_image.clone()))
        };

        // Boot protocol: pc = DRAM base, sp = DRAM base + RAM
        // size, a1 = 0 (no DTB yet), mode = Machine, mstatus = 0 save for
        // misa's XLEN fields — all already `Hart::new()`'s defaults bar pc/sp.
        let mut hart = Hart::new();
        hart.pc = config.dram_base;
        hart.set_reg(2, config.dram_base.wrapping_add(config.ram_size));

        Ok(Machine {
            hart,
            mmu: Mmu::new(),
            bus,
            clint: Clint::new(),
            plic: Plic::new(),
            virtio,
            clint_base: config.clint_base,
            plic_base: config.plic_base,
            virtio_base: config.virtio_base,
            dram_base: config.dram_base,
            ram_size: config.ram_size,
            keyboard,
            serial_out,
            power,
        })
    }

    /// Copies `image` into DRAM starting at its base, for a host front-end
    /// to load a kernel/BIOS (reading the file itself is the embedder's
    /// job, not this crate's).
    pub fn load_ram_image(&mut self, image: &[u8]) -> Result<(), MachineError> {
        if image.len() as u64 > self.ram_size {
            return Err(MachineError::RamImageTooLarge {
                image_len: image.len(),
                ram_size: self.ram_size as usize,
            });
        }
        tracing::info!(bytes = image.len(), base = self.dram_base, "loading ram image");
        self.copy_into_dram(self.dram_base, image)
    }

    /// Copies `dtb` into the top 2 MiB of DRAM, patching the big-endian
    /// `0x0badc0de` magic with the runtime RAM size (also big-endian)
    /// before the copy, and points `x11` (a1) at it per the boot protocol.
    pub fn set_dtb(&mut self, dtb: &[u8]) -> Result<(), MachineError> {
        if dtb.len() as u64 > DTB_RESERVED {
            return Err(MachineError::DtbTooLarge { dtb_len: dtb.len() });
        }
        let magic = 0x0badc0deu32.to_be_bytes();
        let offset = dtb
            .windows(4)
            .position(|w| w == magic)
            .ok_or(MachineError::DtbMissingMagic)?;

        let mut patched = dtb.to_vec();
        patched[offset..offset + 4].copy_from_slice(&(self.ram_size as u32).to_be_bytes());

        let dtb_base = self.dram_base + self.ram_size - DTB_RESERVED;
        self.copy_into_dram(dtb_base, &patched)?;
        self.hart.set_reg(11, dtb_base);
        Ok(())
    }

    fn copy_into_dram(&mut self, base: u64, data: &[u8]) -> Result<(), MachineError> {
        for (i, &byte) in data.iter().enumerate() {
            self.bus.store(base + i as u64, Width::Byte, byte as u64)?;
        }
        Ok(())
    }

    /// Runs one [`rv_cpu_core::step`], routing loads/stores through the
    /// specially-wired CLINT/PLIC/virtio peripherals alongside the
    /// generic bus.
    pub fn step(&mut self, elapsed_ms: u64) -> StepOutcome {
        let mut sysbus = SystemBus {
            bus: &mut self.bus,
            clint: &mut self.clint,
            clint_base: self.clint_base,
            plic: &mut self.plic,
            plic_base: self.plic_base,
            virtio: self.virtio.as_mut().map(|v| v as &mut dyn rv_mem::BusPeripheral),
            virtio_base: self.virtio_base,
        };
        rv_cpu_core::step(&mut self.hart, &mut self.mmu, &mut sysbus, elapsed_ms)
    }

    /// Takes and clears the last power request SYSCON observed, for the
    /// host run loop to act on once per step (the core never calls exit
    /// itself).
    pub fn take_power_request(&mut self) -> Option<PowerRequest> {
        self.power.take()
    }

    /// Feeds one byte to the guest's UART receive path; called from a
    /// host-side keyboard reader.
    pub fn push_keyboard_byte(&self, byte: u8) {
        self.keyboard.push(byte);
    }

    /// Drains bytes the guest has written to UART THR, for a host
    /// front-end to render.
    pub fn drain_serial_output(&self) -> Vec<u8> {
        self.serial_out.drain()
    }

    pub fn pc(&self) -> u64 {
        self.hart.pc
    }

    pub fn reg(&self, i: u32) -> u64 {
        self.hart.reg(i)
    }

    pub fn mode(&self) -> PrivilegeMode {
        self.hart.mode
    }

    pub fn csr(&self) -> &CsrFile {
        &self.hart.csr
    }

    /// Raw bit pattern of floating-point register `i` (NaN-boxed if it
    /// currently holds a `float`), for observing FPU results.
    pub fn freg_bits(&self, i: u32) -> u64 {
        self.hart.freg_bits(i)
    }
}
