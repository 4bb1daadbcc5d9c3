use serde::{Deserialize, Serialize};

/// Default physical memory map. A host front-end overriding
/// any of these still gets disjointness checked by `Bus::attach` at
/// construction time.
pub const DRAM_BASE: u64 = 0x8000_0000;
pub const CLINT_BASE: u64 = 0x0200_0000;
pub const CLINT_SIZE: u64 = 0x1_0000;
pub const PLIC_BASE: u64 = 0x0c00_0000;
pub const PLIC_SIZE: u64 = 0x20_8000;
pub const UART_BASE: u64 = 0x1000_0000;
pub const UART_SIZE: u64 = 0x100;
pub const VIRTIO_BASE: u64 = 0x1000_1000;
pub const VIRTIO_SIZE: u64 = 0x1000;

/// SYSCON's own address range is `[POWEROFF, REBOOT]` (its two sentinel
/// values double as base/end); it has no independently configurable base.
pub const SYSCON_BASE: u64 = rv_devices::POWEROFF;
pub const SYSCON_END: u64 = rv_devices::REBOOT;

/// Size of the DRAM region reserved for a supplied DTB, taken off the
/// top (the DTB is copied to the top 2 MiB of DRAM).
pub const DTB_RESERVED: u64 = 2 * 1024 * 1024;

/// Plain configuration data for a [`crate::Machine`], serializable so a
/// host front-end can load it from JSON (the core itself never touches
/// the filesystem).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub ram_size: u64,
    pub boot_hart_id: u64,
    #[serde(default = "default_dram_base")]
    pub dram_base: u64,
    #[serde(default = "default_clint_base")]
    pub clint_base: u64,
    #[serde(default = "default_plic_base")]
    pub plic_base: u64,
    #[serde(default = "default_uart_base")]
    pub uart_base: u64,
    #[serde(default = "default_virtio_base")]
    pub virtio_base: u64,
    /// Bytes for the virtio-blk backing image; empty disables the device.
    #[serde(default)]
    pub virtio_image: Vec<u8>,
}

fn default_dram_base() -> u64 {
    DRAM_BASE
}
fn default_clint_base() -> u64 {
    CLINT_BASE
}
fn default_plic_base() -> u64 {
    PLIC_BASE
}
fn default_uart_base() -> u64 {
    UART_BASE
}
fn default_virtio_base() -> u64 {
    VIRTIO_BASE
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            ram_size: 128 * 1024 * 1024,
            boot_hart_id: 0,
            dram_base: DRAM_BASE,
            clint_base: CLINT_BASE,
            plic_base: PLIC_BASE,
            uart_base: UART_BASE,
            virtio_base: VIRTIO_BASE,
            virtio_image: Vec::new(),
        }
    }
}
