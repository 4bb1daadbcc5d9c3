use thiserror::Error;

/// Host-configuration failures: these are never architectural (they can't
/// happen once the guest is running) and are surfaced as ordinary
/// `Result`s rather than routed through the hart's trap machinery.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("device bus construction failed: {0}")]
    Bus(#[from] rv_mem::BusError),

    #[error("RAM image of {image_len} bytes does not fit in {ram_size}-byte DRAM")]
    RamImageTooLarge { image_len: usize, ram_size: usize },

    #[error("DTB of {dtb_len} bytes does not fit in the reserved top 2 MiB of DRAM")]
    DtbTooLarge { dtb_len: usize },

    #[error("DTB is missing the expected 0x0badc0de magic patched with the RAM size")]
    DtbMissingMagic,

    #[error("image load failed: {0}")]
    Unmapped(#[from] rv_types::Exception),
}
