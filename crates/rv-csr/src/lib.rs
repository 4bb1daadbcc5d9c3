//! The control-and-status register file: a 4096-entry
//! array with per-address read/write aliasing, privilege gating, and the
//! dedicated handlers for read-only, floating-point, and `satp` CSRs.

pub mod addr;
pub mod mask;

mod file;

pub use file::CsrFile;
