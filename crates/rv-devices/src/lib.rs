//! Peripheral contracts for the devices' bus-side behavior the core must
//! honor but whose own internals (terminal rendering, disk backing) are out
//! of scope: UART, virtio-mmio block, SYSCON. These attach to `rv_mem::Bus` like
//! any other device; the embedder (`rv-machine`) wires their base
//! addresses and, for virtio, drives the bus-needing disk-access half of
//! its tick.

mod syscon;
mod uart;
mod virtio;

pub use syscon::{PowerCell, PowerRequest, Syscon, POWEROFF, REBOOT};
pub use uart::{KeyboardCell, SerialOutput, Uart, UART_IRQN};
pub use virtio::{VirtioBlk, VIRTIO_IRQN};
