use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use rv_mem::Device;
use rv_types::{Exception, Width};

/// Register offsets for the 16550A-subset UART contract.
const THR_RHR: u64 = 0;
const IER: u64 = 1;
const ISR_FCR: u64 = 2;
const LCR: u64 = 3;
const MCR: u64 = 4;
const LSR: u64 = 5;
const MSR: u64 = 6;
const SCR: u64 = 7;

const LSR_DR: u8 = 0x01;
const LSR_THRE: u8 = 0x20;
const LSR_TEMT: u8 = 0x40;

const IER_RDI: u8 = 0x01;
const IER_THRI: u8 = 0x02;

/// The IRQ number this device asserts on the PLIC.
pub const UART_IRQN: u32 = 10;

/// A single pending input byte shared with a host-side keyboard reader
/// thread: keyboard polling may run on a separate host-side reader thread
/// and communicate a single pending byte via an atomic cell. `u16` so
/// `None` ("no byte") is representable without a second
/// flag: the top bit marks validity.
#[derive(Clone, Default)]
pub struct KeyboardCell(Arc<AtomicU16>);

const EMPTY: u16 = 0xffff;

impl KeyboardCell {
    pub fn new() -> Self {
        KeyboardCell(Arc::new(AtomicU16::new(EMPTY)))
    }

    /// Called from the host reader thread; overwrites any byte not yet
    /// consumed by the hart.
    pub fn push(&self, byte: u8) {
        self.0.store(byte as u16, Ordering::Release);
    }

    fn take(&self) -> Option<u8> {
        let v = self.0.swap(EMPTY, Ordering::AcqRel);
        if v == EMPTY {
            None
        } else {
            Some(v as u8)
        }
    }
}

/// Bytes the guest has written to THR, shared with a host front-end that
/// renders them (the terminal itself is out of scope here). Mirrors
/// [`KeyboardCell`]'s input-side sharing so the host can drain output
/// without needing typed access back into whatever owns the `Uart` once
/// it's attached to the bus.
#[derive(Clone, Default)]
pub struct SerialOutput(Arc<Mutex<VecDeque<u8>>>);

impl SerialOutput {
    pub fn new() -> Self {
        SerialOutput(Arc::new(Mutex::new(VecDeque::new())))
    }

    fn push(&self, byte: u8) {
        self.0.lock().unwrap().push_back(byte);
    }

    /// Drains every byte written so far, for a host front-end to render.
    pub fn drain(&self) -> Vec<u8> {
        self.0.lock().unwrap().drain(..).collect()
    }
}

/// A 16550A-subset UART. Byte-wide MMIO; the host-facing terminal/keyboard
/// rendering this talks to is out of scope here and is represented only
/// by the [`SerialOutput`] a front-end
/// drains and the [`KeyboardCell`] a front-end feeds.
pub struct Uart {
    ier: u8,
    isr: u8,
    fcr: u8,
    lcr: u8,
    mcr: u8,
    lsr: u8,
    msr: u8,
    scr: u8,
    rhr: u8,
    output: SerialOutput,
    keyboard: KeyboardCell,
    irq_pending: bool,
}

impl Uart {
    pub fn new(keyboard: KeyboardCell, output: SerialOutput) -> Self {
        Uart {
            ier: 0,
            isr: 0x01,
            fcr: 0,
            lcr: 0,
            mcr: 0,
            lsr: LSR_THRE | LSR_TEMT,
            msr: 0,
            scr: 0,
            rhr: 0,
            output,
            keyboard,
            irq_pending: false,
        }
    }

    fn refresh_irq(&mut self) {
        let want = (self.ier & IER_RDI != 0 && self.lsr & LSR_DR != 0)
            || (self.ier & IER_THRI != 0 && self.lsr & LSR_TEMT != 0);
        self.irq_pending = want;
    }
}

impl Device for Uart {
    fn load(&mut self, addr: u64, _width: Width) -> Result<u64, Exception> {
        let v = match addr {
            THR_RHR => {
                let byte = self.rhr;
                self.lsr &= !LSR_DR;
                self.refresh_irq();
                byte
            }
            IER => self.ier,
            ISR_FCR => self.isr,
            LCR => self.lcr,
            MCR => self.mcr,
            LSR => self.lsr,
            MSR => self.msr,
            SCR => self.scr,
            _ => 0,
        };
        Ok(v as u64)
    }

    fn store(&mut self, addr: u64, _width: Width, value: u64) -> Result<(), Exception> {
        let byte = value as u8;
        match addr {
            THR_RHR => {
                self.output.push(byte);
                // LSR.THRE/TEMT are always set in this model.
            }
            IER => self.ier = byte,
            ISR_FCR => self.fcr = byte,
            LCR => self.lcr = byte,
            MCR => self.mcr = byte,
            LSR | MSR => {} // read-only
            SCR => self.scr = byte,
            _ => {}
        }
        self.refresh_irq();
        Ok(())
    }

    /// Polls the shared keyboard cell for a byte the host reader thread
    /// placed there; sets `LSR.DR` and recomputes the
    /// interrupt gate.
    fn tick(&mut self, _elapsed_ms: u64) {
        if self.lsr & LSR_DR == 0 {
            if let Some(byte) = self.keyboard.take() {
                self.rhr = byte;
                self.lsr |= LSR_DR;
                self.refresh_irq();
            }
        }
    }

    fn pending_irq(&self) -> Option<u32> {
        self.irq_pending.then_some(UART_IRQN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsr_starts_transmit_empty() {
        let uart = Uart::new(KeyboardCell::new(), SerialOutput::new());
        assert_eq!(uart.lsr, LSR_THRE | LSR_TEMT);
    }

    #[test]
    fn writing_thr_buffers_output_and_keeps_lsr_empty() {
        let output = SerialOutput::new();
        let mut uart = Uart::new(KeyboardCell::new(), output.clone());
        uart.store(THR_RHR, Width::Byte, b'A' as u64).unwrap();
        uart.store(THR_RHR, Width::Byte, b'B' as u64).unwrap();
        assert_eq!(output.drain(), vec![b'A', b'B']);
        assert_eq!(uart.lsr & LSR_THRE, LSR_THRE);
    }

    #[test]
    fn keyboard_byte_sets_data_ready_and_clears_on_read() {
        let kb = KeyboardCell::new();
        let mut uart = Uart::new(kb.clone(), SerialOutput::new());
        kb.push(b'x');
        uart.tick(0);
        assert_eq!(uart.lsr & LSR_DR, LSR_DR);
        let byte = uart.load(THR_RHR, Width::Byte).unwrap();
        assert_eq!(byte, b'x' as u64);
        assert_eq!(uart.lsr & LSR_DR, 0);
    }

    #[test]
    fn irq_asserted_only_when_enabled_and_condition_true() {
        let kb = KeyboardCell::new();
        let mut uart = Uart::new(kb.clone(), SerialOutput::new());
        assert_eq!(uart.pending_irq(), None);

        uart.store(IER, Width::Byte, IER_RDI as u64).unwrap();
        assert_eq!(uart.pending_irq(), None);

        kb.push(b'z');
        uart.tick(0);
        assert_eq!(uart.pending_irq(), Some(UART_IRQN));

        uart.load(THR_RHR, Width::Byte).unwrap();
        assert_eq!(uart.pending_irq(), None);
    }

    #[test]
    fn thri_interrupt_fires_since_transmitter_is_always_empty() {
        let mut uart = Uart::new(KeyboardCell::new(), SerialOutput::new());
        uart.store(IER, Width::Byte, IER_THRI as u64).unwrap();
        assert_eq!(uart.pending_irq(), Some(UART_IRQN));
    }
}
