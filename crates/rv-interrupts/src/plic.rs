use rv_mem::Device;
use rv_types::{Exception, Width};

const SIZE: usize = 0x208000;
const PRIORITY_BASE: usize = 0x0000;
const PENDING_BASE: usize = 0x1000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_CONTEXT_STRIDE: usize = 0x80;
const CONTEXT_BASE: usize = 0x20_0000;
const CONTEXT_STRIDE: usize = 0x1000;
/// `threshold` sits at offset 0 of each context's block; stored but
/// unused, since priorities/thresholds need not gate delivery in a
/// minimal implementation.
const CLAIM_OFFSET: usize = 0x4;

/// Number of interrupt contexts implemented: 0 (machine external) and 1
/// (supervisor external). Only context 1 is load-bearing for a
/// Linux-class guest; context 0 is wired identically.
const CONTEXTS: usize = 2;

/// The platform-level interrupt controller: per-source priority, a
/// pending bitmap, per-context enable bitmaps, and per-context
/// threshold/claim registers. Backed by a flat byte buffer the same way
/// `Ram` is, since every register here is a plain load/store target with
/// no bit-packed aliasing to speak of.
pub struct Plic {
    regs: Vec<u8>,
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl Plic {
    pub fn new() -> Self {
        Plic { regs: vec![0u8; SIZE] }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.regs[offset..offset + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.regs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn claim_offset(context: usize) -> usize {
        CONTEXT_BASE + context * CONTEXT_STRIDE + CLAIM_OFFSET
    }

    pub fn is_enabled(&self, context: usize, irq: u32) -> bool {
        let word = irq as usize / 32;
        let offset = ENABLE_BASE + context * ENABLE_CONTEXT_STRIDE + word * 4;
        (self.read_u32(offset) >> (irq % 32)) & 1 != 0
    }

    fn set_pending_bit(&mut self, irq: u32, value: bool) {
        let offset = PENDING_BASE + (irq as usize / 32) * 4;
        let cur = self.read_u32(offset);
        let bit = 1u32 << (irq % 32);
        self.write_u32(offset, if value { cur | bit } else { cur & !bit });
    }

    /// Marks `irq` pending and, for every context it's enabled on and
    /// currently idle, latches it into that context's `claim` register.
    /// `irq == 0` means "no interrupt" and is a no-op, as
    /// source 0 is reserved by the PLIC convention.
    pub fn update_pending(&mut self, irq: u32) {
        if irq == 0 {
            return;
        }
        self.set_pending_bit(irq, true);
        for context in 0..CONTEXTS {
            if self.is_enabled(context, irq) {
                let claim = Self::claim_offset(context);
                if self.read_u32(claim) == 0 {
                    self.write_u32(claim, irq);
                    tracing::trace!(irq, context, "plic: latched into claim register");
                }
            }
        }
    }

    /// Whether `context` currently has a latched, unclaimed interrupt —
    /// what the hart driver checks to raise `mip.SEIP`.
    pub fn context_pending(&self, context: usize) -> bool {
        self.read_u32(Self::claim_offset(context)) != 0
    }
}

impl Device for Plic {
    fn load(&mut self, addr: u64, width: Width) -> Result<u64, Exception> {
        let offset = addr as usize;
        let n = width.bytes();
        let bytes = self.regs.get(offset..offset + n).ok_or(Exception::LoadAccessFault)?;
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn store(&mut self, addr: u64, width: Width, value: u64) -> Result<(), Exception> {
        let offset = addr as usize;
        for context in 0..CONTEXTS {
            if offset == Self::claim_offset(context) {
                let irq = self.read_u32(offset);
                self.set_pending_bit(irq, false);
                self.write_u32(offset, 0);
                return Ok(());
            }
        }
        let n = width.bytes();
        let dst = self
            .regs
            .get_mut(offset..offset + n)
            .ok_or(Exception::StoreAccessFault)?;
        dst.copy_from_slice(&value.to_le_bytes()[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enable(plic: &mut Plic, context: usize, irq: u32) {
        let offset = ENABLE_BASE + context * ENABLE_CONTEXT_STRIDE + (irq as usize / 32) * 4;
        plic.store(offset as u64, Width::Word, 1 << (irq % 32)).unwrap();
    }

    #[test]
    fn update_pending_latches_claim_for_enabled_context() {
        let mut plic = Plic::new();
        enable(&mut plic, 1, 7);
        plic.update_pending(7);
        assert!(plic.context_pending(1));
        assert_eq!(plic.load(Plic::claim_offset(1) as u64, Width::Word).unwrap(), 7);
    }

    #[test]
    fn disabled_irq_is_pending_but_not_claimed() {
        let mut plic = Plic::new();
        plic.update_pending(7);
        assert!(!plic.context_pending(1));
    }

    #[test]
    fn completion_write_clears_pending_and_unlatches() {
        let mut plic = Plic::new();
        enable(&mut plic, 1, 3);
        plic.update_pending(3);
        assert!(plic.context_pending(1));
        plic.store(Plic::claim_offset(1) as u64, Width::Word, 3).unwrap();
        assert!(!plic.context_pending(1));
        let pending = plic.load(PENDING_BASE as u64, Width::Word).unwrap();
        assert_eq!(pending & (1 << 3), 0);
    }

    #[test]
    fn irq_zero_is_a_no_op() {
        let mut plic = Plic::new();
        plic.update_pending(0);
        assert!(!plic.context_pending(0));
        assert!(!plic.context_pending(1));
    }

    #[test]
    fn priority_register_is_plain_storage() {
        let mut plic = Plic::new();
        plic.store(PRIORITY_BASE as u64 + 4 * 5, Width::Word, 3).unwrap();
        assert_eq!(plic.load(PRIORITY_BASE as u64 + 4 * 5, Width::Word).unwrap(), 3);
    }

    #[test]
    fn out_of_range_access_faults() {
        let mut plic = Plic::new();
        assert_eq!(plic.load(SIZE as u64, Width::Word), Err(Exception::LoadAccessFault));
    }
}
