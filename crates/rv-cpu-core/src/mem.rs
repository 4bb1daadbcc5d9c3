//! Loads, stores, `FENCE`, and the A-extension (AMO/LR/SC). Every access
//! goes through the MMU for translation and then the system bus for the
//! physical read/write, so CLINT/PLIC/UART/virtio are reachable the same
//! way RAM is.

use rv_decode::Insn;
use rv_mmu::{Mmu, TranslationContext};
use rv_types::{AccessType, Exception, PhysAddr, VirtAddr, Width};

use crate::driver::ControlFlow;
use crate::hart::Hart;
use crate::sysbus::SystemBus;

const LOAD: u32 = 0x03;
const STORE: u32 = 0x23;
const AMO: u32 = 0x2f;
const MISC_MEM: u32 = 0x0f;

pub(crate) fn translation_ctx(hart: &Hart, access: AccessType) -> TranslationContext {
    let eff_mode = if access != AccessType::Instruction && hart.csr.mstatus_mprv() {
        hart.csr.mstatus_mpp()
    } else {
        hart.mode
    };
    TranslationContext {
        mode: hart.mode,
        eff_mode,
        mxr: hart.csr.mstatus_mxr(),
        sum: hart.csr.mstatus_sum(),
    }
}

pub(crate) fn translate(
    hart: &Hart,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
    vaddr: VirtAddr,
    access: AccessType,
) -> Result<PhysAddr, Exception> {
    let ctx = translation_ctx(hart, access);
    mmu.translate(vaddr, access, &ctx, sysbus.bus)
}

pub(crate) fn read(
    hart: &mut Hart,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
    vaddr: VirtAddr,
    width: Width,
) -> Result<u64, Exception> {
    let pa = translate(hart, mmu, sysbus, vaddr, AccessType::Load).map_err(|e| {
        hart.pending_tval = vaddr;
        e
    })?;
    sysbus.load(pa, width).map_err(|e| {
        hart.pending_tval = vaddr;
        e
    })
}

pub(crate) fn write(
    hart: &mut Hart,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
    vaddr: VirtAddr,
    width: Width,
    value: u64,
) -> Result<(), Exception> {
    let pa = translate(hart, mmu, sysbus, vaddr, AccessType::Store).map_err(|e| {
        hart.pending_tval = vaddr;
        e
    })?;
    sysbus.store(pa, width, value).map_err(|e| {
        hart.pending_tval = vaddr;
        e
    })
}

pub fn dispatch(
    hart: &mut Hart,
    insn: Insn,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
) -> Result<ControlFlow, Exception> {
    match insn.opcode() {
        LOAD => load(hart, insn, mmu, sysbus).map(|()| ControlFlow::Advance),
        STORE => store(hart, insn, mmu, sysbus).map(|()| ControlFlow::Advance),
        AMO => amo(hart, insn, mmu, sysbus).map(|()| ControlFlow::Advance),
        MISC_MEM => Ok(ControlFlow::Advance), // FENCE: single hart, nothing to order.
        _ => Err(Exception::IllegalInstruction),
    }
}

fn load(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    let addr = hart.reg(insn.rs1()).wrapping_add(insn.imm_i());
    let v = match insn.funct3() {
        0b000 => rv_types::sign_extend(read(hart, mmu, sysbus, addr, Width::Byte)?, 8), // LB
        0b001 => rv_types::sign_extend(read(hart, mmu, sysbus, addr, Width::Half)?, 16), // LH
        0b010 => rv_types::sign_extend(read(hart, mmu, sysbus, addr, Width::Word)?, 32), // LW
        0b011 => read(hart, mmu, sysbus, addr, Width::Double)?,                         // LD
        0b100 => read(hart, mmu, sysbus, addr, Width::Byte)?,                           // LBU
        0b101 => read(hart, mmu, sysbus, addr, Width::Half)?,                           // LHU
        0b110 => read(hart, mmu, sysbus, addr, Width::Word)?,                           // LWU
        _ => return Err(Exception::IllegalInstruction),
    };
    hart.set_reg(insn.rd(), v);
    Ok(())
}

fn store(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    let addr = hart.reg(insn.rs1()).wrapping_add(insn.imm_s());
    let value = hart.reg(insn.rs2());
    let width = match insn.funct3() {
        0b000 => Width::Byte,
        0b001 => Width::Half,
        0b010 => Width::Word,
        0b011 => Width::Double,
        _ => return Err(Exception::IllegalInstruction),
    };
    write(hart, mmu, sysbus, addr, width, value)
}

fn amo(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    let is_d = insn.funct3() == 0b011;
    let width = if is_d { Width::Double } else { Width::Word };
    let addr = hart.reg(insn.rs1());

    if addr & (width.align() - 1) != 0 {
        // §9 open question: the RISC-V privileged spec calls for
        // StoreAddressMisaligned here regardless of access width.
        return Err(Exception::StoreAddressMisaligned);
    }

    let funct5 = insn.funct5();
    match funct5 {
        0b00010 => lr(hart, insn, mmu, sysbus, width, is_d), // LR
        0b00011 => sc(hart, insn, mmu, sysbus, width, is_d), // SC
        _ => amo_rmw(hart, insn, mmu, sysbus, width, is_d, funct5),
    }
}

fn sext_load(hart: &Hart, mmu: &mut Mmu, sysbus: &mut SystemBus, addr: u64, width: Width, is_d: bool) -> Result<u64, Exception> {
    let raw = read(hart, mmu, sysbus, addr, width)?;
    Ok(if is_d { raw } else { rv_types::sign_extend(raw, 32) })
}

fn lr(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus, width: Width, is_d: bool) -> Result<(), Exception> {
    let addr = hart.reg(insn.rs1());
    let v = sext_load(hart, mmu, sysbus, addr, width, is_d)?;
    hart.set_reg(insn.rd(), v);
    hart.reservation = Some(addr);
    Ok(())
}

fn sc(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus, width: Width, is_d: bool) -> Result<(), Exception> {
    let addr = hart.reg(insn.rs1());
    let reserved = hart.reservation == Some(addr);
    // Cleared on either outcome: a single-hart model has nothing else to
    // compare against once this SC has resolved.
    hart.reservation = None;
    if reserved {
        let value = hart.reg(insn.rs2());
        let to_store = if is_d { value } else { value & Width::Word.mask() };
        write(hart, mmu, sysbus, addr, width, to_store)?;
        hart.set_reg(insn.rd(), 0);
    } else {
        hart.set_reg(insn.rd(), 1);
    }
    Ok(())
}

fn amo_rmw(
    hart: &mut Hart,
    insn: Insn,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
    width: Width,
    is_d: bool,
    funct5: u32,
) -> Result<(), Exception> {
    let addr = hart.reg(insn.rs1());
    let rs2 = hart.reg(insn.rs2());
    let old = sext_load(hart, mmu, sysbus, addr, width, is_d)?;
    let operand = if is_d { rs2 } else { rv_types::sign_extend(rs2, 32) };
    let new = match funct5 {
        0b00001 => operand,                                             // AMOSWAP
        0b00000 => (old as i64).wrapping_add(operand as i64) as u64,    // AMOADD
        0b00100 => old ^ operand,                                       // AMOXOR
        0b01100 => old & operand,                                       // AMOAND
        0b01000 => old | operand,                                       // AMOOR
        0b10000 => min_signed(old, operand, is_d),                      // AMOMIN
        0b10100 => max_signed(old, operand, is_d),                      // AMOMAX
        0b11000 => min_unsigned(old, operand, is_d),                    // AMOMINU
        0b11100 => max_unsigned(old, operand, is_d),                    // AMOMAXU
        _ => return Err(Exception::IllegalInstruction),
    };
    let to_store = if is_d { new } else { new & Width::Word.mask() };
    write(hart, mmu, sysbus, addr, width, to_store)?;
    hart.set_reg(insn.rd(), old);
    Ok(())
}

fn signed_of(v: u64, is_d: bool) -> i64 {
    if is_d {
        v as i64
    } else {
        v as i32 as i64
    }
}

fn min_signed(a: u64, b: u64, is_d: bool) -> u64 {
    if signed_of(a, is_d) <= signed_of(b, is_d) {
        a
    } else {
        b
    }
}

fn max_signed(a: u64, b: u64, is_d: bool) -> u64 {
    if signed_of(a, is_d) >= signed_of(b, is_d) {
        a
    } else {
        b
    }
}

fn min_unsigned(a: u64, b: u64, is_d: bool) -> u64 {
    let (ua, ub) = if is_d { (a, b) } else { (a & Width::Word.mask(), b & Width::Word.mask()) };
    if ua <= ub {
        a
    } else {
        b
    }
}

fn max_unsigned(a: u64, b: u64, is_d: bool) -> u64 {
    let (ua, ub) = if is_d { (a, b) } else { (a & Width::Word.mask(), b & Width::Word.mask()) };
    if ua >= ub {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_mem::{Bus, Ram};

    fn setup() -> (Hart, Mmu, Bus) {
        let mut bus = Bus::new();
        bus.attach(0, 4096, Box::new(Ram::new(4096))).unwrap();
        (Hart::new(), Mmu::new(), bus)
    }

    fn with_sysbus<F: FnOnce(&mut Hart, &mut Mmu, &mut SystemBus)>(f: F) {
        let (mut hart, mut mmu, mut bus) = setup();
        let mut clint = rv_interrupts::Clint::new();
        let mut plic = rv_interrupts::Plic::new();
        let mut sysbus = SystemBus {
            bus: &mut bus,
            clint: &mut clint,
            clint_base: 0x0200_0000,
            plic: &mut plic,
            plic_base: 0x0c00_0000,
            virtio: None,
            virtio_base: 0x1000_1000,
        };
        f(&mut hart, &mut mmu, &mut sysbus);
    }

    #[test]
    fn sc_without_reservation_fails_and_leaves_memory_unchanged() {
        with_sysbus(|hart, mmu, sysbus| {
            hart.set_reg(1, 0x100); // rs1 = address
            hart.set_reg(2, 42); // rs2 = value
            let insn = Insn((0b00011 << 27) | (2 << 20) | (1 << 15) | (0b011 << 12) | (3 << 7) | AMO);
            sc(hart, insn, mmu, sysbus, Width::Double, true).unwrap();
            assert_eq!(hart.reg(3), 1);
            assert_eq!(read(hart, mmu, sysbus, 0x100, Width::Double).unwrap(), 0);
        });
    }

    #[test]
    fn lr_then_sc_succeeds_and_clears_reservation() {
        with_sysbus(|hart, mmu, sysbus| {
            hart.set_reg(1, 0x100);
            let lr_insn = Insn((0b00010 << 27) | (1 << 15) | (0b011 << 12) | (5 << 7) | AMO);
            lr(hart, lr_insn, mmu, sysbus, Width::Double, true).unwrap();
            assert_eq!(hart.reservation, Some(0x100));

            hart.set_reg(2, 42);
            let sc_insn = Insn((0b00011 << 27) | (2 << 20) | (1 << 15) | (0b011 << 12) | (3 << 7) | AMO);
            sc(hart, sc_insn, mmu, sysbus, Width::Double, true).unwrap();
            assert_eq!(hart.reg(3), 0);
            assert_eq!(read(hart, mmu, sysbus, 0x100, Width::Double).unwrap(), 42);
            assert!(hart.reservation.is_none());

            // A second SC without an intervening LR must fail.
            hart.set_reg(3, 0);
            hart.set_reg(2, 99);
            sc(hart, sc_insn, mmu, sysbus, Width::Double, true).unwrap();
            assert_eq!(hart.reg(3), 1);
            assert_eq!(read(hart, mmu, sysbus, 0x100, Width::Double).unwrap(), 42);
        });
    }

    #[test]
    fn amoadd_w_returns_old_value_sign_extended() {
        with_sysbus(|hart, mmu, sysbus| {
            write(hart, mmu, sysbus, 0x100, Width::Word, 0xffff_ffff).unwrap();
            hart.set_reg(1, 0x100);
            hart.set_reg(2, 1);
            let insn = Insn((0b00000 << 27) | (2 << 20) | (1 << 15) | (0b010 << 12) | (3 << 7) | AMO);
            amo(hart, insn, mmu, sysbus).unwrap();
            assert_eq!(hart.reg(3), 0xffff_ffff_ffff_ffff);
            assert_eq!(read(hart, mmu, sysbus, 0x100, Width::Word).unwrap(), 0);
        });
    }

    #[test]
    fn misaligned_amo_d_raises_store_misaligned() {
        with_sysbus(|hart, mmu, sysbus| {
            hart.set_reg(1, 0x101);
            let insn = Insn((0b00000 << 27) | (2 << 20) | (1 << 15) | (0b011 << 12) | (3 << 7) | AMO);
            assert_eq!(amo(hart, insn, mmu, sysbus), Err(Exception::StoreAddressMisaligned));
        });
    }
}
