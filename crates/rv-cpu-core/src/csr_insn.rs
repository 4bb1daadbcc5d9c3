//! The `SYSTEM` opcode: CSR read-modify-write instructions plus the
//! privileged control transfers (`ECALL`, `EBREAK`, `MRET`, `SRET`, `WFI`,
//! `SFENCE.VMA`) that share its encoding space.

use rv_decode::Insn;
use rv_mmu::Mmu;
use rv_types::Exception;

use crate::driver::ControlFlow;
use crate::hart::Hart;
use crate::trap;

const SYSTEM: u32 = 0x73;

pub fn dispatch(hart: &mut Hart, insn: Insn, mmu: &mut Mmu) -> Result<ControlFlow, Exception> {
    debug_assert_eq!(insn.opcode(), SYSTEM);
    match insn.funct3() {
        0b000 => privileged(hart, insn, mmu),
        0b001 => csrrw(hart, insn, mmu, false).map(|()| ControlFlow::Advance),
        0b010 => csrrs_c(hart, insn, mmu, false, true).map(|()| ControlFlow::Advance),
        0b011 => csrrs_c(hart, insn, mmu, false, false).map(|()| ControlFlow::Advance),
        0b101 => csrrw(hart, insn, mmu, true).map(|()| ControlFlow::Advance),
        0b110 => csrrs_c(hart, insn, mmu, true, true).map(|()| ControlFlow::Advance),
        0b111 => csrrs_c(hart, insn, mmu, true, false).map(|()| ControlFlow::Advance),
        _ => Err(Exception::IllegalInstruction),
    }
}

/// `satp` writes refresh the MMU; this is the one CSR whose side effect
/// reaches outside the CSR file, so it's applied here rather than in
/// `CsrFile::store`.
fn refresh_mmu_if_satp(hart: &Hart, addr: u32, mmu: &mut Mmu) {
    if addr == rv_csr::addr::SATP {
        mmu.update(hart.csr.satp());
    }
}

fn csrrw(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, immediate: bool) -> Result<(), Exception> {
    let addr = insn.csr();
    let rhs = if immediate { insn.zimm() } else { hart.reg(insn.rs1()) };
    // rd == x0 means the guest doesn't want the old value; skip the read
    // so a write-only CSRRW to a side-effecting register still works.
    let old = if insn.rd() != 0 {
        Some(hart.csr.load(addr, hart.mode)?)
    } else {
        None
    };
    hart.csr.store(addr, hart.mode, rhs)?;
    refresh_mmu_if_satp(hart, addr, mmu);
    if let Some(old) = old {
        hart.set_reg(insn.rd(), old);
    }
    Ok(())
}

/// `CSRRS`/`CSRRC` and their immediate forms. When the right-hand operand
/// is zero the computed new value always equals the old one, so the store
/// is a guaranteed no-op write — this already degrades into "read without
/// modifying" for read-only CSRs via `CsrFile::store`'s same-value
/// exemption, with no special-casing needed here.
fn csrrs_c(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, immediate: bool, set: bool) -> Result<(), Exception> {
    let addr = insn.csr();
    let rhs = if immediate { insn.zimm() } else { hart.reg(insn.rs1()) };
    let old = hart.csr.load(addr, hart.mode)?;
    let new = if set { old | rhs } else { old & !rhs };
    hart.csr.store(addr, hart.mode, new)?;
    refresh_mmu_if_satp(hart, addr, mmu);
    hart.set_reg(insn.rd(), old);
    Ok(())
}

fn privileged(hart: &mut Hart, insn: Insn, mmu: &mut Mmu) -> Result<ControlFlow, Exception> {
    if insn.rd() != 0 {
        return Err(Exception::IllegalInstruction);
    }
    match insn.funct7() {
        0b000_1001 => return sfence_vma(hart, mmu).map(|()| ControlFlow::Advance),
        0b001_0001 | 0b101_0001 | 0b011_0001 => return Err(Exception::IllegalInstruction), // HFENCE.{B,G}VMA.
        _ => {}
    }
    if insn.rs1() != 0 {
        return Err(Exception::IllegalInstruction);
    }
    match (insn.funct7(), insn.rs2()) {
        (0b000_0000, 0b00000) => Err(Exception::ecall_from(hart.mode)),
        (0b000_0000, 0b00001) => Err(Exception::Breakpoint),
        (0b000_0000, 0b00010) => Err(Exception::IllegalInstruction), // URET: no N-extension.
        (0b000_1000, 0b00010) => sret(hart),
        (0b000_1000, 0b00101) => {
            hart.wfi = true;
            Ok(ControlFlow::Advance)
        }
        (0b001_1000, 0b00010) => mret(hart),
        _ => Err(Exception::IllegalInstruction),
    }
}

fn sret(hart: &mut Hart) -> Result<ControlFlow, Exception> {
    if hart.mode == rv_types::PrivilegeMode::User || (hart.mode == rv_types::PrivilegeMode::Supervisor && hart.csr.mstatus_tsr()) {
        return Err(Exception::IllegalInstruction);
    }
    trap::xret(hart, true);
    Ok(ControlFlow::Jumped)
}

fn mret(hart: &mut Hart) -> Result<ControlFlow, Exception> {
    if hart.mode != rv_types::PrivilegeMode::Machine {
        return Err(Exception::IllegalInstruction);
    }
    trap::xret(hart, false);
    Ok(ControlFlow::Jumped)
}

fn sfence_vma(hart: &mut Hart, mmu: &mut Mmu) -> Result<(), Exception> {
    if hart.mode == rv_types::PrivilegeMode::User || (hart.mode == rv_types::PrivilegeMode::Supervisor && hart.csr.mstatus_tvm()) {
        return Err(Exception::IllegalInstruction);
    }
    mmu.flush();
    Ok(())
}
