//! The "C" extension: each 16-bit instruction expands to the semantics of
//! its 32-bit equivalent. Grouped by quadrant the way the unprivileged ISA
//! manual's C-extension chapter lays them out.

use rv_decode::CompressedInsn;
use rv_mmu::Mmu;
use rv_types::{Exception, Width};

use crate::driver::ControlFlow;
use crate::hart::Hart;
use crate::mem::{read, write};
use crate::sysbus::SystemBus;

pub fn dispatch(hart: &mut Hart, c: CompressedInsn, pc: u64, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<ControlFlow, Exception> {
    match c.quadrant() {
        0 => quadrant0(hart, c, mmu, sysbus).map(|()| ControlFlow::Advance),
        1 => quadrant1(hart, c, pc),
        2 => quadrant2(hart, c, pc, mmu, sysbus),
        _ => Err(Exception::IllegalInstruction),
    }
}

fn quadrant0(hart: &mut Hart, c: CompressedInsn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    match c.funct3() {
        0b000 => {
            // C.ADDI4SPN
            let imm = c.imm_c_addi4spn();
            if imm == 0 {
                return Err(Exception::IllegalInstruction);
            }
            hart.set_reg(c.rd_prime(), hart.reg(2).wrapping_add(imm));
            Ok(())
        }
        0b001 => {
            // C.FLD
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_d());
            let bits = read(hart, mmu, sysbus, addr, Width::Double)?;
            hart.set_freg_bits(c.rd_prime(), bits);
            Ok(())
        }
        0b010 => {
            // C.LW
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_w());
            let v = rv_types::sign_extend(read(hart, mmu, sysbus, addr, Width::Word)?, 32);
            hart.set_reg(c.rd_prime(), v);
            Ok(())
        }
        0b011 => {
            // C.LD
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_d());
            let v = read(hart, mmu, sysbus, addr, Width::Double)?;
            hart.set_reg(c.rd_prime(), v);
            Ok(())
        }
        0b101 => {
            // C.FSD
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_d());
            write(hart, mmu, sysbus, addr, Width::Double, hart.freg_bits(c.rs2_prime()))
        }
        0b110 => {
            // C.SW
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_w());
            write(hart, mmu, sysbus, addr, Width::Word, hart.reg(c.rs2_prime()))
        }
        0b111 => {
            // C.SD
            let addr = hart.reg(c.rs1_prime()).wrapping_add(c.imm_cl_cs_d());
            write(hart, mmu, sysbus, addr, Width::Double, hart.reg(c.rs2_prime()))
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

fn quadrant1(hart: &mut Hart, c: CompressedInsn, pc: u64) -> Result<ControlFlow, Exception> {
    match c.funct3() {
        0b000 => {
            // C.ADDI / C.NOP (rd==0)
            let rd = c.rd_rs1();
            let v = (hart.reg(rd) as i64).wrapping_add(c.imm6() as i64) as u64;
            hart.set_reg(rd, v);
            Ok(ControlFlow::Advance)
        }
        0b001 => {
            // C.ADDIW (rd != 0, per the base ISA's reserved-when-rd==0 rule)
            let rd = c.rd_rs1();
            let v = (hart.reg(rd) as u32).wrapping_add(c.imm6() as u32);
            hart.set_reg(rd, rv_types::sign_extend(v as u64, 32));
            Ok(ControlFlow::Advance)
        }
        0b010 => {
            // C.LI
            hart.set_reg(c.rd_rs1(), c.imm6());
            Ok(ControlFlow::Advance)
        }
        0b011 => {
            let rd = c.rd_rs1();
            if rd == 2 {
                // C.ADDI16SP
                let v = (hart.reg(2) as i64).wrapping_add(c.imm_c_addi16sp() as i64) as u64;
                hart.set_reg(2, v);
            } else {
                // C.LUI
                let imm = c.imm_c_lui();
                if imm == 0 {
                    return Err(Exception::IllegalInstruction);
                }
                hart.set_reg(rd, imm);
            }
            Ok(ControlFlow::Advance)
        }
        0b100 => quadrant1_arith(hart, c).map(|()| ControlFlow::Advance),
        0b101 => {
            // C.J
            hart.pc = pc.wrapping_add(c.imm_cj());
            Ok(ControlFlow::Jumped)
        }
        0b110 => {
            // C.BEQZ
            if hart.reg(c.rs1_prime()) == 0 {
                hart.pc = pc.wrapping_add(c.imm_cb());
                Ok(ControlFlow::Jumped)
            } else {
                Ok(ControlFlow::Advance)
            }
        }
        0b111 => {
            // C.BNEZ
            if hart.reg(c.rs1_prime()) != 0 {
                hart.pc = pc.wrapping_add(c.imm_cb());
                Ok(ControlFlow::Jumped)
            } else {
                Ok(ControlFlow::Advance)
            }
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

fn quadrant1_arith(hart: &mut Hart, c: CompressedInsn) -> Result<(), Exception> {
    match c.funct2_high() {
        0b00 => {
            // C.SRLI
            let rd = c.rd_prime();
            hart.set_reg(rd, hart.reg(rd) >> c.c_shamt());
            Ok(())
        }
        0b01 => {
            // C.SRAI
            let rd = c.rd_prime();
            hart.set_reg(rd, ((hart.reg(rd) as i64) >> c.c_shamt()) as u64);
            Ok(())
        }
        0b10 => {
            // C.ANDI
            let rd = c.rd_prime();
            hart.set_reg(rd, hart.reg(rd) & c.imm6());
            Ok(())
        }
        0b11 => {
            let rd = c.rd_prime();
            let rs2 = c.rs2_prime();
            let (a, b) = (hart.reg(rd), hart.reg(rs2));
            let v = match (c.funct4() & 0b1, c.funct2_low()) {
                (0, 0b00) => a.wrapping_sub(b), // C.SUB
                (0, 0b01) => a ^ b,             // C.XOR
                (0, 0b10) => a | b,             // C.OR
                (0, 0b11) => a & b,             // C.AND
                (1, 0b00) => rv_types::sign_extend((a as u32).wrapping_sub(b as u32) as u64, 32), // C.SUBW
                (1, 0b01) => rv_types::sign_extend((a as u32).wrapping_add(b as u32) as u64, 32), // C.ADDW
                _ => return Err(Exception::IllegalInstruction),
            };
            hart.set_reg(rd, v);
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn quadrant2(hart: &mut Hart, c: CompressedInsn, pc: u64, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<ControlFlow, Exception> {
    match c.funct3() {
        0b000 => {
            // C.SLLI
            let rd = c.rd_rs1();
            hart.set_reg(rd, hart.reg(rd) << c.c_shamt());
            Ok(ControlFlow::Advance)
        }
        0b001 => {
            // C.FLDSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_ldsp());
            let bits = read(hart, mmu, sysbus, addr, Width::Double)?;
            hart.set_freg_bits(c.rd_rs1(), bits);
            Ok(ControlFlow::Advance)
        }
        0b010 => {
            // C.LWSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_lwsp());
            let v = rv_types::sign_extend(read(hart, mmu, sysbus, addr, Width::Word)?, 32);
            hart.set_reg(c.rd_rs1(), v);
            Ok(ControlFlow::Advance)
        }
        0b011 => {
            // C.LDSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_ldsp());
            let v = read(hart, mmu, sysbus, addr, Width::Double)?;
            hart.set_reg(c.rd_rs1(), v);
            Ok(ControlFlow::Advance)
        }
        0b100 => quadrant2_jr_mv(hart, c, pc),
        0b101 => {
            // C.FSDSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_sdsp());
            write(hart, mmu, sysbus, addr, Width::Double, hart.freg_bits(c.rs2()))?;
            Ok(ControlFlow::Advance)
        }
        0b110 => {
            // C.SWSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_swsp());
            write(hart, mmu, sysbus, addr, Width::Word, hart.reg(c.rs2()))?;
            Ok(ControlFlow::Advance)
        }
        0b111 => {
            // C.SDSP
            let addr = hart.reg(2).wrapping_add(c.imm_c_sdsp());
            write(hart, mmu, sysbus, addr, Width::Double, hart.reg(c.rs2()))?;
            Ok(ControlFlow::Advance)
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

fn quadrant2_jr_mv(hart: &mut Hart, c: CompressedInsn, pc: u64) -> Result<ControlFlow, Exception> {
    let bit12 = (c.raw() >> 12) & 1;
    let rd = c.rd_rs1();
    let rs2 = c.rs2();
    match (bit12, rs2) {
        (0, 0) => {
            // C.JR
            if rd == 0 {
                return Err(Exception::IllegalInstruction);
            }
            hart.pc = hart.reg(rd) & !1;
            Ok(ControlFlow::Jumped)
        }
        (0, _) => {
            // C.MV
            hart.set_reg(rd, hart.reg(rs2));
            Ok(ControlFlow::Advance)
        }
        (1, 0) => {
            if rd == 0 {
                // C.EBREAK
                return Err(Exception::Breakpoint);
            }
            // C.JALR
            let target = hart.reg(rd) & !1;
            hart.set_reg(1, pc.wrapping_add(2));
            hart.pc = target;
            Ok(ControlFlow::Jumped)
        }
        (1, _) => {
            // C.ADD
            hart.set_reg(rd, hart.reg(rd).wrapping_add(hart.reg(rs2)));
            Ok(ControlFlow::Advance)
        }
        _ => unreachable!(),
    }
}
