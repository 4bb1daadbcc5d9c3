//! RV64I register/immediate arithmetic, the M-extension, the W-suffixed
//! 32-bit variants, and the four upper-immediate/jump opcodes (LUI, AUIPC,
//! JAL, JALR) that don't fit any other handler family.

use rv_decode::Insn;
use rv_types::Exception;

use crate::driver::ControlFlow;
use crate::hart::Hart;

const OP_IMM: u32 = 0x13;
const OP: u32 = 0x33;
const OP_IMM_32: u32 = 0x1b;
const OP_32: u32 = 0x3b;
const LUI: u32 = 0x37;
const AUIPC: u32 = 0x17;
const JAL: u32 = 0x6f;
const JALR: u32 = 0x67;

pub fn dispatch(hart: &mut Hart, insn: Insn, pc: u64, insn_size: u64) -> Result<ControlFlow, Exception> {
    match insn.opcode() {
        OP_IMM => op_imm(hart, insn).map(|()| ControlFlow::Advance),
        OP => op(hart, insn).map(|()| ControlFlow::Advance),
        OP_IMM_32 => op_imm_32(hart, insn).map(|()| ControlFlow::Advance),
        OP_32 => op_32(hart, insn).map(|()| ControlFlow::Advance),
        LUI => {
            hart.set_reg(insn.rd(), insn.imm_u());
            Ok(ControlFlow::Advance)
        }
        AUIPC => {
            hart.set_reg(insn.rd(), pc.wrapping_add(insn.imm_u()));
            Ok(ControlFlow::Advance)
        }
        JAL => {
            hart.set_reg(insn.rd(), pc.wrapping_add(insn_size));
            hart.pc = pc.wrapping_add(insn.imm_j());
            Ok(ControlFlow::Jumped)
        }
        JALR => {
            let target = (hart.reg(insn.rs1()).wrapping_add(insn.imm_i())) & !1;
            hart.set_reg(insn.rd(), pc.wrapping_add(insn_size));
            hart.pc = target;
            Ok(ControlFlow::Jumped)
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

fn op_imm(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    let rs1 = hart.reg(insn.rs1()) as i64;
    let imm = insn.imm_i() as i64;
    let v = match insn.funct3() {
        0b000 => rs1.wrapping_add(imm) as u64,                         // ADDI
        0b010 => ((rs1 < imm) as u64),                                 // SLTI
        0b011 => ((hart.reg(insn.rs1()) < insn.imm_i()) as u64),       // SLTIU
        0b100 => (rs1 ^ imm) as u64,                                   // XORI
        0b110 => (rs1 | imm) as u64,                                   // ORI
        0b111 => (rs1 & imm) as u64,                                   // ANDI
        0b001 => (rs1 as u64) << insn.shamt64(),                       // SLLI
        0b101 => {
            if insn.funct7() >> 1 == 0b0100000 >> 1 {
                (rs1 >> insn.shamt64()) as u64 // SRAI
            } else {
                (hart.reg(insn.rs1())) >> insn.shamt64() // SRLI
            }
        }
        _ => unreachable!(),
    };
    hart.set_reg(insn.rd(), v);
    Ok(())
}

fn op(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    let rs1 = hart.reg(insn.rs1());
    let rs2 = hart.reg(insn.rs2());
    let is_m_ext = insn.funct7() == 0b0000001;
    let v = if is_m_ext {
        m_extension(rs1, rs2, insn.funct3())
    } else {
        match (insn.funct3(), insn.funct7()) {
            (0b000, 0b0000000) => rs1.wrapping_add(rs2),
            (0b000, 0b0100000) => rs1.wrapping_sub(rs2),
            (0b001, _) => rs1 << (rs2 & 0x3f),
            (0b010, _) => ((rs1 as i64) < (rs2 as i64)) as u64,
            (0b011, _) => (rs1 < rs2) as u64,
            (0b100, _) => rs1 ^ rs2,
            (0b101, 0b0000000) => rs1 >> (rs2 & 0x3f),
            (0b101, 0b0100000) => ((rs1 as i64) >> (rs2 & 0x3f)) as u64,
            (0b110, _) => rs1 | rs2,
            (0b111, _) => rs1 & rs2,
            _ => return Err(Exception::IllegalInstruction),
        }
    };
    hart.set_reg(insn.rd(), v);
    Ok(())
}

/// `MUL/MULH/MULHSU/MULHU/DIV/DIVU/REM/REMU` (funct7 = 0000001).
fn m_extension(rs1: u64, rs2: u64, funct3: u32) -> u64 {
    match funct3 {
        0b000 => rs1.wrapping_mul(rs2), // MUL
        0b001 => {
            // MULH: signed x signed, high 64 bits of the 128-bit product.
            let p = (rs1 as i64 as i128).wrapping_mul(rs2 as i64 as i128);
            (p >> 64) as u64
        }
        0b010 => {
            // MULHSU: rs1 signed, rs2 unsigned.
            let p = (rs1 as i64 as i128).wrapping_mul(rs2 as u128 as i128);
            (p >> 64) as u64
        }
        0b011 => {
            // MULHU: unsigned x unsigned.
            let p = (rs1 as u128).wrapping_mul(rs2 as u128);
            (p >> 64) as u64
        }
        0b100 => {
            // DIV
            let (a, b) = (rs1 as i64, rs2 as i64);
            if b == 0 {
                u64::MAX
            } else if a == i64::MIN && b == -1 {
                i64::MIN as u64
            } else {
                a.wrapping_div(b) as u64
            }
        }
        0b101 => {
            // DIVU
            if rs2 == 0 {
                u64::MAX
            } else {
                rs1 / rs2
            }
        }
        0b110 => {
            // REM
            let (a, b) = (rs1 as i64, rs2 as i64);
            if b == 0 {
                rs1
            } else if a == i64::MIN && b == -1 {
                0
            } else {
                a.wrapping_rem(b) as u64
            }
        }
        0b111 => {
            // REMU
            if rs2 == 0 {
                rs1
            } else {
                rs1 % rs2
            }
        }
        _ => unreachable!(),
    }
}

fn op_imm_32(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    let rs1 = hart.reg(insn.rs1()) as u32;
    let v = match insn.funct3() {
        0b000 => rs1.wrapping_add(insn.imm_i() as u32), // ADDIW
        0b001 => rs1 << insn.shamt32(),                 // SLLIW
        0b101 => {
            if insn.funct7() == 0b0100000 {
                ((rs1 as i32) >> insn.shamt32()) as u32 // SRAIW
            } else {
                rs1 >> insn.shamt32() // SRLIW
            }
        }
        _ => return Err(Exception::IllegalInstruction),
    };
    hart.set_reg(insn.rd(), rv_types::sign_extend(v as u64, 32));
    Ok(())
}

fn op_32(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    let rs1_32 = hart.reg(insn.rs1()) as u32;
    let rs2_32 = hart.reg(insn.rs2()) as u32;
    let v: u32 = match (insn.funct3(), insn.funct7()) {
        (0b000, 0b0000000) => rs1_32.wrapping_add(rs2_32),      // ADDW
        (0b000, 0b0100000) => rs1_32.wrapping_sub(rs2_32),      // SUBW
        (0b000, 0b0000001) => rs1_32.wrapping_mul(rs2_32),      // MULW
        (0b001, _) => rs1_32 << (rs2_32 & 0x1f),                // SLLW
        (0b101, 0b0000000) => rs1_32 >> (rs2_32 & 0x1f),        // SRLW
        (0b101, 0b0100000) => ((rs1_32 as i32) >> (rs2_32 & 0x1f)) as u32, // SRAW
        (0b100, 0b0000001) => {
            // DIVW
            let (a, b) = (rs1_32 as i32, rs2_32 as i32);
            if b == 0 {
                return finish_w(hart, insn, u32::MAX);
            } else if a == i32::MIN && b == -1 {
                return finish_w(hart, insn, a as u32);
            }
            a.wrapping_div(b) as u32
        }
        (0b101, 0b0000001) => {
            // DIVUW
            if rs2_32 == 0 {
                return finish_w(hart, insn, u32::MAX);
            }
            rs1_32 / rs2_32
        }
        (0b110, 0b0000001) => {
            // REMW
            let (a, b) = (rs1_32 as i32, rs2_32 as i32);
            if b == 0 {
                return finish_w(hart, insn, rs1_32);
            } else if a == i32::MIN && b == -1 {
                return finish_w(hart, insn, 0);
            }
            a.wrapping_rem(b) as u32
        }
        (0b111, 0b0000001) => {
            // REMUW
            if rs2_32 == 0 {
                return finish_w(hart, insn, rs1_32);
            }
            rs1_32 % rs2_32
        }
        _ => return Err(Exception::IllegalInstruction),
    };
    finish_w(hart, insn, v)
}

fn finish_w(hart: &mut Hart, insn: Insn, v: u32) -> Result<(), Exception> {
    hart.set_reg(insn.rd(), rv_types::sign_extend(v as u64, 32));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_imm_insn(funct3: u32, rd: u32, rs1: u32, imm: u32) -> Insn {
        Insn((imm << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | OP_IMM)
    }

    #[test]
    fn addi_adds_sign_extended_immediate() {
        let mut hart = Hart::new();
        hart.set_reg(1, 5);
        let insn = op_imm_insn(0, 2, 1, 0xfff); // addi x2, x1, -1
        op_imm(&mut hart, insn).unwrap();
        assert_eq!(hart.reg(2), 4);
    }

    #[test]
    fn div_by_zero_is_all_ones() {
        let mut hart = Hart::new();
        hart.set_reg(1, 10);
        hart.set_reg(2, 0);
        let insn = Insn((0b0000001 << 25) | (2 << 20) | (1 << 15) | (0b100 << 12) | (3 << 7) | OP);
        op(&mut hart, insn).unwrap();
        assert_eq!(hart.reg(3), u64::MAX);
    }

    #[test]
    fn div_int_min_by_minus_one_is_int_min() {
        let mut hart = Hart::new();
        hart.set_reg(1, i64::MIN as u64);
        hart.set_reg(2, (-1i64) as u64);
        let insn = Insn((0b0000001 << 25) | (2 << 20) | (1 << 15) | (0b100 << 12) | (3 << 7) | OP);
        op(&mut hart, insn).unwrap();
        assert_eq!(hart.reg(3), i64::MIN as u64);
    }

    #[test]
    fn addw_sign_extends_32_bit_result() {
        let mut hart = Hart::new();
        hart.set_reg(1, 0x7fff_ffff);
        hart.set_reg(2, 1);
        let insn = Insn((2 << 20) | (1 << 15) | (0 << 12) | (3 << 7) | OP_32);
        op_32(&mut hart, insn).unwrap();
        assert_eq!(hart.reg(3), 0xffff_ffff_8000_0000);
    }

    #[test]
    fn jal_sets_link_and_target() {
        let mut hart = Hart::new();
        hart.pc = 0x1000;
        let insn = Insn(JAL); // imm_j() == 0
        let cf = dispatch(&mut hart, insn, 0x1000, 4).unwrap();
        assert!(matches!(cf, ControlFlow::Jumped));
        assert_eq!(hart.reg(insn.rd()), 0x1004);
        assert_eq!(hart.pc, 0x1000);
    }
}
