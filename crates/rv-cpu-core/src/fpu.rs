//! Single- and double-precision floating point: loads/stores, FMA, the
//! arithmetic/compare/classify/convert family, and sign injection.
//!
//! NaN handling follows the strict IEEE-754 contract rather than the
//! narrow "does the result bit-pattern happen to equal the canonical NaN"
//! check a naive port of a host-exception-flag-based reference would use:
//! every NaN result is canonicalized, and `Invalid` is raised whenever a
//! signaling NaN was consumed, independent of what the result bits land on.

use rv_decode::Insn;
use rv_mmu::Mmu;
use rv_types::{Exception, Width, CANONICAL_NAN_F32, CANONICAL_NAN_F64};

use crate::driver::ControlFlow;
use crate::hart::Hart;
use crate::mem::{read, write};
use crate::sysbus::SystemBus;

const LOAD_FP: u32 = 0x07;
const STORE_FP: u32 = 0x27;
const MADD: u32 = 0x43;
const MSUB: u32 = 0x47;
const NMSUB: u32 = 0x4b;
const NMADD: u32 = 0x4f;
const OP_FP: u32 = 0x53;

const FFLAG_INVALID: u8 = 0x10;
const FFLAG_DIVZERO: u8 = 0x08;
const FFLAG_OVERFLOW: u8 = 0x04;
const FFLAG_UNDERFLOW: u8 = 0x02;
const FFLAG_INEXACT: u8 = 0x01;

pub fn dispatch(
    hart: &mut Hart,
    insn: Insn,
    mmu: &mut Mmu,
    sysbus: &mut SystemBus,
) -> Result<ControlFlow, Exception> {
    match insn.opcode() {
        LOAD_FP => load(hart, insn, mmu, sysbus).map(|()| ControlFlow::Advance),
        STORE_FP => store(hart, insn, mmu, sysbus).map(|()| ControlFlow::Advance),
        MADD | MSUB | NMADD | NMSUB => fma(hart, insn).map(|()| ControlFlow::Advance),
        OP_FP => op_fp(hart, insn).map(|()| ControlFlow::Advance),
        _ => Err(Exception::IllegalInstruction),
    }
}

fn check_fs(hart: &Hart) -> Result<(), Exception> {
    if hart.csr.fs() == 0 {
        Err(Exception::IllegalInstruction)
    } else {
        Ok(())
    }
}

fn load(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    check_fs(hart)?;
    let addr = hart.reg(insn.rs1()).wrapping_add(insn.imm_i());
    match insn.funct3() {
        0b010 => {
            let bits = read(hart, mmu, sysbus, addr, Width::Word)? as u32;
            hart.set_freg_bits(insn.rd(), rv_types::nan_box_f32(bits));
        }
        0b011 => {
            let bits = read(hart, mmu, sysbus, addr, Width::Double)?;
            hart.set_freg_bits(insn.rd(), bits);
        }
        _ => return Err(Exception::IllegalInstruction),
    }
    Ok(())
}

fn store(hart: &mut Hart, insn: Insn, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    check_fs(hart)?;
    let addr = hart.reg(insn.rs1()).wrapping_add(insn.imm_s());
    match insn.funct3() {
        0b010 => write(hart, mmu, sysbus, addr, Width::Word, hart.freg_f32(insn.rs2()).to_bits() as u64),
        0b011 => write(hart, mmu, sysbus, addr, Width::Double, hart.freg_bits(insn.rs2())),
        _ => Err(Exception::IllegalInstruction),
    }
}

fn is_snan_f32(v: f32) -> bool {
    let bits = v.to_bits();
    v.is_nan() && (bits >> 22) & 1 == 0
}

fn is_snan_f64(v: f64) -> bool {
    let bits = v.to_bits();
    v.is_nan() && (bits >> 51) & 1 == 0
}

fn canon_f32(v: f32, flags: &mut u8) -> f32 {
    if v.is_nan() {
        f32::from_bits(CANONICAL_NAN_F32)
    } else {
        let _ = flags;
        v
    }
}

fn canon_f64(v: f64, flags: &mut u8) -> f64 {
    if v.is_nan() {
        f64::from_bits(CANONICAL_NAN_F64)
    } else {
        let _ = flags;
        v
    }
}

fn fma(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    check_fs(hart)?;
    let is_double = insn.funct2() == 0b01;
    let opcode = insn.opcode();
    let mut flags = 0u8;
    if is_double {
        let (a, b, c) = (hart.freg_f64(insn.rs1()), hart.freg_f64(insn.rs2()), hart.freg_f64(insn.rs3()));
        if is_snan_f64(a) || is_snan_f64(b) || is_snan_f64(c) {
            flags |= FFLAG_INVALID;
        }
        let (b, c) = match opcode {
            MSUB => (b, -c),
            NMADD => (-b, -c),
            NMSUB => (-b, c),
            _ => (b, c),
        };
        let r = a.mul_add(b, c);
        hart.set_freg_f64(insn.rd(), canon_f64(r, &mut flags));
    } else {
        let (a, b, c) = (hart.freg_f32(insn.rs1()), hart.freg_f32(insn.rs2()), hart.freg_f32(insn.rs3()));
        if is_snan_f32(a) || is_snan_f32(b) || is_snan_f32(c) {
            flags |= FFLAG_INVALID;
        }
        let (b, c) = match opcode {
            MSUB => (b, -c),
            NMADD => (-b, -c),
            NMSUB => (-b, c),
            _ => (b, c),
        };
        let r = a.mul_add(b, c);
        hart.set_freg_f32(insn.rd(), canon_f32(r, &mut flags));
    }
    hart.csr.accumulate_fflags(flags);
    Ok(())
}

fn op_fp(hart: &mut Hart, insn: Insn) -> Result<(), Exception> {
    check_fs(hart)?;
    match insn.funct7() {
        0b0000000 | 0b0000100 | 0b0001000 | 0b0001100 => arith(hart, insn, insn.funct7() >> 2),
        0b0010000 => sign_inject(hart, insn, false),
        0b0010100 => min_max(hart, insn, false),
        0b0010001 => sign_inject(hart, insn, true),
        0b0010101 => min_max(hart, insn, true),
        0b0100000 => fcvt_sd(hart, insn, true),  // FCVT.S.D
        0b0100001 => fcvt_sd(hart, insn, false), // FCVT.D.S
        0b0101100 => fsqrt(hart, insn, false),
        0b0101101 => fsqrt(hart, insn, true),
        0b1010000 => compare(hart, insn, false),
        0b1010001 => compare(hart, insn, true),
        0b1100000 => fcvt_to_int(hart, insn, false),
        0b1100001 => fcvt_to_int(hart, insn, true),
        0b1101000 => fcvt_from_int(hart, insn, false),
        0b1101001 => fcvt_from_int(hart, insn, true),
        0b1110000 => fmv_x_or_class(hart, insn, false),
        0b1110001 => fmv_x_or_class(hart, insn, true),
        0b1111000 => {
            // FMV.W.X
            hart.set_freg_f32(insn.rd(), f32::from_bits(hart.reg(insn.rs1()) as u32));
            Ok(())
        }
        0b1111001 => {
            // FMV.D.X
            hart.set_freg_f64(insn.rd(), f64::from_bits(hart.reg(insn.rs1())));
            Ok(())
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

/// ADD/SUB/MUL/DIV, selected by the top 3 bits of `funct7` (`funct7 >> 2`
/// after the mask in `op_fp` already isolated the double/single bit).
fn arith(hart: &mut Hart, insn: Insn, op: u32) -> Result<(), Exception> {
    let is_double = insn.funct7() & 0b01 != 0;
    let mut flags = 0u8;
    if is_double {
        let (a, b) = (hart.freg_f64(insn.rs1()), hart.freg_f64(insn.rs2()));
        if is_snan_f64(a) || is_snan_f64(b) {
            flags |= FFLAG_INVALID;
        }
        let r = match op {
            0 => a + b,
            1 => a - b,
            2 => a * b,
            3 => {
                if b == 0.0 && !a.is_nan() {
                    flags |= FFLAG_DIVZERO;
                }
                a / b
            }
            _ => return Err(Exception::IllegalInstruction),
        };
        hart.set_freg_f64(insn.rd(), canon_f64(r, &mut flags));
    } else {
        let (a, b) = (hart.freg_f32(insn.rs1()), hart.freg_f32(insn.rs2()));
        if is_snan_f32(a) || is_snan_f32(b) {
            flags |= FFLAG_INVALID;
        }
        let r = match op {
            0 => a + b,
            1 => a - b,
            2 => a * b,
            3 => {
                if b == 0.0 && !a.is_nan() {
                    flags |= FFLAG_DIVZERO;
                }
                a / b
            }
            _ => return Err(Exception::IllegalInstruction),
        };
        hart.set_freg_f32(insn.rd(), canon_f32(r, &mut flags));
    }
    hart.csr.accumulate_fflags(flags);
    Ok(())
}

fn sign_inject(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    if is_double {
        let a = hart.freg_f64(insn.rs1());
        let b = hart.freg_f64(insn.rs2());
        let r = match insn.funct3() {
            0b000 => a.copysign(b),         // FSGNJ
            0b001 => a.copysign(-b),        // FSGNJN
            0b010 => f64::from_bits(a.to_bits() ^ (b.to_bits() & (1 << 63))), // FSGNJX
            _ => return Err(Exception::IllegalInstruction),
        };
        hart.set_freg_f64(insn.rd(), r);
    } else {
        let a = hart.freg_f32(insn.rs1());
        let b = hart.freg_f32(insn.rs2());
        let r = match insn.funct3() {
            0b000 => a.copysign(b),
            0b001 => a.copysign(-b),
            0b010 => f32::from_bits(a.to_bits() ^ (b.to_bits() & (1 << 31))),
            _ => return Err(Exception::IllegalInstruction),
        };
        hart.set_freg_f32(insn.rd(), r);
    }
    Ok(())
}

fn min_max(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    let is_max = insn.funct3() == 0b001;
    let mut flags = 0u8;
    if is_double {
        let (a, b) = (hart.freg_f64(insn.rs1()), hart.freg_f64(insn.rs2()));
        let r = fminmax_f64(a, b, is_max, &mut flags);
        hart.set_freg_f64(insn.rd(), r);
    } else {
        let (a, b) = (hart.freg_f32(insn.rs1()), hart.freg_f32(insn.rs2()));
        let r = fminmax_f32(a, b, is_max, &mut flags);
        hart.set_freg_f32(insn.rd(), r);
    }
    hart.csr.accumulate_fflags(flags);
    Ok(())
}

fn fminmax_f64(a: f64, b: f64, is_max: bool, flags: &mut u8) -> f64 {
    if is_snan_f64(a) || is_snan_f64(b) {
        *flags |= FFLAG_INVALID;
    }
    match (a.is_nan(), b.is_nan()) {
        (true, true) => f64::from_bits(CANONICAL_NAN_F64),
        (true, false) => b,
        (false, true) => a,
        (false, false) => {
            if a == 0.0 && b == 0.0 {
                let a_neg = a.is_sign_negative();
                let b_neg = b.is_sign_negative();
                if is_max {
                    if a_neg && !b_neg { b } else { a }
                } else if !a_neg && b_neg {
                    b
                } else {
                    a
                }
            } else if is_max {
                a.max(b)
            } else {
                a.min(b)
            }
        }
    }
}

fn fminmax_f32(a: f32, b: f32, is_max: bool, flags: &mut u8) -> f32 {
    if is_snan_f32(a) || is_snan_f32(b) {
        *flags |= FFLAG_INVALID;
    }
    match (a.is_nan(), b.is_nan()) {
        (true, true) => f32::from_bits(CANONICAL_NAN_F32),
        (true, false) => b,
        (false, true) => a,
        (false, false) => {
            if a == 0.0 && b == 0.0 {
                let a_neg = a.is_sign_negative();
                let b_neg = b.is_sign_negative();
                if is_max {
                    if a_neg && !b_neg { b } else { a }
                } else if !a_neg && b_neg {
                    b
                } else {
                    a
                }
            } else if is_max {
                a.max(b)
            } else {
                a.min(b)
            }
        }
    }
}

fn fcvt_sd(hart: &mut Hart, insn: Insn, to_single: bool) -> Result<(), Exception> {
    let mut flags = 0u8;
    if to_single {
        let v = hart.freg_f64(insn.rs1());
        if is_snan_f64(v) {
            flags |= FFLAG_INVALID;
        }
        let r = if v.is_nan() { f32::from_bits(CANONICAL_NAN_F32) } else { v as f32 };
        hart.set_freg_f32(insn.rd(), r);
    } else {
        let v = hart.freg_f32(insn.rs1());
        if is_snan_f32(v) {
            flags |= FFLAG_INVALID;
        }
        let r = if v.is_nan() { f64::from_bits(CANONICAL_NAN_F64) } else { v as f64 };
        hart.set_freg_f64(insn.rd(), r);
    }
    hart.csr.accumulate_fflags(flags);
    Ok(())
}

fn fsqrt(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    let mut flags = 0u8;
    if is_double {
        let v = hart.freg_f64(insn.rs1());
        if is_snan_f64(v) || (v < 0.0 && !v.is_nan()) {
            flags |= FFLAG_INVALID;
        }
        hart.set_freg_f64(insn.rd(), canon_f64(v.sqrt(), &mut flags));
    } else {
        let v = hart.freg_f32(insn.rs1());
        if is_snan_f32(v) || (v < 0.0 && !v.is_nan()) {
            flags |= FFLAG_INVALID;
        }
        hart.set_freg_f32(insn.rd(), canon_f32(v.sqrt(), &mut flags));
    }
    hart.csr.accumulate_fflags(flags);
    Ok(())
}

fn compare(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    let mut flags = 0u8;
    let result = if is_double {
        let (a, b) = (hart.freg_f64(insn.rs1()), hart.freg_f64(insn.rs2()));
        match insn.funct3() {
            0b010 => {
                // FEQ: only a signaling NaN sets Invalid.
                if is_snan_f64(a) || is_snan_f64(b) {
                    flags |= FFLAG_INVALID;
                }
                a == b
            }
            0b001 => {
                // FLT: any NaN operand sets Invalid.
                if a.is_nan() || b.is_nan() {
                    flags |= FFLAG_INVALID;
                }
                a < b
            }
            0b000 => {
                // FLE
                if a.is_nan() || b.is_nan() {
                    flags |= FFLAG_INVALID;
                }
                a <= b
            }
            _ => return Err(Exception::IllegalInstruction),
        }
    } else {
        let (a, b) = (hart.freg_f32(insn.rs1()), hart.freg_f32(insn.rs2()));
        match insn.funct3() {
            0b010 => {
                if is_snan_f32(a) || is_snan_f32(b) {
                    flags |= FFLAG_INVALID;
                }
                a == b
            }
            0b001 => {
                if a.is_nan() || b.is_nan() {
                    flags |= FFLAG_INVALID;
                }
                a < b
            }
            0b000 => {
                if a.is_nan() || b.is_nan() {
                    flags |= FFLAG_INVALID;
                }
                a <= b
            }
            _ => return Err(Exception::IllegalInstruction),
        }
    };
    hart.csr.accumulate_fflags(flags);
    hart.set_reg(insn.rd(), result as u64);
    Ok(())
}

/// FCVT float/double -> int32/uint32/int64/uint64, selected by `rs2`.
fn fcvt_to_int(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    let mut flags = 0u8;
    let signed = insn.rs2() & 1 == 0;
    let is_64 = insn.rs2() & 0b10 != 0;
    let v: u64 = if is_double {
        let x = hart.freg_f64(insn.rs1());
        if is_snan_f64(x) {
            flags |= FFLAG_INVALID;
        }
        convert_float_to_int(x, signed, is_64, &mut flags)
    } else {
        let x = hart.freg_f32(insn.rs1());
        if is_snan_f32(x) {
            flags |= FFLAG_INVALID;
        }
        convert_float_to_int(x as f64, signed, is_64, &mut flags)
    };
    hart.csr.accumulate_fflags(flags);
    hart.set_reg(insn.rd(), v);
    Ok(())
}

fn convert_float_to_int(x: f64, signed: bool, is_64: bool, flags: &mut u8) -> u64 {
    if x.is_nan() {
        *flags |= FFLAG_INVALID;
        return match (signed, is_64) {
            (true, true) => i64::MAX as u64,
            (true, false) => i32::MAX as u64,
            (false, _) => u64::MAX,
        } & if !signed && !is_64 { u32::MAX as u64 } else { u64::MAX };
    }
    match (signed, is_64) {
        (true, true) => {
            let clamped = if x >= i64::MAX as f64 {
                *flags |= FFLAG_INVALID;
                i64::MAX
            } else if x < i64::MIN as f64 {
                *flags |= FFLAG_INVALID;
                i64::MIN
            } else {
                x as i64
            };
            clamped as u64
        }
        (true, false) => {
            let clamped = if x >= i32::MAX as f64 {
                *flags |= FFLAG_INVALID;
                i32::MAX
            } else if x < i32::MIN as f64 {
                *flags |= FFLAG_INVALID;
                i32::MIN
            } else {
                x as i32
            };
            rv_types::sign_extend(clamped as u32 as u64, 32)
        }
        (false, true) => {
            if x < 0.0 {
                *flags |= FFLAG_INVALID;
                0
            } else if x >= u64::MAX as f64 {
                *flags |= FFLAG_INVALID;
                u64::MAX
            } else {
                x as u64
            }
        }
        (false, false) => {
            if x < 0.0 {
                *flags |= FFLAG_INVALID;
                0
            } else if x >= u32::MAX as f64 {
                *flags |= FFLAG_INVALID;
                u32::MAX as u64
            } else {
                x as u32 as u64
            }
        }
    }
}

fn fcvt_from_int(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    let signed = insn.rs2() & 1 == 0;
    let is_64 = insn.rs2() & 0b10 != 0;
    let raw = hart.reg(insn.rs1());
    let as_f64: f64 = match (signed, is_64) {
        (true, true) => raw as i64 as f64,
        (true, false) => raw as u32 as i32 as f64,
        (false, true) => raw as f64,
        (false, false) => raw as u32 as f64,
    };
    if is_double {
        hart.set_freg_f64(insn.rd(), as_f64);
    } else {
        hart.set_freg_f32(insn.rd(), as_f64 as f32);
    }
    Ok(())
}

fn fmv_x_or_class(hart: &mut Hart, insn: Insn, is_double: bool) -> Result<(), Exception> {
    match insn.rs2() {
        0 => {
            // FMV.X.W / FMV.X.D
            let bits = if is_double {
                hart.freg_bits(insn.rs1())
            } else {
                rv_types::sign_extend(hart.freg_f32(insn.rs1()).to_bits() as u64, 32)
            };
            hart.set_reg(insn.rd(), bits);
            Ok(())
        }
        1 => {
            let class = if is_double {
                fclass_f64(hart.freg_f64(insn.rs1()))
            } else {
                fclass_f32(hart.freg_f32(insn.rs1()))
            };
            hart.set_reg(insn.rd(), class);
            Ok(())
        }
        _ => Err(Exception::IllegalInstruction),
    }
}

fn fclass_f64(v: f64) -> u64 {
    let neg = v.is_sign_negative();
    if v.is_nan() {
        if is_snan_f64(v) { 1 << 8 } else { 1 << 9 }
    } else if v.is_infinite() {
        if neg { 1 << 0 } else { 1 << 7 }
    } else if v == 0.0 {
        if neg { 1 << 3 } else { 1 << 4 }
    } else if v.is_subnormal() {
        if neg { 1 << 2 } else { 1 << 5 }
    } else if neg {
        1 << 1
    } else {
        1 << 6
    }
}

fn fclass_f32(v: f32) -> u64 {
    let neg = v.is_sign_negative();
    if v.is_nan() {
        if is_snan_f32(v) { 1 << 8 } else { 1 << 9 }
    } else if v.is_infinite() {
        if neg { 1 << 0 } else { 1 << 7 }
    } else if v == 0.0 {
        if neg { 1 << 3 } else { 1 << 4 }
    } else if v.is_subnormal() {
        if neg { 1 << 2 } else { 1 << 5 }
    } else if neg {
        1 << 1
    } else {
        1 << 6
    }
}
