//! Conditional branches (opcode `1100011`): comparisons are taken on the
//! signed or unsigned view of the two operands per `funct3`; a taken
//! branch targets `pc + imm_b`.

use rv_decode::Insn;
use rv_types::Exception;

use crate::driver::ControlFlow;
use crate::hart::Hart;

pub fn dispatch(hart: &mut Hart, insn: Insn, pc: u64) -> Result<ControlFlow, Exception> {
    let rs1 = hart.reg(insn.rs1());
    let rs2 = hart.reg(insn.rs2());
    let taken = match insn.funct3() {
        0b000 => rs1 == rs2,                         // BEQ
        0b001 => rs1 != rs2,                          // BNE
        0b100 => (rs1 as i64) < (rs2 as i64),         // BLT
        0b101 => (rs1 as i64) >= (rs2 as i64),        // BGE
        0b110 => rs1 < rs2,                           // BLTU
        0b111 => rs1 >= rs2,                          // BGEU
        _ => return Err(Exception::IllegalInstruction),
    };
    if taken {
        hart.pc = pc.wrapping_add(insn.imm_b());
        Ok(ControlFlow::Jumped)
    } else {
        Ok(ControlFlow::Advance)
    }
}
