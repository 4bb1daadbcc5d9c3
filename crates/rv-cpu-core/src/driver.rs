//! The per-step fetch/decode/execute loop: folds pending peripheral IRQs
//! into `mip`, delivers the highest-priority pending trap, fetches one
//! instruction through the MMU, and dispatches it to the handler family
//! that owns its opcode.

use rv_mmu::Mmu;
use rv_types::{AccessType, Exception, TrapCause, Width};

use crate::alu;
use crate::branch;
use crate::compressed;
use crate::csr_insn;
use crate::fpu;
use crate::hart::Hart;
use crate::mem;
use crate::sysbus::SystemBus;
use crate::trap;

const OP_IMM: u32 = 0x13;
const OP: u32 = 0x33;
const OP_IMM_32: u32 = 0x1b;
const OP_32: u32 = 0x3b;
const LUI: u32 = 0x37;
const AUIPC: u32 = 0x17;
const JAL: u32 = 0x6f;
const JALR: u32 = 0x67;
const BRANCH: u32 = 0x63;
const LOAD: u32 = 0x03;
const STORE: u32 = 0x23;
const AMO: u32 = 0x2f;
const MISC_MEM: u32 = 0x0f;
const SYSTEM: u32 = 0x73;
const LOAD_FP: u32 = 0x07;
const STORE_FP: u32 = 0x27;
const MADD: u32 = 0x43;
const MSUB: u32 = 0x47;
const NMSUB: u32 = 0x4b;
const NMADD: u32 = 0x4f;
const OP_FP: u32 = 0x53;

/// Whether a handler already left `hart.pc` at its final value, or the
/// driver still owes it the ordinary `pc += insn_size` advance. Adopted
/// instead of replaying the "compute `pc - insn_size`, let the epilogue
/// re-add it" pattern some reference interpreters use for every taken
/// branch: every control-flow-altering handler here just writes the
/// absolute target once.
pub(crate) enum ControlFlow {
    Advance,
    Jumped,
}

/// What one call to [`step`] accomplished, for a caller (the machine/boot
/// loop, or a test) that wants to observe hart lifecycle transitions
/// without polling `hart.wfi` or peripheral state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// An instruction retired normally.
    Retired,
    /// A trap (exception or interrupt) was delivered; `pc` now points at
    /// the trap vector.
    Trapped,
    /// The hart is sleeping in `WFI` and no pending interrupt woke it.
    Waiting,
}

/// Runs one step of the hart: tick time-driven devices, fold fresh
/// peripheral state into `mip`, deliver a pending interrupt if one wins
/// arbitration, otherwise fetch-decode-execute exactly one instruction.
/// `elapsed_ms` is the host-time delta since the previous step, forwarded
/// to CLINT's `mtime` and the bus's per-device tick.
pub fn step(hart: &mut Hart, mmu: &mut Mmu, sysbus: &mut SystemBus, elapsed_ms: u64) -> StepOutcome {
    sysbus.bus.tick(elapsed_ms);
    sysbus.clint.tick(elapsed_ms);
    hart.csr.tick_counters(elapsed_ms);
    hart.csr.set_time(sysbus.clint.mtime());

    hart.csr.set_mip_bit(1 << 3, sysbus.clint.msip() & 1 != 0);
    hart.csr.set_mip_bit(1 << 7, sysbus.clint.mtime() >= sysbus.clint.mtimecmp());

    if let Some(virtio) = sysbus.virtio.as_deref_mut() {
        let _ = virtio.poll(sysbus.bus);
    }

    // Poll every interrupting peripheral once, update the PLIC with any
    // returned IRQ number, and set mip.SEIP.
    for irq in sysbus.bus.poll_interrupts() {
        sysbus.plic.update_pending(irq);
    }
    if let Some(irq) = sysbus.virtio.as_deref().and_then(|v| v.pending_irq()) {
        sysbus.plic.update_pending(irq);
    }
    hart.csr.set_mip_bit(1 << 9, sysbus.plic.context_pending(1));

    if let Some(kind) = trap::select_pending_interrupt(&mut hart.csr, hart.mode, hart.wfi) {
        trap::deliver(hart, TrapCause::Interrupt(kind), 0);
        return StepOutcome::Trapped;
    }

    if hart.wfi {
        return StepOutcome::Waiting;
    }

    match execute_one(hart, mmu, sysbus) {
        Ok(()) => StepOutcome::Retired,
        Err(e) => {
            let tval = hart.pending_tval;
            trap::deliver(hart, TrapCause::Exception(e), tval);
            StepOutcome::Trapped
        }
    }
}

/// Fetch, decode, and execute exactly one instruction. Every exit path
/// leaves `hart.pending_tval` holding the correct `{m,s}tval` payload for
/// whatever `Exception` it returns: the faulting address for fetch faults
/// (set here), the faulting address for load/store faults (set by
/// `mem::read`/`mem::write` as they occur), or the raw instruction word
/// for `IllegalInstruction` (set here, once, at the dispatch boundary,
/// rather than at every one of the handlers' individual reject sites).
fn execute_one(hart: &mut Hart, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<(), Exception> {
    hart.pending_tval = 0;
    let pc = hart.pc;
    let ctx = mem::translation_ctx(hart, AccessType::Instruction);
    let pa = mmu.translate(pc, AccessType::Instruction, &ctx, sysbus.bus).map_err(|e| {
        hart.pending_tval = pc;
        e
    })?;
    let low = sysbus.bus.load(pa, Width::Half).map_err(|e| {
        hart.pending_tval = pc;
        e
    })? as u16;

    if rv_decode::Insn::is_compressed(low) {
        if low == 0 {
            hart.pending_tval = 0;
            return Err(Exception::IllegalInstruction);
        }
        let c = rv_decode::CompressedInsn(low);
        let cf = compressed::dispatch(hart, c, pc, mmu, sysbus).map_err(|e| {
            if e == Exception::IllegalInstruction {
                hart.pending_tval = low as u64;
            }
            e
        })?;
        advance(hart, cf, pc, 2);
        Ok(())
    } else {
        let hi = sysbus.bus.load(pa + 2, Width::Half).map_err(|e| {
            hart.pending_tval = pc;
            e
        })? as u16;
        let word = (low as u32) | ((hi as u32) << 16);
        if word == 0 {
            hart.pending_tval = 0;
            return Err(Exception::IllegalInstruction);
        }
        let insn = rv_decode::Insn(word);
        let cf = dispatch32(hart, insn, pc, mmu, sysbus).map_err(|e| {
            if e == Exception::IllegalInstruction {
                hart.pending_tval = word as u64;
            }
            e
        })?;
        advance(hart, cf, pc, 4);
        Ok(())
    }
}

fn advance(hart: &mut Hart, cf: ControlFlow, pc: u64, insn_size: u64) {
    if matches!(cf, ControlFlow::Advance) {
        hart.pc = pc.wrapping_add(insn_size);
    }
}

fn dispatch32(hart: &mut Hart, insn: rv_decode::Insn, pc: u64, mmu: &mut Mmu, sysbus: &mut SystemBus) -> Result<ControlFlow, Exception> {
    match insn.opcode() {
        OP_IMM | OP | OP_IMM_32 | OP_32 | LUI | AUIPC | JAL | JALR => alu::dispatch(hart, insn, pc, 4),
        BRANCH => branch::dispatch(hart, insn, pc),
        LOAD | STORE | AMO | MISC_MEM => mem::dispatch(hart, insn, mmu, sysbus),
        SYSTEM => csr_insn::dispatch(hart, insn, mmu),
        LOAD_FP | STORE_FP | MADD | MSUB | NMSUB | NMADD | OP_FP => fpu::dispatch(hart, insn, mmu, sysbus),
        _ => Err(Exception::IllegalInstruction),
    }
}
