use rv_csr::CsrFile;
use rv_types::{InterruptKind, PrivilegeMode, TrapCause};

use crate::hart::Hart;

/// Picks the next interrupt to deliver and clears its `mip` bit
/// atomically with the pick. Must be called once the caller has already
/// folded any freshly-polled peripheral IRQ into `mip.SEIP`.
pub fn select_pending_interrupt(csr: &mut CsrFile, mode: PrivilegeMode, wfi: bool) -> Option<InterruptKind> {
    let gate = match mode {
        PrivilegeMode::Machine => csr.mstatus_mie() || wfi,
        PrivilegeMode::Supervisor => csr.sstatus_sie() || wfi,
        PrivilegeMode::User => true,
    };
    if !gate {
        return None;
    }
    let pending = csr.mie_raw() & csr.mip_raw();
    for &kind in InterruptKind::PRIORITY.iter() {
        let bit = 1u64 << kind.code();
        if pending & bit != 0 {
            csr.clear_mip_bits(bit);
            return Some(kind);
        }
    }
    None
}

fn is_delegated(csr: &CsrFile, cause: TrapCause) -> bool {
    match cause {
        TrapCause::Exception(e) => (csr.medeleg() >> e.code()) & 1 != 0,
        TrapCause::Interrupt(i) => i.is_delegatable() && (csr.mideleg() >> i.code()) & 1 != 0,
    }
}

/// The seven-step delivery sequence. `tval` is whatever the caller has
/// already computed per the exception/interrupt's auxiliary-data rule.
pub fn deliver(hart: &mut Hart, cause: TrapCause, tval: u64) {
    hart.wfi = false;

    let s_mode = is_delegated(&hart.csr, cause) && hart.mode <= PrivilegeMode::Supervisor;
    tracing::trace!(?cause, tval, s_mode, pc = hart.pc, "delivering trap");

    hart.csr.set_epc(s_mode, hart.pc);

    let mut cause_val = cause.code();
    if cause.is_interrupt() {
        cause_val |= 1u64 << 63;
    }
    hart.csr.set_cause(s_mode, cause_val);
    hart.csr.set_tval(s_mode, tval);

    let tvec = hart.csr.tvec(s_mode);
    let base = tvec & !0b11;
    let vectored = tvec & 0b11 == 1;
    let new_pc = if vectored && cause.is_interrupt() {
        base.wrapping_add(4 * cause.code())
    } else {
        base
    };

    if s_mode {
        let sie = hart.csr.sstatus_sie();
        hart.csr.set_sstatus_spie(sie);
        hart.csr.set_sstatus_sie(false);
        hart.csr.set_sstatus_spp(hart.mode);
        hart.mode = PrivilegeMode::Supervisor;
    } else {
        let mie = hart.csr.mstatus_mie();
        hart.csr.set_mstatus_mpie(mie);
        hart.csr.set_mstatus_mie(false);
        hart.csr.set_mstatus_mpp(hart.mode);
        hart.mode = PrivilegeMode::Machine;
    }
    hart.pc = new_pc;
}

/// `MRET`/`SRET`.
pub fn xret(hart: &mut Hart, s_mode: bool) {
    let prev_mode = if s_mode {
        hart.csr.sstatus_spp()
    } else {
        hart.csr.mstatus_mpp()
    };

    if s_mode {
        let spie = hart.csr.sstatus_spie();
        hart.csr.set_sstatus_sie(spie);
        hart.csr.set_sstatus_spie(true);
        hart.csr.set_sstatus_spp(PrivilegeMode::User);
    } else {
        let mpie = hart.csr.mstatus_mpie();
        hart.csr.set_mstatus_mie(mpie);
        hart.csr.set_mstatus_mpie(true);
        hart.csr.set_mstatus_mpp(PrivilegeMode::User);
    }

    if prev_mode < PrivilegeMode::Machine {
        hart.csr.set_mstatus_mprv(false);
    }

    hart.mode = prev_mode;
    hart.pc = hart.csr.epc(s_mode);
}
