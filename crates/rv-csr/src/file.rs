use rv_types::{Exception, PrivilegeMode};

use crate::addr;
use crate::mask::{self, *};

/// How a given CSR address is handled by the dispatcher: most addresses
/// fall through to a plain read-modify-write, the rest get a dedicated
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsrClass {
    Standard,
    /// `misa`, `mvendorid`, `marchid`, `mimpid`, `mhartid`, the trigger
    /// register: a write that would change the value traps.
    TrapReadOnly,
    /// `cycle`, `time`, `timems`: writes are silently discarded, never
    /// trapped.
    WriteIgnoredReadOnly,
    Mstatus,
    Sstatus,
    Sie,
    Sip,
    Fflags,
    Frm,
    Fcsr,
    Satp,
    /// `mepc`/`sepc`: bit 0 is hardwired to zero.
    Epc,
}

fn classify(a: u32) -> CsrClass {
    match a {
        x if x == addr::FFLAGS => CsrClass::Fflags,
        x if x == addr::FRM => CsrClass::Frm,
        x if x == addr::FCSR => CsrClass::Fcsr,
        x if x == addr::SSTATUS => CsrClass::Sstatus,
        x if x == addr::SIE => CsrClass::Sie,
        x if x == addr::SIP => CsrClass::Sip,
        x if x == addr::SATP => CsrClass::Satp,
        x if x == addr::MSTATUS => CsrClass::Mstatus,
        x if x == addr::MEPC || x == addr::SEPC => CsrClass::Epc,
        x if x == addr::MISA
            || x == addr::MVENDORID
            || x == addr::MARCHID
            || x == addr::MIMPID
            || x == addr::MHARTID
            || x == addr::TDATA1 =>
        {
            CsrClass::TrapReadOnly
        }
        x if x == addr::CYCLE || x == addr::TIME || x == addr::TIMEMS => {
            CsrClass::WriteIgnoredReadOnly
        }
        _ => CsrClass::Standard,
    }
}

/// Minimum privilege required to access `addr`, using the standard
/// RISC-V convention that CSR address bits `[9:8]` encode it
/// (`00`=U, `01`=S, `10`=H (unused here), `11`=M).
fn min_privilege(a: u32) -> PrivilegeMode {
    match (a >> 8) & 0b11 {
        0b00 => PrivilegeMode::User,
        0b11 => PrivilegeMode::Machine,
        _ => PrivilegeMode::Supervisor,
    }
}

const MSTATUS_WRITABLE: u64 = MSTATUS_SIE
    | MSTATUS_MIE
    | MSTATUS_SPIE
    | MSTATUS_MPIE
    | MSTATUS_SPP
    | MSTATUS_MPP
    | MSTATUS_FS
    | MSTATUS_MPRV
    | MSTATUS_SUM
    | MSTATUS_MXR
    | MSTATUS_TVM
    | MSTATUS_TSR;

/// The 4096-entry control-and-status register file.
pub struct CsrFile {
    regs: Box<[u64; 4096]>,
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrFile {
    pub fn new() -> Self {
        let mut regs = Box::new([0u64; 4096]);
        regs[addr::MISA as usize] = mask::misa_value();
        regs[addr::MHARTID as usize] = 0;
        CsrFile { regs }
    }

    #[inline]
    fn raw(&self, a: u32) -> u64 {
        self.regs[a as usize]
    }

    #[inline]
    fn raw_set(&mut self, a: u32, v: u64) {
        self.regs[a as usize] = v;
    }

    /// `load(addr)`: applies the read-side aliasing rules,
    /// gated by the calling mode's privilege.
    pub fn load(&self, a: u32, mode: PrivilegeMode) -> Result<u64, Exception> {
        if mode < min_privilege(a) {
            return Err(Exception::IllegalInstruction);
        }
        Ok(match classify(a) {
            CsrClass::Mstatus => self.raw(addr::MSTATUS) | (UXL_SXL_64 << MSTATUS_UXL_SHIFT),
            CsrClass::Sstatus => {
                (self.raw(addr::MSTATUS) & SSTATUS_MASK) | (UXL_SXL_64 << MSTATUS_UXL_SHIFT)
            }
            CsrClass::Sie => self.raw(addr::MIE) & self.raw(addr::MIDELEG),
            CsrClass::Sip => self.raw(addr::MIP) & self.raw(addr::MIDELEG),
            CsrClass::Fflags => self.raw(addr::FCSR) & 0x1f,
            CsrClass::Frm => (self.raw(addr::FCSR) >> 5) & 0x7,
            CsrClass::Fcsr => self.raw(addr::FCSR) & 0xff,
            _ => self.raw(a),
        })
    }

    /// `store(addr, value)`: applies the write-side
    /// aliasing and read-only/privileged-trap rules.
    pub fn store(&mut self, a: u32, mode: PrivilegeMode, value: u64) -> Result<(), Exception> {
        if mode < min_privilege(a) {
            tracing::debug!(addr = a, ?mode, "csr store: privilege too low");
            return Err(Exception::IllegalInstruction);
        }
        match classify(a) {
            CsrClass::TrapReadOnly => {
                if value != self.raw(a) {
                    tracing::debug!(addr = a, value, "csr store: read-only csr rejected");
                    return Err(Exception::IllegalInstruction);
                }
            }
            CsrClass::WriteIgnoredReadOnly => {}
            CsrClass::Mstatus => {
                let cur = self.raw(addr::MSTATUS);
                self.raw_set(addr::MSTATUS, (cur & !MSTATUS_WRITABLE) | (value & MSTATUS_WRITABLE));
            }
            CsrClass::Sstatus => {
                let cur = self.raw(addr::MSTATUS);
                self.raw_set(addr::MSTATUS, (cur & !SSTATUS_MASK) | (value & SSTATUS_MASK));
            }
            CsrClass::Sie => {
                let cur = self.raw(addr::MIE);
                let mideleg = self.raw(addr::MIDELEG);
                self.raw_set(addr::MIE, (cur & !mideleg) | (value & mideleg));
            }
            CsrClass::Sip => {
                let cur = self.raw(addr::MIP);
                let writable = self.raw(addr::MIDELEG) & SIP_WRITABLE;
                self.raw_set(addr::MIP, (cur & !writable) | (value & writable));
            }
            CsrClass::Fflags => {
                let fcsr = self.raw(addr::FCSR);
                self.raw_set(addr::FCSR, (fcsr & !0x1f) | (value & 0x1f));
            }
            CsrClass::Frm => {
                let fcsr = self.raw(addr::FCSR);
                self.raw_set(addr::FCSR, (fcsr & !0xe0) | ((value & 0x7) << 5));
            }
            CsrClass::Fcsr => self.raw_set(addr::FCSR, value & 0xff),
            CsrClass::Satp => {
                if mode == PrivilegeMode::Supervisor && self.mstatus_tvm() {
                    return Err(Exception::IllegalInstruction);
                }
                self.raw_set(addr::SATP, value);
            }
            CsrClass::Epc => self.raw_set(a, value & !1),
            CsrClass::Standard => self.raw_set(a, value),
        }
        Ok(())
    }

    /// Direct field access bypassing the privilege/aliasing rules above —
    /// used by the trap-delivery and FPU machinery, which write `mcause`,
    /// `mip`, `fflags`, etc. as part of their own contract rather than in
    /// response to a guest CSR instruction.
    pub fn raw_read(&self, a: u32) -> u64 {
        self.raw(a)
    }

    pub fn raw_write(&mut self, a: u32, v: u64) {
        self.raw_set(a, v);
    }

    // --- mstatus convenience accessors ---

    pub fn mstatus_mie(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_MIE != 0
    }
    pub fn set_mstatus_mie(&mut self, v: bool) {
        self.set_mstatus_bit(MSTATUS_MIE, v);
    }
    pub fn mstatus_mpie(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_MPIE != 0
    }
    pub fn set_mstatus_mpie(&mut self, v: bool) {
        self.set_mstatus_bit(MSTATUS_MPIE, v);
    }
    pub fn mstatus_mpp(&self) -> PrivilegeMode {
        PrivilegeMode::from_encoding(((self.raw(addr::MSTATUS) & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT) as u8)
    }
    pub fn set_mstatus_mpp(&mut self, mode: PrivilegeMode) {
        let cur = self.raw(addr::MSTATUS);
        let v = (cur & !MSTATUS_MPP) | ((mode.encoding() as u64) << MSTATUS_MPP_SHIFT);
        self.raw_set(addr::MSTATUS, v);
    }
    pub fn mstatus_mprv(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_MPRV != 0
    }
    pub fn set_mstatus_mprv(&mut self, v: bool) {
        self.set_mstatus_bit(MSTATUS_MPRV, v);
    }
    pub fn mstatus_sum(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_SUM != 0
    }
    pub fn mstatus_mxr(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_MXR != 0
    }
    pub fn mstatus_tvm(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_TVM != 0
    }
    pub fn mstatus_tsr(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_TSR != 0
    }
    pub fn fs(&self) -> u8 {
        ((self.raw(addr::MSTATUS) & MSTATUS_FS) >> MSTATUS_FS_SHIFT) as u8
    }
    pub fn set_fs(&mut self, v: u8) {
        let cur = self.raw(addr::MSTATUS);
        let new = (cur & !MSTATUS_FS) | (((v as u64) << MSTATUS_FS_SHIFT) & MSTATUS_FS);
        self.raw_set(addr::MSTATUS, new);
    }

    fn set_mstatus_bit(&mut self, bit: u64, v: bool) {
        let cur = self.raw(addr::MSTATUS);
        self.raw_set(addr::MSTATUS, if v { cur | bit } else { cur & !bit });
    }

    // --- sstatus convenience accessors ---

    pub fn sstatus_sie(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_SIE != 0
    }
    pub fn set_sstatus_sie(&mut self, v: bool) {
        self.set_mstatus_bit(MSTATUS_SIE, v);
    }
    pub fn sstatus_spie(&self) -> bool {
        self.raw(addr::MSTATUS) & MSTATUS_SPIE != 0
    }
    pub fn set_sstatus_spie(&mut self, v: bool) {
        self.set_mstatus_bit(MSTATUS_SPIE, v);
    }
    pub fn sstatus_spp(&self) -> PrivilegeMode {
        if self.raw(addr::MSTATUS) & MSTATUS_SPP != 0 {
            PrivilegeMode::Supervisor
        } else {
            PrivilegeMode::User
        }
    }
    pub fn set_sstatus_spp(&mut self, mode: PrivilegeMode) {
        self.set_mstatus_bit(MSTATUS_SPP, mode == PrivilegeMode::Supervisor);
    }

    // --- FPU CSR convenience accessors ---

    pub fn fflags(&self) -> u8 {
        (self.raw(addr::FCSR) & 0x1f) as u8
    }
    pub fn set_fflags(&mut self, v: u8) {
        let fcsr = self.raw(addr::FCSR);
        self.raw_set(addr::FCSR, (fcsr & !0x1f) | (v as u64 & 0x1f));
    }
    pub fn accumulate_fflags(&mut self, v: u8) {
        let cur = self.fflags();
        self.set_fflags(cur | v);
    }
    pub fn frm(&self) -> u8 {
        ((self.raw(addr::FCSR) >> 5) & 0x7) as u8
    }

    // --- trap-delivery direct fields ---

    pub fn medeleg(&self) -> u64 {
        self.raw(addr::MEDELEG)
    }
    pub fn mideleg(&self) -> u64 {
        self.raw(addr::MIDELEG)
    }
    pub fn mie_raw(&self) -> u64 {
        self.raw(addr::MIE)
    }
    pub fn mip_raw(&self) -> u64 {
        self.raw(addr::MIP)
    }
    pub fn set_mip_bit(&mut self, bit: u64, v: bool) {
        let cur = self.raw(addr::MIP);
        self.raw_set(addr::MIP, if v { cur | bit } else { cur & !bit });
    }
    pub fn clear_mip_bits(&mut self, mask: u64) {
        let cur = self.raw(addr::MIP);
        self.raw_set(addr::MIP, cur & !mask);
    }

    pub fn satp(&self) -> u64 {
        self.raw(addr::SATP)
    }

    pub fn tvec(&self, s_mode: bool) -> u64 {
        self.raw(if s_mode { addr::STVEC } else { addr::MTVEC })
    }

    pub fn set_epc(&mut self, s_mode: bool, pc: u64) {
        self.raw_set(if s_mode { addr::SEPC } else { addr::MEPC }, pc & !1);
    }
    pub fn epc(&self, s_mode: bool) -> u64 {
        self.raw(if s_mode { addr::SEPC } else { addr::MEPC })
    }
    pub fn set_cause(&mut self, s_mode: bool, cause: u64) {
        self.raw_set(if s_mode { addr::SCAUSE } else { addr::MCAUSE }, cause);
    }
    pub fn set_tval(&mut self, s_mode: bool, tval: u64) {
        self.raw_set(if s_mode { addr::STVAL } else { addr::MTVAL }, tval);
    }

    /// Advance the free-running cycle/time counters and the wall-clock
    /// millisecond CSR by one step (monotonically incremented
    /// by the hart).
    pub fn tick_counters(&mut self, elapsed_ms: u64) {
        self.raw_set(addr::CYCLE, self.raw(addr::CYCLE).wrapping_add(1));
        self.raw_set(addr::TIMEMS, self.raw(addr::TIMEMS).wrapping_add(elapsed_ms));
    }

    /// Mirror CLINT's `mtime` into the `time` CSR.
    pub fn set_time(&mut self, mtime: u64) {
        self.raw_set(addr::TIME, mtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sstatus_view_is_masked_mstatus() {
        let mut csr = CsrFile::new();
        csr.store(addr::MSTATUS, PrivilegeMode::Machine, u64::MAX)
            .unwrap();
        let sstatus = csr.load(addr::SSTATUS, PrivilegeMode::Supervisor).unwrap();
        assert_eq!(
            sstatus,
            (SSTATUS_MASK & !MSTATUS_SD) | (UXL_SXL_64 << MSTATUS_UXL_SHIFT)
        );
    }

    #[test]
    fn sie_write_is_masked_by_mideleg() {
        let mut csr = CsrFile::new();
        csr.store(addr::MIDELEG, PrivilegeMode::Machine, MIP_SSIP | MIP_STIP)
            .unwrap();
        csr.store(addr::SIE, PrivilegeMode::Supervisor, u64::MAX)
            .unwrap();
        assert_eq!(csr.mie_raw(), MIP_SSIP | MIP_STIP);
    }

    #[test]
    fn user_mode_cannot_touch_machine_csr() {
        let mut csr = CsrFile::new();
        assert_eq!(
            csr.store(addr::MSTATUS, PrivilegeMode::User, 0),
            Err(Exception::IllegalInstruction)
        );
        assert_eq!(
            csr.load(addr::MSTATUS, PrivilegeMode::User),
            Err(Exception::IllegalInstruction)
        );
    }

    #[test]
    fn misa_traps_on_real_change_but_allows_same_value_write() {
        let mut csr = CsrFile::new();
        let cur = csr.load(addr::MISA, PrivilegeMode::Machine).unwrap();
        csr.store(addr::MISA, PrivilegeMode::Machine, cur).unwrap();
        assert_eq!(
            csr.store(addr::MISA, PrivilegeMode::Machine, cur ^ 1),
            Err(Exception::IllegalInstruction)
        );
    }

    #[test]
    fn cycle_write_is_silently_ignored_not_trapped() {
        let mut csr = CsrFile::new();
        csr.tick_counters(0);
        let before = csr.load(addr::CYCLE, PrivilegeMode::Machine).unwrap();
        csr.store(addr::CYCLE, PrivilegeMode::Machine, 0xdead)
            .unwrap();
        assert_eq!(csr.load(addr::CYCLE, PrivilegeMode::Machine).unwrap(), before);
    }

    #[test]
    fn fcsr_fflags_frm_cooperate() {
        let mut csr = CsrFile::new();
        csr.store(addr::FRM, PrivilegeMode::Machine, 0b011).unwrap();
        csr.store(addr::FFLAGS, PrivilegeMode::Machine, 0b10101)
            .unwrap();
        assert_eq!(csr.load(addr::FCSR, PrivilegeMode::Machine).unwrap(), (0b011 << 5) | 0b10101);
    }

    #[test]
    fn satp_traps_in_s_mode_when_tvm_set() {
        let mut csr = CsrFile::new();
        csr.store(addr::MSTATUS, PrivilegeMode::Machine, MSTATUS_TVM)
            .unwrap();
        assert_eq!(
            csr.store(addr::SATP, PrivilegeMode::Supervisor, 0),
            Err(Exception::IllegalInstruction)
        );
        // Machine mode is never subject to TVM.
        csr.store(addr::SATP, PrivilegeMode::Machine, 0x1234).unwrap();
        assert_eq!(csr.satp(), 0x1234);
    }

    #[test]
    fn epc_low_bit_is_always_cleared() {
        let mut csr = CsrFile::new();
        csr.set_epc(false, 0x8000_0001);
        assert_eq!(csr.epc(false), 0x8000_0000);
    }

    proptest::proptest! {
        #[test]
        fn sscratch_round_trip_law(v: u64) {
            let mut csr = CsrFile::new();
            csr.store(addr::SSCRATCH, PrivilegeMode::Machine, v).unwrap();
            proptest::prop_assert_eq!(csr.load(addr::SSCRATCH, PrivilegeMode::Machine).unwrap(), v);
        }
    }
}
