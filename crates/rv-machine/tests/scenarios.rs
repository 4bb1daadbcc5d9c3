//! Six end-to-end scenarios exercising the full fetch/decode/execute/trap
//! pipeline, run against the same
//! `rv_cpu_core::step` loop `Machine::step` drives, wired up by hand so
//! each scenario controls exactly the CSR/memory state it names.

use rv_cpu_core::{step, Hart, StepOutcome, SystemBus};
use rv_csr::addr;
use rv_interrupts::{Clint, Plic};
use rv_mem::{Bus, Ram};
use rv_mmu::Mmu;
use rv_types::{Exception, PrivilegeMode, TrapCause, Width};

struct Rig {
    hart: Hart,
    mmu: Mmu,
    bus: Bus,
    clint: Clint,
    plic: Plic,
}

impl Rig {
    fn new(ram_base: u64, ram_size: usize) -> Rig {
        let mut bus = Bus::new();
        bus.attach(ram_base, ram_size as u64, Box::new(Ram::new(ram_size))).unwrap();
        let mut hart = Hart::new();
        hart.pc = ram_base;
        Rig {
            hart,
            mmu: Mmu::new(),
            bus,
            clint: Clint::new(),
            plic: Plic::new(),
        }
    }

    fn write_words(&mut self, base: u64, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            self.bus.store(base + i as u64 * 4, Width::Word, w as u64).unwrap();
        }
    }

    fn write_halves(&mut self, base: u64, halves: &[u16]) {
        for (i, &h) in halves.iter().enumerate() {
            self.bus.store(base + i as u64 * 2, Width::Half, h as u64).unwrap();
        }
    }

    fn step(&mut self, elapsed_ms: u64) -> StepOutcome {
        let mut sb = SystemBus {
            bus: &mut self.bus,
            clint: &mut self.clint,
            clint_base: 0x0200_0000,
            plic: &mut self.plic,
            plic_base: 0x0c00_0000,
            virtio: None,
            virtio_base: 0x1000_1000,
        };
        step(&mut self.hart, &mut self.mmu, &mut sb, elapsed_ms)
    }
}

/// S1 — ADDI chain: `addi a0,zero,5; addi a0,a0,10; ecall` with
/// `mtvec=0` delivers ECALL-from-M at `mepc = 0x80000008` with `a0 = 15`.
#[test]
fn s1_addi_chain_ecall_from_machine() {
    let mut rig = Rig::new(0x8000_0000, 0x1000);
    rig.write_words(0x8000_0000, &[0x00500513, 0x00a50513, 0x00000073]);

    assert_eq!(rig.step(0), StepOutcome::Retired);
    assert_eq!(rig.step(0), StepOutcome::Retired);
    assert_eq!(rig.hart.reg(10), 15);

    assert_eq!(rig.step(0), StepOutcome::Trapped);
    assert_eq!(rig.hart.csr.epc(false), 0x8000_0008);
    assert_eq!(
        rig.hart.csr.raw_read(addr::MCAUSE),
        Exception::EnvironmentCallFromMMode.code()
    );
    assert_eq!(rig.hart.pc, 0); // mtvec == 0
    assert_eq!(rig.hart.reg(10), 15);
}

/// S2 — Compressed fall-through: `c.li a0,0; c.addi a0,10`. After two
/// steps, `a0 = 10` and `pc = 0x80000004`.
#[test]
fn s2_compressed_fallthrough_advances_pc_by_two_each() {
    let mut rig = Rig::new(0x8000_0000, 0x1000);
    rig.write_halves(0x8000_0000, &[0x4501, 0x0529]);

    assert_eq!(rig.step(0), StepOutcome::Retired);
    assert_eq!(rig.hart.pc, 0x8000_0002);
    assert_eq!(rig.hart.reg(10), 0);

    assert_eq!(rig.step(0), StepOutcome::Retired);
    assert_eq!(rig.hart.pc, 0x8000_0004);
    assert_eq!(rig.hart.reg(10), 10);
}

/// S3 — Page-fault delivery: Sv39 root page table is entirely unmapped
/// (every PTE invalid); a user-mode load from `0x1_0000_0000` must
/// deliver LoadPageFault to Supervisor with `stval` = the faulting
/// address, provided `medeleg[13] = 1`.
#[test]
fn s3_page_fault_delivered_to_supervisor_when_delegated() {
    let mut rig = Rig::new(0x8000_0000, 0x2_0000);
    // Root page table lives at the base of RAM. Its VPN[2]=2 entry is a
    // 1 GiB identity superpage covering RAM itself (so fetch/page-table
    // walks succeed); its VPN[2]=4 entry (covering 0x1_0000_0000) is
    // left zero, i.e. invalid.
    let root_ppn = 0x8000_0000u64 / 4096;
    let root_phys = root_ppn * 4096;
    let identity_superpage_ppn = 2u64 << 18; // PPN[2]=2, PPN[1]=PPN[0]=0
    let identity_flags = 0b1_1111u64; // V|R|W|X|U
    rig.bus
        .store(root_phys + 2 * 8, Width::Double, (identity_superpage_ppn << 10) | identity_flags)
        .unwrap();

    rig.hart
        .csr
        .store(addr::MEDELEG, PrivilegeMode::Machine, 1 << 13)
        .unwrap();
    rig.hart
        .csr
        .store(addr::STVEC, PrivilegeMode::Machine, 0x9000_0000)
        .unwrap();
    rig.hart
        .csr
        .store(addr::SATP, PrivilegeMode::Machine, (8u64 << 60) | root_ppn)
        .unwrap();
    rig.mmu.update(rig.hart.csr.satp());
    rig.hart.mode = PrivilegeMode::User;

    // lw x5, 0(x6); x6 = 0x1_0000_0000.
    rig.hart.set_reg(6, 0x1_0000_0000);
    rig.write_words(0x8000_1000, &[0x00032283]); // placed past the page table page
    rig.hart.pc = 0x8000_1000;

    let outcome = rig.step(0);
    assert_eq!(outcome, StepOutcome::Trapped);
    assert_eq!(rig.hart.mode, PrivilegeMode::Supervisor);
    assert_eq!(rig.hart.csr.raw_read(addr::SCAUSE), Exception::LoadPageFault.code());
    assert_eq!(rig.hart.csr.raw_read(addr::STVAL), 0x1_0000_0000);
    assert_eq!(rig.hart.pc, 0x9000_0000);
}

/// S4 — Timer interrupt: `mtimecmp = 100`, `mstatus.MIE = 1`,
/// `mie.MTIP = 1`, `mtvec = 0x1000`. After at least 100ms of emulated
/// wall-clock the hart diverts to `0x1000` with
/// `mcause = (1<<63) | 7`.
#[test]
fn s4_timer_interrupt_after_100ms_diverts_to_mtvec() {
    let mut rig = Rig::new(0x8000_0000, 0x1000);
    rig.write_words(0x8000_0000, &[0x0000_0013u32; 16]); // a run of nops to retire through
    rig.hart
        .csr
        .store(addr::MTVEC, PrivilegeMode::Machine, 0x1000)
        .unwrap();
    rig.hart
        .csr
        .store(addr::MIE, PrivilegeMode::Machine, 1 << 7)
        .unwrap();
    rig.hart
        .csr
        .store(addr::MSTATUS, PrivilegeMode::Machine, 1 << 3)
        .unwrap();
    rig.clint.store(0x4000, Width::Double, 100).unwrap(); // mtimecmp

    // Fewer than 100ms elapsed: no interrupt yet.
    for _ in 0..9 {
        assert_eq!(rig.step(10), StepOutcome::Retired);
    }
    assert_eq!(rig.clint.mtime(), 90);

    // Crossing the threshold delivers the interrupt instead of retiring.
    let outcome = rig.step(10);
    assert_eq!(outcome, StepOutcome::Trapped);
    assert_eq!(rig.hart.pc, 0x1000);
    assert_eq!(
        rig.hart.csr.raw_read(addr::MCAUSE),
        (1u64 << 63) | TrapCause::Interrupt(rv_types::InterruptKind::MachineTimer).code()
    );
}

/// S5 — LR/SC idempotence: `lr.d t0,(a); sc.d t1,t2,(a)` with `t2=42`
/// sets `t1=0` and writes 42 to `[a]`; repeating `sc.d` without an
/// intervening `lr.d` sets `t1=1` and leaves `[a]=42`.
#[test]
fn s5_lr_sc_idempotence() {
    let mut rig = Rig::new(0x8000_0000, 0x2000);
    let a = 0x8000_1000u64; // data address, distinct from the code page
    rig.hart.set_reg(5, a); // x5 = a, used as rs1 for both lr.d and sc.d
    rig.hart.set_reg(7, 42); // t2 = x7 = 42
    rig.hart.set_reg(28, 99); // t3 = x28 = 99

    // lr.d x6, (x5)
    let lr_d = (0b00010u32 << 27) | (5 << 15) | (0b011 << 12) | (6 << 7) | 0x2f;
    // sc.d x8, x7, (x5)
    let sc_d_t2 = (0b00011u32 << 27) | (7 << 20) | (5 << 15) | (0b011 << 12) | (8 << 7) | 0x2f;
    // sc.d x8, x28, (x5)
    let sc_d_t3 = (0b00011u32 << 27) | (28 << 20) | (5 << 15) | (0b011 << 12) | (8 << 7) | 0x2f;

    rig.write_words(0x8000_0000, &[lr_d, sc_d_t2, sc_d_t3]);

    assert_eq!(rig.step(0), StepOutcome::Retired); // lr.d
    assert_eq!(rig.hart.reg(6), 0);

    assert_eq!(rig.step(0), StepOutcome::Retired); // sc.d with reservation held
    assert_eq!(rig.hart.reg(8), 0);
    assert_eq!(rig.bus.load(a, Width::Double).unwrap(), 42);

    assert_eq!(rig.step(0), StepOutcome::Retired); // sc.d without an intervening lr.d
    assert_eq!(rig.hart.reg(8), 1);
    assert_eq!(rig.bus.load(a, Width::Double).unwrap(), 42);
}

/// S6 — FMADD canonical NaN: `fmadd.d f0,f1,f2,f3` with `f1 = qNaN`
/// yields `f0 = 0x7ff8000000000000`.
#[test]
fn s6_fmadd_d_canonicalizes_nan_result() {
    let mut rig = Rig::new(0x8000_0000, 0x1000);
    rig.hart.csr.set_fs(1); // mstatus.FS = Initial, not Off
    rig.hart.set_freg_bits(1, 0x7ff8_0000_0000_0000); // qNaN
    rig.hart.set_freg_f64(2, 1.0);
    rig.hart.set_freg_f64(3, 1.0);

    // fmadd.d f0, f1, f2, f3, rm=dyn: rs3=f3(27:31) funct2=01(25:26)
    // rs2=f2(20:24) rs1=f1(15:19) rm=111(12:14) rd=f0(7:11) opcode=MADD(0x43)
    let insn = (3u32 << 27) | (0b01 << 25) | (2 << 20) | (1 << 15) | (0b111 << 12) | (0 << 7) | 0x43;
    rig.write_words(0x8000_0000, &[insn]);

    assert_eq!(rig.step(0), StepOutcome::Retired);
    assert_eq!(rig.hart.freg_bits(0), 0x7ff8_0000_0000_0000);
    // f1 was a quiet NaN, not signaling: Invalid must not be raised.
    assert_eq!(rig.hart.csr.fflags() & 0x10, 0);
}
