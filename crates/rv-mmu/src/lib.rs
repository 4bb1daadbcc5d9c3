//! The Sv39/Sv48/Sv57 memory-management unit: TLB-cached
//! virtual-to-physical translation with a software page-table walk on
//! miss.

use rv_mem::Bus;
use rv_types::{AccessType, Exception, PhysAddr, PrivilegeMode, VirtAddr, Width};

const PAGE_SIZE: u64 = 4096;
const PAGE_SHIFT: u32 = 12;
const VPN_BITS: u32 = 9;
const PTE_PPN_SHIFT: u32 = 10;
const PTE_PPN_MASK: u64 = (1u64 << 44) - 1;

/// `satp.MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatpMode {
    Bare,
    Sv39,
    Sv48,
    Sv57,
}

impl SatpMode {
    fn from_field(v: u64) -> Option<SatpMode> {
        match v {
            0 => Some(SatpMode::Bare),
            8 => Some(SatpMode::Sv39),
            9 => Some(SatpMode::Sv48),
            10 => Some(SatpMode::Sv57),
            _ => None,
        }
    }

    fn levels(self) -> usize {
        match self {
            SatpMode::Bare => 0,
            SatpMode::Sv39 => 3,
            SatpMode::Sv48 => 4,
            SatpMode::Sv57 => 5,
        }
    }
}

/// Everything the MMU needs from hart/CSR state to resolve one access,
/// gathered by the caller so this crate stays independent of `rv-csr`.
#[derive(Debug, Clone, Copy)]
pub struct TranslationContext {
    /// The hart's actual current privilege mode (decides the Bare/Machine
    /// bypass).
    pub mode: PrivilegeMode,
    /// The privilege the permission checks are evaluated against: equal
    /// to `mode`, except for Load/Store when `mstatus.MPRV=1`, which
    /// substitutes `mstatus.MPP`.
    pub eff_mode: PrivilegeMode,
    pub mxr: bool,
    pub sum: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Perm {
    r: bool,
    w: bool,
    x: bool,
    u: bool,
    a: bool,
    d: bool,
}

impl Perm {
    fn from_pte(pte: u64) -> Perm {
        Perm {
            r: pte & (1 << 1) != 0,
            w: pte & (1 << 2) != 0,
            x: pte & (1 << 3) != 0,
            u: pte & (1 << 4) != 0,
            a: pte & (1 << 6) != 0,
            d: pte & (1 << 7) != 0,
        }
    }

    /// The two reserved PTE encodings collapse to one check: `!R && W`
    /// covers both `!R&&W&&!X` and `!R&&W&&X`.
    fn reserved_encoding(self) -> bool {
        !self.r && self.w
    }

    fn allows(self, access: AccessType, ctx: &TranslationContext) -> bool {
        if self.u && ctx.eff_mode != PrivilegeMode::User && (access == AccessType::Instruction || !ctx.sum) {
            return false;
        }
        if !self.u && ctx.eff_mode == PrivilegeMode::User {
            return false;
        }
        match access {
            AccessType::Load => self.r || (self.x && ctx.mxr),
            AccessType::Store => self.w,
            AccessType::Instruction => self.x,
        }
    }
}

fn fault_for(access: AccessType) -> Exception {
    match access {
        AccessType::Load => Exception::LoadPageFault,
        AccessType::Store => Exception::StorePageFault,
        AccessType::Instruction => Exception::InstructionPageFault,
    }
}

fn vpn(vaddr: VirtAddr, i: usize) -> u64 {
    (vaddr >> (PAGE_SHIFT + VPN_BITS * i as u32)) & 0x1ff
}

fn ppn_of(pte: u64) -> u64 {
    (pte >> PTE_PPN_SHIFT) & PTE_PPN_MASK
}

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    /// Page-aligned virtual address tag (a 52-bit tag).
    tag: VirtAddr,
    pte: u64,
    /// The physical page table entry's own address, retained so a
    /// strict implementation could issue the A/D write-back without a
    /// full re-walk.
    pte_addr: PhysAddr,
    phys_base: PhysAddr,
    perm: Perm,
    age: u64,
}

/// Page-table walker plus a small fixed-size TLB. Owned exclusively by
/// the MMU; never shared with any other component.
pub struct Mmu {
    tlb: [Option<TlbEntry>; 3],
    mode: SatpMode,
    root_ppn: u64,
    clock: u64,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu {
    pub fn new() -> Self {
        Mmu {
            tlb: [None; 3],
            mode: SatpMode::Bare,
            root_ppn: 0,
            clock: 0,
        }
    }

    /// Re-read `satp` and flush the TLB: called after a
    /// `satp` CSR write and by `SFENCE.VMA`.
    pub fn update(&mut self, satp: u64) {
        let mode_field = satp >> 60;
        // WARL: an unsupported MODE value leaves the previous mode in
        // place; root_ppn still latches regardless.
        if let Some(mode) = SatpMode::from_field(mode_field) {
            self.mode = mode;
        }
        self.root_ppn = satp & ((1u64 << 44) - 1);
        self.flush();
    }

    /// Unconditional TLB invalidation: `SFENCE.VMA` flushes the TLB
    /// unconditionally; no VA/ASID-scoped invalidation is required by
    /// the target software.
    pub fn flush(&mut self) {
        self.tlb = [None; 3];
    }

    pub fn mode(&self) -> SatpMode {
        self.mode
    }

    pub fn translate(
        &mut self,
        vaddr: VirtAddr,
        access: AccessType,
        ctx: &TranslationContext,
        bus: &mut Bus,
    ) -> Result<PhysAddr, Exception> {
        if self.mode == SatpMode::Bare || ctx.eff_mode == PrivilegeMode::Machine {
            return Ok(vaddr);
        }

        let offset = vaddr & (PAGE_SIZE - 1);
        let tag = vaddr & !(PAGE_SIZE - 1);

        if let Some(slot) = self.tlb_lookup(tag) {
            if slot.perm.allows(access, ctx) && !(access == AccessType::Store && !slot.perm.d) {
                self.touch(tag);
                return Ok(slot.phys_base | offset);
            }
        }

        let (phys_base, perm, pte_addr) = self.walk(vaddr, access, ctx, bus)?;
        self.insert(tag, pte_addr, phys_base, perm);
        Ok(phys_base | offset)
    }

    fn tlb_lookup(&self, tag: VirtAddr) -> Option<TlbEntry> {
        self.tlb.iter().flatten().find(|e| e.tag == tag).copied()
    }

    fn touch(&mut self, tag: VirtAddr) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(e) = self.tlb.iter_mut().flatten().find(|e| e.tag == tag) {
            e.age = clock;
        }
    }

    fn insert(&mut self, tag: VirtAddr, pte_addr: PhysAddr, phys_base: PhysAddr, perm: Perm) {
        self.clock += 1;
        let age = self.clock;
        let victim = self
            .tlb
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, e)| e.map(|e| e.age).unwrap_or(0))
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.tlb[victim] = Some(TlbEntry {
            tag,
            pte: 0,
            pte_addr,
            phys_base,
            perm,
            age,
        });
    }

    fn walk(
        &mut self,
        vaddr: VirtAddr,
        access: AccessType,
        ctx: &TranslationContext,
        bus: &mut Bus,
    ) -> Result<(PhysAddr, Perm, PhysAddr), Exception> {
        let levels = self.mode.levels();
        let mut a = self.root_ppn * PAGE_SIZE;
        let mut level = levels - 1;
        let mut pte: u64;
        let mut pte_addr: u64;

        loop {
            pte_addr = a + vpn(vaddr, level) * 8;
            pte = bus.load(pte_addr, Width::Double).map_err(|_| fault_for(access))?;

            let valid = pte & 1 != 0;
            let perm = Perm::from_pte(pte);
            if !valid || perm.reserved_encoding() {
                tracing::debug!(vaddr, pte_addr, pte, "page fault: invalid/reserved pte");
                return Err(fault_for(access));
            }
            if perm.r || perm.x {
                break; // leaf
            }
            if level == 0 {
                return Err(fault_for(access));
            }
            a = ppn_of(pte) * PAGE_SIZE;
            level -= 1;
        }

        if level > 0 {
            let low_mask = (1u64 << (VPN_BITS as u64 * level as u64)) - 1;
            if ppn_of(pte) & low_mask != 0 {
                return Err(fault_for(access));
            }
        }

        let perm = Perm::from_pte(pte);
        if !perm.allows(access, ctx) {
            return Err(fault_for(access));
        }

        if !perm.a || (access == AccessType::Store && !perm.d) {
            let mut new_pte = pte | (1 << 6);
            if access == AccessType::Store {
                new_pte |= 1 << 7;
            }
            bus.store(pte_addr, Width::Double, new_pte).map_err(|_| fault_for(access))?;
            pte = new_pte;
        }

        let mut phys_ppn = ppn_of(pte);
        for i in 0..level {
            phys_ppn |= vpn(vaddr, i) << (VPN_BITS as u64 * i as u64);
        }
        let phys_base = phys_ppn << PAGE_SHIFT;
        Ok((phys_base, Perm::from_pte(pte), pte_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_mem::Ram;

    const SV39_ROOT_PPN: u64 = 0x8100_0 >> 0; // arbitrary page-aligned PPN used in tests

    fn bus_with_ram(size: usize) -> Bus {
        let mut bus = Bus::new();
        bus.attach(0, size as u64, Box::new(Ram::new(size))).unwrap();
        bus
    }

    fn satp_sv39(root_ppn: u64) -> u64 {
        (8u64 << 60) | root_ppn
    }

    fn identity_leaf_pte(ppn: u64, flags: u64) -> u64 {
        (ppn << 10) | flags
    }

    #[test]
    fn bare_mode_is_identity() {
        let mut mmu = Mmu::new();
        let mut bus = bus_with_ram(0x10000);
        let ctx = TranslationContext {
            mode: PrivilegeMode::Supervisor,
            eff_mode: PrivilegeMode::Supervisor,
            mxr: false,
            sum: false,
        };
        assert_eq!(
            mmu.translate(0x1234, AccessType::Load, &ctx, &mut bus).unwrap(),
            0x1234
        );
    }

    #[test]
    fn machine_mode_bypasses_translation_regardless_of_satp() {
        let mut mmu = Mmu::new();
        mmu.update(satp_sv39(1));
        let mut bus = bus_with_ram(0x10000);
        let ctx = TranslationContext {
            mode: PrivilegeMode::Machine,
            eff_mode: PrivilegeMode::Machine,
            mxr: false,
            sum: false,
        };
        assert_eq!(
            mmu.translate(0x5000_0000, AccessType::Load, &ctx, &mut bus).unwrap(),
            0x5000_0000
        );
    }

    #[test]
    fn invalid_root_pte_raises_load_page_fault() {
        let mut mmu = Mmu::new();
        let root_ppn = 0; // RAM page 0, left as zero -> PTE invalid
        mmu.update(satp_sv39(root_ppn));
        let mut bus = bus_with_ram(1 << 16);
        let ctx = TranslationContext {
            mode: PrivilegeMode::User,
            eff_mode: PrivilegeMode::User,
            mxr: false,
            sum: false,
        };
        let err = mmu
            .translate(0x1_0000_0000, AccessType::Load, &ctx, &mut bus)
            .unwrap_err();
        assert_eq!(err, Exception::LoadPageFault);
    }

    #[test]
    fn single_level_superpage_translates_and_sets_ad_bits() {
        // A single Sv39 leaf PTE at the top level (a 1 GiB superpage).
        let mut bus = bus_with_ram(1 << 20);
        let root_ppn = 0x10; // page-aligned, within RAM
        let root_phys = root_ppn * PAGE_SIZE;
        // Leaf maps VPN[2]=0 -> PPN base 0, R/W/X/U/Valid set, A/D clear.
        let leaf_ppn = 0u64;
        let pte = identity_leaf_pte(leaf_ppn, 0b1111_0001); // D=0 A=0 U=1 X=1 W=1 R=1 V=1
        bus.store(root_phys, Width::Double, pte).unwrap();

        let mut mmu = Mmu::new();
        mmu.update(satp_sv39(root_ppn));
        let ctx = TranslationContext {
            mode: PrivilegeMode::User,
            eff_mode: PrivilegeMode::User,
            mxr: false,
            sum: false,
        };
        let vaddr = 0x1234;
        let phys = mmu.translate(vaddr, AccessType::Load, &ctx, &mut bus).unwrap();
        assert_eq!(phys, vaddr);

        // A bit must now be set in the stored PTE.
        let updated = bus.load(root_phys, Width::Double).unwrap();
        assert_eq!(updated & (1 << 6), 1 << 6);
        assert_eq!(updated & (1 << 7), 0); // D unset: this was a load
    }

    #[test]
    fn store_access_sets_dirty_bit() {
        let mut bus = bus_with_ram(1 << 20);
        let root_ppn = 0x10;
        let root_phys = root_ppn * PAGE_SIZE;
        let pte = identity_leaf_pte(0, 0b0111); // R/W/V
        bus.store(root_phys, Width::Double, pte).unwrap();

        let mut mmu = Mmu::new();
        mmu.update(satp_sv39(root_ppn));
        let ctx = TranslationContext {
            mode: PrivilegeMode::Supervisor,
            eff_mode: PrivilegeMode::Supervisor,
            mxr: false,
            sum: true,
        };
        mmu.translate(0x2000, AccessType::Store, &ctx, &mut bus).unwrap();
        let updated = bus.load(root_phys, Width::Double).unwrap();
        assert_eq!(updated & (1 << 7), 1 << 7);
    }

    #[test]
    fn update_flushes_stale_tlb_entries() {
        let mut bus = bus_with_ram(1 << 20);
        let root_ppn = 0x10;
        let root_phys = root_ppn * PAGE_SIZE;
        bus.store(root_phys, Width::Double, identity_leaf_pte(0, 0b0111)).unwrap();

        let mut mmu = Mmu::new();
        mmu.update(satp_sv39(root_ppn));
        let ctx = TranslationContext {
            mode: PrivilegeMode::Supervisor,
            eff_mode: PrivilegeMode::Supervisor,
            mxr: false,
            sum: false,
        };
        mmu.translate(0x3000, AccessType::Load, &ctx, &mut bus).unwrap();

        // Corrupt the root PTE directly (as if a fresh page table were
        // installed) and re-`update()`: the next translation must not
        // reuse the cached entry.
        bus.store(root_phys, Width::Double, 0).unwrap();
        mmu.update(satp_sv39(root_ppn));
        let err = mmu
            .translate(0x3000, AccessType::Load, &ctx, &mut bus)
            .unwrap_err();
        assert_eq!(err, Exception::LoadPageFault);
    }

    #[test]
    fn user_page_rejected_for_supervisor_without_sum() {
        let mut bus = bus_with_ram(1 << 20);
        let root_ppn = 0x10;
        let root_phys = root_ppn * PAGE_SIZE;
        bus.store(root_phys, Width::Double, identity_leaf_pte(0, 0b1_0111)).unwrap(); // U|R|W|V
        let mut mmu = Mmu::new();
        mmu.update(satp_sv39(root_ppn));
        let ctx = TranslationContext {
            mode: PrivilegeMode::Supervisor,
            eff_mode: PrivilegeMode::Supervisor,
            mxr: false,
            sum: false,
        };
        let err = mmu
            .translate(0x4000, AccessType::Load, &ctx, &mut bus)
            .unwrap_err();
        assert_eq!(err, Exception::LoadPageFault);
    }
}
