//! Black-box coverage of CLINT and PLIC driven purely through their
//! `Device` bus interface, the way a hart driver's `tick`/
//! `poll_interrupts` fan-out would exercise them.

use rv_interrupts::{Clint, Plic};
use rv_mem::Device;
use rv_types::Width;

const MSIP: u64 = 0x0000;
const MTIMECMP: u64 = 0x4000;
const MTIME: u64 = 0xbff8;

const PLIC_ENABLE_BASE: u64 = 0x2000;
const PLIC_ENABLE_CONTEXT_STRIDE: u64 = 0x80;
const PLIC_CONTEXT_BASE: u64 = 0x20_0000;
const PLIC_CONTEXT_STRIDE: u64 = 0x1000;
const PLIC_CLAIM_OFFSET: u64 = 0x4;

fn plic_enable(plic: &mut Plic, context: u64, irq: u32) {
    let offset = PLIC_ENABLE_BASE + context * PLIC_ENABLE_CONTEXT_STRIDE + (irq as u64 / 32) * 4;
    plic.store(offset, Width::Word, 1u64 << (irq % 32)).unwrap();
}

fn plic_claim_offset(context: u64) -> u64 {
    PLIC_CONTEXT_BASE + context * PLIC_CONTEXT_STRIDE + PLIC_CLAIM_OFFSET
}

/// CLINT's timer-compare crossing is the trigger a driver polls every
/// step via `mtime()`/`mtimecmp()`; here it's observed directly against
/// repeated `tick()` calls that mimic wall-clock elapsed time.
#[test]
fn clint_mtime_crosses_mtimecmp_after_enough_ticks() {
    let mut clint = Clint::new();
    clint.store(MTIMECMP, Width::Double, 50).unwrap();

    for _ in 0..4 {
        clint.tick(10);
        assert!(clint.mtime() < clint.mtimecmp());
    }
    clint.tick(10);
    assert!(clint.mtime() >= clint.mtimecmp());
}

/// `msip`'s low bit is the only meaningful one, and it is independent of
/// the mtimecmp comparison.
#[test]
fn clint_msip_low_bit_gates_independent_of_mtime() {
    let mut clint = Clint::new();
    clint.store(MTIMECMP, Width::Double, u64::MAX).unwrap(); // never crosses
    assert_eq!(clint.msip() & 1, 0);
    clint.store(MSIP, Width::Word, 1).unwrap();
    assert_eq!(clint.msip() & 1, 1);
    assert!(clint.mtime() < clint.mtimecmp());
}

/// `mtime`'s halfword/byte views mask the obvious shifted slice of the
/// 64-bit counter.
#[test]
fn clint_mtime_supports_sub_word_views() {
    let mut clint = Clint::new();
    clint.store(MTIME, Width::Double, 0x1122_3344_5566_7788).unwrap();
    assert_eq!(clint.load(MTIME, Width::Byte).unwrap(), 0x88);
    assert_eq!(clint.load(MTIME + 1, Width::Byte).unwrap(), 0x77);
    assert_eq!(clint.load(MTIME, Width::Half).unwrap(), 0x7788);
    assert_eq!(clint.load(MTIME + 4, Width::Word).unwrap(), 0x1122_3344);
}

/// PLIC end-to-end: a source pending for an enabled context latches into
/// that context's claim register; completion clears pending; a second
/// pending assertion of a different source while the first is still
/// unclaimed does not overwrite the latch.
#[test]
fn plic_claim_and_complete_round_trip() {
    let mut plic = Plic::new();
    plic_enable(&mut plic, 1, 10); // UART IRQ
    plic_enable(&mut plic, 1, 1); // virtio IRQ

    plic.update_pending(10);
    assert!(plic.context_pending(1));
    assert_eq!(
        plic.load(plic_claim_offset(1), Width::Word).unwrap(),
        10
    );

    // A second source pending while 10 is still latched does not
    // overwrite the context's claim.
    plic.update_pending(1);
    assert_eq!(plic.load(plic_claim_offset(1), Width::Word).unwrap(), 10);

    // Completion (a write to claim) clears pending for IRQ 10 and
    // unlatches the context, letting IRQ 1 through next time it's
    // reasserted.
    plic.store(plic_claim_offset(1), Width::Word, 10).unwrap();
    assert!(!plic.context_pending(1));

    plic.update_pending(1);
    assert_eq!(plic.load(plic_claim_offset(1), Width::Word).unwrap(), 1);
}

/// Context 0 (machine external) and context 1 (supervisor external) are
/// wired identically and enabled independently.
#[test]
fn plic_contexts_are_independent() {
    let mut plic = Plic::new();
    plic_enable(&mut plic, 1, 5);
    plic.update_pending(5);
    assert!(plic.context_pending(1));
    assert!(!plic.context_pending(0));
}
