//! Pure field extraction over a raw instruction word. `Insn`
//! and `CompressedInsn` do no interpretation of their own; the handler
//! families in `rv-cpu-core` consult these views and act on them.

use rv_types::sign_extend;

/// A decoded view over a 32-bit (uncompressed) instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn(pub u32);

impl Insn {
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Bits 1:0 of any instruction halfword tell you its size: `11` means
    /// a 4-byte instruction follows, anything else is a 2-byte compressed
    /// instruction.
    #[inline]
    pub fn is_compressed(word_low_bits: u16) -> bool {
        word_low_bits & 0b11 != 0b11
    }

    #[inline]
    pub fn opcode(self) -> u32 {
        self.0 & 0x7f
    }

    #[inline]
    pub fn rd(self) -> u32 {
        (self.0 >> 7) & 0x1f
    }

    #[inline]
    pub fn rs1(self) -> u32 {
        (self.0 >> 15) & 0x1f
    }

    #[inline]
    pub fn rs2(self) -> u32 {
        (self.0 >> 20) & 0x1f
    }

    #[inline]
    pub fn rs3(self) -> u32 {
        (self.0 >> 27) & 0x1f
    }

    #[inline]
    pub fn funct2(self) -> u32 {
        (self.0 >> 25) & 0x3
    }

    #[inline]
    pub fn funct3(self) -> u32 {
        (self.0 >> 12) & 0x7
    }

    #[inline]
    pub fn funct5(self) -> u32 {
        (self.0 >> 27) & 0x1f
    }

    #[inline]
    pub fn funct7(self) -> u32 {
        (self.0 >> 25) & 0x7f
    }

    /// AMO `aq`/`rl` bits (bits 26/25 — the top two bits of funct7).
    #[inline]
    pub fn aq(self) -> bool {
        (self.0 >> 26) & 1 != 0
    }

    #[inline]
    pub fn rl(self) -> bool {
        (self.0 >> 25) & 1 != 0
    }

    /// CSR address, bits 31:20.
    #[inline]
    pub fn csr(self) -> u32 {
        (self.0 >> 20) & 0xfff
    }

    /// FPU rounding mode / CSRRxI immediate-as-rs1 field, bits 14:12.
    #[inline]
    pub fn rm(self) -> u32 {
        self.funct3()
    }

    /// 5-bit zero-extended immediate used by the CSR-immediate instructions
    /// (encoded in the `rs1` field).
    #[inline]
    pub fn zimm(self) -> u64 {
        self.rs1() as u64
    }

    #[inline]
    pub fn shamt64(self) -> u32 {
        (self.0 >> 20) & 0x3f
    }

    #[inline]
    pub fn shamt32(self) -> u32 {
        (self.0 >> 20) & 0x1f
    }

    /// I-type immediate, sign-extended to 64 bits.
    pub fn imm_i(self) -> u64 {
        sign_extend((self.0 >> 20) as u64, 12)
    }

    /// S-type immediate, sign-extended to 64 bits.
    pub fn imm_s(self) -> u64 {
        let hi = (self.0 >> 25) & 0x7f;
        let lo = (self.0 >> 7) & 0x1f;
        sign_extend(((hi << 5) | lo) as u64, 12)
    }

    /// B-type immediate, sign-extended to 64 bits. Bit 0 is always 0.
    pub fn imm_b(self) -> u64 {
        let b12 = (self.0 >> 31) & 1;
        let b10_5 = (self.0 >> 25) & 0x3f;
        let b4_1 = (self.0 >> 8) & 0xf;
        let b11 = (self.0 >> 7) & 1;
        let imm = (b12 << 12) | (b11 << 11) | (b10_5 << 5) | (b4_1 << 1);
        sign_extend(imm as u64, 13)
    }

    /// U-type immediate: bits 31:12, shifted into position, then
    /// sign-extended to 64 bits (RV64I LUI/AUIPC both sign-extend their
    /// 32-bit result, not just zero-fill the low 12 bits).
    pub fn imm_u(self) -> u64 {
        sign_extend((self.0 & 0xffff_f000) as u64, 32)
    }

    /// J-type immediate, sign-extended to 64 bits. Bit 0 is always 0.
    pub fn imm_j(self) -> u64 {
        let b20 = (self.0 >> 31) & 1;
        let b19_12 = (self.0 >> 12) & 0xff;
        let b11 = (self.0 >> 20) & 1;
        let b10_1 = (self.0 >> 21) & 0x3ff;
        let imm = (b20 << 20) | (b19_12 << 12) | (b11 << 11) | (b10_1 << 1);
        sign_extend(imm as u64, 21)
    }
}

/// A decoded view over a 16-bit compressed instruction halfword. Field
/// names follow the "C" extension chapter of the unprivileged ISA manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedInsn(pub u16);

impl CompressedInsn {
    #[inline]
    pub fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn quadrant(self) -> u32 {
        (self.0 & 0b11) as u32
    }

    #[inline]
    pub fn funct3(self) -> u32 {
        ((self.0 >> 13) & 0b111) as u32
    }

    #[inline]
    pub fn funct4(self) -> u32 {
        ((self.0 >> 12) & 0b1111) as u32
    }

    #[inline]
    pub fn funct2_high(self) -> u32 {
        // Bits 11:10; distinguishes the quadrant-1 arithmetic subgroup.
        ((self.0 >> 10) & 0b11) as u32
    }

    #[inline]
    pub fn funct2_low(self) -> u32 {
        // Bits 6:5.
        ((self.0 >> 5) & 0b11) as u32
    }

    #[inline]
    pub fn rd_rs1(self) -> u32 {
        ((self.0 >> 7) & 0x1f) as u32
    }

    #[inline]
    pub fn rs2(self) -> u32 {
        ((self.0 >> 2) & 0x1f) as u32
    }

    /// `rd'`/`rs1'`/`rs2'`: the compact 3-bit register field (bits 9:7 or
    /// 4:2), biased by 8 to land in x8..x15.
    #[inline]
    pub fn rd_prime(self) -> u32 {
        (((self.0 >> 7) & 0x7) as u32) + 8
    }

    #[inline]
    pub fn rs1_prime(self) -> u32 {
        self.rd_prime()
    }

    #[inline]
    pub fn rs2_prime(self) -> u32 {
        (((self.0 >> 2) & 0x7) as u32) + 8
    }

    /// C-extension shift amount (6 bits: bit 12 plus bits 6:2).
    pub fn c_shamt(self) -> u32 {
        let hi = ((self.0 >> 12) & 1) as u32;
        let lo = ((self.0 >> 2) & 0x1f) as u32;
        (hi << 5) | lo
    }

    /// `C.ADDI`/`C.LI`/`C.ANDI` style 6-bit signed immediate.
    pub fn imm6(self) -> u64 {
        let hi = ((self.0 >> 12) & 1) as u64;
        let lo = ((self.0 >> 2) & 0x1f) as u64;
        sign_extend((hi << 5) | lo, 6)
    }

    /// `C.LW`/`C.SW` style scaled offset (bits 5, 12:10, 6, word-aligned).
    pub fn imm_cl_cs_w(self) -> u64 {
        let b6 = ((self.0 >> 5) & 1) as u64;
        let b2 = ((self.0 >> 6) & 1) as u64;
        let b5_3 = ((self.0 >> 10) & 0x7) as u64;
        (b5_3 << 3) | (b6 << 2) | (b2 << 6)
    }

    /// `C.LD`/`C.SD` style scaled offset (bits 6:5, 12:10, doubleword-aligned).
    pub fn imm_cl_cs_d(self) -> u64 {
        let b7_6 = ((self.0 >> 5) & 0x3) as u64;
        let b5_3 = ((self.0 >> 10) & 0x7) as u64;
        (b5_3 << 3) | (b7_6 << 6)
    }

    /// `C.LWSP`/`C.SWSP` style stack-pointer-relative offset.
    pub fn imm_c_lwsp(self) -> u64 {
        let b5 = ((self.0 >> 12) & 1) as u64;
        let b4_2 = ((self.0 >> 4) & 0x7) as u64;
        let b7_6 = ((self.0 >> 2) & 0x3) as u64;
        (b7_6 << 6) | (b5 << 5) | (b4_2 << 2)
    }

    pub fn imm_c_ldsp(self) -> u64 {
        let b5 = ((self.0 >> 12) & 1) as u64;
        let b4_3 = ((self.0 >> 5) & 0x3) as u64;
        let b8_6 = ((self.0 >> 2) & 0x7) as u64;
        (b8_6 << 6) | (b5 << 5) | (b4_3 << 3)
    }

    pub fn imm_c_swsp(self) -> u64 {
        let b5_2 = ((self.0 >> 9) & 0xf) as u64;
        let b7_6 = ((self.0 >> 7) & 0x3) as u64;
        (b7_6 << 6) | (b5_2 << 2)
    }

    pub fn imm_c_sdsp(self) -> u64 {
        let b5_3 = ((self.0 >> 10) & 0x7) as u64;
        let b8_6 = ((self.0 >> 7) & 0x7) as u64;
        (b8_6 << 6) | (b5_3 << 3)
    }

    /// `C.J`/`C.JAL` 11-bit signed, 2-byte-scaled jump offset.
    pub fn imm_cj(self) -> u64 {
        let b = self.0 as u64;
        let b5 = (b >> 2) & 1;
        let b1 = (b >> 3) & 1;
        let b2 = (b >> 4) & 1;
        let b3 = (b >> 5) & 1;
        let b7 = (b >> 6) & 1;
        let b6 = (b >> 7) & 1;
        let b10 = (b >> 8) & 1;
        let b9_8 = (b >> 9) & 0x3;
        let b4 = (b >> 11) & 1;
        let b11 = (b >> 12) & 1;
        let imm = (b11 << 11)
            | (b4 << 10)
            | (b9_8 << 8)
            | (b10 << 9)
            | (b6 << 6)
            | (b7 << 7)
            | (b3 << 3)
            | (b2 << 2)
            | (b1 << 1)
            | (b5 << 5);
        sign_extend(imm, 12)
    }

    /// `C.BEQZ`/`C.BNEZ` 8-bit signed, 2-byte-scaled branch offset.
    pub fn imm_cb(self) -> u64 {
        let b = self.0 as u64;
        let b5 = (b >> 2) & 1;
        let b2_1 = (b >> 3) & 0x3;
        let b7_6 = (b >> 5) & 0x3;
        let b4_3 = (b >> 10) & 0x3;
        let b8 = (b >> 12) & 1;
        let imm = (b8 << 8) | (b7_6 << 6) | (b5 << 5) | (b4_3 << 3) | (b2_1 << 1);
        sign_extend(imm, 9)
    }

    /// `C.LUI` non-zero immediate, bits 31:12-equivalent, sign-extended.
    pub fn imm_c_lui(self) -> u64 {
        let hi = ((self.0 >> 12) & 1) as u64;
        let lo = ((self.0 >> 2) & 0x1f) as u64;
        sign_extend(((hi << 17) | (lo << 12)) as u64, 18)
    }

    /// `C.ADDI16SP` immediate.
    pub fn imm_c_addi16sp(self) -> u64 {
        let b = self.0 as u64;
        let b9 = (b >> 12) & 1;
        let b4 = (b >> 6) & 1;
        let b6 = (b >> 5) & 1;
        let b8_7 = (b >> 3) & 0x3;
        let b5 = (b >> 2) & 1;
        let imm = (b9 << 9) | (b8_7 << 7) | (b6 << 6) | (b5 << 5) | (b4 << 4);
        sign_extend(imm, 10)
    }

    /// `C.ADDI4SPN` zero-extended scaled immediate.
    pub fn imm_c_addi4spn(self) -> u64 {
        let b = self.0 as u64;
        let b3 = (b >> 5) & 1;
        let b2 = (b >> 6) & 1;
        let b9_6 = (b >> 7) & 0xf;
        let b5_4 = (b >> 11) & 0x3;
        (b9_6 << 6) | (b5_4 << 4) | (b3 << 3) | (b2 << 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addi_fields() {
        // addi a0, zero, 5  -> 0x00500513
        let i = Insn(0x0050_0513);
        assert_eq!(i.opcode(), 0x13);
        assert_eq!(i.funct3(), 0);
        assert_eq!(i.rd(), 10);
        assert_eq!(i.rs1(), 0);
        assert_eq!(i.imm_i(), 5);
    }

    #[test]
    fn beq_negative_offset() {
        // beq x0, x0, -4 -> funct3=0, imm=-4
        let word = 0b1111111_00000_00000_000_11101_1100011u32;
        let i = Insn(word);
        assert_eq!(i.opcode(), 0x63);
        assert_eq!(i.imm_b() as i64, -4);
    }

    #[test]
    fn lui_sign_extends_a_negative_top_bit() {
        // lui x1, 0x80000 -> imm20 = 0x80000, bit 31 of the 32-bit result set.
        let word = (0x80000u32 << 12) | (1 << 7) | 0x37;
        let i = Insn(word);
        assert_eq!(i.imm_u(), 0xffff_ffff_8000_0000);
    }

    #[test]
    fn is_compressed_checks_low_bits() {
        assert!(Insn::is_compressed(0b00));
        assert!(Insn::is_compressed(0b01));
        assert!(Insn::is_compressed(0b10));
        assert!(!Insn::is_compressed(0b11));
    }

    #[test]
    fn c_li_a0_0() {
        // C.LI a0, 0 -> 0x4501
        let c = CompressedInsn(0x4501);
        assert_eq!(c.quadrant(), 1);
        assert_eq!(c.funct3(), 0b010);
        assert_eq!(c.rd_rs1(), 10);
        assert_eq!(c.imm6() as i64, 0);
    }

    #[test]
    fn c_addi_a0_10() {
        // C.ADDI a0, 10 -> 0x0529
        let c = CompressedInsn(0x0529);
        assert_eq!(c.quadrant(), 1);
        assert_eq!(c.funct3(), 0);
        assert_eq!(c.rd_rs1(), 10);
        assert_eq!(c.imm6() as i64, 10);
    }

    proptest::proptest! {
        #[test]
        fn imm_b_is_always_even(word: u32) {
            let i = Insn(word);
            proptest::prop_assert_eq!(i.imm_b() & 1, 0);
        }

        #[test]
        fn imm_j_is_always_even(word: u32) {
            let i = Insn(word);
            proptest::prop_assert_eq!(i.imm_j() & 1, 0);
        }
    }
}
