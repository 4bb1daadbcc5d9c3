use thiserror::Error;

use crate::PrivilegeMode;

/// The fixed RISC-V exception causes (privileged ISA, `mcause`/`scause`
/// bare values). This is the single sink the instruction interpreter uses
/// for every decoding or dispatch failure: nothing in the core panics on
/// malformed guest code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("instruction address misaligned")]
    InstructionAddressMisaligned,
    #[error("instruction access fault")]
    InstructionAccessFault,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/amo address misaligned")]
    StoreAddressMisaligned,
    #[error("store/amo access fault")]
    StoreAccessFault,
    #[error("environment call from U-mode")]
    EnvironmentCallFromUMode,
    #[error("environment call from S-mode")]
    EnvironmentCallFromSMode,
    #[error("environment call from M-mode")]
    EnvironmentCallFromMMode,
    #[error("instruction page fault")]
    InstructionPageFault,
    #[error("load page fault")]
    LoadPageFault,
    #[error("store/amo page fault")]
    StorePageFault,
}

impl Exception {
    /// The bare `mcause`/`scause` value: exceptions use the bare kind
    /// number (no MSB tag, unlike interrupts).
    pub const fn code(self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned => 0,
            Exception::InstructionAccessFault => 1,
            Exception::IllegalInstruction => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned => 4,
            Exception::LoadAccessFault => 5,
            Exception::StoreAddressMisaligned => 6,
            Exception::StoreAccessFault => 7,
            Exception::EnvironmentCallFromUMode => 8,
            Exception::EnvironmentCallFromSMode => 9,
            Exception::EnvironmentCallFromMMode => 11,
            Exception::InstructionPageFault => 12,
            Exception::LoadPageFault => 13,
            Exception::StorePageFault => 15,
        }
    }

    /// The ECALL cause for the given current privilege mode.
    pub const fn ecall_from(mode: PrivilegeMode) -> Exception {
        match mode {
            PrivilegeMode::User => Exception::EnvironmentCallFromUMode,
            PrivilegeMode::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeMode::Machine => Exception::EnvironmentCallFromMMode,
        }
    }

    /// Whether `{m,s}tval` for this exception carries the faulting address
    /// rather than zero or the offending instruction word.
    pub const fn carries_address(self) -> bool {
        matches!(
            self,
            Exception::InstructionAddressMisaligned
                | Exception::InstructionAccessFault
                | Exception::LoadAddressMisaligned
                | Exception::LoadAccessFault
                | Exception::StoreAddressMisaligned
                | Exception::StoreAccessFault
                | Exception::InstructionPageFault
                | Exception::LoadPageFault
                | Exception::StorePageFault
        )
    }
}
