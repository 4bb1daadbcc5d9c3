use thiserror::Error;

/// The six standard interrupt sources. The cause number
/// equals the corresponding `mip`/`mie` bit number, which is also the bit
/// tested during the fixed MEI/MSI/MTI/SEI/SSI/STI priority scan.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    #[error("supervisor software interrupt")]
    SupervisorSoftware,
    #[error("machine software interrupt")]
    MachineSoftware,
    #[error("supervisor timer interrupt")]
    SupervisorTimer,
    #[error("machine timer interrupt")]
    MachineTimer,
    #[error("supervisor external interrupt")]
    SupervisorExternal,
    #[error("machine external interrupt")]
    MachineExternal,
}

impl InterruptKind {
    pub const fn code(self) -> u64 {
        match self {
            InterruptKind::SupervisorSoftware => 1,
            InterruptKind::MachineSoftware => 3,
            InterruptKind::SupervisorTimer => 5,
            InterruptKind::MachineTimer => 7,
            InterruptKind::SupervisorExternal => 9,
            InterruptKind::MachineExternal => 11,
        }
    }

    /// The strict priority order the driver scans in:
    /// MEI, MSI, MTI, SEI, SSI, STI.
    pub const PRIORITY: [InterruptKind; 6] = [
        InterruptKind::MachineExternal,
        InterruptKind::MachineSoftware,
        InterruptKind::MachineTimer,
        InterruptKind::SupervisorExternal,
        InterruptKind::SupervisorSoftware,
        InterruptKind::SupervisorTimer,
    ];

    /// MTI is never delegated, regardless of `mideleg`.
    pub const fn is_delegatable(self) -> bool {
        !matches!(self, InterruptKind::MachineTimer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_matches_bit_scan_order() {
        let codes: Vec<u64> = InterruptKind::PRIORITY.iter().map(|k| k.code()).collect();
        assert_eq!(codes, vec![11, 3, 7, 9, 1, 5]);
    }
}
