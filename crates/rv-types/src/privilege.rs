/// Hart privilege mode. Declaration order doubles as the privilege
/// ordering (`User < Supervisor < Machine`), which is all the trap
/// machinery and MMU ever need to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeMode {
    User,
    Supervisor,
    Machine,
}

impl PrivilegeMode {
    /// The 2-bit encoding used in `mstatus.MPP`/`sstatus.SPP` and in the
    /// `satp`-adjacent privilege checks. Note the RISC-V encoding reserves
    /// value `2`; it never appears here.
    pub const fn encoding(self) -> u8 {
        match self {
            PrivilegeMode::User => 0,
            PrivilegeMode::Supervisor => 1,
            PrivilegeMode::Machine => 3,
        }
    }

    pub const fn from_encoding(v: u8) -> PrivilegeMode {
        match v {
            0 => PrivilegeMode::User,
            3 => PrivilegeMode::Machine,
            _ => PrivilegeMode::Supervisor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_privilege() {
        assert!(PrivilegeMode::User < PrivilegeMode::Supervisor);
        assert!(PrivilegeMode::Supervisor < PrivilegeMode::Machine);
    }

    #[test]
    fn encoding_round_trips() {
        for m in [PrivilegeMode::User, PrivilegeMode::Supervisor, PrivilegeMode::Machine] {
            assert_eq!(PrivilegeMode::from_encoding(m.encoding()), m);
        }
    }
}
