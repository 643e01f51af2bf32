//! Bring-up stages and the transitions between them.

use crate::{BringUpError, CoreId};

/// Which bring-up path a core follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The bootstrap core: owns shared state and dispatches the others.
    Primary,
    /// A core started by the primary through the bootloader's MP protocol.
    Secondary,
}

/// Position of a core in its bring-up sequence.
///
/// Primary cores walk
/// `Uninitialized → DescriptorsLoaded → InterruptsInstalled → MemoryReady →
/// PlatformDiscovered → TimerCalibrated → LocalControllerReady → IoRouterReady`
/// and finish with `InterruptsEnabled`, passing through `DispatchingSecondaries` when
/// there is more than one core. Secondary cores walk
/// `Dispatched → DescriptorsLoaded → InterruptsInstalled → LocalControllerReady → Idle`.
/// Either may drop to `Halted` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uninitialized,
    Dispatched,
    DescriptorsLoaded,
    InterruptsInstalled,
    MemoryReady,
    PlatformDiscovered,
    TimerCalibrated,
    LocalControllerReady,
    IoRouterReady,
    DispatchingSecondaries,
    InterruptsEnabled,
    Idle,
    Halted,
}

impl Stage {
    /// The stage a core of the given role starts in.
    pub const fn initial(role: Role) -> Self {
        match role {
            Role::Primary => Stage::Uninitialized,
            Role::Secondary => Stage::Dispatched,
        }
    }

    /// Returns whether a core of `role` may move from `self` to `next`.
    pub fn leads_to(self, role: Role, next: Stage) -> bool {
        use Stage::*;

        if next == Halted {
            return self != Halted;
        }

        match role {
            Role::Primary => matches!(
                (self, next),
                (Uninitialized, DescriptorsLoaded)
                    | (DescriptorsLoaded, InterruptsInstalled)
                    | (InterruptsInstalled, MemoryReady)
                    | (MemoryReady, PlatformDiscovered)
                    | (PlatformDiscovered, TimerCalibrated)
                    | (TimerCalibrated, LocalControllerReady)
                    | (LocalControllerReady, IoRouterReady)
                    | (IoRouterReady, InterruptsEnabled)
                    | (IoRouterReady, DispatchingSecondaries)
                    | (DispatchingSecondaries, InterruptsEnabled)
            ),
            Role::Secondary => matches!(
                (self, next),
                (Dispatched, DescriptorsLoaded)
                    | (DescriptorsLoaded, InterruptsInstalled)
                    | (InterruptsInstalled, LocalControllerReady)
                    | (LocalControllerReady, Idle)
            ),
        }
    }

    /// Returns whether the core has its interrupt vector table loaded in this stage.
    pub fn has_interrupt_table(self) -> bool {
        use Stage::*;

        matches!(
            self,
            InterruptsInstalled
                | MemoryReady
                | PlatformDiscovered
                | TimerCalibrated
                | LocalControllerReady
                | IoRouterReady
                | DispatchingSecondaries
                | InterruptsEnabled
                | Idle
        )
    }
}

/// Checks the transition of `core` from `from` to `to`.
pub fn check(core: CoreId, role: Role, from: Stage, to: Stage) -> Result<(), BringUpError> {
    if from.leads_to(role, to) {
        Ok(())
    } else {
        Err(BringUpError::OutOfOrder { core, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY_PATH: [Stage; 9] = [
        Stage::Uninitialized,
        Stage::DescriptorsLoaded,
        Stage::InterruptsInstalled,
        Stage::MemoryReady,
        Stage::PlatformDiscovered,
        Stage::TimerCalibrated,
        Stage::LocalControllerReady,
        Stage::IoRouterReady,
        Stage::InterruptsEnabled,
    ];

    const SECONDARY_PATH: [Stage; 5] = [
        Stage::Dispatched,
        Stage::DescriptorsLoaded,
        Stage::InterruptsInstalled,
        Stage::LocalControllerReady,
        Stage::Idle,
    ];

    #[test]
    fn primary_path_is_accepted() {
        for pair in PRIMARY_PATH.windows(2) {
            assert!(pair[0].leads_to(Role::Primary, pair[1]), "{:?}", pair);
        }
        assert!(Stage::IoRouterReady.leads_to(Role::Primary, Stage::DispatchingSecondaries));
        assert!(Stage::DispatchingSecondaries.leads_to(Role::Primary, Stage::InterruptsEnabled));
    }

    #[test]
    fn secondary_path_is_accepted() {
        for pair in SECONDARY_PATH.windows(2) {
            assert!(pair[0].leads_to(Role::Secondary, pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn skipping_or_reversing_is_rejected() {
        assert!(!Stage::Uninitialized.leads_to(Role::Primary, Stage::InterruptsInstalled));
        assert!(!Stage::InterruptsInstalled.leads_to(Role::Primary, Stage::DescriptorsLoaded));
        assert!(!Stage::DescriptorsLoaded.leads_to(Role::Primary, Stage::InterruptsEnabled));
        assert!(!Stage::InterruptsInstalled.leads_to(Role::Secondary, Stage::MemoryReady));
        assert!(!Stage::Dispatched.leads_to(Role::Primary, Stage::DescriptorsLoaded));
        assert!(!Stage::LocalControllerReady.leads_to(Role::Primary, Stage::Idle));
    }

    #[test]
    fn halted_reachable_from_anywhere_but_itself() {
        for stage in PRIMARY_PATH.iter().chain(SECONDARY_PATH.iter()) {
            assert!(stage.leads_to(Role::Primary, Stage::Halted));
            assert!(stage.leads_to(Role::Secondary, Stage::Halted));
        }
        assert!(!Stage::Halted.leads_to(Role::Primary, Stage::Halted));
    }

    #[test]
    fn interrupt_table_presence() {
        assert!(!Stage::Uninitialized.has_interrupt_table());
        assert!(!Stage::Dispatched.has_interrupt_table());
        assert!(!Stage::DescriptorsLoaded.has_interrupt_table());
        assert!(!Stage::Halted.has_interrupt_table());
        assert!(Stage::InterruptsInstalled.has_interrupt_table());
        assert!(Stage::Idle.has_interrupt_table());
    }

    #[test]
    fn check_reports_both_ends() {
        let err = check(CoreId::new(3), Role::Secondary, Stage::Dispatched, Stage::Idle);
        assert_eq!(
            err,
            Err(BringUpError::OutOfOrder {
                core: CoreId::new(3),
                from: Stage::Dispatched,
                to: Stage::Idle,
            })
        );
    }
}
