use std::fmt;

use crate::error::RuntimeError;

/// Lifecycle state of one worker instance.
///
/// ```text
/// Installing ──► Installed ──► Activating ──► Active ──► Redundant
///      │             │              │                       ▲
///      └─────────────┴──────────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl WorkerState {
    /// Lower-case name used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }

    /// True if `next` directly follows `self`.
    ///
    /// Every live state may drop to `Redundant`; nothing leaves `Redundant`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Active)
                | (Installing | Installed | Activating | Active, Redundant)
        )
    }

    /// True for `Redundant`.
    pub fn is_terminal(self) -> bool {
        self == WorkerState::Redundant
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn check_transition(
    worker: u64,
    from: WorkerState,
    to: WorkerState,
) -> Result<(), RuntimeError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(RuntimeError::invalid_state(format!(
            "worker #{worker} cannot move from {from} to {to}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::*;

    const ALL: [WorkerState; 5] = [Installing, Installed, Activating, Active, Redundant];

    #[test]
    fn only_forward_steps_and_redundant_shortcut_are_allowed() {
        let allowed = [
            (Installing, Installed),
            (Installed, Activating),
            (Activating, Active),
            (Installing, Redundant),
            (Installed, Redundant),
            (Activating, Redundant),
            (Active, Redundant),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn illegal_transition_is_invalid_state() {
        let err = check_transition(4, Active, Installing).expect_err("backwards");
        assert_eq!(err.as_label(), "invalid_state");
        assert_eq!(
            err.to_string(),
            "invalid state: worker #4 cannot move from active to installing"
        );
        assert!(Redundant.is_terminal());
    }
}
