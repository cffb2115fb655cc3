use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Prehire,
    Onboarding,
    Active,
    Fired,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prehire => "prehire",
            Self::Onboarding => "onboarding",
            Self::Active => "active",
            Self::Fired => "fired",
        }
    }

    /// Forward moves a patch may request on its own. Going back to
    /// onboarding from a later phase needs [`PhaseTransition::NewHire`].
    pub fn can_advance_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Prehire, Self::Onboarding)
                | (Self::Onboarding, Self::Active)
                | (Self::Prehire | Self::Onboarding | Self::Active, Self::Fired)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Fired
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    pub phase: Phase,
}

/// Requested lifecycle change carried by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    Advance(Phase),
    /// Starts a fresh onboarding cycle from any phase and wipes the
    /// onboarding-scoped sections.
    NewHire,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_moves_only() {
        assert!(Phase::Prehire.can_advance_to(Phase::Onboarding));
        assert!(Phase::Onboarding.can_advance_to(Phase::Active));
        assert!(Phase::Active.can_advance_to(Phase::Fired));
        assert!(!Phase::Onboarding.can_advance_to(Phase::Prehire));
        assert!(!Phase::Active.can_advance_to(Phase::Onboarding));
        assert!(!Phase::Prehire.can_advance_to(Phase::Active));
        assert!(!Phase::Fired.can_advance_to(Phase::Active));
    }
}
