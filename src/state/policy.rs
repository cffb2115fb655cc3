//! Per-section merge rules, kept as data so the merge engine stays a
//! table walk.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Lifecycle,
    Onboarding,
    OnboardingFlow,
    Task,
    ActivityEvents,
    ActivityTelemetry,
    OperatorInput,
    FundingTokenInput,
    OperatorConfig,
    DelegationBundle,
    Profile,
    Metrics,
    TransactionHistory,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionWindow {
    Events,
    Telemetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// No backward phase moves except an explicit new hire.
    PhaseMonotonic,
    /// Step numbers only grow; switching keys needs a strictly later step.
    OnboardingMonotonic,
    /// Task status follows the task machine and unresolved waits stick.
    TaskStatusMachine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Incoming value wins when present.
    Replace,
    /// A list that starts with the whole current list replaces it; anything
    /// else is appended.
    AppendOrResync,
    /// `AppendOrResync`, then the oldest entries past the window are dropped.
    Bounded(RetentionWindow),
    /// Record merged field by field: scalars replace, lists append-or-resync.
    Nested,
    /// Accepted only while the guard holds; otherwise the pre-patch value stays.
    Guarded(Guard),
}

/// Application order matters: lifecycle runs first so a new-hire reset
/// happens before the rest of the patch lands on the document.
pub const SECTION_POLICIES: &[(Section, MergePolicy)] = &[
    (Section::Lifecycle, MergePolicy::Guarded(Guard::PhaseMonotonic)),
    (Section::Onboarding, MergePolicy::Guarded(Guard::OnboardingMonotonic)),
    (Section::OnboardingFlow, MergePolicy::Nested),
    (Section::Task, MergePolicy::Guarded(Guard::TaskStatusMachine)),
    (
        Section::ActivityEvents,
        MergePolicy::Bounded(RetentionWindow::Events),
    ),
    (
        Section::ActivityTelemetry,
        MergePolicy::Bounded(RetentionWindow::Telemetry),
    ),
    (Section::OperatorInput, MergePolicy::Replace),
    (Section::FundingTokenInput, MergePolicy::Replace),
    (Section::OperatorConfig, MergePolicy::Replace),
    (Section::DelegationBundle, MergePolicy::Replace),
    (Section::Profile, MergePolicy::Nested),
    (Section::Metrics, MergePolicy::Nested),
    (Section::TransactionHistory, MergePolicy::AppendOrResync),
    (Section::Private, MergePolicy::Nested),
];

pub fn policy_for(section: Section) -> MergePolicy {
    SECTION_POLICIES
        .iter()
        .find(|(candidate, _)| *candidate == section)
        .map(|(_, policy)| *policy)
        .unwrap_or(MergePolicy::Replace)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimits {
    pub events: usize,
    pub telemetry: usize,
}

pub const DEFAULT_EVENT_RETENTION: usize = 100;
pub const DEFAULT_TELEMETRY_RETENTION: usize = 250;

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            events: DEFAULT_EVENT_RETENTION,
            telemetry: DEFAULT_TELEMETRY_RETENTION,
        }
    }
}

impl RetentionLimits {
    pub fn window(&self, window: RetentionWindow) -> usize {
        match window {
            RetentionWindow::Events => self.events,
            RetentionWindow::Telemetry => self.telemetry,
        }
    }
}
