pub mod document;
pub mod lifecycle;
pub mod merge;
pub mod patch;
pub mod policy;
pub mod task;

pub use document::{
    Activity, ActivityEvent, ActivityKind, DelegationBundle, FundingTokenInput, Metrics,
    OnboardingFlow, OnboardingFlowStatus, OnboardingKey, OnboardingPosition, OperatorConfig,
    OperatorInput, PrivateState, Profile, Resource, SharedList, SignedDelegation, StateDocument,
    TelemetryEntry, TransactionRecord, TransactionStatus,
};
pub use lifecycle::{Lifecycle, Phase, PhaseTransition};
pub use merge::{bound_list, merge, merge_list, Merger};
pub use patch::{
    ActivityPatch, InterruptSlot, MetricsPatch, OnboardingFlowPatch, OnboardingUpdate,
    PrivatePatch, ProfilePatch, StatePatch, TaskPatch,
};
pub use policy::{
    policy_for, Guard, MergePolicy, RetentionLimits, RetentionWindow, Section, SECTION_POLICIES,
};
pub use task::{Task, TaskState, TaskStatus};
