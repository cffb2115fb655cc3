use super::{Lifecycle, Phase, Task};
use crate::workflow::PendingInterrupt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// List section shared between snapshots. Merges that leave a list alone
/// hand back the same allocation.
pub type SharedList<T> = Arc<Vec<T>>;

/// The single live record of a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<OnboardingPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_flow: Option<OnboardingFlow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(default)]
    pub activity: Activity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_input: Option<OperatorInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_token_input: Option<FundingTokenInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_config: Option<OperatorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_bundle: Option<DelegationBundle>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub transaction_history: SharedList<TransactionRecord>,
    #[serde(default)]
    pub private: PrivateState,
}

impl StateDocument {
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase
    }

    /// Funding token chosen either in its own step or up front with the
    /// operator input.
    pub fn funding_token_address(&self) -> Option<&str> {
        self.funding_token_input
            .as_ref()
            .map(|input| input.funding_token_address.as_str())
            .or_else(|| {
                self.operator_input
                    .as_ref()
                    .and_then(|input| input.funding_token_address.as_deref())
            })
    }

    pub fn has_signed_delegation(&self) -> bool {
        self.delegation_bundle
            .as_ref()
            .is_some_and(|bundle| bundle.delegations.len() == 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingKey {
    ResourceDiscovery,
    OperatorConfiguration,
    FundingToken,
    Delegation,
    ExecutionPreparation,
}

impl OnboardingKey {
    pub const ORDERED: [Self; 5] = [
        Self::ResourceDiscovery,
        Self::OperatorConfiguration,
        Self::FundingToken,
        Self::Delegation,
        Self::ExecutionPreparation,
    ];

    pub fn ordinal(self) -> u32 {
        match self {
            Self::ResourceDiscovery => 1,
            Self::OperatorConfiguration => 2,
            Self::FundingToken => 3,
            Self::Delegation => 4,
            Self::ExecutionPreparation => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceDiscovery => "resource-discovery",
            Self::OperatorConfiguration => "operator-configuration",
            Self::FundingToken => "funding-token",
            Self::Delegation => "delegation",
            Self::ExecutionPreparation => "execution-preparation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPosition {
    pub step: u32,
    pub key: OnboardingKey,
}

impl OnboardingPosition {
    pub fn at(key: OnboardingKey) -> Self {
        Self {
            step: key.ordinal(),
            key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingFlowStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingFlow {
    pub status: OnboardingFlowStatus,
    pub started_at: i64,
    #[serde(default)]
    pub completed_steps: SharedList<OnboardingKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Status,
    Artifact,
    Interrupt,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub message: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEntry {
    pub cycle: u64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default)]
    pub events: SharedList<ActivityEvent>,
    #[serde(default)]
    pub telemetry: SharedList<TelemetryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorInput {
    pub wallet_address: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_token_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingTokenInput {
    pub funding_token_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    pub wallet_address: String,
    pub resource_id: String,
    pub funding_token_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegatee_address: Option<String>,
    pub cycle_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDelegation {
    pub delegate: String,
    pub delegator: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub caveats: Vec<Value>,
    #[serde(default)]
    pub salt: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationBundle {
    pub chain_id: u64,
    pub delegator_address: String,
    pub delegatee_address: String,
    pub delegations: Vec<SignedDelegation>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_income: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apy: Option<f64>,
    #[serde(default)]
    pub chains: SharedList<String>,
    #[serde(default)]
    pub protocols: SharedList<String>,
    #[serde(default)]
    pub tokens: SharedList<String>,
    #[serde(default)]
    pub resources: SharedList<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub cycles_since_rebalance: u64,
    #[serde(default)]
    pub stale_cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_snapshot: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub cycle: u64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

/// Bookkeeping that never leaves the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateState {
    #[serde(default)]
    pub bootstrapped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_command_mutation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_sync_mutation_id: Option<String>,
    #[serde(default)]
    pub cron_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<PendingInterrupt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resume_digest: Option<String>,
}
