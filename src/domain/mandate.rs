use crate::domain::event::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a mandate.
///
/// `Active` is not terminal: an active mandate can still fail or be cancelled
/// by the provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateState {
    Created,
    AwaitingDirectDebitDetails,
    SubmittedToProvider,
    Pending,
    Active,
    Failed,
    Cancelled,
    Expired,
    UserSetupCancelled,
    UserSetupCancelledNotEligible,
}

impl MandateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Cancelled
                | Self::Expired
                | Self::UserSetupCancelled
                | Self::UserSetupCancelledNotEligible
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::AwaitingDirectDebitDetails => "AWAITING_DIRECT_DEBIT_DETAILS",
            Self::SubmittedToProvider => "SUBMITTED_TO_PROVIDER",
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::UserSetupCancelled => "USER_SETUP_CANCELLED",
            Self::UserSetupCancelledNotEligible => "USER_SETUP_CANCELLED_NOT_ELIGIBLE",
        }
    }
}

impl std::fmt::Display for MandateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum MandateType {
    OneOff,
    OnDemand,
}

/// Provider-supplied reason attached to a calculated state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct StateDetails {
    pub cause: Option<String>,
    pub description: Option<String>,
}

/// A customer authorization permitting one-off or recurring debit collection.
///
/// State is mutated only through the transition validator; mandates are never
/// deleted, terminal states are final markers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Mandate {
    pub id: u64,
    pub external_id: String,
    pub mandate_type: MandateType,
    pub state: MandateState,
    /// External id of the owning gateway account.
    pub gateway_account_id: String,
    /// Denormalized from the gateway account so provider-scoped lookups need
    /// no join.
    pub provider: Provider,
    /// Provider-assigned mandate id, set once the mandate has been submitted.
    pub provider_mandate_id: Option<String>,
    pub bank_statement_reference: Option<String>,
    pub service_reference: Option<String>,
    pub description: Option<String>,
    pub state_details: Option<StateDetails>,
    pub created_at: DateTime<Utc>,
}

impl Mandate {
    pub fn new(
        external_id: String,
        mandate_type: MandateType,
        gateway_account_id: String,
        provider: Provider,
    ) -> Self {
        Self {
            id: 0,
            external_id,
            mandate_type,
            state: MandateState::Created,
            gateway_account_id,
            provider,
            provider_mandate_id: None,
            bank_statement_reference: None,
            service_reference: None,
            description: None,
            state_details: None,
            created_at: Utc::now(),
        }
    }
}
