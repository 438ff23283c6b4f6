use crate::domain::event::Provider;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Represents a positive collection amount.
///
/// Wrapper around `rust_decimal::Decimal` so that a payment can never be
/// constructed for zero or a negative value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::Validation(
                "amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Lifecycle states of a payment. All states but `New` and `Pending` are
/// terminal.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    New,
    Pending,
    Success,
    Failed,
    Cancelled,
    UserCancelNotEligible,
    Expired,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::New | Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::UserCancelNotEligible => "USER_CANCEL_NOT_ELIGIBLE",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single collection executed against a mandate.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: u64,
    pub external_id: String,
    /// Internal id of the owning mandate.
    pub mandate_id: u64,
    pub amount: Amount,
    pub state: PaymentState,
    /// Denormalized from the owning mandate for provider-scoped lookups.
    pub provider: Provider,
    pub provider_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(external_id: String, mandate_id: u64, amount: Amount, provider: Provider) -> Self {
        Self {
            id: 0,
            external_id,
            mandate_id,
            amount,
            state: PaymentState::New,
            provider,
            provider_payment_id: None,
            created_at: Utc::now(),
        }
    }
}
