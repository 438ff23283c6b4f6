use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External payment rail a gateway account is wired to.
///
/// `Sandbox` is a deterministic test double: its entities only move through
/// direct user/system transitions, never through webhook recalculation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Sandbox,
    GoCardless,
}

/// Which entity a domain event belongs to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    Mandate,
    Payment,
}

/// The closed set of lifecycle events. These are the edge labels of the two
/// state graphs, plus the creation events that open each subject's ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventType {
    MandateCreated,
    MandateTokenExchanged,
    MandateSubmittedToProvider,
    MandatePending,
    MandateActive,
    MandateFailed,
    MandateCancelled,
    MandateExpired,
    MandateExpiredBySystem,
    MandateUserSetupCancelled,
    MandateUserSetupCancelledNotEligible,
    PaymentCreated,
    PaymentSubmittedToProvider,
    PaymentCancelledByUser,
    PaymentCancelledByUserNotEligible,
    PaymentExpiredBySystem,
    PaymentFailed,
    PaidOut,
}

/// Immutable audit record of a lifecycle-affecting occurrence.
///
/// Rows are never mutated or deleted. Ordering within a subject is by
/// `occurred_at`, tie-broken by the store's insertion sequence.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DomainEvent {
    pub subject_id: u64,
    pub subject_type: SubjectType,
    pub event_type: DomainEventType,
    pub occurred_at: DateTime<Utc>,
    pub details: Option<String>,
}

impl DomainEvent {
    pub fn now(subject_id: u64, subject_type: SubjectType, event_type: DomainEventType) -> Self {
        Self {
            subject_id,
            subject_type,
            event_type,
            occurred_at: Utc::now(),
            details: None,
        }
    }
}

/// Provider-side resource class a webhook refers to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Mandates,
    Payments,
}

/// Raw webhook notification as received from a payment provider.
///
/// `event_id` is the provider-assigned identity used for dedup; `resource_id`
/// is the provider-side id of the mandate or payment the event is about.
/// Signature verification happens before these reach the ingester.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProviderEvent {
    pub provider: Provider,
    pub event_id: String,
    pub action: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub organisation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub details_cause: Option<String>,
    pub details_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_event_deserialization() {
        let json = r#"{
            "provider": "gocardless",
            "event_id": "EV123",
            "action": "submitted",
            "resource_type": "mandates",
            "resource_id": "MD123",
            "organisation_id": "OR123",
            "occurred_at": "2019-07-01T10:00:00Z",
            "details_cause": null,
            "details_description": null
        }"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.provider, Provider::GoCardless);
        assert_eq!(event.resource_type, ResourceType::Mandates);
        assert_eq!(event.action, "submitted");
    }

    #[test]
    fn test_domain_event_type_wire_format() {
        let json = serde_json::to_string(&DomainEventType::MandateSubmittedToProvider).unwrap();
        assert_eq!(json, "\"MANDATE_SUBMITTED_TO_PROVIDER\"");
    }
}
