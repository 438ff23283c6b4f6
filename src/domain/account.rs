use crate::domain::event::Provider;
use serde::{Deserialize, Serialize};

/// Merchant-facing account that owns mandates, resolved at the boundary by
/// [`GatewayAccountLookup`](crate::domain::ports::GatewayAccountLookup).
///
/// `organisation_id` scopes provider events for multi-tenant providers;
/// GoCardless requires it, Sandbox does not.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GatewayAccount {
    pub external_id: String,
    pub provider: Provider,
    pub organisation_id: Option<String>,
    pub access_token: String,
}

impl GatewayAccount {
    pub fn sandbox(external_id: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            provider: Provider::Sandbox,
            organisation_id: None,
            access_token: "sandbox-token".to_string(),
        }
    }

    pub fn gocardless(external_id: &str, organisation_id: Option<&str>) -> Self {
        Self {
            external_id: external_id.to_string(),
            provider: Provider::GoCardless,
            organisation_id: organisation_id.map(str::to_string),
            access_token: "gocardless-token".to_string(),
        }
    }
}
