use debitflow::application::engine::{CreateMandateRequest, CreatePaymentRequest};
use debitflow::domain::account::GatewayAccount;
use debitflow::domain::mandate::{MandateState, MandateType};
use debitflow::domain::payment::{Amount, PaymentState};
use debitflow::error::EngineError;
use rust_decimal_macros::dec;

mod common;

fn mandate_request(external_id: &str, mandate_type: MandateType) -> CreateMandateRequest {
    CreateMandateRequest {
        account_external_id: "acct-1".to_string(),
        mandate_type,
        external_id: Some(external_id.to_string()),
        service_reference: Some("REF-001".to_string()),
        description: None,
    }
}

#[tokio::test]
async fn test_on_demand_mandate_setup_flow() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    let mandate = engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap();
    assert_eq!(mandate.state, MandateState::Created);
    assert!(mandate.provider_mandate_id.is_none());

    let mandate = engine.token_exchanged("md-1").await.unwrap();
    assert_eq!(mandate.state, MandateState::AwaitingDirectDebitDetails);

    let mandate = engine.confirm_mandate("md-1").await.unwrap();
    assert_eq!(mandate.state, MandateState::SubmittedToProvider);
    assert_eq!(
        mandate.provider_mandate_id.as_deref(),
        Some("sandbox-mandate-1")
    );
    assert!(mandate.bank_statement_reference.is_some());

    // the ledger replays to the same state the store holds
    let replayed = engine.replayed_mandate_state("md-1").await.unwrap();
    assert_eq!(replayed, mandate.state);
}

#[tokio::test]
async fn test_one_off_confirm_submits_the_single_payment() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OneOff))
        .await
        .unwrap();
    let payment = engine
        .create_payment(CreatePaymentRequest {
            mandate_external_id: "md-1".to_string(),
            amount: Amount::new(dec!(25.00)).unwrap(),
            external_id: Some("pay-1".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(payment.state, PaymentState::New);

    engine.token_exchanged("md-1").await.unwrap();
    let mandate = engine.confirm_mandate("md-1").await.unwrap();
    assert_eq!(mandate.state, MandateState::SubmittedToProvider);

    let payment = engine.find_payment("pay-1").await.unwrap();
    assert_eq!(payment.state, PaymentState::Pending);
    assert!(payment.provider_payment_id.is_some());
}

#[tokio::test]
async fn test_one_off_confirm_requires_exactly_one_payment() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OneOff))
        .await
        .unwrap();
    engine.token_exchanged("md-1").await.unwrap();

    let err = engine.confirm_mandate("md-1").await.unwrap_err();
    assert!(matches!(err, EngineError::Cardinality { found: 0, .. }));
}

#[tokio::test]
async fn test_user_cancels_setup_before_submission() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap();
    engine.token_exchanged("md-1").await.unwrap();

    let mandate = engine.cancel_mandate_setup("md-1").await.unwrap();
    assert_eq!(mandate.state, MandateState::UserSetupCancelled);
    assert!(mandate.state.is_terminal());

    // terminal states accept no further transitions
    let err = engine.token_exchanged("md-1").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_change_payment_method_is_its_own_terminal_state() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap();
    let mandate = engine.change_payment_method("md-1").await.unwrap();
    assert_eq!(mandate.state, MandateState::UserSetupCancelledNotEligible);
}

#[tokio::test]
async fn test_cancel_payment_only_from_new() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap();
    engine.token_exchanged("md-1").await.unwrap();
    engine.confirm_mandate("md-1").await.unwrap();

    engine
        .create_payment(CreatePaymentRequest {
            mandate_external_id: "md-1".to_string(),
            amount: Amount::new(dec!(10.00)).unwrap(),
            external_id: Some("pay-1".to_string()),
        })
        .await
        .unwrap();

    let payment = engine.cancel_payment("pay-1").await.unwrap();
    assert_eq!(payment.state, PaymentState::Cancelled);

    // a submitted payment can no longer be cancelled by the user
    engine
        .create_payment(CreatePaymentRequest {
            mandate_external_id: "md-1".to_string(),
            amount: Amount::new(dec!(10.00)).unwrap(),
            external_id: Some("pay-2".to_string()),
        })
        .await
        .unwrap();
    engine.submit_payment("pay-2").await.unwrap();
    let err = engine.cancel_payment("pay-2").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_change_payment_method_marks_payment_not_eligible() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OneOff))
        .await
        .unwrap();
    engine
        .create_payment(CreatePaymentRequest {
            mandate_external_id: "md-1".to_string(),
            amount: Amount::new(dec!(20.00)).unwrap(),
            external_id: Some("pay-1".to_string()),
        })
        .await
        .unwrap();

    let payment = engine.cancel_payment_not_eligible("pay-1").await.unwrap();
    assert_eq!(payment.state, PaymentState::UserCancelNotEligible);
    assert!(payment.state.is_terminal());
}

#[tokio::test]
async fn test_create_mandate_against_unknown_account() {
    let engine = common::engine_with_accounts(&[]);

    let err = engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            resource: "gateway account",
            ..
        }
    ));
}

#[tokio::test]
async fn test_payment_ledger_replays_to_stored_state() {
    let engine = common::engine_with_accounts(&[GatewayAccount::sandbox("acct-1")]);

    engine
        .create_mandate(mandate_request("md-1", MandateType::OnDemand))
        .await
        .unwrap();
    engine.token_exchanged("md-1").await.unwrap();
    engine.confirm_mandate("md-1").await.unwrap();

    engine
        .create_payment(CreatePaymentRequest {
            mandate_external_id: "md-1".to_string(),
            amount: Amount::new(dec!(42.50)).unwrap(),
            external_id: Some("pay-1".to_string()),
        })
        .await
        .unwrap();
    let payment = engine.submit_payment("pay-1").await.unwrap();
    assert_eq!(payment.state, PaymentState::Pending);

    let replayed = engine.replayed_payment_state("pay-1").await.unwrap();
    assert_eq!(replayed, payment.state);
}
