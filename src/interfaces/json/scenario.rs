use crate::domain::account::GatewayAccount;
use crate::domain::event::ProviderEvent;
use crate::domain::mandate::MandateType;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};

/// One line of a scenario file: an account registration, a user/API action,
/// an inbound webhook, or a reconciliation sweep.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    RegisterAccount {
        #[serde(flatten)]
        account: GatewayAccount,
    },
    CreateMandate {
        account: String,
        external_id: String,
        mandate_type: MandateType,
        reference: Option<String>,
        description: Option<String>,
    },
    TokenExchanged {
        mandate: String,
    },
    ConfirmMandate {
        mandate: String,
    },
    CancelMandateSetup {
        mandate: String,
    },
    ChangePaymentMethod {
        mandate: String,
    },
    CreatePayment {
        mandate: String,
        external_id: String,
        amount: Decimal,
    },
    SubmitPayment {
        payment: String,
    },
    CancelPayment {
        payment: String,
    },
    Webhook {
        #[serde(flatten)]
        event: ProviderEvent,
    },
    Sweep,
}

/// Reads scenario steps from a JSON-lines source.
///
/// Wraps any `Read` and lazily deserializes one step per line, so large
/// replay files stream without loading everything up front. Blank lines and
/// `#` comments are skipped.
pub struct ScenarioReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .lines()
            .filter(|line| match line {
                Ok(line) => {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with('#')
                }
                Err(_) => true,
            })
            .map(|line| {
                let line = line?;
                Ok(serde_json::from_str(&line)?)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Provider;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = concat!(
            "# sandbox setup\n",
            r#"{"op": "register_account", "external_id": "account-1", "provider": "sandbox", "organisation_id": null, "access_token": "t"}"#,
            "\n\n",
            r#"{"op": "create_payment", "mandate": "mandate-1", "external_id": "payment-1", "amount": "12.50"}"#,
            "\n",
        );
        let steps: Vec<_> = ScenarioReader::new(data.as_bytes()).steps().collect();
        assert_eq!(steps.len(), 2);

        match steps[0].as_ref().unwrap() {
            ScenarioStep::RegisterAccount { account } => {
                assert_eq!(account.provider, Provider::Sandbox);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match steps[1].as_ref().unwrap() {
            ScenarioStep::CreatePayment { amount, .. } => assert_eq!(*amount, dec!(12.50)),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = r#"{"op": "no_such_op"}"#;
        let steps: Vec<_> = ScenarioReader::new(data.as_bytes()).steps().collect();
        assert!(steps[0].is_err());
    }
}
