//! Source records as fetched from the event source and as normalized for the pipeline.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bank account as reported by the event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// Raw transaction in the event source's own sign convention (positive = money out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<Vec<String>>,
    #[serde(default)]
    pub pending: bool,
}

/// Canonical form of one source event. `source_id` is the idempotency anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub company_id: i64,
    pub source_id: String,
    pub account_id: String,
    /// Negative = outflow, positive = inflow.
    pub signed_amount: Decimal,
    pub occurred_on: NaiveDate,
    pub counterparty_label: String,
    pub category_label: Option<String>,
    pub is_pending: bool,
}

impl NormalizedRecord {
    /// Normalize a raw event: flip the source's sign and pick the best display name.
    pub fn from_raw(company_id: i64, raw: &RawTransaction) -> Self {
        let counterparty_label = [raw.merchant_name.as_deref(), raw.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        let category_label = raw
            .category
            .as_ref()
            .filter(|parts| !parts.is_empty())
            .map(|parts| parts.join(","));

        Self {
            company_id,
            source_id: raw.transaction_id.clone(),
            account_id: raw.account_id.clone(),
            signed_amount: -raw.amount,
            occurred_on: raw.date,
            counterparty_label,
            category_label,
            is_pending: raw.pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn raw(amount: &str) -> RawTransaction {
        RawTransaction {
            transaction_id: "txn_1".to_string(),
            account_id: "acc_1".to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            merchant_name: None,
            name: Some("ACME CO PAYMENT".to_string()),
            category: Some(vec!["Transfer".to_string(), "Deposit".to_string()]),
            pending: false,
        }
    }

    #[test]
    fn normalization_flips_source_sign() {
        let outflow = NormalizedRecord::from_raw(1, &raw("42.50"));
        assert_eq!(outflow.signed_amount, Decimal::from_str("-42.50").unwrap());

        let inflow = NormalizedRecord::from_raw(1, &raw("-150.00"));
        assert_eq!(inflow.signed_amount, Decimal::from_str("150.00").unwrap());
    }

    #[test]
    fn counterparty_prefers_merchant_then_name() {
        let mut r = raw("1.00");
        assert_eq!(NormalizedRecord::from_raw(1, &r).counterparty_label, "ACME CO PAYMENT");

        r.merchant_name = Some("Acme Co".to_string());
        assert_eq!(NormalizedRecord::from_raw(1, &r).counterparty_label, "Acme Co");

        r.merchant_name = Some("  ".to_string());
        r.name = None;
        assert_eq!(NormalizedRecord::from_raw(1, &r).counterparty_label, "Unknown");
    }

    #[test]
    fn category_array_is_joined() {
        let record = NormalizedRecord::from_raw(1, &raw("1.00"));
        assert_eq!(record.category_label.as_deref(), Some("Transfer,Deposit"));

        let mut r = raw("1.00");
        r.category = Some(vec![]);
        assert_eq!(NormalizedRecord::from_raw(1, &r).category_label, None);
    }
}
