//! Accounting documents: one per source record, immutable once created.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::SupportingEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Money in; booked as an invoice against a receivable counterparty.
    Inflow,
    /// Money out; booked as a bill against a payable counterparty.
    Outflow,
}

impl DocumentKind {
    /// Zero is classified as an inflow.
    pub fn of(signed_amount: Decimal) -> Self {
        if signed_amount < Decimal::ZERO {
            Self::Outflow
        } else {
            Self::Inflow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingDocument {
    pub kind: DocumentKind,
    pub counterparty: SupportingEntity,
    /// The single line's classifying entity: catalog item or ledger account.
    pub line: SupportingEntity,
    /// Absolute value of the source amount, rounded to cents.
    pub total: Decimal,
    pub document_date: NaiveDate,
    pub marker: String,
}
