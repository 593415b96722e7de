//! Category mapper: source category text to a target ledger account.

use crate::models::LedgerAccountDescriptor;

/// Where anything unmapped lands.
pub const FALLBACK_ACCOUNT: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Uncategorized Expense",
    account_type: "Expense",
    sub_type: "UncategorizedExpense",
};

/// Income account backing the generic catalog item on inflow lines.
pub const SALES_ACCOUNT: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Sales",
    account_type: "Income",
    sub_type: "SalesOfProductIncome",
};

const ADVERTISING: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Advertising",
    account_type: "Expense",
    sub_type: "Advertising",
};
const TRAVEL: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Travel",
    account_type: "Expense",
    sub_type: "Travel",
};
const MEALS: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Meals and Entertainment",
    account_type: "Expense",
    sub_type: "EntertainmentMeals",
};
const UTILITIES: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Utilities",
    account_type: "Expense",
    sub_type: "Utilities",
};
const RENT: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Rent or Lease",
    account_type: "Expense",
    sub_type: "RentOrLeaseOfBuildings",
};
const OFFICE: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Office Supplies",
    account_type: "Expense",
    sub_type: "OfficeGeneralAdministrativeExpenses",
};
const INSURANCE: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Insurance",
    account_type: "Expense",
    sub_type: "Insurance",
};
const BANK_CHARGES: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Bank Charges",
    account_type: "Expense",
    sub_type: "BankCharges",
};
const PROFESSIONAL_FEES: LedgerAccountDescriptor = LedgerAccountDescriptor {
    name: "Legal & Professional Fees",
    account_type: "Expense",
    sub_type: "LegalProfessionalFees",
};

static TABLE: &[(&str, LedgerAccountDescriptor)] = &[
    ("advertising", ADVERTISING),
    ("marketing", ADVERTISING),
    ("travel", TRAVEL),
    ("restaurant", MEALS),
    ("restaurants", MEALS),
    ("food", MEALS),
    ("utilities", UTILITIES),
    ("rent", RENT),
    ("office", OFFICE),
    ("insurance", INSURANCE),
    ("fee", BANK_CHARGES),
    ("fees", BANK_CHARGES),
    ("bank", BANK_CHARGES),
    ("service", PROFESSIONAL_FEES),
    ("services", PROFESSIONAL_FEES),
];

/// Lookup key: first comma-separated segment, lower-cased, first word.
fn normalize(label: &str) -> Option<String> {
    label
        .split(',')
        .next()
        .and_then(|segment| segment.split_whitespace().next())
        .map(str::to_lowercase)
}

/// Map a category label to its ledger account. Absent or unknown labels get
/// [`FALLBACK_ACCOUNT`].
pub fn map(category_label: Option<&str>) -> LedgerAccountDescriptor {
    category_label
        .and_then(normalize)
        .and_then(|key| {
            TABLE
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, descriptor)| *descriptor)
        })
        .unwrap_or(FALLBACK_ACCOUNT)
}
