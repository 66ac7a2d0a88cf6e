use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod provider;
pub mod read;
pub mod summary;
pub mod write;

/// Account classes reported by the aggregation provider.
///
/// Unrecognised provider strings are represented as `None` at the call
/// sites rather than as a variant, so "unknown" always means "fall back to
/// the sign of the amount".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Depository,
    Credit,
    Loan,
    Investment,
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Depository => "depository",
            AccountType::Credit => "credit",
            AccountType::Loan => "loan",
            AccountType::Investment => "investment",
            AccountType::Other => "other",
        }
    }

    /// Lenient parse used for provider payloads; `None` for anything unknown.
    pub fn from_provider(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "depository" => Ok(AccountType::Depository),
            "credit" => Ok(AccountType::Credit),
            "loan" => Ok(AccountType::Loan),
            "investment" | "brokerage" => Ok(AccountType::Investment),
            "other" => Ok(AccountType::Other),
            other => Err(format!("unknown account type: {}", other)),
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Income,
    Expense,
    Transfer,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Income => "income",
            FlowKind::Expense => "expense",
            FlowKind::Transfer => "transfer",
        }
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(FlowKind::Income),
            "expense" => Ok(FlowKind::Expense),
            "transfer" => Ok(FlowKind::Transfer),
            other => Err(format!("unknown flow kind: {}", other)),
        }
    }
}

impl Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed set of reporting categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Housing,
    Utilities,
    AutoTransport,
    Insurance,
    LoanPayment,
    Groceries,
    Health,
    Shopping,
    Dining,
    Entertainment,
    Subscriptions,
    Travel,
    Education,
    PersonalCare,
    Childcare,
    Pets,
    CharitableGiving,
    Taxes,
    Fees,
    Income,
    Transfer,
    Uncategorized,
}

impl Category {
    pub const ALL: [Category; 22] = [
        Category::Housing,
        Category::Utilities,
        Category::AutoTransport,
        Category::Insurance,
        Category::LoanPayment,
        Category::Groceries,
        Category::Health,
        Category::Shopping,
        Category::Dining,
        Category::Entertainment,
        Category::Subscriptions,
        Category::Travel,
        Category::Education,
        Category::PersonalCare,
        Category::Childcare,
        Category::Pets,
        Category::CharitableGiving,
        Category::Taxes,
        Category::Fees,
        Category::Income,
        Category::Transfer,
        Category::Uncategorized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Housing => "housing",
            Category::Utilities => "utilities",
            Category::AutoTransport => "auto_transport",
            Category::Insurance => "insurance",
            Category::LoanPayment => "loan_payment",
            Category::Groceries => "groceries",
            Category::Health => "health",
            Category::Shopping => "shopping",
            Category::Dining => "dining",
            Category::Entertainment => "entertainment",
            Category::Subscriptions => "subscriptions",
            Category::Travel => "travel",
            Category::Education => "education",
            Category::PersonalCare => "personal_care",
            Category::Childcare => "childcare",
            Category::Pets => "pets",
            Category::CharitableGiving => "charitable_giving",
            Category::Taxes => "taxes",
            Category::Fees => "fees",
            Category::Income => "income",
            Category::Transfer => "transfer",
            Category::Uncategorized => "uncategorized",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
