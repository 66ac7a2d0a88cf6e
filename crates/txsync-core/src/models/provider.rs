//! Records as delivered by the aggregation provider.

use std::{fmt, sync::Arc};

use rust_decimal::Decimal;
use time::Date;

/// Opaque access secret for one upstream item.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(secret: &str) -> Self {
        Self(Arc::from(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Balances {
    pub available: Option<Decimal>,
    pub current: Option<Decimal>,
    pub iso_currency_code: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub account_id: Arc<str>,
    /// Raw provider type string.
    pub account_type: Arc<str>,
    pub subtype: Option<Arc<str>>,
    pub name: Arc<str>,
    pub mask: Option<Arc<str>>,
    pub balances: Balances,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalFinanceCategory {
    pub primary: Arc<str>,
    pub detailed: Option<Arc<str>>,
}

/// One added or modified transaction from the change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRecord {
    pub transaction_id: Arc<str>,
    pub account_id: Arc<str>,
    pub amount: Decimal,
    pub date: Date,
    pub name: Arc<str>,
    pub merchant_name: Option<Arc<str>>,
    /// Legacy hierarchical category, most general first.
    pub category: Vec<Arc<str>>,
    pub personal_finance_category: Option<PersonalFinanceCategory>,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedRecord {
    pub transaction_id: Arc<str>,
}

/// A single response from the change-stream endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangesPage {
    pub added: Vec<TxRecord>,
    pub modified: Vec<TxRecord>,
    pub removed: Vec<RemovedRecord>,
    pub next_cursor: String,
    pub has_more: bool,
}

/// Every change accumulated across the pages of one sync attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageSet {
    pub added: Vec<TxRecord>,
    pub modified: Vec<TxRecord>,
    pub removed: Vec<RemovedRecord>,
    /// Cursor to commit once the set is reconciled. `None` when no page
    /// advanced past the starting cursor.
    pub next_cursor: Option<String>,
}

impl PageSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.removed.clear();
        self.next_cursor = None;
    }

    pub fn extend(&mut self, page: ChangesPage) {
        self.added.extend(page.added);
        self.modified.extend(page.modified);
        self.removed.extend(page.removed);
    }
}
