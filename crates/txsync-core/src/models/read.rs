use std::sync::Arc;

use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};

use super::{provider::Credential, AccountType, Category, FlowKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Institution {
    pub id: Arc<str>,
    pub name: Arc<str>,
}

/// A linked upstream item and its position in the change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: Arc<str>,
    pub client_id: Arc<str>,
    pub item_id: Arc<str>,
    pub credential: Credential,
    pub institution: Institution,
    pub active: bool,
    pub is_test: bool,
    /// `None` = never synced, `Some("")` = caught up.
    pub cursor: Option<String>,
    pub created_at: OffsetDateTime,
}

impl Connection {
    pub fn is_syncable(&self) -> bool {
        self.active && !self.is_test
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub transaction_id: Arc<str>,
    pub client_id: Arc<str>,
    pub connection_id: Arc<str>,
    pub account_id: Arc<str>,
    pub account_type: Option<AccountType>,
    pub account_subtype: Option<Arc<str>>,
    pub amount: Decimal,
    pub date: Date,
    pub name: Arc<str>,
    pub merchant_name: Option<Arc<str>>,
    pub provider_category: Option<Arc<str>>,
    pub pending: bool,
    pub flow_kind: FlowKind,
    pub suggested_category: Category,
    pub user_category: Option<Category>,
    pub is_reviewed: bool,
    pub notes: Option<Arc<str>>,
    pub created_at: OffsetDateTime,
}

impl Transaction {
    /// The category reports should use: a reviewer's choice beats the suggestion.
    pub fn effective_category(&self) -> Category {
        self.user_category.unwrap_or(self.suggested_category)
    }
}
