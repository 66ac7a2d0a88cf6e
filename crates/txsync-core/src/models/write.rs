use std::sync::Arc;

use rust_decimal::Decimal;
use time::Date;

use super::{provider::Credential, read::Institution, AccountType, Category, FlowKind};

#[derive(Debug, Clone, PartialEq)]
pub struct CreateConnectionCommand {
    pub id: Arc<str>,
    pub client_id: Arc<str>,
    pub item_id: Arc<str>,
    pub credential: Credential,
    pub institution: Institution,
    pub is_test: bool,
}

/// Provider-owned fields of a transaction row. Review fields are never part
/// of this command, so writing it can't clobber them.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionCommand {
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
}

/// A human review action. `None` leaves the field as it is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReviewCommand {
    pub user_category: Option<Category>,
    pub is_reviewed: Option<bool>,
    pub notes: Option<Arc<str>>,
}
