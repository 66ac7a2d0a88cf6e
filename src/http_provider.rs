//! HTTP adapter for the aggregation provider's JSON API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, Date};

use txsync_core::{
    AccountInfo, Balances, ChangesPage, Credential, PersonalFinanceCategory, ProviderClient,
    ProviderError, RemovedRecord, TxRecord,
};

const ACCOUNTS_PATH: &str = "/accounts/get";
const SYNC_PATH: &str = "/transactions/sync";

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

const MUTATION_DURING_PAGINATION: &str = "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION";
const CREDENTIAL_ERRORS: [&str; 4] = [
    "ITEM_LOGIN_REQUIRED",
    "INVALID_ACCESS_TOKEN",
    "ITEM_NOT_FOUND",
    "ACCESS_NOT_GRANTED",
];

/// Classify a provider error code into the engine's retry categories.
pub fn map_error_code(code: &str, message: &str) -> ProviderError {
    if code == MUTATION_DURING_PAGINATION {
        ProviderError::retryable(format!("{}: {}", code, message))
    } else if CREDENTIAL_ERRORS.contains(&code) {
        ProviderError::credential(format!("{}: {}", code, message))
    } else {
        ProviderError::fatal(format!("{}: {}", code, message))
    }
}

#[derive(Debug, Serialize)]
struct AccountsRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<WireAccount>,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    account_id: String,
    #[serde(rename = "type")]
    account_type: String,
    subtype: Option<String>,
    #[serde(default)]
    name: String,
    mask: Option<String>,
    #[serde(default)]
    balances: WireBalances,
}

#[derive(Debug, Deserialize, Default)]
struct WireBalances {
    available: Option<f64>,
    current: Option<f64>,
    iso_currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<WireTransaction>,
    #[serde(default)]
    modified: Vec<WireTransaction>,
    #[serde(default)]
    removed: Vec<WireRemoved>,
    #[serde(default)]
    next_cursor: String,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    transaction_id: String,
    account_id: String,
    amount: f64,
    date: String,
    #[serde(default)]
    name: String,
    merchant_name: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
    personal_finance_category: Option<WirePfc>,
    #[serde(default)]
    pending: bool,
}

#[derive(Debug, Deserialize)]
struct WirePfc {
    primary: String,
    detailed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRemoved {
    transaction_id: String,
}

fn money(value: f64) -> Result<Decimal, ProviderError> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .ok_or_else(|| ProviderError::fatal(format!("unrepresentable amount {}", value)))
}

fn opt_money(value: Option<f64>) -> Result<Option<Decimal>, ProviderError> {
    value.map(money).transpose()
}

impl WireAccount {
    fn into_account(self) -> Result<AccountInfo, ProviderError> {
        Ok(AccountInfo {
            account_id: Arc::from(self.account_id),
            account_type: Arc::from(self.account_type),
            subtype: self.subtype.map(Arc::from),
            name: Arc::from(self.name),
            mask: self.mask.map(Arc::from),
            balances: Balances {
                available: opt_money(self.balances.available)?,
                current: opt_money(self.balances.current)?,
                iso_currency_code: self.balances.iso_currency_code.map(Arc::from),
            },
        })
    }
}

impl WireTransaction {
    fn into_record(self) -> Result<TxRecord, ProviderError> {
        let date = Date::parse(&self.date, DATE_FORMAT).map_err(|e| {
            ProviderError::fatal(format!("transaction {} has bad date {}: {}", self.transaction_id, self.date, e))
        })?;
        Ok(TxRecord {
            amount: money(self.amount)?,
            date,
            transaction_id: Arc::from(self.transaction_id),
            account_id: Arc::from(self.account_id),
            name: Arc::from(self.name),
            merchant_name: self.merchant_name.map(Arc::from),
            category: self
                .category
                .unwrap_or_default()
                .into_iter()
                .map(Arc::from)
                .collect(),
            personal_finance_category: self.personal_finance_category.map(|p| PersonalFinanceCategory {
                primary: Arc::from(p.primary),
                detailed: p.detailed.map(Arc::from),
            }),
            pending: self.pending,
        })
    }
}

impl SyncResponse {
    fn into_page(self) -> Result<ChangesPage, ProviderError> {
        Ok(ChangesPage {
            added: self
                .added
                .into_iter()
                .map(WireTransaction::into_record)
                .collect::<Result<_, _>>()?,
            modified: self
                .modified
                .into_iter()
                .map(WireTransaction::into_record)
                .collect::<Result<_, _>>()?,
            removed: self
                .removed
                .into_iter()
                .map(|r| RemovedRecord {
                    transaction_id: Arc::from(r.transaction_id),
                })
                .collect(),
            next_cursor: self.next_cursor,
            has_more: self.has_more,
        })
    }
}

/// Provider client speaking the aggregator's JSON-over-POST protocol.
#[derive(Clone)]
pub struct HttpProviderClient {
    base_url: String,
    client_id: String,
    secret: Credential,
    page_size: u32,
    http_client: Client,
}

impl HttpProviderClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        secret: Credential,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            secret,
            page_size,
            http_client,
        })
    }

    async fn post<Req: Serialize + ?Sized, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| ProviderError::fatal(format!("malformed response from {}: {}", path, e)));
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => {
                tracing::warn!(path, status = %status, error_code = %body.error_code, "Provider returned an error");
                Err(map_error_code(&body.error_code, &body.error_message))
            }
            Err(_) => {
                tracing::warn!(path, status = %status, "Provider returned an unparseable error");
                Err(ProviderError::fatal(format!("HTTP {} from {}", status, path)))
            }
        }
    }
}

/// Network-level failures never look like a mutated change stream, so they
/// are not retried by the pagination loop.
fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::fatal(format!("provider request timed out: {}", e))
    } else {
        ProviderError::fatal(format!("provider request failed: {}", e))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_accounts(&self, credential: &Credential) -> Result<Vec<AccountInfo>, ProviderError> {
        let request = AccountsRequest {
            client_id: &self.client_id,
            secret: self.secret.expose(),
            access_token: credential.expose(),
        };
        let response: AccountsResponse = self.post(ACCOUNTS_PATH, &request).await?;
        response
            .accounts
            .into_iter()
            .map(WireAccount::into_account)
            .collect()
    }

    async fn fetch_changes_page(&self, credential: &Credential, cursor: Option<&str>) -> Result<ChangesPage, ProviderError> {
        let request = SyncRequest {
            client_id: &self.client_id,
            secret: self.secret.expose(),
            access_token: credential.expose(),
            cursor,
            count: self.page_size,
        };
        let response: SyncResponse = self.post(SYNC_PATH, &request).await?;
        tracing::debug!(
            added = response.added.len(),
            modified = response.modified.len(),
            removed = response.removed.len(),
            has_more = response.has_more,
            "Fetched change page"
        );
        response.into_page()
    }
}
