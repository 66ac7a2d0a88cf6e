//! SQLite storage backend for txsync.
//!
//! One `Mutex<Connection>` serializes all access; every trait method takes
//! the lock for its whole duration, so check-then-write sequences such as
//! the duplicate check on insert are atomic.

use std::{
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::Decimal;
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, OffsetDateTime,
};

use txsync_core::{
    AccountType, Category, ConnectionRegistry, CreateConnectionCommand, Credential, CursorStore,
    FlowKind, InsertOutcome, Institution, ReviewCommand, StorageError, Transaction,
    TransactionCommand, TransactionStore, UpdateOutcome,
};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

const TRANSACTION_COLUMNS: &str = "transaction_id, client_id, connection_id, account_id, account_type, \
     account_subtype, amount, date, name, merchant_name, provider_category, pending, flow_kind, \
     suggested_category, user_category, is_reviewed, notes, created_at";

const CONNECTION_COLUMNS: &str = "id, client_id, item_id, credential, institution_id, institution_name, \
     active, is_test, cursor, created_at";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(other)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        tracing::debug!(path, "SQLite storage opened");
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                item_id TEXT NOT NULL UNIQUE,
                credential TEXT NOT NULL,
                institution_id TEXT NOT NULL,
                institution_name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                is_test INTEGER NOT NULL DEFAULT 0,
                cursor TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_connections_client
                ON connections(client_id);

            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                account_type TEXT,
                account_subtype TEXT,
                amount TEXT NOT NULL,
                date TEXT NOT NULL,
                name TEXT NOT NULL,
                merchant_name TEXT,
                provider_category TEXT,
                pending INTEGER NOT NULL,
                flow_kind TEXT NOT NULL,
                suggested_category TEXT NOT NULL,
                user_category TEXT,
                is_reviewed INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_client
                ON transactions(client_id);
            ",
        )
        .map_err(other)?;
        Ok(())
    }

    /// How long a write waits on another connection's lock before the
    /// store reports itself unavailable.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.lock()?.busy_timeout(timeout).map_err(other)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

/// Map a rusqlite error onto the record/backend split. Only failures tied to
/// the row being written stay record-level; anything else means the
/// database itself could not be used.
fn other(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation | ErrorCode::TooBig | ErrorCode::TypeMismatch => {
                StorageError::Other(e.to_string())
            }
            _ => StorageError::Unavailable(e.to_string()),
        },
        rusqlite::Error::SqlInputError { .. } => StorageError::Unavailable(e.to_string()),
        _ => StorageError::Other(e.to_string()),
    }
}

fn corrupt(column: &str, value: &str) -> StorageError {
    StorageError::Other(format!("invalid {} in database: {}", column, value))
}

fn date_to_str(d: Date) -> Result<String, StorageError> {
    d.format(DATE_FORMAT)
        .map_err(|e| StorageError::Other(e.to_string()))
}

fn str_to_date(s: &str) -> Result<Date, StorageError> {
    Date::parse(s, DATE_FORMAT).map_err(|_| corrupt("date", s))
}

fn timestamp_to_str(t: OffsetDateTime) -> Result<String, StorageError> {
    t.format(&Rfc3339)
        .map_err(|e| StorageError::Other(e.to_string()))
}

fn str_to_timestamp(s: &str) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|_| corrupt("timestamp", s))
}

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, StorageError> {
    value.parse().map_err(|_| corrupt(column, value))
}

fn opt_arc(value: Option<String>) -> Option<Arc<str>> {
    value.map(Arc::from)
}

/// Column values as stored, before decoding into domain types.
struct TransactionRow {
    transaction_id: String,
    client_id: String,
    connection_id: String,
    account_id: String,
    account_type: Option<String>,
    account_subtype: Option<String>,
    amount: String,
    date: String,
    name: String,
    merchant_name: Option<String>,
    provider_category: Option<String>,
    pending: bool,
    flow_kind: String,
    suggested_category: String,
    user_category: Option<String>,
    is_reviewed: bool,
    notes: Option<String>,
    created_at: String,
}

impl TransactionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction_id: row.get(0)?,
            client_id: row.get(1)?,
            connection_id: row.get(2)?,
            account_id: row.get(3)?,
            account_type: row.get(4)?,
            account_subtype: row.get(5)?,
            amount: row.get(6)?,
            date: row.get(7)?,
            name: row.get(8)?,
            merchant_name: row.get(9)?,
            provider_category: row.get(10)?,
            pending: row.get(11)?,
            flow_kind: row.get(12)?,
            suggested_category: row.get(13)?,
            user_category: row.get(14)?,
            is_reviewed: row.get(15)?,
            notes: row.get(16)?,
            created_at: row.get(17)?,
        })
    }

    fn decode(self) -> Result<Transaction, StorageError> {
        let account_type = self
            .account_type
            .as_deref()
            .map(|s| parse_column::<AccountType>("account_type", s))
            .transpose()?;
        let user_category = self
            .user_category
            .as_deref()
            .map(|s| parse_column::<Category>("user_category", s))
            .transpose()?;
        Ok(Transaction {
            amount: Decimal::from_str(&self.amount).map_err(|_| corrupt("amount", &self.amount))?,
            date: str_to_date(&self.date)?,
            flow_kind: parse_column::<FlowKind>("flow_kind", &self.flow_kind)?,
            suggested_category: parse_column::<Category>("suggested_category", &self.suggested_category)?,
            created_at: str_to_timestamp(&self.created_at)?,
            transaction_id: Arc::from(self.transaction_id),
            client_id: Arc::from(self.client_id),
            connection_id: Arc::from(self.connection_id),
            account_id: Arc::from(self.account_id),
            account_type,
            account_subtype: opt_arc(self.account_subtype),
            name: Arc::from(self.name),
            merchant_name: opt_arc(self.merchant_name),
            provider_category: opt_arc(self.provider_category),
            pending: self.pending,
            user_category,
            is_reviewed: self.is_reviewed,
            notes: opt_arc(self.notes),
        })
    }
}

struct ConnectionRow {
    id: String,
    client_id: String,
    item_id: String,
    credential: String,
    institution_id: String,
    institution_name: String,
    active: bool,
    is_test: bool,
    cursor: Option<String>,
    created_at: String,
}

impl ConnectionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_id: row.get(1)?,
            item_id: row.get(2)?,
            credential: row.get(3)?,
            institution_id: row.get(4)?,
            institution_name: row.get(5)?,
            active: row.get(6)?,
            is_test: row.get(7)?,
            cursor: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<txsync_core::Connection, StorageError> {
        Ok(txsync_core::Connection {
            created_at: str_to_timestamp(&self.created_at)?,
            id: Arc::from(self.id),
            client_id: Arc::from(self.client_id),
            item_id: Arc::from(self.item_id),
            credential: Credential::new(&self.credential),
            institution: Institution {
                id: Arc::from(self.institution_id),
                name: Arc::from(self.institution_name),
            },
            active: self.active,
            is_test: self.is_test,
            cursor: self.cursor,
        })
    }
}

fn owner_of(conn: &Connection, transaction_id: &str) -> Result<Option<String>, StorageError> {
    conn.query_row(
        "SELECT client_id FROM transactions WHERE transaction_id = ?1",
        params![transaction_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(other)
}

fn fetch_transaction(conn: &Connection, transaction_id: &str) -> Result<Option<Transaction>, StorageError> {
    let sql = format!("SELECT {} FROM transactions WHERE transaction_id = ?1", TRANSACTION_COLUMNS);
    conn.query_row(&sql, params![transaction_id], TransactionRow::read)
        .optional()
        .map_err(other)?
        .map(TransactionRow::decode)
        .transpose()
}

fn insert_row(conn: &Connection, command: &TransactionCommand) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO transactions (transaction_id, client_id, connection_id, account_id, account_type, \
         account_subtype, amount, date, name, merchant_name, provider_category, pending, flow_kind, \
         suggested_category, is_reviewed, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, ?15)",
        params![
            command.transaction_id.as_ref(),
            command.client_id.as_ref(),
            command.connection_id.as_ref(),
            command.account_id.as_ref(),
            command.account_type.map(|t| t.as_str()),
            command.account_subtype.as_deref(),
            command.amount.to_string(),
            date_to_str(command.date)?,
            command.name.as_ref(),
            command.merchant_name.as_deref(),
            command.provider_category.as_deref(),
            command.pending,
            command.flow_kind.as_str(),
            command.suggested_category.as_str(),
            timestamp_to_str(OffsetDateTime::now_utc())?,
        ],
    )
    .map_err(other)?;
    Ok(())
}

impl TransactionStore for SqliteStorage {
    fn insert_transaction(&self, command: &TransactionCommand) -> Result<InsertOutcome, StorageError> {
        let conn = self.lock()?;
        match owner_of(&conn, &command.transaction_id)? {
            Some(owner) if owner != command.client_id.as_ref() => {
                Err(StorageError::OwnershipMismatch(command.transaction_id.to_string()))
            }
            Some(_) => Ok(InsertOutcome::Duplicate),
            None => {
                insert_row(&conn, command)?;
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn update_transaction(&self, command: &TransactionCommand) -> Result<UpdateOutcome, StorageError> {
        let conn = self.lock()?;
        match owner_of(&conn, &command.transaction_id)? {
            Some(owner) if owner != command.client_id.as_ref() => {
                Err(StorageError::OwnershipMismatch(command.transaction_id.to_string()))
            }
            Some(_) => {
                // Review columns are not in the SET list.
                conn.execute(
                    "UPDATE transactions SET connection_id = ?2, account_id = ?3, account_type = ?4, \
                     account_subtype = ?5, amount = ?6, date = ?7, name = ?8, merchant_name = ?9, \
                     provider_category = ?10, pending = ?11, flow_kind = ?12, suggested_category = ?13 \
                     WHERE transaction_id = ?1",
                    params![
                        command.transaction_id.as_ref(),
                        command.connection_id.as_ref(),
                        command.account_id.as_ref(),
                        command.account_type.map(|t| t.as_str()),
                        command.account_subtype.as_deref(),
                        command.amount.to_string(),
                        date_to_str(command.date)?,
                        command.name.as_ref(),
                        command.merchant_name.as_deref(),
                        command.provider_category.as_deref(),
                        command.pending,
                        command.flow_kind.as_str(),
                        command.suggested_category.as_str(),
                    ],
                )
                .map_err(other)?;
                Ok(UpdateOutcome::Updated)
            }
            None => {
                insert_row(&conn, command)?;
                Ok(UpdateOutcome::Inserted)
            }
        }
    }

    fn delete_transaction(&self, client_id: &str, transaction_id: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM transactions WHERE transaction_id = ?1 AND client_id = ?2",
                params![transaction_id, client_id],
            )
            .map_err(other)?;
        Ok(deleted > 0)
    }

    fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StorageError> {
        let conn = self.lock()?;
        fetch_transaction(&conn, transaction_id)
    }

    fn list_transactions(&self, client_id: &str) -> Result<Vec<Transaction>, StorageError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE client_id = ?1 ORDER BY transaction_id",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(other)?;
        let rows = stmt
            .query_map(params![client_id], TransactionRow::read)
            .map_err(other)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(other)?.decode()?);
        }
        Ok(result)
    }

    fn apply_review(&self, client_id: &str, transaction_id: &str, review: &ReviewCommand) -> Result<Transaction, StorageError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE transactions SET \
                 user_category = COALESCE(?3, user_category), \
                 is_reviewed = COALESCE(?4, is_reviewed), \
                 notes = COALESCE(?5, notes) \
                 WHERE transaction_id = ?1 AND client_id = ?2",
                params![
                    transaction_id,
                    client_id,
                    review.user_category.map(|c| c.as_str()),
                    review.is_reviewed,
                    review.notes.as_deref(),
                ],
            )
            .map_err(other)?;
        if updated == 0 {
            return Err(StorageError::TransactionNotFound(transaction_id.to_string()));
        }
        fetch_transaction(&conn, transaction_id)?
            .ok_or_else(|| StorageError::TransactionNotFound(transaction_id.to_string()))
    }
}

impl ConnectionRegistry for SqliteStorage {
    fn create_connection(&self, command: &CreateConnectionCommand) -> Result<txsync_core::Connection, StorageError> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM connections WHERE id = ?1 OR item_id = ?2",
                params![command.id.as_ref(), command.item_id.as_ref()],
                |row| row.get(0),
            )
            .optional()
            .map_err(other)?;
        if exists.is_some() {
            return Err(StorageError::ConnectionAlreadyExists(command.id.to_string()));
        }

        let created_at = OffsetDateTime::now_utc();
        conn.execute(
            "INSERT INTO connections (id, client_id, item_id, credential, institution_id, \
             institution_name, active, is_test, cursor, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, NULL, ?8)",
            params![
                command.id.as_ref(),
                command.client_id.as_ref(),
                command.item_id.as_ref(),
                command.credential.expose(),
                command.institution.id.as_ref(),
                command.institution.name.as_ref(),
                command.is_test,
                timestamp_to_str(created_at)?,
            ],
        )
        .map_err(other)?;
        tracing::debug!(connection_id = %command.id, client_id = %command.client_id, "Connection registered");

        Ok(txsync_core::Connection {
            id: command.id.clone(),
            client_id: command.client_id.clone(),
            item_id: command.item_id.clone(),
            credential: command.credential.clone(),
            institution: command.institution.clone(),
            active: true,
            is_test: command.is_test,
            cursor: None,
            created_at,
        })
    }

    fn get_connection(&self, connection_id: &str) -> Result<Option<txsync_core::Connection>, StorageError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM connections WHERE id = ?1", CONNECTION_COLUMNS);
        conn.query_row(&sql, params![connection_id], ConnectionRow::read)
            .optional()
            .map_err(other)?
            .map(ConnectionRow::decode)
            .transpose()
    }

    fn list_connections(&self, client_id: &str) -> Result<Vec<txsync_core::Connection>, StorageError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM connections WHERE client_id = ?1 ORDER BY created_at, id",
            CONNECTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(other)?;
        let rows = stmt
            .query_map(params![client_id], ConnectionRow::read)
            .map_err(other)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(other)?.decode()?);
        }
        Ok(result)
    }

    fn list_clients(&self) -> Result<Vec<Arc<str>>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT client_id FROM connections WHERE active = 1 ORDER BY client_id")
            .map_err(other)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(other)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(Arc::from(row.map_err(other)?));
        }
        Ok(result)
    }

    fn find_by_item_id(&self, item_id: &str) -> Result<Option<txsync_core::Connection>, StorageError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM connections WHERE item_id = ?1", CONNECTION_COLUMNS);
        conn.query_row(&sql, params![item_id], ConnectionRow::read)
            .optional()
            .map_err(other)?
            .map(ConnectionRow::decode)
            .transpose()
    }

    fn set_active(&self, connection_id: &str, active: bool) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE connections SET active = ?2 WHERE id = ?1",
                params![connection_id, active],
            )
            .map_err(other)?;
        if updated == 0 {
            return Err(StorageError::ConnectionNotFound(connection_id.to_string()));
        }
        tracing::debug!(connection_id, active, "Connection activation changed");
        Ok(())
    }
}

impl CursorStore for SqliteStorage {
    fn load_cursor(&self, connection_id: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let cursor: Option<Option<String>> = conn
            .query_row(
                "SELECT cursor FROM connections WHERE id = ?1",
                params![connection_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(other)?;
        cursor.ok_or_else(|| StorageError::ConnectionNotFound(connection_id.to_string()))
    }

    fn commit_cursor(&self, connection_id: &str, cursor: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE connections SET cursor = ?2 WHERE id = ?1",
                params![connection_id, cursor],
            )
            .map_err(other)?;
        if updated == 0 {
            return Err(StorageError::ConnectionNotFound(connection_id.to_string()));
        }
        tracing::debug!(connection_id, cursor, "Cursor committed");
        Ok(())
    }
}
