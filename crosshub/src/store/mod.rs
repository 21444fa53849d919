//! Durable, deduplicating storage of cross transactions.
//!
//! Every record is keyed by its cross id, which is unique within a ledger channel. Batch writes run in a single
//! SQLite transaction: they commit as a whole or not at all. The transaction never leaves this module.

mod query;

use std::{fs, path::Path};

use parking_lot::Mutex;
use rusqlite::{
    Connection, OptionalExtension, Row, ToSql, Transaction,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

pub use self::query::{FieldName, Matcher, Value};
use crate::{
    error::StoreError,
    types::{CrossContract, CrossStatus, CrossTx, Timestamp},
};

const DATABASE_FILE: &str = "crosshub.sqlite3";

const COLUMNS: &str =
    "pk, cross_id, tx_id, block_number, timestamp, event_name, payload, contract, status";

/// Mutation applied to a stored record by [CrossTxStore::updates].
pub type Updater = Box<dyn FnOnce(&mut CrossTx) + Send>;

impl ToSql for CrossStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for CrossStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let value = i64::column_result(value)?;
        CrossStatus::from_i64(value).ok_or(FromSqlError::OutOfRange(value))
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_nanos()))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Timestamp::from_nanos(i64::column_result(value)?))
    }
}

/// The decoded contract, stored as JSON.
struct ContractJson(Option<CrossContract>);

impl ToSql for ContractJson {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match &self.0 {
            Some(contract) => {
                let json = serde_json::to_string(contract)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                Ok(ToSqlOutput::from(json))
            }
            None => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

impl FromSql for ContractJson {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(ContractJson(None)),
            value => {
                let contract = serde_json::from_str(value.as_str()?)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Ok(ContractJson(Some(contract)))
            }
        }
    }
}

fn read_row(row: &Row) -> rusqlite::Result<CrossTx> {
    Ok(CrossTx {
        pk: Some(row.get(0)?),
        cross_id: row.get(1)?,
        tx_id: row.get(2)?,
        block_number: row.get(3)?,
        timestamp: row.get(4)?,
        event_name: row.get(5)?,
        payload: row.get(6)?,
        contract: row.get::<_, ContractJson>(7)?.0,
        status: row.get(8)?,
    })
}

pub struct CrossTxStore {
    db: Mutex<Connection>,
    channel: String,
}

impl CrossTxStore {
    /// Opens the store for one ledger channel. With no `data_dir`, the store lives in memory.
    pub fn open(data_dir: Option<&Path>, channel: &str) -> Result<CrossTxStore, StoreError> {
        let connection = match data_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    StoreError::InvalidArgument(format!("cannot create {}: {e}", dir.display()))
                })?;
                let connection = Connection::open(dir.join(DATABASE_FILE))?;
                connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
                connection
            }
            None => Connection::open_in_memory()?,
        };

        connection.trace_v2(
            rusqlite::trace::TraceEventCodes::SQLITE_TRACE_STMT,
            Some(|statement| {
                if let rusqlite::trace::TraceEvent::Stmt(_, statement) = statement {
                    tracing::trace!(statement, "sql executed");
                }
            }),
        );
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::ensure_schema(&connection)?;

        Ok(CrossTxStore {
            db: Mutex::new(connection),
            channel: channel.to_owned(),
        })
    }

    fn ensure_schema(connection: &Connection) -> Result<(), StoreError> {
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS cross_txs (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                cross_id TEXT NOT NULL,
                tx_id TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                event_name TEXT NOT NULL,
                payload BLOB NOT NULL,
                contract TEXT,
                status INTEGER NOT NULL,
                UNIQUE (channel, cross_id)
            );
            CREATE INDEX IF NOT EXISTS idx_cross_txs_status ON cross_txs (channel, status);
            CREATE INDEX IF NOT EXISTS idx_cross_txs_timestamp ON cross_txs (channel, timestamp);
            CREATE TABLE IF NOT EXISTS kv (
                channel TEXT NOT NULL,
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (channel, bucket, key)
            );",
        )?;
        Ok(())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn find(
        db: &Connection,
        channel: &str,
        field: FieldName,
        value: &Value,
    ) -> rusqlite::Result<Option<CrossTx>> {
        db.query_row(
            &format!(
                "SELECT {COLUMNS} FROM cross_txs WHERE channel = ?1 AND {} = ?2 ORDER BY pk LIMIT 1",
                field.column()
            ),
            (channel, value),
            read_row,
        )
        .optional()
    }

    fn write(db: &Transaction, tx: &CrossTx, pk: i64) -> rusqlite::Result<()> {
        db.execute(
            "UPDATE cross_txs SET cross_id = ?1, tx_id = ?2, block_number = ?3, timestamp = ?4, event_name = ?5,
                payload = ?6, contract = ?7, status = ?8
            WHERE pk = ?9",
            (
                &tx.cross_id,
                &tx.tx_id,
                tx.block_number,
                tx.timestamp,
                &tx.event_name,
                &tx.payload,
                ContractJson(tx.contract.clone()),
                tx.status,
                pk,
            ),
        )?;
        Ok(())
    }

    /// Records a batch of cross transactions, deduplicating by cross id.
    ///
    /// A record seen for the first time is stored as [CrossStatus::Prepared]. A finished record for a known cross id
    /// marks the stored record [CrossStatus::Completed] and is otherwise discarded. Any other repeat is ignored. If
    /// any write fails, none of the batch is stored.
    pub fn save(&self, txs: &[CrossTx]) -> Result<(), StoreError> {
        let mut db = self.db.lock();
        let db = db.transaction()?;

        for incoming in txs {
            let cross_id = incoming.cross_id.as_str();
            let existing = Self::find(
                &db,
                &self.channel,
                FieldName::CrossId,
                &Value::from(cross_id),
            )?;

            match existing {
                None => {
                    db.execute(
                        "INSERT INTO cross_txs
                            (channel, cross_id, tx_id, block_number, timestamp, event_name, payload, contract, status)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        (
                            &self.channel,
                            cross_id,
                            &incoming.tx_id,
                            incoming.block_number,
                            incoming.timestamp,
                            &incoming.event_name,
                            &incoming.payload,
                            ContractJson(incoming.contract.clone()),
                            CrossStatus::Prepared,
                        ),
                    )?;
                    info!(cross_id, tx_id = %incoming.tx_id, "new cross transaction");
                }
                Some(existing) if existing.contract.is_none() => {
                    warn!(cross_id, "stored cross transaction has no contract, skipping");
                }
                Some(existing) if incoming.is_finished() => {
                    db.execute(
                        "UPDATE cross_txs SET status = ?1 WHERE pk = ?2",
                        (CrossStatus::Completed, existing.pk),
                    )?;
                    info!(cross_id, "cross transaction completed");
                }
                Some(_) => {
                    warn!(cross_id, "duplicate cross transaction, skipping");
                }
            }
        }

        db.commit()?;
        Ok(())
    }

    /// Applies `updaters[i]` to the record with cross id `ids[i]`, for every `i`, in one transaction.
    pub fn updates(&self, ids: &[String], updaters: Vec<Updater>) -> Result<(), StoreError> {
        if ids.len() != updaters.len() {
            return Err(StoreError::InvalidArgument(format!(
                "invalid update params: {} ids but {} updaters",
                ids.len(),
                updaters.len()
            )));
        }

        let mut db = self.db.lock();
        let db = db.transaction()?;

        for (id, update) in ids.iter().zip(updaters) {
            let mut tx = Self::find(
                &db,
                &self.channel,
                FieldName::CrossId,
                &Value::from(id.as_str()),
            )?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let Some(pk) = tx.pk else {
                return Err(StoreError::NotFound(id.clone()));
            };

            update(&mut tx);
            Self::write(&db, &tx, pk)?;
            debug!(cross_id = %id, "cross transaction updated");
        }

        db.commit()?;
        Ok(())
    }

    /// Looks up the first record, by insertion order, whose `field` equals `value`.
    pub fn one(
        &self,
        field: FieldName,
        value: impl Into<Value>,
    ) -> Result<Option<CrossTx>, StoreError> {
        let db = self.db.lock();
        Ok(Self::find(&db, &self.channel, field, &value.into())?)
    }

    /// Returns the records matching every filter, ordered by `order_by` and then insertion order, all reversed if
    /// `reverse` is set.
    ///
    /// If `page_size` is positive, only page `start_page` (counting from 1) is returned and a `start_page` below 1
    /// returns nothing. Otherwise every matching record is returned.
    pub fn query(
        &self,
        page_size: i64,
        start_page: i64,
        order_by: &[FieldName],
        reverse: bool,
        filters: &[Matcher],
    ) -> Result<Vec<CrossTx>, StoreError> {
        let pagination = if page_size > 0 {
            if start_page < 1 {
                return Ok(Vec::new());
            }
            let Some(offset) = page_size.checked_mul(start_page - 1) else {
                return Ok(Vec::new());
            };
            Some((page_size, offset))
        } else {
            None
        };

        let (mut sql, mut params) = self.select(filters);

        let direction = if reverse { "DESC" } else { "ASC" };
        let order: Vec<String> = order_by
            .iter()
            .chain([FieldName::Pk].iter())
            .map(|field| format!("{} {direction}", field.column()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if let Some((limit, offset)) = pagination {
            params.push(Value::Integer(limit));
            params.push(Value::Integer(offset));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));
        }

        let db = self.db.lock();
        let mut statement = db.prepare(&sql)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(params.iter()), read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Counts the records matching every filter.
    pub fn count(&self, filters: &[Matcher]) -> Result<u64, StoreError> {
        let (select, params) = self.select(filters);
        let sql = format!("SELECT COUNT(*) FROM ({select})");

        let db = self.db.lock();
        let count: u64 =
            db.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count)
    }

    fn select(&self, filters: &[Matcher]) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {COLUMNS} FROM cross_txs WHERE channel = ?1");
        let mut params = vec![Value::from(self.channel.as_str())];
        for filter in filters {
            sql.push_str(" AND (");
            filter.write_sql(&mut sql, &mut params);
            sql.push(')');
        }
        (sql, params)
    }

    /// Stores `value` under `bucket`/`key` in the side storage, replacing any previous value.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_vec(value)?;
        self.db.lock().execute(
            "INSERT OR REPLACE INTO kv (channel, bucket, key, value) VALUES (?1, ?2, ?3, ?4)",
            (&self.channel, bucket, key, value),
        )?;
        Ok(())
    }

    /// Reads a value from the side storage. Failures, including a missing key, are logged and yield `None`.
    pub fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Option<T> {
        let value: Result<Option<Vec<u8>>, rusqlite::Error> = self
            .db
            .lock()
            .query_row(
                "SELECT value FROM kv WHERE channel = ?1 AND bucket = ?2 AND key = ?3",
                (&self.channel, bucket, key),
                |row| row.get(0),
            )
            .optional();

        match value {
            Ok(Some(value)) => match serde_json::from_slice(&value) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(bucket, key, %e, "stored value could not be decoded");
                    None
                }
            },
            Ok(None) => {
                warn!(bucket, key, "no stored value");
                None
            }
            Err(e) => {
                warn!(bucket, key, %e, "failed to read stored value");
                None
            }
        }
    }
}
