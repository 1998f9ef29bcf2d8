//! SQLite connections and the driver provider.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fixturebed::{Connection, ConnectionHandle, ConnectionId, ConnectionProvider, Row, Value};
use rusqlite::types::ValueRef;
use tracing::{debug, debug_span};

use crate::error::{Result, SqliteError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Count of open connections to one database, shared by every provider of a
/// backend.
#[derive(Debug, Default)]
pub struct ConnectionBudget {
    live: AtomicUsize,
}

impl ConnectionBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently open.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Reserve a slot, failing when `limit` connections are already open.
    fn reserve(&self, limit: Option<usize>) -> Result<()> {
        let mut current = self.live.load(Ordering::SeqCst);
        loop {
            if let Some(limit) = limit {
                if current >= limit {
                    return Err(SqliteError::Exhausted {
                        limit,
                        live: current,
                    });
                }
            }
            match self.live.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// One physical SQLite connection.
pub struct SqliteConnection {
    id: ConnectionId,
    conn: Mutex<Option<rusqlite::Connection>>,
    budget: Arc<ConnectionBudget>,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqliteConnection {
    fn open(path: &str, budget: Arc<ConnectionBudget>, limit: Option<usize>) -> Result<Self> {
        budget.reserve(limit)?;
        let opened = rusqlite::Connection::open(path).and_then(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        });
        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                budget.release();
                return Err(e.into());
            }
        };

        let id = ConnectionId::next();
        debug!(connection = %id, path, "Opened SQLite connection");
        Ok(Self {
            id,
            conn: Mutex::new(Some(conn)),
            budget,
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<rusqlite::Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(&self, op: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let slot = self.slot();
        let conn = slot.as_ref().ok_or(SqliteError::Closed(self.id))?;
        op(conn)
    }

    fn execute_on(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<u64> {
        let span = debug_span!("sqlite.exec", op = sql_op_name(sql), duration_ms = tracing::field::Empty);
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = conn.prepare(sql)?;
        let affected = stmt.execute(rusqlite::params_from_iter(to_sqlite_params(params)))?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(affected as u64)
    }

    fn query_on(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let span = debug_span!("sqlite.query", op = sql_op_name(sql), duration_ms = tracing::field::Empty);
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(to_sqlite_params(params)))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_value_ref(row.get_ref(i)?));
            }
            result.push(Row::new(String::new(), columns.clone(), values));
        }

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(result)
    }
}

impl Connection for SqliteConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    fn close(&self) -> fixturebed::Result<()> {
        let taken = self.slot().take();
        let Some(conn) = taken else {
            return Ok(());
        };
        self.budget.release();
        debug!(connection = %self.id, "Closed SQLite connection");
        conn.close()
            .map_err(|(_, e)| SqliteError::from(e).into())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> fixturebed::Result<u64> {
        Ok(self.with_conn(|conn| Self::execute_on(conn, sql, params))?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> fixturebed::Result<Vec<Row>> {
        Ok(self.with_conn(|conn| Self::query_on(conn, sql, params))?)
    }

    fn begin(&self) -> fixturebed::Result<()> {
        Ok(self.with_conn(|conn| Ok(conn.execute_batch("BEGIN")?))?)
    }

    fn commit(&self) -> fixturebed::Result<()> {
        Ok(self.with_conn(|conn| Ok(conn.execute_batch("COMMIT")?))?)
    }

    fn rollback(&self) -> fixturebed::Result<()> {
        Ok(self.with_conn(|conn| Ok(conn.execute_batch("ROLLBACK")?))?)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let slot = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            self.budget.release();
        }
    }
}

/// Plain provider opening a new SQLite connection per request.
pub struct SqliteDriverProvider {
    path: String,
    limit: Option<usize>,
    budget: Arc<ConnectionBudget>,
}

impl SqliteDriverProvider {
    pub fn new(path: impl Into<String>, limit: Option<usize>, budget: Arc<ConnectionBudget>) -> Self {
        Self {
            path: path.into(),
            limit,
            budget,
        }
    }

    pub fn open(&self) -> Result<SqliteConnection> {
        SqliteConnection::open(&self.path, Arc::clone(&self.budget), self.limit)
    }
}

impl ConnectionProvider for SqliteDriverProvider {
    fn connection_string(&self) -> &str {
        &self.path
    }

    fn get_connection(&self) -> fixturebed::Result<ConnectionHandle> {
        Ok(Arc::new(self.open()?))
    }

    fn close_connection(&self, conn: &ConnectionHandle) -> fixturebed::Result<()> {
        conn.close()
    }
}

fn to_sqlite_params(params: &[Value]) -> Vec<rusqlite::types::Value> {
    params
        .iter()
        .map(|p| match p {
            Value::Null => rusqlite::types::Value::Null,
            Value::Integer(v) => rusqlite::types::Value::Integer(*v),
            Value::Real(v) => rusqlite::types::Value::Real(*v),
            Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
            Value::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
            Value::Boolean(v) => rusqlite::types::Value::Integer(i64::from(*v)),
        })
        .collect()
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

fn sql_op_name(sql: &str) -> &'static str {
    let head = sql.trim_start().split_whitespace().next().unwrap_or("");
    match head.to_ascii_uppercase().as_str() {
        "SELECT" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "CREATE" => "CREATE",
        "DROP" => "DROP",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(limit: Option<usize>) -> (tempfile::TempDir, SqliteDriverProvider, Arc<ConnectionBudget>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.db").to_string_lossy().to_string();
        let budget = Arc::new(ConnectionBudget::new());
        let provider = SqliteDriverProvider::new(path, limit, Arc::clone(&budget));
        (dir, provider, budget)
    }

    #[test]
    fn test_execute_and_query_values() {
        let (_dir, provider, _) = provider(None);
        let conn = provider.get_connection().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, ok INTEGER)", &[])
            .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t (name, ok) VALUES (?, ?)",
                &[Value::from("a"), Value::from(true)],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = conn.query("SELECT id, name, ok FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name::<String>("name").unwrap(), "a");
        assert!(rows[0].get_by_name::<bool>("ok").unwrap());
        provider.close_connection(&conn).unwrap();
    }

    #[test]
    fn test_limit_enforced_and_released_on_close() {
        let (_dir, provider, budget) = provider(Some(1));
        let first = provider.get_connection().unwrap();
        assert_eq!(budget.live(), 1);

        let err = provider.get_connection().unwrap_err();
        assert!(err.to_string().contains("Connection limit of 1"), "{err}");

        first.close().unwrap();
        assert_eq!(budget.live(), 0);
        let second = provider.get_connection().unwrap();
        provider.close_connection(&second).unwrap();
    }

    #[test]
    fn test_closed_connection_rejects_work_and_close_is_idempotent() {
        let (_dir, provider, budget) = provider(None);
        let conn = provider.get_connection().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();

        assert!(conn.is_closed());
        assert!(conn.execute("SELECT 1", &[]).is_err());
        assert_eq!(budget.live(), 0);
    }

    #[test]
    fn test_dropping_open_connection_frees_slot() {
        let (_dir, provider, budget) = provider(Some(1));
        drop(provider.get_connection().unwrap());
        assert_eq!(budget.live(), 0);
    }
}
