//! Ad-hoc statement execution with scoped resource release.
//!
//! Each resource is held by a guard whose `Drop` releases it, so the
//! transaction, the connection and the provider are released on every exit
//! path, in that order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionProvider};
use crate::error::{HarnessError, Result};
use crate::session::Session;

/// Closes the provider when dropped.
struct ProviderScope {
    provider: Arc<dyn ConnectionProvider>,
}

impl Drop for ProviderScope {
    fn drop(&mut self) {
        if let Err(e) = self.provider.close() {
            warn!("Failed to close statement provider: {}", e);
        }
    }
}

/// Returns the connection to its provider when dropped.
struct ConnectionLease<'a> {
    provider: &'a dyn ConnectionProvider,
    conn: ConnectionHandle,
}

impl<'a> ConnectionLease<'a> {
    fn acquire(provider: &'a dyn ConnectionProvider) -> Result<Self> {
        let conn = provider.get_connection()?;
        Ok(Self { provider, conn })
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.provider.close_connection(&self.conn) {
            warn!(connection = %self.conn.id(), "Failed to release statement connection: {}", e);
        }
    }
}

/// Rolls back unless committed.
struct ScopedTransaction<'a> {
    conn: &'a ConnectionHandle,
    committed: bool,
}

impl<'a> ScopedTransaction<'a> {
    fn begin(conn: &'a ConnectionHandle) -> Result<Self> {
        conn.begin()?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    fn commit(mut self) -> Result<()> {
        self.conn.commit()?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.conn.rollback() {
                warn!(connection = %self.conn.id(), "Rollback failed: {}", e);
            }
        }
    }
}

/// Run `sql` in its own transaction on a connection from `provider`.
///
/// The provider is owned by this call and closed before returning. Returns
/// the number of affected rows.
pub fn execute_statement(provider: Arc<dyn ConnectionProvider>, sql: &str) -> Result<u64> {
    let scope = ProviderScope { provider };
    let lease = ConnectionLease::acquire(scope.provider.as_ref())?;
    let tx = ScopedTransaction::begin(&lease.conn)?;

    let affected = lease
        .conn
        .execute(sql, &[])
        .map_err(|e| statement_error(sql, e))?;
    tx.commit()?;

    debug!(affected, "Executed ad-hoc statement");
    Ok(affected)
}

/// Run `sql` on the live connection of `session`, inside whatever transaction
/// the session has open.
pub fn execute_in_session(session: &dyn Session, sql: &str) -> Result<u64> {
    let conn = session.connection()?;
    conn.execute(sql, &[]).map_err(|e| statement_error(sql, e))
}

fn statement_error(sql: &str, source: HarnessError) -> HarnessError {
    HarnessError::StatementExecution {
        sql: sql.to_string(),
        source: Box::new(source),
    }
}
