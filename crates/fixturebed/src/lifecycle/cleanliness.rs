//! Post-test cleanliness checks.
//!
//! Each check detects one kind of leftover, logs it and repairs it so the
//! next test starts clean. Only the verdict is reported back.

use std::fmt;

use tracing::error;

use super::context::SuiteContext;
use crate::error::Result;
use crate::session::{SessionFactory, ANY_ENTITY_QUERY};

/// Verdicts of the three checks run after every test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanlinessReport {
    pub session_closed: bool,
    pub database_cleaned: bool,
    pub connections_closed: bool,
}

impl CleanlinessReport {
    pub fn is_clean(&self) -> bool {
        self.session_closed && self.database_cleaned && self.connections_closed
    }
}

impl fmt::Display for CleanlinessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test didn't clean up after itself. session closed: {} database cleaned: {} connection closed: {}",
            verdict(self.session_closed),
            verdict(self.database_cleaned),
            verdict(self.connections_closed)
        )
    }
}

fn verdict(ok: bool) -> &'static str {
    if ok {
        "True"
    } else {
        "False"
    }
}

/// Run all three checks, in order, each with its recovery.
pub(crate) fn verify(ctx: &SuiteContext) -> CleanlinessReport {
    let session_closed = check_session_was_closed(ctx);
    let database_cleaned = check_database_was_cleaned(ctx);
    let connections_closed = check_connections_were_closed(ctx);
    CleanlinessReport {
        session_closed,
        database_cleaned,
        connections_closed,
    }
}

fn check_session_was_closed(ctx: &SuiteContext) -> bool {
    let Some(session) = ctx.last_opened_session() else {
        return true;
    };
    if !session.is_open() {
        return true;
    }

    error!("Test case didn't close a session, closing");
    if let Err(e) = session.close() {
        error!("Failed to close leaked session: {}", e);
    }
    false
}

fn check_database_was_cleaned(ctx: &SuiteContext) -> bool {
    let Ok(factory) = ctx.factory() else {
        return true;
    };
    // No mappings means nothing to query.
    if factory.mapped_class_count() == 0 {
        return true;
    }

    match count_remaining_rows(factory.as_ref()) {
        Ok(0) => return true,
        Ok(rows) => {
            error!(rows, "Test case didn't clean up the database after itself, re-creating the schema");
        }
        Err(e) => {
            error!("Could not check the database was cleaned, re-creating the schema: {}", e);
        }
    }

    if let Err(e) = recreate_schema(ctx) {
        error!("Failed to re-create the schema: {}", e);
    }
    false
}

fn check_connections_were_closed(ctx: &SuiteContext) -> bool {
    let Some(tracker) = ctx.tracker() else {
        return true;
    };
    if !tracker.has_open_connections() {
        return true;
    }

    error!("Test case didn't close all open connections, closing");
    tracker.close_all();
    false
}

/// Count rows of any mapped entity on a throwaway session.
fn count_remaining_rows(factory: &dyn SessionFactory) -> Result<usize> {
    let session = factory.open_session()?;
    let rows = session.create_query(ANY_ENTITY_QUERY);
    let closed = session.close();
    let rows = rows?;
    closed?;
    Ok(rows.len())
}

fn recreate_schema(ctx: &SuiteContext) -> Result<()> {
    let exporter = ctx.configuration()?.schema_export()?;
    exporter.drop_schema(false, true)?;
    exporter.create_schema(false, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_message_names_each_check() {
        let report = CleanlinessReport {
            session_closed: false,
            database_cleaned: false,
            connections_closed: true,
        };
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "Test didn't clean up after itself. session closed: False database cleaned: False connection closed: True"
        );
    }
}
