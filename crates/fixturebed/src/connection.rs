//! Connection handles and connection-acquisition providers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result;
use crate::tracker::ConnectionTracker;
use crate::value::{Row, Value};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id. Backends call this once per physical connection.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live database connection.
///
/// `close` is the out-of-band path: it closes the underlying resource without
/// telling whichever provider handed the connection out.
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    fn is_closed(&self) -> bool;

    fn close(&self) -> Result<()>;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}

/// Shared handle to a connection. Identity is [`Connection::id`].
pub type ConnectionHandle = Arc<dyn Connection>;

/// Connection-acquisition provider.
pub trait ConnectionProvider: Send + Sync {
    /// Target the provider connects to, used in error messages.
    fn connection_string(&self) -> &str;

    fn get_connection(&self) -> Result<ConnectionHandle>;

    fn close_connection(&self, conn: &ConnectionHandle) -> Result<()>;

    /// Release provider-level resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// The tracker behind this provider, if it is the tracking variant.
    fn tracking(self: Arc<Self>) -> Option<Arc<ConnectionTracker>> {
        None
    }
}

/// Which provider a configuration asks for (`connection.provider`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Plain driver provider; leak detection is disabled.
    Driver,
    /// Driver provider wrapped in a [`ConnectionTracker`].
    Tracking,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "driver" => Some(ProviderKind::Driver),
            "tracking" | "debug" => Some(ProviderKind::Tracking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Driver => "driver",
            ProviderKind::Tracking => "tracking",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap a backend's driver provider according to the configured provider kind.
pub fn provider_from_settings(
    settings: &Settings,
    driver: Arc<dyn ConnectionProvider>,
) -> Result<Arc<dyn ConnectionProvider>> {
    match settings.provider_kind()? {
        ProviderKind::Driver => Ok(driver),
        ProviderKind::Tracking => Ok(Arc::new(ConnectionTracker::new(driver))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("driver"), Some(ProviderKind::Driver));
        assert_eq!(ProviderKind::parse(" Tracking "), Some(ProviderKind::Tracking));
        assert_eq!(ProviderKind::parse("debug"), Some(ProviderKind::Tracking));
        assert_eq!(ProviderKind::parse("pooled"), None);
    }
}
