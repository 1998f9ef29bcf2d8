//! Connection tracking for leak detection.
//!
//! [`ConnectionTracker`] wraps a driver provider and remembers every connection
//! it hands out until that connection is released through
//! [`ConnectionTracker::release`]. Suites use it after each test to check that
//! the test closed everything it opened.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionProvider};
use crate::error::{HarnessError, Result};

/// Provider that keeps a set of all connections it handed out.
pub struct ConnectionTracker {
    inner: Arc<dyn ConnectionProvider>,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionTracker {
    pub fn new(inner: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            inner,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire a connection from the wrapped provider and start tracking it.
    pub fn acquire(&self) -> Result<ConnectionHandle> {
        let conn = self
            .inner
            .get_connection()
            .map_err(|e| HarnessError::ConnectionEstablishment {
                target: self.inner.connection_string().to_string(),
                source: Box::new(e),
            })?;
        debug!(connection = %conn.id(), "Tracking connection");
        self.tracked().insert(conn.id(), Arc::clone(&conn));
        Ok(conn)
    }

    /// Close a connection through the wrapped provider and stop tracking it.
    ///
    /// The handle is removed even when the close fails.
    pub fn release(&self, conn: &ConnectionHandle) -> Result<()> {
        let result = self.inner.close_connection(conn);
        self.tracked().remove(&conn.id());
        result
    }

    /// Whether any tracked connection is still open.
    ///
    /// Connections closed out of band (without going through `release`) are
    /// forgotten here.
    pub fn has_open_connections(&self) -> bool {
        let mut tracked = self.tracked();
        let before = tracked.len();
        tracked.retain(|_, conn| !conn.is_closed());
        if tracked.len() < before {
            debug!(pruned = before - tracked.len(), "Forgot connections closed out of band");
        }
        !tracked.is_empty()
    }

    /// Release every tracked connection. Returns how many were released.
    pub fn close_all(&self) -> usize {
        let budget = self.tracked_count();
        let mut released = 0;

        for _ in 0..budget {
            let next = self.tracked().values().next().cloned();
            let Some(conn) = next else {
                break;
            };
            if let Err(e) = self.release(&conn) {
                warn!(connection = %conn.id(), "Failed to close tracked connection: {}", e);
            }
            released += 1;
        }

        let mut tracked = self.tracked();
        if !tracked.is_empty() {
            warn!(
                remaining = tracked.len(),
                "Connections still tracked after close_all, forgetting them"
            );
            tracked.clear();
        }

        released
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().len()
    }

    pub fn is_tracked(&self, conn: &ConnectionHandle) -> bool {
        self.tracked().contains_key(&conn.id())
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("target", &self.inner.connection_string())
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

impl ConnectionProvider for ConnectionTracker {
    fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    fn get_connection(&self) -> Result<ConnectionHandle> {
        self.acquire()
    }

    fn close_connection(&self, conn: &ConnectionHandle) -> Result<()> {
        self.release(conn)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn tracking(self: Arc<Self>) -> Option<Arc<ConnectionTracker>> {
        Some(self)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FakeProvider;
    use super::*;

    fn tracker() -> (Arc<FakeProvider>, ConnectionTracker) {
        let provider = Arc::new(FakeProvider::default());
        let tracker = ConnectionTracker::new(provider.clone());
        (provider, tracker)
    }

    #[test]
    fn test_empty_tracker_has_no_open_connections() {
        let (_, tracker) = tracker();
        assert!(!tracker.has_open_connections());
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_acquire_tracks_and_release_forgets() {
        let (_, tracker) = tracker();
        let conn = tracker.acquire().unwrap();
        assert!(tracker.is_tracked(&conn));
        assert!(tracker.has_open_connections());

        tracker.release(&conn).unwrap();
        assert!(!tracker.is_tracked(&conn));
        assert!(!tracker.has_open_connections());
    }

    #[test]
    fn test_acquire_failure_wraps_target_and_tracks_nothing() {
        let (provider, tracker) = tracker();
        provider.fail_acquire.store(true, Ordering::SeqCst);

        let err = tracker.acquire().unwrap_err();
        match err {
            HarnessError::ConnectionEstablishment { target, .. } => {
                assert_eq!(target, "fake://memory");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_out_of_band_close_counts_as_closed() {
        let (_, tracker) = tracker();
        let conn = tracker.acquire().unwrap();
        conn.close().unwrap();

        assert!(tracker.is_tracked(&conn));
        assert!(!tracker.has_open_connections());
    }

    #[test]
    fn test_out_of_band_closes_are_pruned() {
        let (_, tracker) = tracker();
        let open = tracker.acquire().unwrap();
        for _ in 0..3 {
            tracker.acquire().unwrap().close().unwrap();
        }
        assert_eq!(tracker.tracked_count(), 4);

        assert!(tracker.has_open_connections());
        assert_eq!(tracker.tracked_count(), 1);
        assert!(tracker.is_tracked(&open));

        tracker.release(&open).unwrap();
        assert!(!tracker.has_open_connections());
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_release_removes_even_when_close_fails() {
        let (provider, tracker) = tracker();
        let conn = tracker.acquire().unwrap();
        provider.fail_close.store(true, Ordering::SeqCst);

        assert!(tracker.release(&conn).is_err());
        assert!(!tracker.is_tracked(&conn));
    }

    #[test]
    fn test_release_of_untracked_handle_is_noop() {
        let (provider, tracker) = tracker();
        let stray = provider.get_connection().unwrap();
        tracker.release(&stray).unwrap();
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_close_all_drains_with_failing_close() {
        let (provider, tracker) = tracker();
        for _ in 0..4 {
            tracker.acquire().unwrap();
        }
        provider.fail_close.store(true, Ordering::SeqCst);

        assert_eq!(tracker.close_all(), 4);
        assert_eq!(tracker.tracked_count(), 0);
        assert!(!tracker.has_open_connections());
        assert_eq!(provider.closes.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_tracker_reports_itself_as_tracking_variant() {
        let (provider, _) = tracker();
        let tracking: Arc<dyn ConnectionProvider> = Arc::new(ConnectionTracker::new(provider.clone()));
        assert!(tracking.tracking().is_some());

        let plain: Arc<dyn ConnectionProvider> = provider;
        assert!(plain.tracking().is_none());
    }
}
