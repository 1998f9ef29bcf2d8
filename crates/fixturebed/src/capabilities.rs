//! Test-time dialect capabilities.
//!
//! Like a dialect, but for differences that only matter while testing. Every
//! `supports_*` flag defaults to true and every quirk flag defaults to false;
//! backends register overrides for dialects that need them.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use crate::dialect::{Dialect, SqlType};

/// Feature flags consulted by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub has_broken_decimal_type: bool,
    pub ignores_trailing_whitespace: bool,
    /// Whether two transactions can run at the same time. SQLite locks the
    /// database for the first one.
    pub supports_concurrent_transactions: bool,
    pub supports_distributed_transactions: bool,
    pub supports_full_join: bool,
    pub supports_having_without_group_by: bool,
    pub supports_locate: bool,
    pub supports_null_characters_in_utf_strings: bool,
    pub supports_operator_all: bool,
    pub supports_operator_some: bool,
    pub supports_select_for_update_on_outer_join: bool,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            has_broken_decimal_type: false,
            ignores_trailing_whitespace: false,
            supports_concurrent_transactions: true,
            supports_distributed_transactions: true,
            supports_full_join: true,
            supports_having_without_group_by: true,
            supports_locate: true,
            supports_null_characters_in_utf_strings: true,
            supports_operator_all: true,
            supports_operator_some: true,
            supports_select_for_update_on_outer_join: true,
        }
    }
}

/// Capabilities bound to one dialect.
#[derive(Debug, Clone)]
pub struct DialectCapabilities {
    dialect: Arc<dyn Dialect>,
    flags: CapabilityFlags,
}

impl DialectCapabilities {
    /// Generic capabilities with default flags.
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self::with_flags(dialect, CapabilityFlags::default())
    }

    pub fn with_flags(dialect: Arc<dyn Dialect>, flags: CapabilityFlags) -> Self {
        Self { dialect, flags }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn flags(&self) -> &CapabilityFlags {
        &self.flags
    }

    pub fn has_broken_decimal_type(&self) -> bool {
        self.flags.has_broken_decimal_type
    }

    pub fn ignores_trailing_whitespace(&self) -> bool {
        self.flags.ignores_trailing_whitespace
    }

    pub fn supports_concurrent_transactions(&self) -> bool {
        self.flags.supports_concurrent_transactions
    }

    /// Distributed transactions need a coordinator service on the host.
    pub fn supports_distributed_transactions(&self) -> bool {
        self.flags.supports_distributed_transactions
    }

    pub fn supports_full_join(&self) -> bool {
        self.flags.supports_full_join
    }

    pub fn supports_having_without_group_by(&self) -> bool {
        self.flags.supports_having_without_group_by
    }

    pub fn supports_locate(&self) -> bool {
        self.flags.supports_locate
    }

    pub fn supports_null_characters_in_utf_strings(&self) -> bool {
        self.flags.supports_null_characters_in_utf_strings
    }

    pub fn supports_operator_all(&self) -> bool {
        self.flags.supports_operator_all
    }

    pub fn supports_operator_some(&self) -> bool {
        self.flags.supports_operator_some
    }

    pub fn supports_select_for_update_on_outer_join(&self) -> bool {
        self.flags.supports_select_for_update_on_outer_join
    }

    /// Whether the dialect can name `sql_type`.
    ///
    /// This is the one place where a failure is turned into a value: any error
    /// or panic from the dialect means "unsupported".
    pub fn supports_sql_type(&self, sql_type: &SqlType) -> bool {
        let dialect = &self.dialect;
        match panic::catch_unwind(AssertUnwindSafe(|| dialect.type_name(sql_type))) {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(dialect = dialect.name(), %sql_type, "SQL type unsupported: {}", e);
                false
            }
            Err(_) => {
                debug!(dialect = dialect.name(), %sql_type, "SQL type probe panicked");
                false
            }
        }
    }
}

/// Constructor for a specialised capabilities object.
pub type CapabilityConstructor = fn(Arc<dyn Dialect>) -> DialectCapabilities;

/// Registry of capability overrides keyed by dialect identifier.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    constructors: HashMap<String, CapabilityConstructor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dialect_name: impl Into<String>, constructor: CapabilityConstructor) {
        self.constructors.insert(dialect_name.into(), constructor);
    }

    pub fn contains(&self, dialect_name: &str) -> bool {
        self.constructors.contains_key(dialect_name)
    }

    /// Capabilities for `dialect`: the registered override, or the defaults.
    pub fn resolve(&self, dialect: Arc<dyn Dialect>) -> DialectCapabilities {
        match self.constructors.get(dialect.name()) {
            Some(constructor) => constructor(dialect),
            None => DialectCapabilities::new(dialect),
        }
    }
}
