//! Order/payment domain for fixturebed suites
//!
//! Orders pay through a polymorphic "any" association to either a credit card
//! or a wire payment. The crate ships the mapping documents for the `any` and
//! `nh1234` issue suites and the suites themselves.
//!
//! ```rust,ignore
//! let backend = Arc::new(SqliteBackend::temporary(fixturebed_domain::mapping_catalog()?)?);
//! let mut lifecycle = TestLifecycle::new(backend, AnyPaymentSuite::default());
//! let report = lifecycle.run(&AnyPaymentSuite::tests())?;
//! ```

mod error;
mod model;
mod persistence;
mod suites;

use fixturebed::{MappingCatalog, DEFAULT_MAPPINGS_MODULE};

pub use error::{DomainError, Result};
pub use model::{
    Order, OrderBook, OrderKey, Payment, PaymentKey, PaymentMethod, CREDIT_CARD_PAYMENT,
    WIRE_PAYMENT,
};
pub use persistence::{load_order, save_book, ORDER};
pub use suites::{with_session, AnyPaymentSuite, Nh1234Suite};

/// Mapping resources bundled with the crate, by resource name.
pub const MAPPING_RESOURCES: &[(&str, &str)] = &[
    (
        "issues.any.mappings.json",
        include_str!("../mappings/issues.any.mappings.json"),
    ),
    (
        "issues.nh1234.mappings.json",
        include_str!("../mappings/issues.nh1234.mappings.json"),
    ),
];

/// Catalog with every bundled mapping registered under the default module.
pub fn mapping_catalog() -> fixturebed::Result<MappingCatalog> {
    let mut catalog = MappingCatalog::new();
    for (resource, json) in MAPPING_RESOURCES {
        catalog.register_json(DEFAULT_MAPPINGS_MODULE, *resource, json)?;
    }
    Ok(catalog)
}
