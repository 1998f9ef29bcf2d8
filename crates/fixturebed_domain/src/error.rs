//! Error types for the order/payment domain.

use fixturebed::HarnessError;
use thiserror::Error;

use crate::model::{OrderKey, PaymentKey};

pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Unknown order {0}")]
    UnknownOrder(OrderKey),

    #[error("Unknown payment {0}")]
    UnknownPayment(PaymentKey),

    /// The order/payment association is inconsistent on one side.
    #[error("Association broken: {0}")]
    Association(String),

    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error("{entity} {id} not found")]
    PaymentNotFound { entity: String, id: i64 },

    #[error("Unknown payment type '{0}'")]
    UnknownPaymentType(String),

    /// Payment referenced before it was saved.
    #[error("Payment {0} has no id yet")]
    UnsavedPayment(PaymentKey),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}
