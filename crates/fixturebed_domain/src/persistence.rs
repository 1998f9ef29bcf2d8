//! Saving and loading an [`OrderBook`] through a [`Session`].
//!
//! Orders reference their payment through an "any" association: the
//! `payment_type` column names the concrete payment entity and `payment_id`
//! holds its id.

use fixturebed::{Record, Row, Session, Value};
use tracing::debug;

use crate::error::{DomainError, Result};
use crate::model::{
    Order, OrderBook, OrderKey, Payment, PaymentMethod, CREDIT_CARD_PAYMENT, WIRE_PAYMENT,
};

pub const ORDER: &str = "Order";

const PAYMENT_TYPE: &str = "payment_type";
const PAYMENT_ID: &str = "payment_id";

/// Insert every unsaved payment, then every unsaved order, assigning ids.
pub fn save_book(session: &dyn Session, book: &mut OrderBook) -> Result<()> {
    let payments: Vec<_> = book.payment_keys().collect();
    for key in payments {
        let payment = book.payment(key)?;
        if payment.id.is_some() {
            continue;
        }
        let entity = payment.entity();
        let id = session.save(entity, payment_record(payment))?;
        debug!(entity, id, "Saved payment");
        book.payment_mut(key)?.id = Some(id);
    }

    let orders: Vec<_> = book.order_keys().collect();
    for key in orders {
        if book.order(key)?.id.is_some() {
            continue;
        }
        let mut record = Record::new();
        if let Some(payment_key) = book.order(key)?.payment() {
            let payment = book.payment(payment_key)?;
            let payment_id = payment.id.ok_or(DomainError::UnsavedPayment(payment_key))?;
            record.set(PAYMENT_TYPE, payment.entity());
            record.set(PAYMENT_ID, payment_id);
        }
        let id = session.save(ORDER, record)?;
        debug!(id, "Saved order");
        book.order_mut(key)?.id = Some(id);
    }
    Ok(())
}

/// Load order `id` with its concrete payment and every order sharing it.
pub fn load_order(session: &dyn Session, id: i64) -> Result<(OrderBook, OrderKey)> {
    let row = session.get(ORDER, id)?.ok_or(DomainError::OrderNotFound(id))?;
    let mut book = OrderBook::new();
    let order = book.add_order(Order::persisted(id));

    let payment_type: Option<String> = row.get_by_name(PAYMENT_TYPE)?;
    let payment_id: Option<i64> = row.get_by_name(PAYMENT_ID)?;
    let (Some(entity), Some(payment_id)) = (payment_type, payment_id) else {
        return Ok((book, order));
    };

    let payment_row = session
        .get(&entity, payment_id)?
        .ok_or_else(|| DomainError::PaymentNotFound {
            entity: entity.clone(),
            id: payment_id,
        })?;
    let payment = book.add_payment(payment_from_row(&entity, &payment_row)?);
    book.assign_payment(order, payment)?;

    let criteria = [
        (PAYMENT_TYPE, Value::from(entity.as_str())),
        (PAYMENT_ID, Value::from(payment_id)),
    ];
    for other in session.find(ORDER, &criteria)? {
        let other_id: i64 = other.get_by_name("id")?;
        if other_id != id {
            let key = book.add_order(Order::persisted(other_id));
            book.assign_payment(key, payment)?;
        }
    }
    Ok((book, order))
}

fn payment_record(payment: &Payment) -> Record {
    let record = Record::new()
        .with("amount", payment.amount)
        .with("is_successful", payment.is_successful);
    match &payment.method {
        PaymentMethod::CreditCard { card_number } => record.with("card_number", card_number.as_str()),
        PaymentMethod::Wire {
            bank_account_number,
        } => record.with("bank_account_number", bank_account_number.as_str()),
    }
}

fn payment_from_row(entity: &str, row: &Row) -> Result<Payment> {
    let amount: i32 = row.get_by_name("amount")?;
    let method = match entity {
        CREDIT_CARD_PAYMENT => PaymentMethod::CreditCard {
            card_number: row.get_by_name("card_number")?,
        },
        WIRE_PAYMENT => PaymentMethod::Wire {
            bank_account_number: row.get_by_name("bank_account_number")?,
        },
        other => return Err(DomainError::UnknownPaymentType(other.to_string())),
    };
    let id: i64 = row.get_by_name("id")?;
    Ok(Payment::new(amount, method)
        .successful(row.get_by_name("is_successful")?)
        .with_id(id))
}
