//! Orders and polymorphic payments.
//!
//! An [`OrderBook`] owns both sides of the order/payment association and keeps
//! them consistent: order `o` is in `payment(p).orders()` exactly when
//! `o.payment() == Some(p)`.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{DomainError, Result};

pub const CREDIT_CARD_PAYMENT: &str = "CreditCardPayment";
pub const WIRE_PAYMENT: &str = "WirePayment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey(usize);

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentKey(usize);

impl fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    /// Database id, once saved or loaded.
    pub id: Option<i64>,
    payment: Option<PaymentKey>,
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(id: i64) -> Self {
        Self {
            id: Some(id),
            payment: None,
        }
    }

    pub fn payment(&self) -> Option<PaymentKey> {
        self.payment
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethod {
    CreditCard { card_number: String },
    Wire { bank_account_number: String },
}

impl PaymentMethod {
    /// Mapped entity name of the concrete payment type.
    pub fn entity(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard { .. } => CREDIT_CARD_PAYMENT,
            PaymentMethod::Wire { .. } => WIRE_PAYMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Option<i64>,
    pub amount: i32,
    pub is_successful: bool,
    pub method: PaymentMethod,
    orders: BTreeSet<OrderKey>,
}

impl Payment {
    pub fn new(amount: i32, method: PaymentMethod) -> Self {
        Self {
            id: None,
            amount,
            is_successful: false,
            method,
            orders: BTreeSet::new(),
        }
    }

    pub fn credit_card(amount: i32, card_number: impl Into<String>) -> Self {
        Self::new(
            amount,
            PaymentMethod::CreditCard {
                card_number: card_number.into(),
            },
        )
    }

    pub fn wire(amount: i32, bank_account_number: impl Into<String>) -> Self {
        Self::new(
            amount,
            PaymentMethod::Wire {
                bank_account_number: bank_account_number.into(),
            },
        )
    }

    pub fn successful(mut self, is_successful: bool) -> Self {
        self.is_successful = is_successful;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn entity(&self) -> &'static str {
        self.method.entity()
    }

    /// Orders paid with this payment.
    pub fn orders(&self) -> &BTreeSet<OrderKey> {
        &self.orders
    }
}

/// Owning aggregate for orders and payments.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: Vec<Order>,
    payments: Vec<Payment>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an order. Any payment key it carries is discarded; use
    /// [`assign_payment`](Self::assign_payment).
    pub fn add_order(&mut self, mut order: Order) -> OrderKey {
        order.payment = None;
        self.orders.push(order);
        OrderKey(self.orders.len() - 1)
    }

    pub fn add_payment(&mut self, mut payment: Payment) -> PaymentKey {
        payment.orders.clear();
        self.payments.push(payment);
        PaymentKey(self.payments.len() - 1)
    }

    pub fn order(&self, key: OrderKey) -> Result<&Order> {
        self.orders.get(key.0).ok_or(DomainError::UnknownOrder(key))
    }

    pub fn payment(&self, key: PaymentKey) -> Result<&Payment> {
        self.payments
            .get(key.0)
            .ok_or(DomainError::UnknownPayment(key))
    }

    pub(crate) fn order_mut(&mut self, key: OrderKey) -> Result<&mut Order> {
        self.orders.get_mut(key.0).ok_or(DomainError::UnknownOrder(key))
    }

    pub(crate) fn payment_mut(&mut self, key: PaymentKey) -> Result<&mut Payment> {
        self.payments
            .get_mut(key.0)
            .ok_or(DomainError::UnknownPayment(key))
    }

    pub fn order_keys(&self) -> impl Iterator<Item = OrderKey> {
        (0..self.orders.len()).map(OrderKey)
    }

    pub fn payment_keys(&self) -> impl Iterator<Item = PaymentKey> {
        (0..self.payments.len()).map(PaymentKey)
    }

    /// The payment of `order`, if it has one.
    pub fn payment_of(&self, order: OrderKey) -> Result<Option<&Payment>> {
        match self.order(order)?.payment {
            Some(key) => self.payment(key).map(Some),
            None => Ok(None),
        }
    }

    /// Pay `order` with `payment`, moving it off its previous payment.
    pub fn assign_payment(&mut self, order: OrderKey, payment: PaymentKey) -> Result<()> {
        self.payment(payment)?;
        let previous = self.order(order)?.payment;
        if previous == Some(payment) {
            return Ok(());
        }

        if let Some(previous) = previous {
            self.payment_mut(previous)?.orders.remove(&order);
        }
        self.order_mut(order)?.payment = Some(payment);
        self.payment_mut(payment)?.orders.insert(order);
        Ok(())
    }

    /// Detach `order` from its payment, returning the payment it had.
    pub fn clear_payment(&mut self, order: OrderKey) -> Result<Option<PaymentKey>> {
        let previous = self.order_mut(order)?.payment.take();
        if let Some(previous) = previous {
            self.payment_mut(previous)?.orders.remove(&order);
        }
        Ok(previous)
    }

    /// Verify both sides of every association agree.
    pub fn check_associations(&self) -> Result<()> {
        for order in self.order_keys() {
            if let Some(payment) = self.order(order)?.payment {
                if !self.payment(payment)?.orders.contains(&order) {
                    return Err(DomainError::Association(format!(
                        "{} references {} but is missing from its orders",
                        order, payment
                    )));
                }
            }
        }
        for payment in self.payment_keys() {
            for &order in &self.payment(payment)?.orders {
                if self.order(order)?.payment != Some(payment) {
                    return Err(DomainError::Association(format!(
                        "{} lists {} which is paid otherwise",
                        payment, order
                    )));
                }
            }
        }
        Ok(())
    }
}
