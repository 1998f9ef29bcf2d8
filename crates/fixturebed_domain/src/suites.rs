//! Issue reproduction suites over the order/payment mappings.

use anyhow::{ensure, Context};
use fixturebed::{
    Dialect, Fixture, MappingSet, Session, SuiteContext, TestCase, ANY_ENTITY_QUERY,
};

use crate::model::{Order, OrderBook, Payment, PaymentMethod, CREDIT_CARD_PAYMENT, WIRE_PAYMENT};
use crate::persistence::{load_order, save_book};

/// Run `body` on a fresh session that is closed whatever the outcome.
pub fn with_session<T>(
    ctx: &mut SuiteContext,
    body: impl FnOnce(&dyn Session) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let session = ctx.open_session()?;
    let result = body(session.as_ref());
    let closed = session.close();
    let value = result?;
    closed?;
    Ok(value)
}

fn delete_everything(ctx: &mut SuiteContext) -> anyhow::Result<()> {
    with_session(ctx, |session| {
        session.delete(ANY_ENTITY_QUERY)?;
        Ok(())
    })
}

/// Orders paid through an "any" association with an inverse `orders` set.
///
/// Each test starts with one order paid by a successful credit card payment
/// of 5.
pub struct AnyPaymentSuite {
    dialects: Vec<String>,
    seeded_order: Option<i64>,
}

impl Default for AnyPaymentSuite {
    fn default() -> Self {
        Self::only_for(["MsSql2005Dialect", "SqliteDialect"])
    }
}

impl AnyPaymentSuite {
    /// Restrict the suite to the named dialects.
    pub fn only_for<I, S>(dialects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dialects: dialects.into_iter().map(Into::into).collect(),
            seeded_order: None,
        }
    }

    pub fn tests() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new(
                "payment_type_should_be_correct_with_correct_data",
                Self::payment_type_should_be_correct_with_correct_data,
            ),
            TestCase::new(
                "orders_sharing_a_payment_load_together",
                Self::orders_sharing_a_payment_load_together,
            ),
            TestCase::new(
                "wire_payment_resolves_to_its_own_type",
                Self::wire_payment_resolves_to_its_own_type,
            ),
        ]
    }

    fn seeded_order(&self) -> anyhow::Result<i64> {
        self.seeded_order.context("set up did not seed an order")
    }

    fn payment_type_should_be_correct_with_correct_data(
        &mut self,
        ctx: &mut SuiteContext,
    ) -> anyhow::Result<()> {
        let id = self.seeded_order()?;
        let (book, order) = with_session(ctx, |session| Ok(load_order(session, id)?))?;

        let payment = book
            .payment_of(order)?
            .context("seeded order has no payment")?;
        ensure!(
            payment.entity() == CREDIT_CARD_PAYMENT,
            "expected a credit card payment, got {}",
            payment.entity()
        );
        ensure!(payment.is_successful);
        ensure!(payment.amount == 5, "amount was {}", payment.amount);
        ensure!(payment.orders().contains(&order));
        Ok(())
    }

    fn orders_sharing_a_payment_load_together(
        &mut self,
        ctx: &mut SuiteContext,
    ) -> anyhow::Result<()> {
        let id = self.seeded_order()?;
        let (mut book, order) = with_session(ctx, |session| Ok(load_order(session, id)?))?;
        let payment = book.order(order)?.payment().context("seeded order has no payment")?;

        let second = book.add_order(Order::new());
        book.assign_payment(second, payment)?;
        with_session(ctx, |session| Ok(save_book(session, &mut book)?))?;

        let (reloaded, order) = with_session(ctx, |session| Ok(load_order(session, id)?))?;
        let orders = reloaded
            .payment_of(order)?
            .context("order lost its payment")?
            .orders()
            .len();
        ensure!(orders == 2, "payment lists {} orders", orders);
        reloaded.check_associations()?;
        Ok(())
    }

    fn wire_payment_resolves_to_its_own_type(
        &mut self,
        ctx: &mut SuiteContext,
    ) -> anyhow::Result<()> {
        let mut book = OrderBook::new();
        let order = book.add_order(Order::new());
        let wire = book.add_payment(Payment::wire(12, "NL00BANK0123456789").successful(false));
        book.assign_payment(order, wire)?;
        with_session(ctx, |session| Ok(save_book(session, &mut book)?))?;

        let id = book.order(order)?.id.context("order was not saved")?;
        let (loaded, order) = with_session(ctx, |session| Ok(load_order(session, id)?))?;
        let payment = loaded.payment_of(order)?.context("order lost its payment")?;
        ensure!(
            payment.method
                == PaymentMethod::Wire {
                    bank_account_number: "NL00BANK0123456789".to_string()
                },
            "unexpected payment {:?}",
            payment.method
        );
        ensure!(!payment.is_successful);
        ensure!(payment.orders().len() == 1, "only the wire order pays by wire");
        Ok(())
    }
}

impl Fixture for AnyPaymentSuite {
    fn mappings(&self) -> MappingSet {
        MappingSet::for_issue("any")
    }

    fn applies_to_dialect(&self, dialect: &dyn Dialect) -> bool {
        self.dialects.iter().any(|name| name == dialect.name())
    }

    fn on_set_up(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        let mut book = OrderBook::new();
        let order = book.add_order(Order::new());
        let payment = book.add_payment(Payment::credit_card(5, "1234").successful(true));
        book.assign_payment(order, payment)?;

        with_session(ctx, |session| Ok(save_book(session, &mut book)?))?;
        self.seeded_order = book.order(order)?.id;
        Ok(())
    }

    fn on_tear_down(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        self.seeded_order = None;
        delete_everything(ctx)
    }
}

/// Any-association round trips without inverse collections.
#[derive(Debug, Default)]
pub struct Nh1234Suite;

impl Nh1234Suite {
    pub fn tests() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new(
                "each_payment_type_survives_a_reload",
                Self::each_payment_type_survives_a_reload,
            ),
            TestCase::new(
                "order_without_payment_loads_unpaid",
                Self::order_without_payment_loads_unpaid,
            ),
            TestCase::new(
                "object_query_spans_every_entity",
                Self::object_query_spans_every_entity,
            ),
        ]
    }

    fn each_payment_type_survives_a_reload(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        let mut book = OrderBook::new();
        let by_card = book.add_order(Order::new());
        let by_wire = book.add_order(Order::new());
        let card = book.add_payment(Payment::credit_card(30, "4111111111111111").successful(true));
        let wire = book.add_payment(Payment::wire(45, "DE89370400440532013000"));
        book.assign_payment(by_card, card)?;
        book.assign_payment(by_wire, wire)?;
        with_session(ctx, |session| Ok(save_book(session, &mut book)?))?;

        for (order, expected) in [(by_card, CREDIT_CARD_PAYMENT), (by_wire, WIRE_PAYMENT)] {
            let id = book.order(order)?.id.context("order was not saved")?;
            let (loaded, key) = with_session(ctx, |session| Ok(load_order(session, id)?))?;
            let payment = loaded.payment_of(key)?.context("order lost its payment")?;
            ensure!(payment.entity() == expected, "order {} paid by {}", id, payment.entity());

            let saved = book.payment_of(order)?.context("payment missing from the saved book")?;
            ensure!(payment.method == saved.method, "{:?} != {:?}", payment.method, saved.method);
            ensure!(payment.amount == saved.amount);
            ensure!(payment.is_successful == saved.is_successful);
            ensure!(payment.id == saved.id);
        }
        Ok(())
    }

    fn order_without_payment_loads_unpaid(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        let mut book = OrderBook::new();
        let order = book.add_order(Order::new());
        with_session(ctx, |session| Ok(save_book(session, &mut book)?))?;

        let id = book.order(order)?.id.context("order was not saved")?;
        let (loaded, key) = with_session(ctx, |session| Ok(load_order(session, id)?))?;
        ensure!(loaded.payment_of(key)?.is_none());
        Ok(())
    }

    fn object_query_spans_every_entity(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        let mut book = OrderBook::new();
        let order = book.add_order(Order::new());
        let card = book.add_payment(Payment::credit_card(1, "5500000000000004"));
        book.add_payment(Payment::wire(2, "GB29NWBK60161331926819"));
        book.assign_payment(order, card)?;

        let entities = with_session(ctx, |session| {
            save_book(session, &mut book)?;
            let rows = session.create_query(ANY_ENTITY_QUERY)?;
            Ok(rows.iter().map(|row| row.entity().to_string()).collect::<Vec<_>>())
        })?;
        ensure!(entities.len() == 3, "object query returned {:?}", entities);
        for entity in ["Order", CREDIT_CARD_PAYMENT, WIRE_PAYMENT] {
            ensure!(entities.iter().any(|e| e == entity), "{} missing from {:?}", entity, entities);
        }
        Ok(())
    }
}

impl Fixture for Nh1234Suite {
    fn mappings(&self) -> MappingSet {
        MappingSet::for_issue("nh1234")
    }

    fn on_tear_down(&mut self, ctx: &mut SuiteContext) -> anyhow::Result<()> {
        delete_everything(ctx)
    }
}
