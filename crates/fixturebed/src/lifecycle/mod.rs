//! Suite lifecycle: configure, create the schema, build the factory, run each
//! test with cleanliness checks, then drop the schema and release everything.
//!
//! ```text
//! Unconfigured -> Configured -> SchemaCreated -> FactoryBuilt -> Running
//!                     |                              |              |
//!                     +---------> Skipped <----------+        SchemaDropped
//!                                    |                              |
//!                                    +----------> Closed <----------+
//! ```

mod cleanliness;
mod context;
mod report;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::backend::Backend;
use crate::capabilities::DialectCapabilities;
use crate::config::{default_configuration, Configuration};
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::mapping::{CacheStrategy, MappingSet};
use crate::session::SessionFactory;

pub use cleanliness::CleanlinessReport;
pub use context::SuiteContext;
pub use report::{SuiteReport, TestOutcome, TestResult};

/// Whether schema export logs its DDL.
const OUTPUT_DDL: bool = false;

/// A suite of tests sharing one mapping set.
///
/// Every method except [`Fixture::mappings`] has a default.
pub trait Fixture {
    /// Suite name used in logs and reports.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    fn mappings(&self) -> MappingSet;

    /// Strategy applied to every cacheable class and collection; `None`
    /// disables cache settings.
    fn cache_concurrency_strategy(&self) -> Option<CacheStrategy> {
        Some(CacheStrategy::NonstrictReadWrite)
    }

    /// Add the mapping set to the configuration, in order.
    fn add_mappings(&self, cfg: &mut Configuration) -> Result<()> {
        let set = self.mappings();
        for resource in set.resources() {
            cfg.add_resource(resource, set.module())?;
        }
        Ok(())
    }

    /// Adjust the configuration after mappings are added.
    fn configure(&mut self, _cfg: &mut Configuration) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the suite should run against `dialect`.
    fn applies_to_dialect(&self, _dialect: &dyn Dialect) -> bool {
        true
    }

    /// Whether the suite should run with the built factory's settings.
    fn applies_to_factory(&self, _factory: &dyn SessionFactory) -> bool {
        true
    }

    fn on_set_up(&mut self, _ctx: &mut SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_tear_down(&mut self, _ctx: &mut SuiteContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Test body: receives the fixture and the suite context.
pub type TestBody<F> = fn(&mut F, &mut SuiteContext) -> anyhow::Result<()>;

/// Capability a test needs; unmet requirements skip the test.
#[derive(Clone, Copy)]
pub struct Requirement {
    pub description: &'static str,
    pub check: fn(&DialectCapabilities) -> bool,
}

/// A named test of suite `F`.
pub struct TestCase<F> {
    name: &'static str,
    body: TestBody<F>,
    requirement: Option<Requirement>,
}

impl<F> TestCase<F> {
    pub fn new(name: &'static str, body: TestBody<F>) -> Self {
        Self {
            name,
            body,
            requirement: None,
        }
    }

    /// Skip this test unless `check` holds for the suite's capabilities.
    pub fn requires(mut self, description: &'static str, check: fn(&DialectCapabilities) -> bool) -> Self {
        self.requirement = Some(Requirement { description, check });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<F> fmt::Debug for TestCase<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("requirement", &self.requirement.map(|r| r.description))
            .finish()
    }
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    SchemaCreated,
    FactoryBuilt,
    Running,
    Skipped,
    SchemaDropped,
    Closed,
}

/// Outcome of suite setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteStatus {
    Ready,
    Skipped { reason: String },
}

/// Drives one suite through its lifecycle.
pub struct TestLifecycle<F: Fixture> {
    suite: String,
    fixture: F,
    context: SuiteContext,
    state: LifecycleState,
    schema_present: bool,
    skip_reason: Option<String>,
}

impl<F: Fixture> TestLifecycle<F> {
    pub fn new(backend: Arc<dyn Backend>, fixture: F) -> Self {
        Self {
            suite: fixture.name(),
            fixture,
            context: SuiteContext::new(backend),
            state: LifecycleState::Unconfigured,
            schema_present: false,
            skip_reason: None,
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn fixture(&self) -> &F {
        &self.fixture
    }

    pub fn fixture_mut(&mut self) -> &mut F {
        &mut self.fixture
    }

    pub fn context(&self) -> &SuiteContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SuiteContext {
        &mut self.context
    }

    /// Set up, run every test in order, tear down.
    ///
    /// A setup failure aborts the suite with [`HarnessError::SuiteSetup`];
    /// test failures only show up in the report. A failed final schema drop is
    /// logged and the report is still returned.
    pub fn run(&mut self, tests: &[TestCase<F>]) -> Result<SuiteReport> {
        let mut report = SuiteReport::new(self.suite.clone());

        match self.set_up_suite()? {
            SuiteStatus::Skipped { reason } => {
                for test in tests {
                    report.push(
                        test.name,
                        TestOutcome::Skipped {
                            reason: reason.clone(),
                        },
                    );
                }
            }
            SuiteStatus::Ready => {
                for test in tests {
                    let outcome = self.run_test(test);
                    report.push(test.name, outcome);
                }
            }
        }

        if let Err(e) = self.tear_down_suite() {
            error!(suite = %self.suite, "Error while tearing down the suite: {}", e);
        }
        info!(suite = %self.suite, "{}", report.to_string().trim_end());
        Ok(report)
    }

    /// Configure, check applicability, create the schema and build the factory.
    pub fn set_up_suite(&mut self) -> Result<SuiteStatus> {
        if self.state != LifecycleState::Unconfigured {
            return Err(HarnessError::invalid_state(format!(
                "suite {} already set up (state {:?})",
                self.suite, self.state
            )));
        }

        match self.try_set_up() {
            Ok(status) => Ok(status),
            Err(e) => {
                self.context.cleanup();
                self.transition(LifecycleState::Closed);
                error!(suite = %self.suite, "Error while setting up the suite: {}", e);
                Err(HarnessError::SuiteSetup {
                    suite: self.suite.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn try_set_up(&mut self) -> Result<SuiteStatus> {
        self.configure()?;

        let dialect = Arc::clone(self.context.dialect()?);
        if !self.fixture.applies_to_dialect(dialect.as_ref()) {
            return Ok(self.skip(format!("{} does not apply to {}", self.suite, dialect.name())));
        }

        self.create_schema()?;

        if let Err(e) = self.build_session_factory() {
            if let Err(drop_err) = self.drop_schema() {
                warn!(suite = %self.suite, "Failed to drop schema after factory error: {}", drop_err);
            }
            return Err(e);
        }

        let factory = Arc::clone(self.context.factory()?);
        if !self.fixture.applies_to_factory(factory.as_ref()) {
            self.drop_schema()?;
            return Ok(self.skip(format!(
                "{} does not apply with the current session-factory configuration",
                self.suite
            )));
        }

        self.transition(LifecycleState::Running);
        Ok(SuiteStatus::Ready)
    }

    fn configure(&mut self) -> Result<()> {
        let mut cfg = default_configuration(Arc::clone(self.context.backend()))?;

        self.fixture.add_mappings(&mut cfg)?;
        self.fixture.configure(&mut cfg)?;
        if let Some(strategy) = self.fixture.cache_concurrency_strategy() {
            apply_cache_settings(&mut cfg, strategy)?;
        }
        // The configure hook may have switched dialects.
        let dialect = cfg.dialect()?;

        self.context.set_configuration(cfg);
        self.context.set_dialect(dialect);
        self.transition(LifecycleState::Configured);
        Ok(())
    }

    fn create_schema(&mut self) -> Result<()> {
        let exporter = self.context.configuration()?.schema_export()?;
        exporter.create_schema(OUTPUT_DDL, true)?;
        self.schema_present = true;
        self.transition(LifecycleState::SchemaCreated);
        Ok(())
    }

    fn drop_schema(&mut self) -> Result<()> {
        let exporter = self.context.configuration()?.schema_export()?;
        exporter.drop_schema(OUTPUT_DDL, true)?;
        self.schema_present = false;
        Ok(())
    }

    fn build_session_factory(&mut self) -> Result<()> {
        let factory = self.context.configuration()?.build_session_factory()?;
        self.context.set_factory(factory);
        self.transition(LifecycleState::FactoryBuilt);
        Ok(())
    }

    fn skip(&mut self, reason: String) -> SuiteStatus {
        info!(suite = %self.suite, "Skipping suite: {}", reason);
        self.skip_reason = Some(reason.clone());
        self.transition(LifecycleState::Skipped);
        SuiteStatus::Skipped { reason }
    }

    /// Run one test: set up, body, tear down, then the cleanliness checks.
    pub fn run_test(&mut self, test: &TestCase<F>) -> TestOutcome {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Skipped => {
                return TestOutcome::Skipped {
                    reason: self.skip_reason.clone().unwrap_or_default(),
                };
            }
            other => {
                return TestOutcome::Failed {
                    message: format!("suite {} is not running (state {:?})", self.suite, other),
                };
            }
        }

        if let Some(requirement) = test.requirement {
            let met = self
                .context
                .capabilities()
                .map(|caps| (requirement.check)(caps))
                .unwrap_or(false);
            if !met {
                debug!(test = test.name, "Requirement not met: {}", requirement.description);
                return TestOutcome::Skipped {
                    reason: format!("requires {}", requirement.description),
                };
            }
        }

        let span = info_span!("test", suite = %self.suite, test = test.name);
        let _guard = span.enter();

        let mut failures = Vec::new();
        let fixture = &mut self.fixture;
        let context = &mut self.context;

        if let Some(failure) = guarded("set up", || fixture.on_set_up(context)) {
            failures.push(failure);
        } else if let Some(failure) = guarded("test", || (test.body)(fixture, context)) {
            failures.push(failure);
        }
        if let Some(failure) = guarded("tear down", || fixture.on_tear_down(context)) {
            failures.push(failure);
        }

        let cleanliness = cleanliness::verify(&self.context);
        if !cleanliness.is_clean() {
            failures.push(cleanliness.to_string());
        }

        if failures.is_empty() {
            debug!("Test passed");
            TestOutcome::Passed
        } else {
            let message = failures.join("; ");
            warn!("Test failed: {}", message);
            TestOutcome::Failed { message }
        }
    }

    /// Drop the schema if it is present and release suite resources.
    ///
    /// Resources are released even when dropping the schema fails.
    pub fn tear_down_suite(&mut self) -> Result<()> {
        let dropped = if self.schema_present {
            let result = self.drop_schema();
            if result.is_ok() {
                self.transition(LifecycleState::SchemaDropped);
            }
            result
        } else {
            Ok(())
        };

        self.context.cleanup();
        self.transition(LifecycleState::Closed);
        dropped
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(suite = %self.suite, from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }
}

impl<F: Fixture> Drop for TestLifecycle<F> {
    fn drop(&mut self) {
        if matches!(self.state, LifecycleState::Unconfigured | LifecycleState::Closed) {
            return;
        }
        if let Err(e) = self.tear_down_suite() {
            warn!(suite = %self.suite, "Suite teardown on drop failed: {}", e);
        }
    }
}

/// Apply `strategy` to every class without large-binary properties that is
/// not part of an inheritance hierarchy, and to every collection.
pub fn apply_cache_settings(cfg: &mut Configuration, strategy: CacheStrategy) -> Result<()> {
    let eligible: Vec<String> = cfg
        .class_mappings()
        .iter()
        .filter(|class| !class.has_lob() && !cfg.is_inherited(&class.entity))
        .map(|class| class.entity.clone())
        .collect();
    for entity in eligible {
        cfg.set_cache_concurrency_strategy(&entity, strategy)?;
    }

    for role in cfg.collection_roles() {
        cfg.set_collection_cache_concurrency_strategy(&role, strategy)?;
    }
    Ok(())
}

/// Run a hook, turning errors and panics into a failure message.
fn guarded(stage: &str, hook: impl FnOnce() -> anyhow::Result<()>) -> Option<String> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{} failed: {:#}", stage, e)),
        Err(payload) => Some(format!("{} panicked: {}", stage, panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
