//! Test outcomes and suite reports.

use std::fmt;

/// Result of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { message: String },
    Skipped { reason: String },
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped { .. })
    }

    /// Failure message, if the test failed.
    pub fn message(&self) -> Option<&str> {
        match self {
            TestOutcome::Failed { message } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Failed { message } => write!(f, "failed: {}", message),
            TestOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
}

/// Outcomes of every test in a suite, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    suite: String,
    results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, outcome: TestOutcome) {
        self.results.push(TestResult {
            name: name.into(),
            outcome,
        });
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn outcome(&self, test: &str) -> Option<&TestOutcome> {
        self.results
            .iter()
            .find(|r| r.name == test)
            .map(|r| &r.outcome)
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    /// True when nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} passed, {} failed, {} skipped",
            self.suite,
            self.passed(),
            self.failed(),
            self.skipped()
        )?;
        for result in &self.results {
            writeln!(f, "  {} ... {}", result.name, result.outcome)?;
        }
        Ok(())
    }
}
