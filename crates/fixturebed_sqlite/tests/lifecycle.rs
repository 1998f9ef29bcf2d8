//! End-to-end suite lifecycle tests on the SQLite backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Context};
use fixturebed::{
    default_configuration, execute_statement, keys, Configuration, Dialect, Fixture, HarnessError,
    Interceptor, LifecycleState, MappingCatalog, MappingSet, Record, SessionFactory, SuiteContext,
    TestCase, TestLifecycle, Value,
};
use fixturebed_sqlite::SqliteBackend;

const MODULE: &str = "fixturebed_sqlite_tests";
const WIDGETS: &str = r#"{
    "classes": [
        {
            "entity": "Widget",
            "table": "widgets",
            "properties": [
                { "name": "name", "type": "string" },
                { "name": "weight", "type": "int32" }
            ]
        }
    ]
}"#;

const XML_NOTES: &str = r#"{
    "classes": [
        {
            "entity": "Note",
            "table": "notes",
            "properties": [ { "name": "body", "type": "xml" } ]
        }
    ]
}"#;
const DANGLING_COLLECTION: &str = r#"{
    "classes": [
        {
            "entity": "Crate",
            "table": "crates",
            "properties": [ { "name": "label", "type": "string" } ],
            "collections": [ { "name": "items", "entity": "Item", "key": "crate_id" } ]
        }
    ]
}"#;

fn catalog() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    catalog.register_json(MODULE, "widgets.json", WIDGETS).unwrap();
    catalog.register_json(MODULE, "xml_notes.json", XML_NOTES).unwrap();
    catalog
        .register_json(MODULE, "dangling_collection.json", DANGLING_COLLECTION)
        .unwrap();
    catalog
}

fn backend() -> Arc<SqliteBackend> {
    let _ = fixturebed_logging::initialize_diagnostics();
    Arc::new(SqliteBackend::temporary(catalog()).unwrap())
}

fn table_names(backend: &SqliteBackend) -> Vec<String> {
    let conn = rusqlite::Connection::open(backend.database_path()).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite%'")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    names
}

#[derive(Default)]
struct WidgetSuite {
    only_dialect: Option<&'static str>,
    switch_dialect: Option<&'static str>,
    classic_translator: bool,
    require_classic: bool,
}

impl Fixture for WidgetSuite {
    fn mappings(&self) -> MappingSet {
        MappingSet::new(MODULE, ["widgets.json"])
    }

    fn configure(&mut self, cfg: &mut Configuration) -> anyhow::Result<()> {
        if self.classic_translator {
            cfg.set_property(keys::QUERY_TRANSLATOR, "classic");
        }
        if let Some(dialect) = self.switch_dialect {
            cfg.set_property(keys::DIALECT, dialect);
        }
        Ok(())
    }

    fn applies_to_dialect(&self, dialect: &dyn Dialect) -> bool {
        self.only_dialect.map_or(true, |name| dialect.name() == name)
    }

    fn applies_to_factory(&self, factory: &dyn SessionFactory) -> bool {
        !self.require_classic || factory.settings().get(keys::QUERY_TRANSLATOR) == Some("classic")
    }
}

fn must_not_run(_: &mut WidgetSuite, _: &mut SuiteContext) -> anyhow::Result<()> {
    panic!("test body ran in a skipped suite");
}

fn saves_and_cleans_up(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    let id = session.save("Widget", Record::new().with("name", "gear").with("weight", 7))?;

    let row = session.get("Widget", id)?.context("saved widget not found")?;
    ensure!(row.entity() == "Widget");
    ensure!(row.get_by_name::<String>("name")? == "gear");
    ensure!(session.find("Widget", &[("weight", Value::from(7))])?.len() == 1);
    ensure!(session.delete("from Widget")? == 1);

    session.close()?;
    Ok(())
}

fn leaves_session_and_row(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    session.save("Widget", Record::new().with("name", "left behind"))?;
    Ok(())
}

fn leaves_row(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    session.save("Widget", Record::new().with("name", "left behind"))?;
    session.close()?;
    Ok(())
}

fn starts_from_clean_schema(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    let rows = session.create_query("from object");
    session.close()?;
    ensure!(rows?.is_empty(), "rows left over from the previous test");
    Ok(())
}

fn leaks_two_connections(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    let provider = ctx.factory()?.connection_provider();
    let _first = provider.get_connection()?;
    let _second = provider.get_connection()?;
    session.close()?;
    Ok(())
}

fn no_tracked_connections(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let tracker = ctx.tracker().context("tracking provider expected")?;
    ensure!(tracker.tracked_count() == 0, "tracker still holds connections");
    ensure!(!tracker.has_open_connections());
    Ok(())
}

fn asserts_and_panics(_: &mut WidgetSuite, _: &mut SuiteContext) -> anyhow::Result<()> {
    let produced: Vec<i64> = Vec::new();
    assert!(!produced.is_empty(), "no widgets were produced");
    Ok(())
}

fn swaps_table_for_view(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    ctx.execute_statement("DROP TABLE widgets")?;
    ctx.execute_statement(
        "CREATE VIEW widgets AS SELECT 1 AS id, 'none' AS name, 0 AS weight WHERE 0",
    )?;
    Ok(())
}

fn uses_classic_translator(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    ensure!(ctx.is_classic_translator());
    ensure!(!ctx.is_ast_translator());
    Ok(())
}

#[derive(Default)]
struct CountingInterceptor {
    saves: AtomicU64,
    deleted: AtomicU64,
}

impl Interceptor for CountingInterceptor {
    fn on_save(&self, _entity: &str, record: &mut Record) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        record.set("weight", 1);
    }

    fn on_delete(&self, _entity: &str, rows: u64) {
        self.deleted.fetch_add(rows, Ordering::SeqCst);
    }
}

fn interceptor_sees_writes(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let interceptor = Arc::new(CountingInterceptor::default());
    let session = ctx.open_session_with(interceptor.clone())?;
    let id = session.save("Widget", Record::new().with("name", "cog"))?;
    let weight = session
        .get("Widget", id)?
        .context("saved widget not found")?
        .get_by_name::<i32>("weight")?;
    session.delete("from object")?;
    session.close()?;

    ensure!(weight == 1, "interceptor did not rewrite the record");
    ensure!(interceptor.saves.load(Ordering::SeqCst) == 1);
    ensure!(interceptor.deleted.load(Ordering::SeqCst) == 1);
    Ok(())
}

fn statement_in_session(_: &mut WidgetSuite, ctx: &mut SuiteContext) -> anyhow::Result<()> {
    let session = ctx.open_session()?;
    ctx.execute_in_session(session.as_ref(), "INSERT INTO widgets (name) VALUES ('raw')")?;
    let found = session.find("Widget", &[("name", Value::from("raw"))])?.len();
    ctx.execute_statement("DELETE FROM widgets")?;
    session.close()?;
    ensure!(found == 1);
    Ok(())
}

#[test]
fn test_dialect_gate_skips_whole_suite() {
    let backend = backend();
    let suite = WidgetSuite {
        only_dialect: Some("MsSql2005Dialect"),
        ..WidgetSuite::default()
    };
    let tests = vec![
        TestCase::new("first", must_not_run),
        TestCase::new("second", must_not_run),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), suite);
    let report = lifecycle.run(&tests).unwrap();

    assert_eq!(report.skipped(), 2, "{report}");
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.context().factory().is_err());
    assert!(table_names(&backend).is_empty(), "schema must not be created");
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_clean_suite_passes_and_drops_schema() {
    let backend = backend();
    let tests = vec![
        TestCase::new("saves_and_cleans_up", saves_and_cleans_up),
        TestCase::new("interceptor_sees_writes", interceptor_sees_writes),
        TestCase::new("statement_in_session", statement_in_session),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), WidgetSuite::default());
    assert_eq!(lifecycle.suite(), "WidgetSuite");
    let report = lifecycle.run(&tests).unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 3);
    assert!(table_names(&backend).is_empty(), "schema must be dropped");
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_leaked_session_and_row_fail_test_and_heal() {
    let backend = backend();
    let tests = vec![
        TestCase::new("leaves_session_and_row", leaves_session_and_row),
        TestCase::new("starts_from_clean_schema", starts_from_clean_schema),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), WidgetSuite::default());
    let report = lifecycle.run(&tests).unwrap();

    let message = report
        .outcome("leaves_session_and_row")
        .and_then(|o| o.message())
        .unwrap_or_else(|| panic!("expected failure: {report}"));
    assert!(message.contains("Test didn't clean up after itself"), "{message}");
    assert!(message.contains("session closed: False"), "{message}");
    assert!(message.contains("database cleaned: False"), "{message}");
    assert!(message.contains("connection closed: True"), "{message}");
    assert!(report.outcome("starts_from_clean_schema").unwrap().is_passed(), "{report}");
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_leftover_rows_trigger_schema_rebuild() {
    let backend = backend();
    let tests = vec![
        TestCase::new("leaves_row", leaves_row),
        TestCase::new("starts_from_clean_schema", starts_from_clean_schema),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), WidgetSuite::default());
    let report = lifecycle.run(&tests).unwrap();

    assert_eq!(
        report.outcome("leaves_row").and_then(|o| o.message()),
        Some("Test didn't clean up after itself. session closed: True database cleaned: False connection closed: True")
    );
    assert!(report.outcome("starts_from_clean_schema").unwrap().is_passed(), "{report}");
}

#[test]
fn test_leaked_connections_are_force_closed() {
    let backend = backend();
    let tests = vec![
        TestCase::new("leaks_two_connections", leaks_two_connections),
        TestCase::new("no_tracked_connections", no_tracked_connections),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), WidgetSuite::default());
    lifecycle.set_up_suite().unwrap();

    let leaked = lifecycle.run_test(&tests[0]);
    let message = leaked.message().unwrap_or_default().to_string();
    assert!(message.contains("connection closed: False"), "{leaked}");
    assert!(message.contains("session closed: True"), "{leaked}");
    assert_eq!(backend.live_connections(), 0, "close_all must release both connections");

    assert!(lifecycle.run_test(&tests[1]).is_passed());
    lifecycle.tear_down_suite().unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
}

#[test]
fn test_failed_statement_releases_its_connection() {
    let backend = Arc::new(
        SqliteBackend::temporary(catalog())
            .unwrap()
            .with_property(keys::MAX_CONNECTIONS, "1"),
    );
    let cfg = default_configuration(backend.clone()).unwrap();

    execute_statement(
        cfg.new_connection_provider().unwrap(),
        "CREATE TABLE gauges (reading INTEGER UNIQUE)",
    )
    .unwrap();

    for _ in 0..3 {
        let err = execute_statement(
            cfg.new_connection_provider().unwrap(),
            "INSERT INTO gauges (reading) VALUES (1), (1)",
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::StatementExecution { .. }), "{err}");
        assert_eq!(backend.live_connections(), 0);
    }

    let provider = cfg.new_connection_provider().unwrap();
    let conn = provider.get_connection().expect("connection slot must be free");
    let count = conn.query("SELECT count(*) FROM gauges", &[]).unwrap()[0]
        .get::<i64>(0)
        .unwrap();
    assert_eq!(count, 0, "partial insert must be rolled back");
    provider.close_connection(&conn).unwrap();
}

#[test]
fn test_connection_limit_surfaces_as_establishment_error() {
    let backend = Arc::new(
        SqliteBackend::temporary(catalog())
            .unwrap()
            .with_property(keys::MAX_CONNECTIONS, "1"),
    );
    let provider = default_configuration(backend.clone())
        .unwrap()
        .new_connection_provider()
        .unwrap();

    let held = provider.get_connection().unwrap();
    let err = provider.get_connection().unwrap_err();
    assert!(matches!(err, HarnessError::ConnectionEstablishment { .. }), "{err}");
    assert!(err.to_string().starts_with("Could not open connection to: "));

    provider.close_connection(&held).unwrap();
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_panicking_test_fails_without_aborting_suite() {
    let backend = backend();
    let tests = vec![
        TestCase::new("asserts_and_panics", asserts_and_panics),
        TestCase::new("saves_and_cleans_up", saves_and_cleans_up),
    ];

    let mut lifecycle = TestLifecycle::new(backend, WidgetSuite::default());
    let report = lifecycle.run(&tests).unwrap();

    let message = report.outcome("asserts_and_panics").and_then(|o| o.message()).unwrap();
    assert!(message.contains("test panicked: no widgets were produced"), "{message}");
    assert!(report.outcome("saves_and_cleans_up").unwrap().is_passed(), "{report}");
}

#[test]
fn test_unmet_capability_requirement_skips_test() {
    let backend = backend();
    let tests = vec![TestCase::new("needs_full_join", must_not_run)
        .requires("full join support", |caps| caps.supports_full_join())];

    let mut lifecycle = TestLifecycle::new(backend, WidgetSuite::default());
    let report = lifecycle.run(&tests).unwrap();

    assert!(report.outcome("needs_full_join").unwrap().is_skipped(), "{report}");
}

#[test]
fn test_factory_gate_skips_and_drops_schema() {
    let backend = backend();
    let suite = WidgetSuite {
        require_classic: true,
        ..WidgetSuite::default()
    };

    let mut lifecycle = TestLifecycle::new(backend.clone(), suite);
    let report = lifecycle
        .run(&[TestCase::new("must_not_run", must_not_run)])
        .unwrap();

    assert_eq!(report.skipped(), 1, "{report}");
    assert!(table_names(&backend).is_empty());
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_configure_hook_reaches_factory_settings() {
    let backend = backend();
    let suite = WidgetSuite {
        classic_translator: true,
        require_classic: true,
        ..WidgetSuite::default()
    };

    let mut lifecycle = TestLifecycle::new(backend, suite);
    let report = lifecycle
        .run(&[TestCase::new("uses_classic_translator", uses_classic_translator)])
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 1);
}

struct MissingMappings;

impl Fixture for MissingMappings {
    fn mappings(&self) -> MappingSet {
        MappingSet::for_issue("does-not-exist")
    }
}

#[test]
fn test_setup_failure_is_fatal_and_releases_resources() {
    let backend = backend();
    let mut lifecycle = TestLifecycle::new(backend.clone(), MissingMappings);

    let err = lifecycle.run(&[]).unwrap_err();
    match &err {
        HarnessError::SuiteSetup { suite, source } => {
            assert_eq!(suite, "MissingMappings");
            assert!(matches!(**source, HarnessError::MappingNotFound { .. }), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.context().configuration().is_err());
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_set_up_twice_is_rejected() {
    let backend = backend();
    let mut lifecycle = TestLifecycle::new(backend, WidgetSuite::default());
    lifecycle.set_up_suite().unwrap();
    assert!(matches!(
        lifecycle.set_up_suite(),
        Err(HarnessError::InvalidState(_))
    ));
    lifecycle.tear_down_suite().unwrap();
}

#[test]
fn test_dialect_is_resolved_after_configure_hook() {
    let _ = fixturebed_logging::initialize_diagnostics();
    let backend = Arc::new(
        SqliteBackend::temporary(catalog())
            .unwrap()
            .with_property(keys::DIALECT, "MsSql2005Dialect"),
    );
    let suite = WidgetSuite {
        only_dialect: Some("SqliteDialect"),
        switch_dialect: Some("SqliteDialect"),
        ..WidgetSuite::default()
    };

    let mut lifecycle = TestLifecycle::new(backend.clone(), suite);
    let report = lifecycle
        .run(&[TestCase::new("saves_and_cleans_up", saves_and_cleans_up)])
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 1);
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_unavailable_dialect_from_hook_fails_setup() {
    let backend = backend();
    let suite = WidgetSuite {
        only_dialect: Some("SqliteDialect"),
        switch_dialect: Some("MsSql2005Dialect"),
        ..WidgetSuite::default()
    };

    let mut lifecycle = TestLifecycle::new(backend.clone(), suite);
    let err = lifecycle.set_up_suite().unwrap_err();

    match &err {
        HarnessError::SuiteSetup { source, .. } => {
            assert!(matches!(**source, HarnessError::Dialect(_)), "{source}");
            assert!(source.to_string().contains("MsSql2005Dialect"), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(table_names(&backend).is_empty());
}

struct XmlNotes;

impl Fixture for XmlNotes {
    fn mappings(&self) -> MappingSet {
        MappingSet::new(MODULE, ["xml_notes.json"])
    }
}

#[test]
fn test_schema_creation_failure_is_fatal_and_releases_resources() {
    let backend = backend();
    let mut lifecycle = TestLifecycle::new(backend.clone(), XmlNotes);

    let err = lifecycle.run(&[]).unwrap_err();

    match &err {
        HarnessError::SuiteSetup { suite, source } => {
            assert_eq!(suite, "XmlNotes");
            assert!(matches!(**source, HarnessError::Schema(_)), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.context().configuration().is_err());
    assert!(table_names(&backend).is_empty());
    assert_eq!(backend.live_connections(), 0);
}

struct DanglingCollection;

impl Fixture for DanglingCollection {
    fn mappings(&self) -> MappingSet {
        MappingSet::new(MODULE, ["dangling_collection.json"])
    }
}

#[test]
fn test_factory_failure_drops_schema_and_releases_resources() {
    let backend = backend();
    let mut lifecycle = TestLifecycle::new(backend.clone(), DanglingCollection);

    let err = lifecycle.run(&[]).unwrap_err();

    match &err {
        HarnessError::SuiteSetup { suite, source } => {
            assert_eq!(suite, "DanglingCollection");
            assert!(matches!(**source, HarnessError::Mapping(_)), "{source}");
            assert!(source.to_string().contains("unmapped entity Item"), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.context().factory().is_err());
    assert!(table_names(&backend).is_empty(), "schema must be dropped");
    assert_eq!(backend.live_connections(), 0);
}

#[test]
fn test_failed_schema_drop_keeps_the_report() {
    let backend = backend();
    let tests = vec![
        TestCase::new("saves_and_cleans_up", saves_and_cleans_up),
        TestCase::new("swaps_table_for_view", swaps_table_for_view),
    ];

    let mut lifecycle = TestLifecycle::new(backend.clone(), WidgetSuite::default());
    let report = lifecycle.run(&tests).unwrap();

    assert_eq!(report.passed(), 2, "{report}");
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.context().factory().is_err());
    assert_eq!(backend.live_connections(), 0);
}
