//! Sessions and the session factory.
//!
//! Queries are limited to `from <Entity>`; `from object` spans every mapped
//! class. A query for a parent entity also covers its subclasses.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fixturebed::{
    ClassMapping, Configuration, ConnectionHandle, ConnectionProvider, HarnessError, Interceptor,
    Record, Row, Session, SessionFactory, SessionHandle, Settings, Value,
};
use tracing::{debug, info, warn};

use crate::schema::quote_ident;

/// Session holding one connection until closed.
pub struct SqliteSession {
    conn: Mutex<Option<ConnectionHandle>>,
    provider: Arc<dyn ConnectionProvider>,
    classes: Arc<Vec<ClassMapping>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    show_sql: bool,
}

impl fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSession")
            .field("connection", &self.slot().as_ref().map(|c| c.id()))
            .field("intercepted", &self.interceptor.is_some())
            .finish()
    }
}

impl SqliteSession {
    fn slot(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn class(&self, entity: &str) -> fixturebed::Result<&ClassMapping> {
        self.classes
            .iter()
            .find(|c| c.entity == entity)
            .ok_or_else(|| HarnessError::session(format!("entity {} is not mapped", entity)))
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> fixturebed::Result<Vec<Row>> {
        if self.show_sql {
            info!("{}", sql);
        }
        self.connection()?.query(sql, params)
    }

    fn run_execute(&self, sql: &str) -> fixturebed::Result<u64> {
        if self.show_sql {
            info!("{}", sql);
        }
        self.connection()?.execute(sql, &[])
    }

    fn select_sql(class: &ClassMapping) -> String {
        let mut columns = vec![quote_ident(&class.id_column)];
        columns.extend(class.columns().iter().map(|c| quote_ident(&c.name)));
        format!("SELECT {} FROM {}", columns.join(", "), quote_ident(&class.table))
    }

    fn check_column(class: &ClassMapping, column: &str) -> fixturebed::Result<()> {
        if class.has_column(column) {
            Ok(())
        } else {
            Err(HarnessError::session(format!(
                "entity {} has no column {}",
                class.entity, column
            )))
        }
    }

    fn select_all(&self, class: &ClassMapping) -> fixturebed::Result<Vec<Row>> {
        let rows = self.run_query(&Self::select_sql(class), &[])?;
        Ok(rows
            .into_iter()
            .map(|row| row.with_entity(class.entity.as_str()))
            .collect())
    }
}

impl Session for SqliteSession {
    fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    fn close(&self) -> fixturebed::Result<()> {
        let taken = self.slot().take();
        match taken {
            Some(conn) => {
                debug!(connection = %conn.id(), "Closing session");
                self.provider.close_connection(&conn)
            }
            None => Ok(()),
        }
    }

    fn connection(&self) -> fixturebed::Result<ConnectionHandle> {
        self.slot()
            .clone()
            .ok_or_else(|| HarnessError::session("session is closed"))
    }

    fn save(&self, entity: &str, mut record: Record) -> fixturebed::Result<i64> {
        let class = self.class(entity)?;
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_save(entity, &mut record);
        }

        let mut columns = Vec::with_capacity(record.fields().len());
        let mut params = Vec::with_capacity(record.fields().len());
        for (column, value) in record.fields() {
            Self::check_column(class, column)?;
            columns.push(quote_ident(column));
            params.push(value.clone());
        }

        let table = quote_ident(&class.table);
        let id_column = quote_ident(&class.id_column);
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, id_column)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                table,
                columns.join(", "),
                vec!["?"; columns.len()].join(", "),
                id_column
            )
        };

        let rows = self.run_query(&sql, &params)?;
        let id = rows
            .first()
            .ok_or_else(|| HarnessError::session(format!("insert into {} returned no id", class.table)))?
            .get::<i64>(0)?;
        debug!(entity, id, "Saved entity");
        Ok(id)
    }

    fn get(&self, entity: &str, id: i64) -> fixturebed::Result<Option<Row>> {
        let class = self.class(entity)?;
        let sql = format!(
            "{} WHERE {} = ?",
            Self::select_sql(class),
            quote_ident(&class.id_column)
        );
        let rows = self.run_query(&sql, &[Value::Integer(id)])?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.with_entity(class.entity.as_str())))
    }

    fn find(&self, entity: &str, criteria: &[(&str, Value)]) -> fixturebed::Result<Vec<Row>> {
        let class = self.class(entity)?;
        let mut sql = Self::select_sql(class);
        let mut params = Vec::with_capacity(criteria.len());
        let mut clauses = Vec::with_capacity(criteria.len());
        for (column, value) in criteria {
            Self::check_column(class, column)?;
            clauses.push(format!("{} IS ?", quote_ident(column)));
            params.push(value.clone());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let rows = self.run_query(&sql, &params)?;
        Ok(rows
            .into_iter()
            .map(|row| row.with_entity(class.entity.as_str()))
            .collect())
    }

    fn create_query(&self, text: &str) -> fixturebed::Result<Vec<Row>> {
        let mut rows = Vec::new();
        for class in query_targets(&self.classes, text)? {
            rows.extend(self.select_all(class)?);
        }
        Ok(rows)
    }

    fn delete(&self, query: &str) -> fixturebed::Result<u64> {
        let mut total = 0;
        for class in query_targets(&self.classes, query)? {
            let deleted = self.run_execute(&format!("DELETE FROM {}", quote_ident(&class.table)))?;
            if let Some(interceptor) = &self.interceptor {
                interceptor.on_delete(&class.entity, deleted);
            }
            total += deleted;
        }
        debug!(query, rows = total, "Deleted entities");
        Ok(total)
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        let slot = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = slot.take() {
            // Out of band: the provider is not told.
            if let Err(e) = conn.close() {
                warn!(connection = %conn.id(), "Failed to close connection of dropped session: {}", e);
            }
        }
    }
}

/// Classes a `from <Entity>` query covers.
fn query_targets<'a>(classes: &'a [ClassMapping], text: &str) -> fixturebed::Result<Vec<&'a ClassMapping>> {
    let mut words = text.split_whitespace();
    let entity = match (words.next(), words.next(), words.next()) {
        (Some(from), Some(entity), None) if from.eq_ignore_ascii_case("from") => entity,
        _ => {
            return Err(HarnessError::query(format!(
                "unsupported query '{}', expected 'from <Entity>'",
                text
            )))
        }
    };

    if entity.eq_ignore_ascii_case("object") || entity == "System.Object" {
        return Ok(classes.iter().collect());
    }
    if !classes.iter().any(|c| c.entity == entity) {
        return Err(HarnessError::query(format!(
            "entity {} is not mapped (query '{}')",
            entity, text
        )));
    }

    Ok(classes
        .iter()
        .filter(|class| is_same_or_subclass(classes, class, entity))
        .collect())
}

fn is_same_or_subclass(classes: &[ClassMapping], class: &ClassMapping, ancestor: &str) -> bool {
    let mut current = Some(class);
    // Bounded by the class count so a cyclic `extends` cannot loop forever.
    for _ in 0..=classes.len() {
        let Some(c) = current else {
            return false;
        };
        if c.entity == ancestor {
            return true;
        }
        current = c
            .extends
            .as_deref()
            .and_then(|parent| classes.iter().find(|p| p.entity == parent));
    }
    false
}

/// Session factory over one configuration's class mappings.
pub struct SqliteSessionFactory {
    settings: Settings,
    classes: Arc<Vec<ClassMapping>>,
    provider: Arc<dyn ConnectionProvider>,
    closed: AtomicBool,
}

impl SqliteSessionFactory {
    pub fn build(cfg: &Configuration) -> fixturebed::Result<Self> {
        let classes = cfg.class_mappings().to_vec();
        validate_mappings(&classes)?;
        for class in &classes {
            if let Some(strategy) = class.cache_strategy {
                debug!(entity = %class.entity, %strategy, "Class cache strategy");
            }
        }

        Ok(Self {
            settings: cfg.settings(),
            classes: Arc::new(classes),
            provider: cfg.new_connection_provider()?,
            closed: AtomicBool::new(false),
        })
    }

    fn open(&self, interceptor: Option<Arc<dyn Interceptor>>) -> fixturebed::Result<SessionHandle> {
        if self.is_closed() {
            return Err(HarnessError::session("session factory is closed"));
        }
        let conn = self.provider.get_connection()?;
        debug!(connection = %conn.id(), "Opened session");
        Ok(Arc::new(SqliteSession {
            conn: Mutex::new(Some(conn)),
            provider: Arc::clone(&self.provider),
            classes: Arc::clone(&self.classes),
            interceptor,
            show_sql: self.settings.show_sql(),
        }))
    }
}

impl SessionFactory for SqliteSessionFactory {
    fn open_session(&self) -> fixturebed::Result<SessionHandle> {
        self.open(None)
    }

    fn open_session_with(&self, interceptor: Arc<dyn Interceptor>) -> fixturebed::Result<SessionHandle> {
        self.open(Some(interceptor))
    }

    fn close(&self) -> fixturebed::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing session factory");
        self.provider.close()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mapped_class_count(&self) -> usize {
        self.classes.len()
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn connection_provider(&self) -> Arc<dyn ConnectionProvider> {
        Arc::clone(&self.provider)
    }
}

/// Parents and collection elements must be mapped, and collection keys must
/// exist on the element table.
fn validate_mappings(classes: &[ClassMapping]) -> fixturebed::Result<()> {
    let find = |entity: &str| classes.iter().find(|c| c.entity == entity);
    for class in classes {
        if let Some(parent) = &class.extends {
            if find(parent).is_none() {
                return Err(HarnessError::mapping(format!(
                    "entity {} extends unmapped entity {}",
                    class.entity, parent
                )));
            }
        }
        for collection in &class.collections {
            let element = find(&collection.entity).ok_or_else(|| {
                HarnessError::mapping(format!(
                    "collection {} refers to unmapped entity {}",
                    class.collection_role(collection),
                    collection.entity
                ))
            })?;
            if !element.has_column(&collection.key) {
                return Err(HarnessError::mapping(format!(
                    "collection {} key {} is not a column of {}",
                    class.collection_role(collection),
                    collection.key,
                    element.entity
                )));
            }
        }
    }
    Ok(())
}
