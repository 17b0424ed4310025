use crate::db::{
    Connection, ConnectionParams, Connector, DriverConnector, DriverError, Row, SchemaSource,
    ServerConnection, Value,
};
use crate::error::{Result, WorkbenchError};
use crate::logging::Logger;
use std::sync::Arc;

/// Who owns the database object on the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The instance creates and drops the database itself.
    SelfManaged,
    /// The database is provisioned elsewhere (CI); only its tables are touched.
    ExternallyManaged,
}

impl Ownership {
    pub fn from_externally_managed(externally_managed: bool) -> Self {
        if externally_managed {
            Ownership::ExternallyManaged
        } else {
            Ownership::SelfManaged
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    TablesLoaded,
    Dropped,
}

/// Outcome of a best-effort [`DatabaseInstance::truncate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruncateReport {
    pub truncated: Vec<String>,
    /// Table name and the error that stopped it.
    pub failed: Vec<(String, String)>,
}

/// One named database on a server, from creation to teardown.
///
/// Connections are opened on first use, cached, and released by
/// [`disconnect`](Self::disconnect) or when the instance is dropped.
pub struct DatabaseInstance {
    name: String,
    params: ConnectionParams,
    ownership: Ownership,
    schema_files: Vec<SchemaSource>,
    state: LifecycleState,
    connector: Box<dyn Connector>,
    server: Option<Box<dyn ServerConnection>>,
    connection: Option<Box<dyn Connection>>,
    log: Arc<Logger>,
}

impl DatabaseInstance {
    pub fn new(
        name: impl Into<String>,
        params: ConnectionParams,
        schema_files: Vec<SchemaSource>,
        ownership: Ownership,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            ownership,
            schema_files,
            state: LifecycleState::Uninitialized,
            connector: Box::new(DriverConnector),
            server: None,
            connection: None,
            log: Arc::new(Logger::from_env()),
        }
    }

    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_logger(mut self, log: Arc<Logger>) -> Self {
        self.log = log;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_created(&self) -> bool {
        self.state == LifecycleState::TablesLoaded
    }

    /// Creates the database (or clears its tables when externally managed)
    /// and loads every schema file in order.
    pub fn create(&mut self) -> Result<&mut Self> {
        if self.is_created() {
            return Err(WorkbenchError::illegal_state(format!(
                "database '{}' already created",
                self.name
            )));
        }
        self.log.info(
            "creating test database",
            &[
                ("database", &self.name),
                ("ownership", ownership_label(self.ownership)),
            ],
        );
        match self.ownership {
            Ownership::SelfManaged => self.recreate_database()?,
            Ownership::ExternallyManaged => self.drop_tables(),
        }
        self.load_schema()?;
        self.state = LifecycleState::TablesLoaded;
        self.log
            .info("test database ready", &[("database", &self.name)]);
        Ok(self)
    }

    /// Takes over a database created earlier (e.g. by another process) so it
    /// can be truncated or dropped.
    pub fn attach(&mut self) -> Result<&mut Self> {
        if self.is_created() {
            return Err(WorkbenchError::illegal_state(format!(
                "database '{}' already created",
                self.name
            )));
        }
        match self.ownership {
            Ownership::SelfManaged => {
                let name = self.name.clone();
                if !self.with_server(|server| server.database_exists(&name))? {
                    return Err(WorkbenchError::InvalidArgument(format!(
                        "database '{}' does not exist",
                        self.name
                    )));
                }
            }
            Ownership::ExternallyManaged => {
                self.connection()?;
            }
        }
        self.state = LifecycleState::TablesLoaded;
        self.log
            .info("attached to test database", &[("database", &self.name)]);
        Ok(self)
    }

    /// Drops the database, or only its tables when externally managed.
    pub fn drop_database(&mut self) -> Result<&mut Self> {
        self.ensure_created("drop")?;
        match self.ownership {
            Ownership::SelfManaged => {
                // Postgres refuses to drop a database with open sessions.
                self.release_connection();
                let name = self.name.clone();
                self.with_server(|server| server.drop_database(&name))?;
                self.log
                    .info("dropped test database", &[("database", &self.name)]);
            }
            Ownership::ExternallyManaged => self.drop_tables(),
        }
        self.state = LifecycleState::Dropped;
        Ok(self)
    }

    /// Drops every table with foreign-key checks disabled, inside one
    /// transaction. Failures are logged and swallowed so teardown never
    /// fails a test run.
    pub fn drop_tables(&mut self) {
        let result = self.with_connection(|conn| {
            let tables = conn.list_tables()?;
            with_foreign_keys_disabled(conn, |conn| {
                for table in &tables {
                    conn.drop_table(table)?;
                }
                Ok(tables.len())
            })
        });
        match result {
            Ok(count) => self.log.info(
                "dropped tables",
                &[("database", &self.name), ("count", &count.to_string())],
            ),
            Err(e) => self.log.warn(
                "dropping tables failed, leaving them in place",
                &[("database", &self.name), ("error", &e.to_string())],
            ),
        }
        self.state = LifecycleState::Uninitialized;
    }

    /// Empties every table, each in its own transaction. A table that fails
    /// is rolled back, logged and reported; the rest are still attempted.
    pub fn truncate(&mut self) -> Result<TruncateReport> {
        self.ensure_created("truncate")?;
        let tables = self.with_connection(|conn| conn.list_tables())?;
        let mut report = TruncateReport::default();
        for table in tables {
            let result = self.with_connection(|conn| {
                with_foreign_keys_disabled(conn, |conn| conn.truncate_table(&table))
            });
            match result {
                Ok(()) => report.truncated.push(table),
                Err(e) => {
                    self.log.warn(
                        "truncating table failed, continuing",
                        &[
                            ("database", &self.name),
                            ("table", &table),
                            ("error", &e.to_string()),
                        ],
                    );
                    report.failed.push((table, e.to_string()));
                }
            }
        }
        self.log.debug(
            "truncated tables",
            &[
                ("database", &self.name),
                ("count", &report.truncated.len().to_string()),
                ("failed", &report.failed.len().to_string()),
            ],
        );
        Ok(report)
    }

    /// All rows of `table` whose columns equal every value in `conditions`.
    pub fn fetch_rows(&mut self, table: &str, conditions: &Row) -> Result<Vec<Row>> {
        self.ensure_created("fetch rows")?;
        self.with_connection(|conn| {
            let mut sql = format!("SELECT * FROM {}", conn.quote_identifier(table)?);
            let (clause, params) = conn.where_clause(conditions, 1)?;
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
            conn.query(&sql, &params)
        })
    }

    /// First column of the first row of `sql`.
    pub fn fetch_value(&mut self, sql: &str) -> Result<Option<Value>> {
        self.with_connection(|conn| conn.query_value(sql, &[]))
    }

    /// Runs `f` in a transaction: committed on `Ok`, rolled back on `Err`.
    pub fn transactional<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Connection) -> Result<T>,
    ) -> Result<T> {
        run_in_transaction(self.connection()?, f)
    }

    /// The database connection, opened on first use.
    pub fn connection(&mut self) -> Result<&mut dyn Connection> {
        if self.connection.is_none() {
            self.log.debug("opening database connection", &[("database", &self.name)]);
            let conn = self
                .connector
                .connect_database(&self.params, &self.name)
                .map_err(|e| describe(&self.name, &self.params, e))?;
            self.connection = Some(conn);
        }
        match self.connection.as_deref_mut() {
            Some(conn) => {
                let conn: &mut dyn Connection = conn;
                Ok(conn)
            }
            None => Err(WorkbenchError::illegal_state("database connection unavailable")),
        }
    }

    /// Releases both connections. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let had_connection = self.connection.take().is_some();
        let had_server = self.server.take().is_some();
        if had_connection || had_server {
            self.log
                .debug("disconnected", &[("database", &self.name)]);
        }
    }

    fn release_connection(&mut self) {
        if self.connection.take().is_some() {
            self.log
                .debug("released database connection", &[("database", &self.name)]);
        }
    }

    fn ensure_created(&self, action: &str) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(WorkbenchError::illegal_state(format!(
                "cannot {}: database '{}' not created",
                action, self.name
            )))
        }
    }

    fn recreate_database(&mut self) -> Result<()> {
        // A cached connection would point at the database being replaced.
        self.release_connection();
        let name = self.name.clone();
        self.with_server(|server| {
            server.drop_database_if_exists(&name)?;
            server.create_database(&name)
        })
    }

    fn load_schema(&mut self) -> Result<()> {
        for schema in self.schema_files.clone() {
            let sql = match &schema {
                SchemaSource::Bundled { sql, .. } => sql.to_string(),
                SchemaSource::File(path) => {
                    std::fs::read_to_string(path).map_err(|source| WorkbenchError::SchemaLoad {
                        path: path.clone(),
                        source,
                    })?
                }
            };
            self.log.debug(
                "loading schema file",
                &[("database", &self.name), ("schema", &schema.label())],
            );
            self.with_connection(|conn| conn.execute_batch(&sql))?;
        }
        Ok(())
    }

    fn with_connection<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Connection) -> std::result::Result<T, DriverError>,
    ) -> Result<T> {
        let conn = self.connection()?;
        let result = f(conn);
        result.map_err(|e| describe(&self.name, &self.params, e))
    }

    fn with_server<T>(
        &mut self,
        f: impl FnOnce(&mut dyn ServerConnection) -> std::result::Result<T, DriverError>,
    ) -> Result<T> {
        if self.server.is_none() {
            self.log.debug("opening server connection", &[("host", &self.params.host)]);
            let server = self
                .connector
                .connect_server(&self.params)
                .map_err(|e| describe(&self.name, &self.params, e))?;
            self.server = Some(server);
        }
        let server = match self.server.as_deref_mut() {
            Some(server) => server,
            None => return Err(WorkbenchError::illegal_state("server connection unavailable")),
        };
        f(server).map_err(|e| describe(&self.name, &self.params, e))
    }
}

impl std::fmt::Debug for DatabaseInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInstance")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ownership", &self.ownership)
            .field("schema_files", &self.schema_files)
            .field("state", &self.state)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

fn ownership_label(ownership: Ownership) -> &'static str {
    match ownership {
        Ownership::SelfManaged => "self-managed",
        Ownership::ExternallyManaged => "externally-managed",
    }
}

/// Lost or refused connections carry the database name and redacted parameters.
fn describe(name: &str, params: &ConnectionParams, e: DriverError) -> WorkbenchError {
    if e.is_connection_failure() {
        WorkbenchError::Connection {
            database: name.to_string(),
            params: params.redacted(),
            message: params.scrub(&e.to_string()),
        }
    } else {
        e.into()
    }
}

pub(crate) fn run_in_transaction<T, E: From<DriverError>>(
    conn: &mut dyn Connection,
    f: impl FnOnce(&mut dyn Connection) -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    conn.begin_transaction()?;
    match f(conn) {
        Ok(value) => match conn.commit_transaction() {
            Ok(()) => Ok(value),
            Err(e) => {
                let _ = conn.rollback_transaction();
                Err(e.into())
            }
        },
        Err(e) => {
            // A failed rollback must not mask the error that caused it.
            let _ = conn.rollback_transaction();
            Err(e)
        }
    }
}

/// Checks are switched off outside the transaction (SQLite ignores the
/// pragma inside one) and switched back on whatever the outcome.
fn with_foreign_keys_disabled<T>(
    conn: &mut dyn Connection,
    f: impl FnOnce(&mut dyn Connection) -> std::result::Result<T, DriverError>,
) -> std::result::Result<T, DriverError> {
    conn.set_foreign_key_checks(false)?;
    let result = run_in_transaction(conn, f);
    let restored = conn.set_foreign_key_checks(true);
    let value = result?;
    restored?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MockConnector;
    use crate::db::Driver;

    fn params() -> ConnectionParams {
        ConnectionParams {
            driver: Driver::Mysql,
            host: "127.0.0.1".into(),
            port: 3306,
            username: "root".into(),
            password: "hunter2".into(),
        }
    }

    fn schema_file(dir: &tempfile::TempDir, sql: &str) -> SchemaSource {
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, sql).unwrap();
        SchemaSource::File(path)
    }

    fn instance(
        connector: &MockConnector,
        ownership: Ownership,
        files: Vec<SchemaSource>,
    ) -> DatabaseInstance {
        DatabaseInstance::new("t1", params(), files, ownership)
            .with_connector(Box::new(connector.clone()))
            .with_logger(Arc::new(Logger::null()))
    }

    #[test]
    fn test_bundled_schema_loads_without_reading_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = schema_file(&dir, "CREATE TABLE card (id INT);");
        let connector = MockConnector::default();
        let mut db = instance(
            &connector,
            Ownership::SelfManaged,
            vec![Driver::Mysql.base_schema(), file],
        );
        db.create().unwrap();
        let batches: Vec<String> = connector
            .journal
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("batch"))
            .collect();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].contains("CREATE TABLE"));
        assert!(batches[0].contains("player_no"));
        assert_eq!(batches[1], "batch CREATE TABLE card (id INT);");
    }

    #[test]
    fn test_self_managed_create_recreates_database_then_loads_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = schema_file(&dir, "CREATE TABLE a (id INT);");
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![file]);
        db.create().unwrap();
        assert_eq!(db.lifecycle_state(), LifecycleState::TablesLoaded);
        assert_eq!(
            connector.journal.entries(),
            vec![
                "connect server",
                "exists t1",
                "create database t1",
                "connect database t1",
                "batch CREATE TABLE a (id INT);",
            ]
        );
    }

    #[test]
    fn test_externally_managed_create_never_touches_database_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = schema_file(&dir, "CREATE TABLE a (id INT);");
        let connector = MockConnector {
            tables: vec!["stale".into()],
            ..Default::default()
        };
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![file]);
        db.create().unwrap();
        db.drop_database().unwrap();
        let entries = connector.journal.entries();
        assert!(!entries.iter().any(|e| e.contains("database t1") && !e.starts_with("connect")));
        assert!(!entries.contains(&"connect server".to_string()));
        assert_eq!(
            entries,
            vec![
                "connect database t1",
                "fk off",
                "begin",
                "drop stale",
                "commit",
                "fk on",
                "batch CREATE TABLE a (id INT);",
                "fk off",
                "begin",
                "drop stale",
                "commit",
                "fk on",
            ]
        );
        assert_eq!(db.lifecycle_state(), LifecycleState::Dropped);
    }

    #[test]
    fn test_create_twice_is_illegal_state() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        db.create().unwrap();
        assert!(matches!(db.create(), Err(WorkbenchError::IllegalState(_))));
    }

    #[test]
    fn test_create_after_drop_is_allowed() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        db.create().unwrap();
        db.drop_database().unwrap();
        db.create().unwrap();
        assert!(db.is_created());
    }

    #[test]
    fn test_drop_before_create_is_illegal_state() {
        for ownership in [Ownership::SelfManaged, Ownership::ExternallyManaged] {
            let connector = MockConnector::default();
            let mut db = instance(&connector, ownership, vec![]);
            assert!(matches!(
                db.drop_database(),
                Err(WorkbenchError::IllegalState(_))
            ));
        }
    }

    #[test]
    fn test_fetch_rows_before_create_is_illegal_state() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        let err = db.fetch_rows("player", &Row::new()).unwrap_err();
        assert!(matches!(err, WorkbenchError::IllegalState(_)));
        assert!(connector.journal.entries().is_empty());
    }

    #[test]
    fn test_drop_tables_failure_rolls_back_reenables_checks_and_is_swallowed() {
        let connector = MockConnector {
            tables: vec!["a".into(), "b".into(), "c".into()],
            fail_on: Some("b".into()),
            ..Default::default()
        };
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![]);
        db.drop_tables();
        assert_eq!(
            connector.journal.entries(),
            vec!["connect database t1", "fk off", "begin", "drop a", "rollback", "fk on"]
        );
        assert_eq!(db.lifecycle_state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_truncate_continues_past_failing_table() {
        let connector = MockConnector {
            tables: vec!["a".into(), "b".into(), "c".into()],
            fail_on: Some("b".into()),
            ..Default::default()
        };
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        db.create().unwrap();
        let report = db.truncate().unwrap();
        assert_eq!(report.truncated, vec!["a", "c"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        let entries = connector.journal.entries();
        let tail: Vec<&str> = entries[entries.len() - 14..].iter().map(|s| s.as_str()).collect();
        assert_eq!(
            tail,
            vec![
                "fk off", "begin", "truncate a", "commit", "fk on",
                "fk off", "begin", "rollback", "fk on",
                "fk off", "begin", "truncate c", "commit", "fk on",
            ]
        );
    }

    #[test]
    fn test_truncate_before_create_is_illegal_state() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        assert!(matches!(db.truncate(), Err(WorkbenchError::IllegalState(_))));
    }

    #[test]
    fn test_missing_schema_file_names_path() {
        let connector = MockConnector::default();
        let missing = std::path::PathBuf::from("/definitely/not/here/dbmodel.sql");
        let mut db = instance(&connector, Ownership::SelfManaged, vec![missing.clone().into()]);
        match db.create() {
            Err(WorkbenchError::SchemaLoad { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected SchemaLoad, got {:?}", other.map(|_| ())),
        }
        assert!(!db.is_created());
    }

    #[test]
    fn test_connection_failure_is_redacted() {
        let connector = MockConnector {
            refuse: true,
            ..Default::default()
        };
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        let err = db.create().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, WorkbenchError::Connection { .. }));
        assert!(message.contains("t1"));
        assert!(!message.contains("hunter2"));
        assert!(message.contains("*******"));
    }

    #[test]
    fn test_connections_are_opened_once_and_released() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![]);
        db.create().unwrap();
        db.fetch_value("SELECT 1").unwrap();
        db.fetch_rows("player", &Row::new()).unwrap();
        let opened = connector
            .journal
            .entries()
            .iter()
            .filter(|e| e.starts_with("connect database"))
            .count();
        assert_eq!(opened, 1);
        db.disconnect();
        db.disconnect();
        db.fetch_value("SELECT 1").unwrap();
        let opened = connector
            .journal
            .entries()
            .iter()
            .filter(|e| e.starts_with("connect database"))
            .count();
        assert_eq!(opened, 2);
    }

    #[test]
    fn test_disconnect_without_connections_is_noop() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        db.disconnect();
        assert!(connector.journal.entries().is_empty());
    }

    #[test]
    fn test_fetch_rows_binds_conditions() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![]);
        db.create().unwrap();
        db.fetch_rows("player", &Row::new().with("player_id", 1))
            .unwrap();
        assert_eq!(
            connector.journal.entries().last().unwrap(),
            "SELECT * FROM `player` WHERE `player_id` = ?"
        );
    }

    #[test]
    fn test_fetch_rows_rejects_bad_table_name() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![]);
        db.create().unwrap();
        assert!(matches!(
            db.fetch_rows("player; DROP TABLE x", &Row::new()),
            Err(WorkbenchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_transactional_rolls_back_and_reraises() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::ExternallyManaged, vec![]);
        let err = db
            .transactional(|conn| {
                conn.execute("UPDATE player SET player_no = player_no + 1", &[])?;
                Err::<(), _>(WorkbenchError::AmendmentTargetNotFound(99))
            })
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::AmendmentTargetNotFound(99)));
        let entries = connector.journal.entries();
        assert_eq!(&entries[entries.len() - 3..], &["begin", "UPDATE player SET player_no = player_no + 1", "rollback"]);
    }

    #[test]
    fn test_attach_self_managed_requires_existing_database() {
        let connector = MockConnector::default();
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        assert!(matches!(db.attach(), Err(WorkbenchError::InvalidArgument(_))));

        let connector = MockConnector {
            database_exists: true,
            ..Default::default()
        };
        let mut db = instance(&connector, Ownership::SelfManaged, vec![]);
        db.attach().unwrap();
        db.drop_database().unwrap();
        assert!(connector.journal.entries().contains(&"drop database t1".to_string()));
    }
}
