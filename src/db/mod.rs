//! Driver layer: one database connection and one server connection per
//! dialect, behind object-safe traits so the lifecycle code never branches
//! on the concrete driver.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::logging::mask_secret;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    /// The server could not be reached, refused the credentials, or dropped the link.
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Query(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DriverError::Connect(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Mysql,
    Postgres,
    Sqlite,
}

impl Driver {
    pub fn default_port(self) -> u16 {
        match self {
            Driver::Mysql => 3306,
            Driver::Postgres => 5432,
            Driver::Sqlite => 0,
        }
    }

    /// Platform tables every game database starts with, in this dialect.
    /// Compiled into the binary.
    pub fn base_schema(self) -> SchemaSource {
        let (name, sql) = match self {
            Driver::Mysql => (
                "dbmodel.mysql.sql",
                include_str!("../../stubs/dbmodel.mysql.sql"),
            ),
            Driver::Postgres => (
                "dbmodel.postgres.sql",
                include_str!("../../stubs/dbmodel.postgres.sql"),
            ),
            Driver::Sqlite => (
                "dbmodel.sqlite.sql",
                include_str!("../../stubs/dbmodel.sqlite.sql"),
            ),
        };
        SchemaSource::Bundled { name, sql }
    }
}

/// SQL run against a freshly created database.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    Bundled {
        name: &'static str,
        sql: &'static str,
    },
    /// Read when the schema is loaded; an unreadable file fails creation.
    File(PathBuf),
}

impl SchemaSource {
    pub fn label(&self) -> String {
        match self {
            SchemaSource::Bundled { name, .. } => format!("bundled:{}", name),
            SchemaSource::File(path) => path.display().to_string(),
        }
    }
}

impl From<PathBuf> for SchemaSource {
    fn from(path: PathBuf) -> Self {
        SchemaSource::File(path)
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Mysql => write!(f, "mysql"),
            Driver::Postgres => write!(f, "postgres"),
            Driver::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "pdo_mysql" | "mariadb" => Ok(Driver::Mysql),
            "postgres" | "postgresql" | "pgsql" => Ok(Driver::Postgres),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            other => Err(format!(
                "unsupported database driver: '{}' (supported: mysql, postgres, sqlite)",
                other
            )),
        }
    }
}

/// Everything needed to reach the server, minus the database name.
/// For SQLite, `host` is the directory holding the database files.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionParams {
    /// Parameter dump safe for logs and error messages.
    pub fn redacted(&self) -> String {
        format!(
            "{{driver: {}, host: {}, port: {}, user: {}, password: {}}}",
            self.driver,
            self.host,
            self.port,
            self.username,
            mask_secret(&self.password)
        )
    }

    /// Masks any verbatim occurrence of the password inside a driver message.
    pub fn scrub(&self, message: &str) -> String {
        if self.password.is_empty() {
            return message.to_string();
        }
        message.replace(&self.password, &mask_secret(&self.password))
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view; numeric text (as MySQL's text protocol returns it) is parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row (or field list), in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<(String, Value)>);

impl Row {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets a column, replacing an earlier value under the same name.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0.into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Connection with a database selected; used for table DDL and DML.
pub trait Connection {
    fn driver(&self) -> Driver;

    /// Runs one or more `;`-separated statements verbatim.
    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError>;
    /// Returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError>;
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Base tables of the selected database, sorted by name.
    fn list_tables(&mut self) -> Result<Vec<String>, DriverError>;
    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), DriverError>;
    fn drop_table(&mut self, table: &str) -> Result<(), DriverError>;
    /// Removes every row, keeping the table definition.
    fn truncate_table(&mut self, table: &str) -> Result<(), DriverError>;

    fn begin_transaction(&mut self) -> Result<(), DriverError>;
    fn commit_transaction(&mut self) -> Result<(), DriverError>;
    fn rollback_transaction(&mut self) -> Result<(), DriverError>;

    fn quote_identifier(&self, name: &str) -> Result<String, DriverError> {
        let name = check_identifier(name)?;
        Ok(match self.driver() {
            Driver::Mysql => format!("`{}`", name),
            Driver::Postgres | Driver::Sqlite => format!("\"{}\"", name),
        })
    }

    /// Bind marker for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String {
        match self.driver() {
            Driver::Mysql => "?".into(),
            Driver::Postgres => format!("${}", index),
            Driver::Sqlite => format!("?{}", index),
        }
    }

    /// First column of the first row, `None` when the result is empty.
    fn query_value(&mut self, sql: &str, params: &[Value]) -> Result<Option<Value>, DriverError> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// `AND`-joined equality conditions with bound values, numbered from `first_index`.
    /// A `Null` condition renders as `IS NULL` and binds nothing.
    fn where_clause(
        &self,
        conditions: &Row,
        first_index: usize,
    ) -> Result<(String, Vec<Value>), DriverError> {
        let mut parts = Vec::with_capacity(conditions.len());
        let mut params = Vec::new();
        for (column, value) in conditions.iter() {
            let column = self.quote_identifier(column)?;
            if value.is_null() {
                parts.push(format!("{} IS NULL", column));
            } else {
                parts.push(format!(
                    "{} = {}",
                    column,
                    self.placeholder(first_index + params.len())
                ));
                params.push(value.clone());
            }
        }
        Ok((parts.join(" AND "), params))
    }

    fn insert(&mut self, table: &str, fields: &Row) -> Result<u64, DriverError> {
        let table = self.quote_identifier(table)?;
        let mut columns = Vec::with_capacity(fields.len());
        let mut placeholders = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len());
        for (i, (column, value)) in fields.iter().enumerate() {
            columns.push(self.quote_identifier(column)?);
            placeholders.push(self.placeholder(i + 1));
            params.push(value.clone());
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        self.execute(&sql, &params)
    }

    fn update(&mut self, table: &str, set: &Row, conditions: &Row) -> Result<u64, DriverError> {
        if set.is_empty() {
            return Ok(0);
        }
        let table = self.quote_identifier(table)?;
        let mut assignments = Vec::with_capacity(set.len());
        let mut params = Vec::with_capacity(set.len() + conditions.len());
        for (i, (column, value)) in set.iter().enumerate() {
            assignments.push(format!(
                "{} = {}",
                self.quote_identifier(column)?,
                self.placeholder(i + 1)
            ));
            params.push(value.clone());
        }
        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        if !conditions.is_empty() {
            let (clause, where_params) = self.where_clause(conditions, params.len() + 1)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            params.extend(where_params);
        }
        self.execute(&sql, &params)
    }
}

/// Connection to the server with no database selected.
pub trait ServerConnection {
    fn database_exists(&mut self, name: &str) -> Result<bool, DriverError>;
    fn create_database(&mut self, name: &str) -> Result<(), DriverError>;
    fn drop_database(&mut self, name: &str) -> Result<(), DriverError>;

    fn drop_database_if_exists(&mut self, name: &str) -> Result<(), DriverError> {
        if self.database_exists(name)? {
            self.drop_database(name)?;
        }
        Ok(())
    }
}

/// Opens connections for a [`ConnectionParams`]; swapped out in tests.
pub trait Connector {
    fn connect_server(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn ServerConnection>, DriverError>;
    fn connect_database(
        &self,
        params: &ConnectionParams,
        name: &str,
    ) -> Result<Box<dyn Connection>, DriverError>;
}

/// Dispatches on [`ConnectionParams::driver`] to the compiled-in drivers.
pub struct DriverConnector;

impl Connector for DriverConnector {
    fn connect_server(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn ServerConnection>, DriverError> {
        match params.driver {
            #[cfg(feature = "mysql")]
            Driver::Mysql => Ok(Box::new(mysql::MysqlServer::connect(params)?)),
            #[cfg(feature = "postgres")]
            Driver::Postgres => Ok(Box::new(postgres::PostgresServer::connect(params)?)),
            #[cfg(feature = "sqlite")]
            Driver::Sqlite => Ok(Box::new(sqlite::SqliteServer::connect(params)?)),
            #[allow(unreachable_patterns)]
            other => Err(not_compiled_in(other)),
        }
    }

    fn connect_database(
        &self,
        params: &ConnectionParams,
        name: &str,
    ) -> Result<Box<dyn Connection>, DriverError> {
        check_identifier(name)?;
        match params.driver {
            #[cfg(feature = "mysql")]
            Driver::Mysql => Ok(Box::new(mysql::MysqlDb::connect(params, name)?)),
            #[cfg(feature = "postgres")]
            Driver::Postgres => Ok(Box::new(postgres::PostgresDb::connect(params, name)?)),
            #[cfg(feature = "sqlite")]
            Driver::Sqlite => Ok(Box::new(sqlite::SqliteDb::connect(params, name)?)),
            #[allow(unreachable_patterns)]
            other => Err(not_compiled_in(other)),
        }
    }
}

#[allow(dead_code)]
fn not_compiled_in(driver: Driver) -> DriverError {
    DriverError::Connect(format!(
        "driver '{}' is not compiled in (enable the '{}' feature)",
        driver, driver
    ))
}

/// Accepts `[A-Za-z0-9_]+` only; everything else could escape quoting.
pub fn check_identifier(name: &str) -> Result<&str, DriverError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(DriverError::InvalidIdentifier(name.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Journal, MockDb};
    use super::*;

    fn mock() -> MockDb {
        MockDb {
            journal: Journal::default(),
            tables: Vec::new(),
            fail_on: None,
        }
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("player").is_ok());
        assert!(check_identifier("player_no2").is_ok());
        assert!(check_identifier("bad;drop").is_err());
        assert!(check_identifier("a b").is_err());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("`x`").is_err());
    }

    #[test]
    fn test_base_schema_is_embedded_per_dialect() {
        for driver in [Driver::Mysql, Driver::Postgres, Driver::Sqlite] {
            match driver.base_schema() {
                SchemaSource::Bundled { name, sql } => {
                    assert!(name.contains(&driver.to_string()));
                    assert!(sql.contains("player_no"));
                    assert!(sql.contains("gamelog"));
                }
                other => panic!("expected bundled schema, got {:?}", other),
            }
        }
        assert_eq!(
            SchemaSource::from(PathBuf::from("/p/dbmodel.sql")).label(),
            "/p/dbmodel.sql"
        );
    }

    #[test]
    fn test_parse_driver() {
        assert_eq!("pdo_mysql".parse::<Driver>().unwrap(), Driver::Mysql);
        assert_eq!("PostgreSQL".parse::<Driver>().unwrap(), Driver::Postgres);
        assert_eq!("sqlite3".parse::<Driver>().unwrap(), Driver::Sqlite);
        assert!("oracle".parse::<Driver>().is_err());
    }

    #[test]
    fn test_redacted_params_mask_password() {
        let params = ConnectionParams {
            driver: Driver::Mysql,
            host: "db".into(),
            port: 3306,
            username: "root".into(),
            password: "hunter2".into(),
        };
        let rendered = params.redacted();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("password: *******"));
        assert!(!format!("{:?}", params).contains("hunter2"));
        assert_eq!(
            params.scrub("login hunter2 refused"),
            "login ******* refused"
        );
    }

    #[test]
    fn test_where_clause_binds_values() {
        let db = mock();
        let conditions = Row::new().with("player_id", 7).with("player_name", "ann");
        let (clause, params) = db.where_clause(&conditions, 1).unwrap();
        assert_eq!(clause, "`player_id` = ? AND `player_name` = ?");
        assert_eq!(params, vec![Value::Int(7), Value::from("ann")]);
    }

    #[test]
    fn test_where_clause_null_uses_is_null() {
        let db = mock();
        let conditions = Row::new().with("player_zombie", Value::Null);
        let (clause, params) = db.where_clause(&conditions, 1).unwrap();
        assert_eq!(clause, "`player_zombie` IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_where_clause_rejects_injected_column() {
        let db = mock();
        let conditions = Row::new().with("1=1 OR player_id", 1);
        assert!(matches!(
            db.where_clause(&conditions, 1),
            Err(DriverError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_update_renders_set_then_where() {
        let mut db = mock();
        db.update(
            "player",
            &Row::new().with("player_no", 2).with("player_color", "ff0000"),
            &Row::new().with("player_id", 10),
        )
        .unwrap();
        assert_eq!(
            db.journal.entries(),
            vec!["UPDATE `player` SET `player_no` = ?, `player_color` = ? WHERE `player_id` = ?"]
        );
    }

    #[test]
    fn test_row_set_replaces_existing_column() {
        let mut row = Row::new().with("a", 1);
        row.set("a", 2);
        row.set("b", "x");
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a"), Some(&Value::Int(2)));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_row_serializes_as_map() {
        let row = Row::new().with("player_id", 1).with("player_name", "ann");
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"player_id":1,"player_name":"ann"}"#);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(true), Value::Int(1));
    }
}
