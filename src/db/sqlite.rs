//! SQLite backend. The "server" is a directory and each database is a file
//! `<dir>/<name>.sqlite3` inside it.

use super::{
    check_identifier, Connection, ConnectionParams, Driver, DriverError, Row, ServerConnection,
    Value,
};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use std::path::{Path, PathBuf};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

pub fn database_path(directory: &str, name: &str) -> Result<PathBuf, DriverError> {
    let name = check_identifier(name)?;
    Ok(Path::new(directory).join(format!("{}.sqlite3", name)))
}

fn query_err(context: &str, e: rusqlite::Error) -> DriverError {
    DriverError::Query(format!("{}: {}", context, e))
}

pub struct SqliteServer {
    directory: String,
}

impl SqliteServer {
    pub fn connect(params: &ConnectionParams) -> Result<Self, DriverError> {
        if !Path::new(&params.host).is_dir() {
            return Err(DriverError::Connect(format!(
                "sqlite directory '{}' does not exist",
                params.host
            )));
        }
        Ok(Self {
            directory: params.host.clone(),
        })
    }
}

impl ServerConnection for SqliteServer {
    fn database_exists(&mut self, name: &str) -> Result<bool, DriverError> {
        Ok(database_path(&self.directory, name)?.is_file())
    }

    fn create_database(&mut self, name: &str) -> Result<(), DriverError> {
        let path = database_path(&self.directory, name)?;
        // An empty file is a valid, empty SQLite database.
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| DriverError::Query(format!("creating database {:?}: {}", path, e)))?;
        Ok(())
    }

    fn drop_database(&mut self, name: &str) -> Result<(), DriverError> {
        let path = database_path(&self.directory, name)?;
        std::fs::remove_file(&path)
            .map_err(|e| DriverError::Query(format!("dropping database {:?}: {}", path, e)))?;
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(suffix);
            let _ = std::fs::remove_file(sidecar);
        }
        Ok(())
    }
}

pub struct SqliteDb {
    pub(crate) conn: rusqlite::Connection,
    in_transaction: bool,
}

impl SqliteDb {
    pub fn connect(params: &ConnectionParams, name: &str) -> Result<Self, DriverError> {
        let path = database_path(&params.host, name)?;
        let conn = rusqlite::Connection::open_with_flags(
            &path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DriverError::Connect(format!("opening sqlite database {:?}: {}", path, e)))?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Result<Self, DriverError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| DriverError::Connect(format!("setting sqlite pragmas: {}", e)))?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    fn has_sequence_table(&self) -> Result<bool, DriverError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| query_err("inspecting sqlite_sequence", e))?;
        Ok(count > 0)
    }
}

impl Connection for SqliteDb {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| query_err("executing statements", e))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let count = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| query_err("executing statement", e))?;
        Ok(count as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| query_err("preparing query", e))?;
        let names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| query_err("running query", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| query_err("reading row", e))? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(|e| query_err("reading column", e))?;
                record.set(name.clone(), from_value_ref(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn list_tables(&mut self) -> Result<Vec<String>, DriverError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| query_err("listing tables", e))?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| query_err("listing tables", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_err("listing tables", e))?;
        Ok(tables)
    }

    // Ignored by SQLite inside a transaction; callers toggle it around one.
    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), DriverError> {
        let sql = if enabled {
            "PRAGMA foreign_keys=ON"
        } else {
            "PRAGMA foreign_keys=OFF"
        };
        self.conn
            .execute_batch(sql)
            .map_err(|e| query_err("toggling foreign keys", e))
    }

    fn drop_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table)?);
        self.conn
            .execute_batch(&sql)
            .map_err(|e| query_err(&format!("dropping table '{}'", table), e))
    }

    fn truncate_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!("DELETE FROM {}", self.quote_identifier(table)?);
        self.conn
            .execute(&sql, [])
            .map_err(|e| query_err(&format!("truncating table '{}'", table), e))?;
        if self.has_sequence_table()? {
            self.conn
                .execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])
                .map_err(|e| query_err(&format!("resetting sequence of '{}'", table), e))?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| query_err("beginning transaction", e))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| query_err("committing transaction", e))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| query_err("rolling back transaction", e))?;
        }
        Ok(())
    }
}
