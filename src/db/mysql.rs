use super::{
    check_identifier, Connection, ConnectionParams, Driver, DriverError, Row, ServerConnection,
    Value,
};
use mysql::prelude::Queryable;

// Server error codes that mean the session is unusable rather than the statement wrong.
const CONNECTION_ERROR_CODES: &[u16] = &[
    1044, 1045, 1129, 1130, 1152, 1153, 1159, 1160, 1161, 2002, 2003, 2006, 2013,
];

fn classify(context: &str, e: mysql::Error) -> DriverError {
    let message = format!("{}: {}", context, e);
    match &e {
        mysql::Error::IoError(_)
        | mysql::Error::DriverError(mysql::DriverError::CouldNotConnect(_))
        | mysql::Error::DriverError(mysql::DriverError::ConnectTimeout) => {
            DriverError::Connect(message)
        }
        mysql::Error::MySqlError(server) if CONNECTION_ERROR_CODES.contains(&server.code) => {
            DriverError::Connect(message)
        }
        _ => DriverError::Query(message),
    }
}

fn to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Int(i) => mysql::Value::Int(*i),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) => mysql::Value::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
    }
}

fn from_mysql(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(i) => Value::Int(i),
        mysql::Value::UInt(u) => i64::try_from(u)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(u.to_string())),
        mysql::Value::Float(f) => Value::Float(f.into()),
        mysql::Value::Double(f) => Value::Float(f),
        mysql::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql::Value::Date(y, mo, d, h, mi, s, us) => Value::Text(if us > 0 {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}", y, mo, d, h, mi, s, us)
        } else {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
        }),
        mysql::Value::Time(neg, days, h, mi, s, _) => {
            let hours = u32::from(h) + days * 24;
            let sign = if neg { "-" } else { "" };
            Value::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
        }
    }
}

fn params_of(values: &[Value]) -> mysql::Params {
    if values.is_empty() {
        mysql::Params::Empty
    } else {
        mysql::Params::Positional(values.iter().map(to_mysql).collect())
    }
}

fn open(params: &ConnectionParams, db_name: Option<&str>) -> Result<mysql::Conn, DriverError> {
    let opts = mysql::OptsBuilder::new()
        .ip_or_hostname(Some(params.host.clone()))
        .tcp_port(params.port)
        .user(Some(params.username.clone()))
        .pass(Some(params.password.clone()))
        .db_name(db_name.map(str::to_string));
    mysql::Conn::new(opts).map_err(|e| {
        DriverError::Connect(format!(
            "connecting to mysql at {}:{}: {}",
            params.host, params.port, e
        ))
    })
}

pub struct MysqlServer {
    conn: mysql::Conn,
}

impl MysqlServer {
    pub fn connect(params: &ConnectionParams) -> Result<Self, DriverError> {
        Ok(Self {
            conn: open(params, None)?,
        })
    }
}

impl ServerConnection for MysqlServer {
    fn database_exists(&mut self, name: &str) -> Result<bool, DriverError> {
        let count: Option<i64> = self
            .conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.schemata WHERE SCHEMA_NAME = ?",
                (name,),
            )
            .map_err(|e| classify("checking database existence", e))?;
        Ok(count.unwrap_or(0) > 0)
    }

    fn create_database(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("CREATE DATABASE `{}`", check_identifier(name)?);
        self.conn
            .query_drop(sql)
            .map_err(|e| classify(&format!("creating database '{}'", name), e))
    }

    fn drop_database(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("DROP DATABASE `{}`", check_identifier(name)?);
        self.conn
            .query_drop(sql)
            .map_err(|e| classify(&format!("dropping database '{}'", name), e))
    }

    fn drop_database_if_exists(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("DROP DATABASE IF EXISTS `{}`", check_identifier(name)?);
        self.conn
            .query_drop(sql)
            .map_err(|e| classify(&format!("dropping database '{}'", name), e))
    }
}

pub struct MysqlDb {
    conn: mysql::Conn,
    in_transaction: bool,
}

impl MysqlDb {
    pub fn connect(params: &ConnectionParams, name: &str) -> Result<Self, DriverError> {
        Ok(Self {
            conn: open(params, Some(name))?,
            in_transaction: false,
        })
    }
}

impl Connection for MysqlDb {
    fn driver(&self) -> Driver {
        Driver::Mysql
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn
            .query_drop(sql)
            .map_err(|e| classify("executing statements", e))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        self.conn
            .exec_drop(sql, params_of(params))
            .map_err(|e| classify("executing statement", e))?;
        Ok(self.conn.affected_rows())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let rows: Vec<mysql::Row> = self
            .conn
            .exec(sql, params_of(params))
            .map_err(|e| classify("running query", e))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let names: Vec<String> = row
                    .columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect();
                names
                    .into_iter()
                    .zip(row.unwrap().into_iter().map(from_mysql))
                    .collect()
            })
            .collect())
    }

    fn list_tables(&mut self) -> Result<Vec<String>, DriverError> {
        self.conn
            .query_map(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                |name: String| name,
            )
            .map_err(|e| classify("listing tables", e))
    }

    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), DriverError> {
        let sql = if enabled {
            "SET FOREIGN_KEY_CHECKS = 1"
        } else {
            "SET FOREIGN_KEY_CHECKS = 0"
        };
        self.conn
            .query_drop(sql)
            .map_err(|e| classify("toggling foreign key checks", e))
    }

    fn drop_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table)?);
        self.conn
            .query_drop(sql)
            .map_err(|e| classify(&format!("dropping table '{}'", table), e))
    }

    fn truncate_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!("TRUNCATE TABLE {}", self.quote_identifier(table)?);
        self.conn
            .query_drop(sql)
            .map_err(|e| classify(&format!("truncating table '{}'", table), e))
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.conn
            .query_drop("START TRANSACTION")
            .map_err(|e| classify("beginning transaction", e))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.conn
                .query_drop("COMMIT")
                .map_err(|e| classify("committing transaction", e))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn
                .query_drop("ROLLBACK")
                .map_err(|e| classify("rolling back transaction", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_mysql(&Value::Int(3)), mysql::Value::Int(3));
        assert_eq!(to_mysql(&Value::from("x")), mysql::Value::Bytes(b"x".to_vec()));
        assert_eq!(from_mysql(mysql::Value::Bytes(b"abc".to_vec())), Value::from("abc"));
        assert_eq!(from_mysql(mysql::Value::UInt(7)), Value::Int(7));
        assert_eq!(
            from_mysql(mysql::Value::Date(2024, 1, 2, 3, 4, 5, 0)),
            Value::from("2024-01-02 03:04:05")
        );
        assert_eq!(
            from_mysql(mysql::Value::Bytes(vec![0xff, 0xfe])),
            Value::Bytes(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_empty_params_are_empty() {
        assert!(matches!(params_of(&[]), mysql::Params::Empty));
        assert!(matches!(params_of(&[Value::Int(1)]), mysql::Params::Positional(_)));
    }

    #[test]
    fn test_unreachable_server_is_connect_error() {
        let params = ConnectionParams {
            driver: Driver::Mysql,
            host: "127.0.0.1".into(),
            port: 1,
            username: "root".into(),
            password: "hunter2".into(),
        };
        let err = MysqlServer::connect(&params).err().unwrap();
        assert!(err.is_connection_failure());
    }
}
