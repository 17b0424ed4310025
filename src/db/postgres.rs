use super::{
    check_identifier, Connection, ConnectionParams, Driver, DriverError, Row, ServerConnection,
    Value,
};
use bytes::BytesMut;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use std::error::Error;

/// Maintenance database used for server-level statements.
const SERVER_DATABASE: &str = "postgres";

fn classify(context: &str, e: postgres::Error) -> DriverError {
    let message = format!("{}: {}", context, e);
    let lost = e.is_closed()
        || e.code().is_some_and(|code| {
            let class = &code.code()[..2];
            // 08: connection exception, 28: invalid authorization
            class == "08" || class == "28"
        });
    if lost {
        DriverError::Connect(message)
    } else {
        DriverError::Query(message)
    }
}

// Postgres infers parameter types from the statement, so encode by the
// inferred type rather than by our variant.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Int(i) => int_to_sql(*i, ty, out),
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                _ => f.to_string().to_sql(&Type::TEXT, out),
            },
            Value::Text(s) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(s.trim().parse()?, ty, out),
                Type::FLOAT4 | Type::FLOAT8 => Value::Float(s.trim().parse()?).to_sql(ty, out),
                Type::BOOL => matches!(s.trim(), "1" | "t" | "true").to_sql(ty, out),
                Type::BYTEA => s.as_bytes().to_sql(ty, out),
                _ => s.as_str().to_sql(&Type::TEXT, out),
            },
            Value::Bytes(b) => b.as_slice().to_sql(&Type::BYTEA, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        _ => i.to_string().to_sql(&Type::TEXT, out),
    }
}

fn column_value(row: &postgres::Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();
    let value: Result<Value, postgres::Error> = match *ty {
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(i64::from).into()),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(i64::from).into()),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx).map(Value::from),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(f64::from).into()),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(Value::from),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(Value::from),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from),
        _ => row.try_get::<_, Option<String>>(idx).map(Value::from),
    };
    // Types without a text decoder (numeric, timestamps, ...) come back as NULL.
    value.unwrap_or(Value::Null)
}

fn connect(params: &ConnectionParams, dbname: &str) -> Result<postgres::Client, DriverError> {
    postgres::Config::new()
        .host(&params.host)
        .port(params.port)
        .user(&params.username)
        .password(&params.password)
        .dbname(dbname)
        .connect(postgres::NoTls)
        .map_err(|e| {
            DriverError::Connect(format!(
                "connecting to postgres at {}:{}: {}",
                params.host, params.port, e
            ))
        })
}

pub struct PostgresServer {
    client: postgres::Client,
}

impl PostgresServer {
    pub fn connect(params: &ConnectionParams) -> Result<Self, DriverError> {
        Ok(Self {
            client: connect(params, SERVER_DATABASE)?,
        })
    }
}

impl ServerConnection for PostgresServer {
    fn database_exists(&mut self, name: &str) -> Result<bool, DriverError> {
        let row = self
            .client
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
            .map_err(|e| classify("checking database existence", e))?;
        Ok(row.is_some())
    }

    fn create_database(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("CREATE DATABASE \"{}\"", check_identifier(name)?);
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify(&format!("creating database '{}'", name), e))
    }

    fn drop_database(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("DROP DATABASE \"{}\"", check_identifier(name)?);
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify(&format!("dropping database '{}'", name), e))
    }

    fn drop_database_if_exists(&mut self, name: &str) -> Result<(), DriverError> {
        let sql = format!("DROP DATABASE IF EXISTS \"{}\"", check_identifier(name)?);
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify(&format!("dropping database '{}'", name), e))
    }
}

pub struct PostgresDb {
    client: postgres::Client,
    in_transaction: bool,
}

impl PostgresDb {
    pub fn connect(params: &ConnectionParams, name: &str) -> Result<Self, DriverError> {
        Ok(Self {
            client: connect(params, name)?,
            in_transaction: false,
        })
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

impl Connection for PostgresDb {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.client
            .batch_execute(sql)
            .map_err(|e| classify("executing statements", e))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        self.client
            .execute(sql, &bind(params))
            .map_err(|e| classify("executing statement", e))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let rows = self
            .client
            .query(sql, &bind(params))
            .map_err(|e| classify("running query", e))?;
        Ok(rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.name().to_string(), column_value(row, i)))
                    .collect()
            })
            .collect())
    }

    fn list_tables(&mut self) -> Result<Vec<String>, DriverError> {
        let rows = self
            .client
            .query(
                "SELECT tablename::text FROM pg_catalog.pg_tables \
                 WHERE schemaname = current_schema() ORDER BY tablename",
                &[],
            )
            .map_err(|e| classify("listing tables", e))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    // Disabling constraint triggers needs superuser; drop and truncate use CASCADE instead.
    fn set_foreign_key_checks(&mut self, _enabled: bool) -> Result<(), DriverError> {
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            self.quote_identifier(table)?
        );
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify(&format!("dropping table '{}'", table), e))
    }

    fn truncate_table(&mut self, table: &str) -> Result<(), DriverError> {
        let sql = format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            self.quote_identifier(table)?
        );
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify(&format!("truncating table '{}'", table), e))
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.client
            .batch_execute("BEGIN")
            .map_err(|e| classify("beginning transaction", e))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.client
                .batch_execute("COMMIT")
                .map_err(|e| classify("committing transaction", e))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client
                .batch_execute("ROLLBACK")
                .map_err(|e| classify("rolling back transaction", e))?;
        }
        Ok(())
    }
}
