//! MySQL/MariaDB executor implementation.
//!
//! Implements [`SqlExecutor`] over a single `mysql_async` connection. All
//! statements run as prepared statements (binary protocol), so integers and
//! floats come back typed and everything else arrives as bytes.

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Params, Row, SslOpts, Value as MyValue};
use serde_json::{Number, Value};
use tracing::{debug, info, warn};

use super::dialect::MysqlDialect;
use crate::config::DatabaseConfig;
use crate::core::traits::{QueryRows, SqlExecutor};
use crate::error::Result;

/// MySQL executor over one connection.
pub struct MysqlExecutor {
    conn: Conn,
    dialect: MysqlDialect,
}

impl MysqlExecutor {
    /// Connect using the configured database section.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => {
                Some(SslOpts::default())
            }
            other => {
                warn!("Unknown ssl_mode '{}', defaulting to prefer", other);
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let mut conn = Conn::new(builder).await?;
        conn.query_drop("SELECT 1").await?;

        info!(
            "Connected to MySQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            conn,
            dialect: MysqlDialect::new(),
        })
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for MysqlExecutor {
    fn dialect(&self) -> &str {
        self.dialect.name()
    }

    fn quote(&self, ident: &str) -> Result<String> {
        self.dialect.quote_ident(ident)
    }

    async fn query(&mut self, sql: &str, params: Vec<Value>) -> Result<QueryRows> {
        let rows: Vec<Row> = self.conn.exec(sql, to_params(params)).await?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows.iter().map(row_to_json).collect();
        Ok(QueryRows { columns, rows })
    }

    async fn execute(&mut self, sql: &str, params: Vec<Value>) -> Result<u64> {
        self.conn.exec_drop(sql, to_params(params)).await?;
        Ok(self.conn.affected_rows())
    }

    async fn execute_many(&mut self, sql: &str, params: Vec<Vec<Value>>) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        let count = params.len();
        self.conn
            .exec_batch(sql, params.into_iter().map(to_params))
            .await?;
        debug!("MySQL: executed statement for {} parameter sets", count);
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn.query_drop("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }
}

fn to_params(values: Vec<Value>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.into_iter().map(json_to_mysql).collect())
    }
}

fn row_to_json(row: &Row) -> Vec<Value> {
    let columns = row.columns_ref();
    (0..row.len())
        .map(|i| {
            let value = row.as_ref(i).cloned().unwrap_or(MyValue::NULL);
            mysql_to_json(value, columns.get(i).map(|c| c.column_type()))
        })
        .collect()
}

/// Convert a JSON value into a bound parameter.
pub fn json_to_mysql(value: Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MyValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                MyValue::UInt(u)
            } else {
                MyValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => MyValue::Bytes(s.into_bytes()),
        other => MyValue::Bytes(other.to_string().into_bytes()),
    }
}

/// Convert a driver value into JSON.
///
/// Bytes are decoded as UTF-8 with replacement; temporal values use the
/// `YYYY-MM-DD HH:MM:SS[.ffffff]` text form MySQL accepts back on import.
pub fn mysql_to_json(value: MyValue, column_type: Option<ColumnType>) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::from(i),
        MyValue::UInt(u) => Value::from(u),
        MyValue::Float(f) => float_to_json(f64::from(f)),
        MyValue::Double(f) => float_to_json(f),
        MyValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        MyValue::Date(year, month, day, hour, minute, second, micros) => {
            if column_type == Some(ColumnType::MYSQL_TYPE_DATE) {
                Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
            } else {
                let mut text = format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                );
                if micros > 0 {
                    text.push_str(&format!(".{:06}", micros));
                }
                Value::String(text)
            }
        }
        MyValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(days) * 24 + u64::from(hours);
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Value::String(text)
        }
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
