//! In-memory executor for engine tests.
//!
//! Interprets exactly the statement shapes built by
//! [`crate::drivers::mysql::MysqlDialect`]: keyset pages, existing-key
//! probes, single-row inserts and upserts, and the AUTO_INCREMENT read and
//! alter. Tables hold rows keyed by column name. Bound values are stored the
//! way MySQL would store them: booleans as 0/1, arrays and objects as text.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::identifier::quote_mysql;
use crate::core::traits::{QueryRows, SqlExecutor};
use crate::core::value::{as_i64, composite_key, RowDict};
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Default)]
pub(crate) struct MemTable {
    pk: String,
    uniques: Vec<Vec<String>>,
    rows: Vec<RowDict>,
    auto_increment: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryExecutor {
    dialect: String,
    tables: BTreeMap<String, MemTable>,
    snapshot: Option<BTreeMap<String, MemTable>>,
    fail_on: Option<(String, Value)>,
    case_insensitive: bool,
    statements: Vec<String>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            dialect: "mysql".to_string(),
            ..Self::default()
        }
    }

    /// Add a table with rows given as a JSON array of column maps.
    pub fn with_table(mut self, table: &str, pk: &str, rows: Value) -> Self {
        let rows: Vec<RowDict> = rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.as_object())
                    .map(|r| r.iter().map(|(k, v)| (k.clone(), store(v.clone()))).collect())
                    .collect()
            })
            .unwrap_or_default();
        let next = rows
            .iter()
            .filter_map(|r| r.get(pk).and_then(as_i64))
            .max()
            .map_or(1, |max| max as u64 + 1);
        self.tables.insert(
            table.to_string(),
            MemTable {
                pk: pk.to_string(),
                uniques: Vec::new(),
                rows,
                auto_increment: Some(next),
            },
        );
        self
    }

    /// Declare a unique key on a table.
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        if let Some(t) = self.tables.get_mut(table) {
            t.uniques.push(columns.iter().map(|c| c.to_string()).collect());
        }
        self
    }

    pub fn with_dialect(mut self, dialect: &str) -> Self {
        self.dialect = dialect.to_string();
        self
    }

    /// Compare key values ignoring case, like a `_ci` collation.
    pub fn with_case_insensitive_keys(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    fn key<'a, I>(&self, values: I) -> String
    where
        I: IntoIterator<Item = &'a Value>,
    {
        collate(self.case_insensitive, values)
    }

    /// Make any write of a row with `column == value` fail.
    pub fn fail_when(mut self, column: &str, value: Value) -> Self {
        self.fail_on = Some((column.to_string(), value));
        self
    }

    /// Rows of a table in primary key order.
    pub fn rows(&self, table: &str) -> Vec<RowDict> {
        let Some(t) = self.tables.get(table) else {
            return Vec::new();
        };
        let mut rows = t.rows.clone();
        rows.sort_by(|a, b| compare(a.get(&t.pk), b.get(&t.pk)));
        rows
    }

    pub fn auto_increment(&self, table: &str) -> Option<u64> {
        self.tables.get(table).and_then(|t| t.auto_increment)
    }

    pub fn set_auto_increment(&mut self, table: &str, value: u64) {
        if let Some(t) = self.tables.get_mut(table) {
            t.auto_increment = Some(value);
        }
    }

    /// Every statement run so far.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn writes(&self) -> usize {
        self.statements
            .iter()
            .filter(|s| s.starts_with("INSERT") || s.starts_with("ALTER"))
            .count()
    }

    fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::Query(format!("Table '{}' doesn't exist", name)))
    }

    fn page(&self, sql: &str, params: &[Value]) -> Result<QueryRows> {
        let body = &sql["SELECT ".len()..];
        let (select, rest) = split(body, " FROM ")?;
        let projections = select
            .split(", ")
            .map(|p| split(p, " AS ").map(|(c, a)| (unquote(c), unquote(a))))
            .collect::<Result<Vec<_>>>()?;
        let (table, rest) = split(rest, " ")?;
        let table = self.table(&unquote(table))?;
        let (cond, order) = split(rest, "ORDER BY ")?;
        let pk = unquote(order.split(' ').next().unwrap_or_default());

        let after = cond.contains("> ?").then(|| params.first()).flatten();
        let limit = params.last().and_then(as_i64).unwrap_or(0) as usize;
        let where_clause = cond.trim().strip_prefix("WHERE ").unwrap_or("");
        let filter = if where_clause.starts_with('(') {
            let end = if after.is_some() {
                where_clause.rfind(") AND ")
            } else {
                where_clause.rfind(')')
            };
            end.map(|end| &where_clause[1..end])
        } else {
            None
        };

        let mut rows: Vec<&RowDict> = Vec::new();
        for row in &table.rows {
            if let Some(fragment) = filter {
                if !eval_filter(fragment, row)? {
                    continue;
                }
            }
            if let Some(after) = after {
                if compare(row.get(&pk), Some(after)) != Ordering::Greater {
                    continue;
                }
            }
            rows.push(row);
        }
        rows.sort_by(|a, b| compare(a.get(&pk), b.get(&pk)));

        Ok(QueryRows {
            columns: projections.iter().map(|(_, alias)| alias.clone()).collect(),
            rows: rows
                .into_iter()
                .take(limit)
                .map(|row| {
                    projections
                        .iter()
                        .map(|(col, _)| row.get(col).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect(),
        })
    }

    fn probe(&self, sql: &str, params: &[Value]) -> Result<QueryRows> {
        let body = &sql["SELECT ".len()..];
        let (select, rest) = split(body, " FROM ")?;
        let columns: Vec<String> = select.split(", ").map(unquote).collect();
        let (table, _) = split(rest, " ")?;
        let table = self.table(&unquote(table))?;

        let wanted: HashSet<String> = params
            .chunks(columns.len())
            .map(|chunk| self.key(chunk.iter()))
            .collect();
        let rows = table
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>()
            })
            .filter(|values| wanted.contains(&self.key(values.iter())))
            .collect();
        Ok(QueryRows { columns, rows })
    }

    fn insert(&mut self, sql: &str, params: Vec<Value>) -> Result<u64> {
        let body = &sql["INSERT INTO ".len()..];
        let (table, rest) = split(body, " (")?;
        let table_name = unquote(table);
        let (cols, _) = split(rest, ") VALUES")?;
        let columns: Vec<String> = cols.split(", ").map(unquote).collect();
        let upsert = sql.contains(" ON DUPLICATE KEY UPDATE ");

        let row: RowDict = columns
            .iter()
            .cloned()
            .zip(params.into_iter().map(store))
            .collect();
        if let Some((column, value)) = &self.fail_on {
            if row.get(column).map(|v| composite_key([v])) == Some(composite_key([value])) {
                return Err(MigrateError::Query(format!(
                    "Incorrect value for column '{}'",
                    column
                )));
            }
        }

        let case_insensitive = self.case_insensitive;
        let table = self
            .tables
            .get_mut(&table_name)
            .ok_or_else(|| MigrateError::Query(format!("Table '{}' doesn't exist", table_name)))?;
        let key_sets: Vec<Vec<String>> = std::iter::once(vec![table.pk.clone()])
            .chain(table.uniques.iter().cloned())
            .collect();
        let existing = table.rows.iter().position(|current| {
            key_sets.iter().any(|key| {
                key.iter().all(|c| row.get(c).is_some_and(|v| !v.is_null()))
                    && collate(case_insensitive, key.iter().map(|c| row.get(c).unwrap_or(&Value::Null)))
                        == collate(
                            case_insensitive,
                            key.iter().map(|c| current.get(c).unwrap_or(&Value::Null)),
                        )
            })
        });

        match existing {
            Some(index) if upsert => {
                for (column, value) in row {
                    table.rows[index].insert(column, value);
                }
                Ok(2)
            }
            Some(_) => Err(MigrateError::Query(format!(
                "Duplicate entry for key in '{}'",
                table_name
            ))),
            None => {
                if let Some(id) = row.get(&table.pk).and_then(as_i64) {
                    let next = id as u64 + 1;
                    if table.auto_increment.map_or(true, |current| current < next) {
                        table.auto_increment = Some(next);
                    }
                }
                table.rows.push(row);
                Ok(1)
            }
        }
    }

    fn alter(&mut self, sql: &str) -> Result<u64> {
        let body = &sql["ALTER TABLE ".len()..];
        let (table, value) = split(body, " AUTO_INCREMENT = ")?;
        let value: u64 = value
            .trim()
            .parse()
            .map_err(|_| MigrateError::Query(format!("bad AUTO_INCREMENT in {}", sql)))?;
        let name = unquote(table);
        self.table(&name)?;
        self.set_auto_increment(&name, value);
        Ok(0)
    }
}

#[async_trait]
impl SqlExecutor for MemoryExecutor {
    fn dialect(&self) -> &str {
        &self.dialect
    }

    fn quote(&self, ident: &str) -> Result<String> {
        quote_mysql(ident)
    }

    async fn query(&mut self, sql: &str, params: Vec<Value>) -> Result<QueryRows> {
        self.statements.push(sql.to_string());
        if sql.starts_with("SELECT AUTO_INCREMENT") {
            let name = params.first().and_then(Value::as_str).unwrap_or_default();
            let rows = match self.tables.get(name) {
                Some(t) => vec![vec![t.auto_increment.map_or(Value::Null, |v| json!(v))]],
                None => Vec::new(),
            };
            return Ok(QueryRows {
                columns: vec!["AUTO_INCREMENT".to_string()],
                rows,
            });
        }
        if sql.starts_with("SELECT ") && sql.ends_with("LIMIT ?") {
            return self.page(sql, &params);
        }
        if sql.starts_with("SELECT ") && sql.contains(" IN (") {
            return self.probe(sql, &params);
        }
        Err(MigrateError::Query(format!("unsupported query: {}", sql)))
    }

    async fn execute(&mut self, sql: &str, params: Vec<Value>) -> Result<u64> {
        self.statements.push(sql.to_string());
        if sql.starts_with("INSERT INTO ") {
            return self.insert(sql, params);
        }
        if sql.starts_with("ALTER TABLE ") {
            return self.alter(sql);
        }
        Err(MigrateError::Query(format!("unsupported statement: {}", sql)))
    }

    async fn execute_many(&mut self, sql: &str, params: Vec<Vec<Value>>) -> Result<()> {
        for set in params {
            self.execute(sql, set).await?;
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        Ok(())
    }
}

/// Turn a JSON array of objects into rows.
pub(crate) fn rows(value: Value) -> Vec<RowDict> {
    value
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn collate<'a, I>(case_insensitive: bool, values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let key = composite_key(values);
    if case_insensitive {
        key.to_lowercase()
    } else {
        key
    }
}

fn store(value: Value) -> Value {
    match value {
        Value::Bool(b) => json!(i64::from(b)),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other,
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('`').replace("``", "`")
}

fn split<'a>(s: &'a str, sep: &str) -> Result<(&'a str, &'a str)> {
    s.split_once(sep)
        .ok_or_else(|| MigrateError::Query(format!("cannot parse '{}' around '{}'", s, sep)))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => composite_key([x]).cmp(&composite_key([y])),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// `<column> <op> <literal>` with an integer or quoted string literal.
fn eval_filter(fragment: &str, row: &RowDict) -> Result<bool> {
    let tokens: Vec<&str> = fragment.split_whitespace().collect();
    let [column, op, literal] = tokens.as_slice() else {
        return Err(MigrateError::Query(format!("unsupported filter: {}", fragment)));
    };
    let literal = match literal.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(literal.trim_matches('\'')),
    };
    let ordering = compare(row.get(&unquote(column)), Some(&literal));
    Ok(match *op {
        "=" => ordering == Ordering::Equal,
        "<>" | "!=" => ordering != Ordering::Equal,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        _ => return Err(MigrateError::Query(format!("unsupported operator: {}", op))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{FieldKind, FieldMeta, ModelMeta, PkMeta};
    use crate::drivers::mysql::MysqlDialect;

    fn meta() -> ModelMeta {
        ModelMeta {
            label: "demo.Item".into(),
            table: "demo_item".into(),
            pk: Some(PkMeta {
                field: "id".into(),
                column: "id".into(),
                auto_increment: true,
            }),
            fields: ["id", "name"]
                .iter()
                .map(|n| FieldMeta {
                    name: n.to_string(),
                    column: n.to_string(),
                    kind: FieldKind::Plain,
                })
                .collect(),
            unique_together: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_pages_follow_keyset() {
        let mut db = MemoryExecutor::new().with_table(
            "demo_item",
            "id",
            json!([{"id": 3, "name": "c"}, {"id": 1, "name": "a"}, {"id": 2, "name": "b"}]),
        );
        let dialect = MysqlDialect::new();
        let first = dialect.build_page_query(&meta(), None, false).unwrap();
        let next = dialect.build_page_query(&meta(), Some("name <> 'b'"), true).unwrap();

        let page = db.query(&first, vec![json!(2)]).await.unwrap();
        assert_eq!(page.columns, vec!["id", "name"]);
        assert_eq!(page.rows, vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]]);

        let page = db.query(&next, vec![json!(1), json!(10)]).await.unwrap();
        assert_eq!(page.rows, vec![vec![json!(3), json!("c")]]);
    }

    #[tokio::test]
    async fn test_insert_conflicts_and_rollback() {
        let mut db = MemoryExecutor::new().with_table("t", "id", json!([{"id": 1, "name": "a"}]));
        let dialect = MysqlDialect::new();
        let cols = vec!["id".to_string(), "name".to_string()];
        let insert = dialect.build_insert("t", &cols).unwrap();
        let upsert = dialect.build_upsert("t", &cols).unwrap();

        assert!(db.execute(&insert, vec![json!(1), json!("x")]).await.is_err());
        db.execute(&upsert, vec![json!(1), json!("x")]).await.unwrap();
        assert_eq!(db.rows("t")[0]["name"], json!("x"));

        db.begin().await.unwrap();
        db.execute(&insert, vec![json!(5), json!(true)]).await.unwrap();
        assert_eq!(db.rows("t")[1]["name"], json!(1));
        assert_eq!(db.auto_increment("t"), Some(6));
        db.rollback().await.unwrap();
        assert_eq!(db.rows("t").len(), 1);
    }
}
