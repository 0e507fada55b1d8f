//! MySQL/MariaDB statement builders.
//!
//! Every statement the engines run is built here. Identifiers are quoted
//! with backticks; values are always bound as `?` parameters except for the
//! `AUTO_INCREMENT` seed, which MySQL does not accept as a parameter.

use crate::core::identifier::quote_mysql;
use crate::core::schema::ModelMeta;
use crate::error::{MigrateError, Result};

/// MySQL/MariaDB dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub const NAME: &'static str = "mysql";

    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn column_list<S: AsRef<str>>(&self, columns: &[S]) -> Result<String> {
        Ok(columns
            .iter()
            .map(|c| self.quote_ident(c.as_ref()))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    /// Keyset page over a model.
    ///
    /// Each column is aliased to its field name. With `after_pk` the query
    /// binds the last seen primary key first; the page size is always the
    /// last parameter.
    pub fn build_page_query(
        &self,
        meta: &ModelMeta,
        filter: Option<&str>,
        after_pk: bool,
    ) -> Result<String> {
        let pk = meta
            .pk
            .as_ref()
            .ok_or_else(|| MigrateError::ModelHasNoPrimaryKey(meta.label.clone()))?;
        if let Some(fragment) = filter {
            validate_filter_fragment(&meta.label, fragment)?;
        }

        let select = meta
            .fields
            .iter()
            .map(|f| {
                Ok(format!(
                    "{} AS {}",
                    self.quote_ident(&f.column)?,
                    self.quote_ident(&f.name)?
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let pk_col = self.quote_ident(&pk.column)?;

        let mut conditions = Vec::new();
        if let Some(fragment) = filter.map(str::trim).filter(|f| !f.is_empty()) {
            conditions.push(format!("({})", fragment));
        }
        if after_pk {
            conditions.push(format!("{} > ?", pk_col));
        }

        let mut sql = format!("SELECT {} FROM {}", select, self.quote_ident(&meta.table)?);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} ASC LIMIT ?", pk_col));
        Ok(sql)
    }

    /// Probe which of `rows` keys already exist in the table.
    pub fn build_existing_keys_query(
        &self,
        table: &str,
        key_columns: &[String],
        rows: usize,
    ) -> Result<String> {
        if key_columns.is_empty() || rows == 0 {
            return Err(MigrateError::Config(
                "existing-key probe needs key columns and rows".into(),
            ));
        }
        let cols = self.column_list(key_columns)?;
        let table = self.quote_ident(table)?;

        if key_columns.len() == 1 {
            let placeholders = vec!["?"; rows].join(", ");
            Ok(format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                cols, table, cols, placeholders
            ))
        } else {
            let tuple = format!("({})", vec!["?"; key_columns.len()].join(", "));
            let tuples = vec![tuple.as_str(); rows].join(", ");
            Ok(format!(
                "SELECT {} FROM {} WHERE ({}) IN ({})",
                cols, table, cols, tuples
            ))
        }
    }

    /// Single-row INSERT, run once per row.
    pub fn build_insert(&self, table: &str, columns: &[String]) -> Result<String> {
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table)?,
            self.column_list(columns)?,
            vec!["?"; columns.len()].join(", ")
        ))
    }

    /// Single-row upsert replacing every column on duplicate key.
    pub fn build_upsert(&self, table: &str, columns: &[String]) -> Result<String> {
        let update_set = columns
            .iter()
            .map(|c| {
                let quoted = self.quote_ident(c)?;
                Ok(format!("{} = VALUES({})", quoted, quoted))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        Ok(format!(
            "{} ON DUPLICATE KEY UPDATE {}",
            self.build_insert(table, columns)?,
            update_set
        ))
    }

    /// Current AUTO_INCREMENT of a table in the connected schema.
    pub fn build_auto_increment_query(&self) -> &'static str {
        "SELECT AUTO_INCREMENT FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
    }

    pub fn build_set_auto_increment(&self, table: &str, value: u64) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} AUTO_INCREMENT = {}",
            self.quote_ident(table)?,
            value
        ))
    }
}

/// Reject filter fragments that carry their own WHERE keyword.
pub fn validate_filter_fragment(model: &str, fragment: &str) -> Result<()> {
    let has_where = fragment
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token.eq_ignore_ascii_case("where"));
    if has_where {
        return Err(MigrateError::InvalidFilterFragment {
            model: model.to_string(),
            fragment: fragment.to_string(),
        });
    }
    Ok(())
}
