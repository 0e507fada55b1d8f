//! Identifier validation, quoting and model label parsing.
//!
//! SQL identifiers (table and column names) cannot be bound as parameters,
//! so every identifier that reaches a statement goes through [`quote_mysql`],
//! which rejects suspicious names before escaping them.

use crate::error::{MigrateError, Result};

/// Key in the transformer registry whose chain applies to every model.
pub const WILDCARD: &str = "*";

/// MySQL's identifier length limit.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than MySQL allows.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier with backticks, doubling embedded backticks.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Split `app_label.ModelName` into its two parts.
pub fn parse_model_label(label: &str) -> Result<(&str, &str)> {
    match label.split_once('.') {
        Some((app, model))
            if !app.is_empty() && !model.is_empty() && !model.contains('.') && !is_unsafe(label) =>
        {
            Ok((app, model))
        }
        _ => Err(MigrateError::Config(format!(
            "invalid model label '{}': expected app_label.ModelName",
            label
        ))),
    }
}

/// Whether a selector names a whole app rather than one model.
pub fn is_app_selector(selector: &str) -> bool {
    !selector.contains('.')
}

/// Labels become path components; keep them free of separators.
fn is_unsafe(label: &str) -> bool {
    label.contains(['/', '\\', '\0']) || label.contains("..")
}
