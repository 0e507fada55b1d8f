//! MySQL/MariaDB database driver.
//!
//! - [`MysqlDialect`]: statement builders for every engine
//! - [`MysqlExecutor`]: [`crate::core::SqlExecutor`] over `mysql_async`
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

pub mod dialect;
mod executor;

pub use dialect::MysqlDialect;
pub use executor::{json_to_mysql, mysql_to_json, MysqlExecutor};
