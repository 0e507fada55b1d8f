//! Database drivers.

pub mod mysql;

pub use mysql::{MysqlDialect, MysqlExecutor};
