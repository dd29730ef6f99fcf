//! One builder per engine.

mod mysql;
mod postgres;
mod sqlserver;

pub use mysql::MySqlBuilder;
pub use postgres::PostgreSqlBuilder;
pub use sqlserver::SqlServerBuilder;
