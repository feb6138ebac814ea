// Postgres backend: one tokio-postgres client per call, no TLS.

mod connection;
mod params;
mod query;

pub use connection::PostgresConnection;
pub use query::{build_result_set, postgres_extract_value};
