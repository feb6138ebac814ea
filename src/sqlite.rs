// SQLite backend: one rusqlite connection per call, driven on the blocking pool.

mod connection;
mod params;
mod query;

pub use connection::SqliteConnection;
pub use params::row_value_to_sqlite_value;
pub use query::{build_result_set, sqlite_extract_value};
