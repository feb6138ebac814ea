mod mapping;
mod result_set;
mod row;

pub use mapping::{MappingError, from_row};
pub use result_set::ResultSet;
pub use row::CustomDbRow;
