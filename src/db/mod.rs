mod repository;
mod schema;

pub use repository::Repository;
pub use schema::{is_reserved_table, table_name};
