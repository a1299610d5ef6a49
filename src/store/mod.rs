pub mod schema;
pub mod sqlite;
