pub mod bootstrap;
pub mod catalog;

pub use bootstrap::{bootstrap_empty, bootstrap_with_data, parquet_schema, read_parquet};
pub use catalog::Catalog;
