mod dialect;
mod driver;

pub use dialect::SqliteDialect;
pub use driver::SqliteBackend;
