mod dialect;
mod driver;
mod types;

pub use dialect::MysqlDialect;
pub use driver::MysqlBackend;
