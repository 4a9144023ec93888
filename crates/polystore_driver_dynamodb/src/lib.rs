mod driver;
mod filter;
mod keys;
mod types;

pub use driver::DynamoBackend;
