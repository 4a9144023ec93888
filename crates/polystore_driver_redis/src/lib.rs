mod driver;
mod filter_match;
mod keys;

pub use driver::RedisBackend;
