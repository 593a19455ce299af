//! Configuration support
//!
//! Environment variable access with `.env` file layering. The loader never
//! mutates the process environment; process env always wins over file
//! values.

pub mod env;

pub use env::EnvLoader;
