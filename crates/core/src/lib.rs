pub mod assemble;
pub mod breakdown;
pub mod condition;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod query;
pub mod time;

pub use error::{Result, TracexError};
