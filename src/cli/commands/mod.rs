//! CLI command implementations

pub mod cache;
pub mod config;
pub mod deploy;
pub mod deps;

pub use cache::execute as cache;
pub use config::execute as config;
pub use deploy::execute as deploy;
pub use deps::execute as deps;
