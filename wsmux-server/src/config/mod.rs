//! Configuration management for wsmux server
//!
//! A TOML file with one section per concern; every field has a default,
//! so a missing file or section is not an error.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
