//! Configuration management

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG;
pub use loader::{ConfigLoader, ENV_OVERRIDES};
pub use schema::*;
