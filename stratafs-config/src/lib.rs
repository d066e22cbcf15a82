//! Configuration generation and loading for the stratafs runtime.

mod loader;
mod models;

pub use loader::{ConfigSource, load_from_env, load_from_file, parse_from_str};
pub use models::{CatalogConfig, Config, TiersConfig};
