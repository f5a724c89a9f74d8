pub mod cli;
pub mod config;

pub use cli::{Cli, Commands, GraphCommands};
pub use config::{load_config_from_path, load_or_default, AppConfig, StoreConfig};
