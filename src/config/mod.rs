mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{Config, GatewayConfig, LoggingConfig, ScannerConfig};
