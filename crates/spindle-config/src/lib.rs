pub mod app;
pub mod loader;

pub use app::{AggregatorConfig, AppConfig, LoggingConfig, ServerConfig, ShutdownConfig};
pub use loader::{ConfigLoader, ENV_PREFIX, ENV_SEPARATOR};
