pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ClientSeed, LoggingConfig, ServerConfig, UserSeed};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{GatehouseServer, ServerBuilder, build_app, build_state};
