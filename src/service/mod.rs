pub use app_error::{AppError, AppResult};
pub use config::{
    EndpointConfig, GeneralConfig, NetworkConfig, StreamConfig, DEFAULT_PORT, ENV_PREFIX,
};
pub use endpoint::{ConnectionSet, Endpoint};
pub use tracing_config::{setup_local_tracing, setup_tracing, TracingGuard};

mod app_error;
pub mod client;
mod config;
mod endpoint;
mod tracing_config;
