mod network;
mod service;

pub use network::{
    Delimited, DelimiterReader, Receive, RecordStream, Socket, SocketError, SocketOption,
    SocketResult, INVALID_DESCRIPTOR, LISTEN_BACKLOG,
};
pub use service::client;
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ConnectionSet, Endpoint,
    EndpointConfig, GeneralConfig, NetworkConfig, StreamConfig, TracingGuard, DEFAULT_PORT,
    ENV_PREFIX,
};
