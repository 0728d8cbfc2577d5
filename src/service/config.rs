// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{AppError, AppResult};

pub const DEFAULT_NAME: &str = "meshsock";
pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8900;
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;
pub const DEFAULT_MAX_CONNECTION: usize = 4;
pub const DEFAULT_DELIMITER: &str = "\r\n";
pub const DEFAULT_BUFFER_SIZE: usize = 512;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Prefix of environment variables overriding file values, e.g.
/// `MESHSOCK_NETWORK__PORT=9000`.
pub const ENV_PREFIX: &str = "MESHSOCK";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Label used in log lines.
    pub name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            name: DEFAULT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address clients connect to. The endpoint itself listens on all local
    /// addresses.
    pub ip: String,
    pub port: u16,
    pub datagram: bool,
    pub reuse_address: bool,
    /// Receive and send timeout in seconds, 0 for none.
    pub timeout_secs: u32,
    pub max_connection: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            datagram: false,
            reuse_address: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_connection: DEFAULT_MAX_CONNECTION,
        }
    }
}

impl NetworkConfig {
    pub fn ipv4(&self) -> AppResult<Ipv4Addr> {
        self.ip
            .parse()
            .map_err(|_| AppError::InvalidValue(format!("network.ip: {}", self.ip)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Message terminator for delimiter framing.
    pub delimiter: String,
    /// Record stream buffer capacity.
    pub buffer_size: usize,
    pub max_message_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            delimiter: DEFAULT_DELIMITER.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub stream: StreamConfig,
}

impl EndpointConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<EndpointConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let endpoint_config: EndpointConfig = config.try_deserialize()?;
        endpoint_config.validate()?;

        Ok(endpoint_config)
    }

    /// Load `path`, falling back to the built-in defaults when the stored
    /// parameters cannot be read or are invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> EndpointConfig {
        match Self::set_up_config(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(
                    "couldn't read endpoint parameters from {}: {}",
                    path.as_ref().to_string_lossy(),
                    e
                );
                debug!("using default endpoint parameters");
                EndpointConfig::default()
            }
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        self.network.ipv4()?;
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be positive".to_string(),
            ));
        }
        if self.stream.delimiter.is_empty() {
            return Err(AppError::InvalidValue(
                "stream.delimiter must not be empty".to_string(),
            ));
        }
        if self.stream.buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "stream.buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
