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

use std::io;
use std::net::SocketAddrV4;

pub type SocketResult<T> = Result<T, SocketError>;

/// Failure of a socket operation.
///
/// Every variant backed by a syscall keeps the originating `io::Error`, so the
/// OS code stays available through [`SocketError::os_code`].
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket allocation failed: {0}")]
    Resource(#[source] io::Error),

    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("listen failed: {0}")]
    Listen(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("set socket option {option} failed: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("address query failed: {0}")]
    Address(#[source] io::Error),

    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("socket is not open")]
    NotOpen,
}

impl SocketError {
    fn io_source(&self) -> Option<&io::Error> {
        match self {
            SocketError::Resource(e)
            | SocketError::Listen(e)
            | SocketError::Accept(e)
            | SocketError::Send(e)
            | SocketError::Receive(e)
            | SocketError::Address(e) => Some(e),
            SocketError::Bind { source, .. }
            | SocketError::Connect { source, .. }
            | SocketError::SocketOption { source, .. } => Some(source),
            SocketError::InvalidAddress(_)
            | SocketError::InvalidArgument(_)
            | SocketError::MessageTooLarge { .. }
            | SocketError::NotOpen => None,
        }
    }

    /// Raw OS error code, when the failure came from a syscall.
    pub fn os_code(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }

    /// Portable classification of the underlying failure.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            SocketError::InvalidAddress(_) | SocketError::InvalidArgument(_) => {
                io::ErrorKind::InvalidInput
            }
            SocketError::MessageTooLarge { .. } => io::ErrorKind::InvalidData,
            SocketError::NotOpen => io::ErrorKind::NotConnected,
            other => other
                .io_source()
                .map(io::Error::kind)
                .unwrap_or(io::ErrorKind::Other),
        }
    }

    /// True when the failure is a configured send/receive timeout expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}
