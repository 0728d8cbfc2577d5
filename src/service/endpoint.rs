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

use std::collections::BTreeSet;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::network::{Delimited, DelimiterReader, Socket};

use super::{AppError, AppResult, EndpointConfig};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Descriptors of the connections currently being served.
pub type ConnectionSet = Arc<Mutex<BTreeSet<RawFd>>>;

/// An echo endpoint listening on all local addresses.
///
/// In stream mode every accepted connection is served on its own thread:
/// delimiter-framed messages are sent back followed by the delimiter until
/// the peer closes. In datagram mode each datagram is returned to its sender.
#[derive(Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    listener: Socket,
    connections: ConnectionSet,
}

impl Endpoint {
    pub fn bind(config: EndpointConfig) -> AppResult<Endpoint> {
        config.validate()?;
        let network = &config.network;
        let mut listener = Socket::new();
        listener.listen(network.port, network.datagram, network.reuse_address)?;
        // a stream listener blocks in accept, only datagram reads are bounded
        if network.datagram && network.timeout_secs > 0 {
            listener.set_timeout(network.timeout_secs)?;
        }
        info!(
            "{} listening on {}, datagram: {}",
            config.general.name,
            Socket::address_to_string(&listener.local_addr()?),
            network.datagram
        );
        Ok(Endpoint {
            config,
            listener,
            connections: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddrV4> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn active_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Serve until accepting or receiving fails for good.
    pub fn run(&self) -> AppResult<()> {
        if self.config.network.datagram {
            self.run_datagram()
        } else {
            self.run_stream()
        }
    }

    fn run_stream(&self) -> AppResult<()> {
        let max_connection = self.config.network.max_connection;
        loop {
            debug!("accept new connection");
            let mut connection = self.accept()?;
            let fd = connection.fd();
            {
                let mut connections = self.connections.lock();
                if connections.len() >= max_connection {
                    warn!(
                        "connection limit {} reached, closing fd: {}",
                        max_connection, fd
                    );
                    drop(connections);
                    connection.close()?;
                    continue;
                }
                connections.insert(fd);
            }
            if let Err(e) = self.spawn_handler(connection) {
                error!("start connection handler error: {}", e);
                self.connections.lock().remove(&fd);
            }
        }
    }

    fn spawn_handler(&self, mut connection: Socket) -> AppResult<()> {
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let connections = self.connections.clone();
        let delimiter = self.config.stream.delimiter.clone().into_bytes();
        let max_message_size = self.config.stream.max_message_size;
        let timeout_secs = self.config.network.timeout_secs;

        thread::Builder::new()
            .name(format!("connection-{}", connection_id))
            .spawn(move || {
                let fd = connection.fd();
                let result = connection
                    .set_timeout(timeout_secs)
                    .map_err(AppError::from)
                    .and_then(|_| handle_connection(&connection, &delimiter, max_message_size));
                if let Err(e) = result {
                    error!("connection {} error: {}", connection_id, e);
                }
                // whether gracefully or unexpectedly closed, release the slot
                connections.lock().remove(&fd);
                if let Err(e) = connection.close() {
                    error!("close connection {} error: {}", connection_id, e);
                }
                debug!("connection {} handler exited", connection_id);
            })?;
        Ok(())
    }

    /// Accept with exponential backoff, giving up after the wait reaches 64
    /// seconds.
    fn accept(&self) -> AppResult<Socket> {
        let mut backoff = 1;

        loop {
            match self.listener.accept() {
                Ok(socket) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::IllegalStateError(format!(
                            "accept tcp connection error: {}",
                            err
                        )));
                    }
                    warn!("accept error: {}, retry in {}s", err, backoff);
                }
            }

            thread::sleep(Duration::from_secs(backoff));
            backoff *= 2;
        }
    }

    fn run_datagram(&self) -> AppResult<()> {
        let mut buf = vec![0u8; self.config.stream.max_message_size.max(1)];
        loop {
            let (n, from) = match self.listener.receive_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.is_timeout() => {
                    trace!("no datagram within timeout");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            debug!("datagram of {} bytes from {}", n, Socket::address_to_string(&from));
            self.listener.send_to(&buf[..n], from)?;
        }
    }
}

fn handle_connection(
    connection: &Socket,
    delimiter: &[u8],
    max_message_size: usize,
) -> AppResult<()> {
    let reader = DelimiterReader::new(connection).with_limit(max_message_size);
    loop {
        match reader.read_frame(delimiter)? {
            Delimited::Complete(message) => {
                trace!("{}: message of {} bytes", connection, message.len());
                let mut reply = BytesMut::with_capacity(message.len() + delimiter.len());
                reply.extend_from_slice(&message);
                reply.extend_from_slice(delimiter);
                connection.send(&reply)?;
            }
            Delimited::Truncated(rest) => {
                if !rest.is_empty() {
                    debug!(
                        "{}: peer closed with {} unterminated bytes",
                        connection,
                        rest.len()
                    );
                }
                return Ok(());
            }
        }
    }
}
