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

//! One-shot client calls against an endpoint.

use std::io::Read;
use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::network::{Delimited, DelimiterReader, RecordStream, Socket};

use super::{AppError, AppResult};

/// Send `message` followed by `delimiter` and return the reply read up to the
/// delimiter. A reply cut short by the endpoint closing is an error.
pub fn request(
    address: Ipv4Addr,
    port: u16,
    message: &[u8],
    delimiter: &[u8],
) -> AppResult<Bytes> {
    let mut socket = Socket::new();
    socket.connect(address, port)?;
    let result = exchange(&socket, message, delimiter);
    socket.close()?;
    result
}

fn exchange(socket: &Socket, message: &[u8], delimiter: &[u8]) -> AppResult<Bytes> {
    let mut frame = BytesMut::with_capacity(message.len() + delimiter.len());
    frame.extend_from_slice(message);
    frame.extend_from_slice(delimiter);
    socket.send(&frame)?;

    match DelimiterReader::new(socket).read_frame(delimiter)? {
        Delimited::Complete(reply) => Ok(reply),
        Delimited::Truncated(partial) => Err(AppError::IllegalStateError(format!(
            "{} closed after {} bytes of reply",
            socket,
            partial.len()
        ))),
    }
}

/// Connect, send `request` unless it is empty, then pull a record of `len`
/// bytes through a [`RecordStream`] of `buffer_size` bytes.
///
/// The result is shorter than `len` when the endpoint closes early. A failed
/// receive is returned as an error.
pub fn fetch_record(
    address: Ipv4Addr,
    port: u16,
    request: &[u8],
    len: usize,
    buffer_size: usize,
) -> AppResult<Bytes> {
    let mut socket = Socket::new();
    socket.connect(address, port)?;
    let result = pull_record(&socket, request, len, buffer_size);
    socket.close()?;
    result
}

fn pull_record(socket: &Socket, request: &[u8], len: usize, buffer_size: usize) -> AppResult<Bytes> {
    if !request.is_empty() {
        socket.send(request)?;
    }
    let mut stream = RecordStream::new(socket, len, buffer_size);
    let mut record = Vec::with_capacity(len);
    stream.read_to_end(&mut record)?;
    debug!("fetched {} of {} record bytes", record.len(), len);
    Ok(Bytes::from(record))
}
