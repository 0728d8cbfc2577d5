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

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::{Receive, Socket, SocketError, SocketResult};

/// Outcome of [`DelimiterReader::read_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimited {
    /// The delimiter was found; it is not part of the bytes.
    Complete(Bytes),
    /// The peer closed first; holds everything received, possibly nothing.
    Truncated(Bytes),
}

impl Delimited {
    pub fn into_bytes(self) -> Bytes {
        match self {
            Delimited::Complete(bytes) | Delimited::Truncated(bytes) => bytes,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Delimited::Complete(_))
    }
}

/// Reads delimiter-terminated messages from a borrowed socket, one byte per
/// receive call.
///
/// The matcher keeps a cursor into the delimiter and a `part` buffer holding
/// bytes that match a prefix of it. On a mismatch the pending `part` is
/// flushed as ordinary data and the mismatching byte is appended as data
/// too, without being compared with the start of the delimiter again. An
/// occurrence that begins inside flushed bytes is therefore missed: with
/// `\r\n` as delimiter the input `\r\r\n` does not terminate a message.
#[derive(Debug)]
pub struct DelimiterReader<'a, S: Receive + ?Sized = Socket> {
    source: &'a S,
    max_len: Option<usize>,
}

impl<'a, S: Receive + ?Sized> DelimiterReader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        DelimiterReader {
            source,
            max_len: None,
        }
    }

    /// Fail with [`SocketError::MessageTooLarge`] once more than `max_len`
    /// message bytes accumulate without a delimiter. Bytes held as a partial
    /// delimiter match do not count.
    pub fn with_limit(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Collect bytes until `delim` has been read, returning what came before
    /// it. The delimiter itself is consumed and dropped.
    ///
    /// When the peer closes first, everything read so far is returned,
    /// including a pending partial match, and the caller has to notice the
    /// missing delimiter. A failing receive is returned as an error.
    pub fn read_to_delim(&self, delim: &[u8]) -> SocketResult<Bytes> {
        self.read_frame(delim).map(Delimited::into_bytes)
    }

    /// Like [`read_to_delim`](Self::read_to_delim), but tells a terminated
    /// message apart from input cut short by the peer closing.
    pub fn read_frame(&self, delim: &[u8]) -> SocketResult<Delimited> {
        if delim.is_empty() {
            return Err(SocketError::InvalidArgument("delimiter must not be empty"));
        }
        let mut ret = BytesMut::new();
        let mut part = BytesMut::with_capacity(delim.len());
        let mut cursor = 0;
        let mut byte = [0u8; 1];
        loop {
            if self.source.receive(&mut byte, false)? == 0 {
                trace!("peer closed before delimiter, {} bytes pending", ret.len() + part.len());
                ret.extend_from_slice(&part);
                return Ok(Delimited::Truncated(ret.freeze()));
            }
            let val = byte[0];
            if val == delim[cursor] {
                part.put_u8(val);
                cursor += 1;
                if cursor == delim.len() {
                    return Ok(Delimited::Complete(ret.freeze()));
                }
            } else {
                if !part.is_empty() {
                    ret.extend_from_slice(&part);
                    part.clear();
                    cursor = 0;
                }
                ret.put_u8(val);
            }
            if let Some(limit) = self.max_len {
                if ret.len() > limit {
                    return Err(SocketError::MessageTooLarge { limit });
                }
            }
        }
    }

    /// [`read_to_delim`](Self::read_to_delim) for text protocols; invalid
    /// UTF-8 is replaced.
    pub fn read_to_delim_string(&self, delim: &str) -> SocketResult<String> {
        let bytes = self.read_to_delim(delim.as_bytes())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
