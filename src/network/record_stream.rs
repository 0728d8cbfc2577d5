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

use std::io::{self, BufRead, Read};

use tracing::{debug, error};

use super::{Receive, Socket};

/// A record of known length read from a borrowed socket through an internal
/// buffer.
///
/// The buffer is refilled only once the consumer has drained it, with one
/// fill of at most `min(capacity, bytes left in the record)` bytes. The
/// stream ends for good when the whole record has been consumed, when the
/// peer closes, or when a receive fails. The socket is never closed here.
///
/// Bytes can be pulled one at a time ([`next_byte`](Self::next_byte) or the
/// `Iterator` impl) or in bulk through `Read`/`BufRead`. A failed receive is
/// plain end of data for the byte-wise pull, while `Read`/`BufRead` report it
/// once as an error before ending.
#[derive(Debug)]
pub struct RecordStream<'a, S: Receive + ?Sized = Socket> {
    source: &'a S,
    record_len: usize,
    buffer: Box<[u8]>,
    /// Bytes taken from the socket so far, never above `record_len`.
    consumed: usize,
    pos: usize,
    end: usize,
    exhausted: bool,
    failure: Option<io::Error>,
}

impl<'a, S: Receive + ?Sized> RecordStream<'a, S> {
    /// `buffer_capacity` is raised to 1 when 0 is given.
    pub fn new(source: &'a S, record_len: usize, buffer_capacity: usize) -> Self {
        RecordStream {
            source,
            record_len,
            buffer: vec![0u8; buffer_capacity.max(1)].into_boxed_slice(),
            consumed: 0,
            pos: 0,
            end: 0,
            exhausted: false,
            failure: None,
        }
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn buffered(&self) -> usize {
        self.end - self.pos
    }

    /// True once no further refill will happen. Buffered bytes may still be
    /// pending.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.consumed >= self.record_len
    }

    fn refill(&mut self) -> bool {
        if self.is_exhausted() {
            self.exhausted = true;
            return false;
        }
        let want = self.buffer.len().min(self.record_len - self.consumed);
        match self.source.receive_fill(&mut self.buffer[..want]) {
            Ok(0) => {
                debug!(
                    "record stream ended early at {} of {} bytes",
                    self.consumed, self.record_len
                );
                self.exhausted = true;
                false
            }
            Ok(n) => {
                if n < want {
                    debug!(
                        "peer closed, record truncated at {} of {} bytes",
                        self.consumed + n,
                        self.record_len
                    );
                    self.exhausted = true;
                }
                self.consumed += n;
                self.pos = 0;
                self.end = n;
                true
            }
            Err(e) => {
                error!("record stream refill error: {}", e);
                self.exhausted = true;
                self.failure = Some(io::Error::new(e.kind(), e));
                false
            }
        }
    }

    /// Next byte of the record, or `None` at end of data.
    pub fn next_byte(&mut self) -> Option<u8> {
        if self.pos == self.end && !self.refill() {
            return None;
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Some(byte)
    }
}

impl<S: Receive + ?Sized> Iterator for RecordStream<'_, S> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.next_byte()
    }
}

impl<S: Receive + ?Sized> Read for RecordStream<'_, S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<S: Receive + ?Sized> BufRead for RecordStream<'_, S> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.end && !self.refill() {
            if let Some(e) = self.failure.take() {
                return Err(e);
            }
        }
        Ok(&self.buffer[self.pos..self.end])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_util::ScriptedSource;

    #[test]
    fn test_full_record_in_buffer_sized_refills() {
        let source = ScriptedSource::new(b"0123456789");
        let mut stream = RecordStream::new(&source, 10, 4);
        let pulled: Vec<u8> = (&mut stream).collect();
        assert_eq!(pulled, b"0123456789");
        assert_eq!(stream.consumed(), 10);
        // 4 + 4 + 2
        assert_eq!(source.calls(), 3);
        assert_eq!(stream.next_byte(), None);
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_truncated_record_ends_early() {
        let source = ScriptedSource::new(b"012345");
        let stream = RecordStream::new(&source, 10, 4);
        let pulled: Vec<u8> = stream.collect();
        assert_eq!(pulled, b"012345");
    }

    #[test]
    fn test_bytes_past_the_record_stay_on_the_socket() {
        let source = ScriptedSource::new(b"0123456789NEXT");
        let pulled: Vec<u8> = RecordStream::new(&source, 10, 4).collect();
        assert_eq!(pulled, b"0123456789");
        assert_eq!(source.remaining(), b"NEXT");
    }

    #[test]
    fn test_refill_only_when_drained() {
        let source = ScriptedSource::new(b"abcdefgh");
        let mut stream = RecordStream::new(&source, 8, 4);
        assert_eq!(stream.next_byte(), Some(b'a'));
        assert_eq!(source.calls(), 1);
        assert_eq!(stream.buffered(), 3);
        for _ in 0..3 {
            stream.next_byte();
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(stream.next_byte(), Some(b'e'));
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_empty_record_never_touches_socket() {
        let source = ScriptedSource::new(b"data");
        let mut stream = RecordStream::new(&source, 0, 4);
        assert_eq!(stream.next_byte(), None);
        assert!(stream.is_exhausted());
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_receive_failure_ends_record() {
        let source = ScriptedSource::failing(b"abc");
        let pulled: Vec<u8> = RecordStream::new(&source, 10, 2).collect();
        assert_eq!(pulled, b"ab");
    }

    #[test]
    fn test_receive_failure_is_reported_by_read() {
        let source = ScriptedSource::failing(b"abc");
        let mut stream = RecordStream::new(&source, 10, 2);
        let mut record = Vec::new();
        let err = stream.read_to_end(&mut record).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(record, b"ab");
        assert!(stream.is_exhausted());
        assert_eq!(stream.fill_buf().unwrap(), b"");
    }

    #[test]
    fn test_read_and_buf_read() {
        let source = ScriptedSource::new(b"first\nsecond\nthird");
        let mut stream = RecordStream::new(&source, 13, 5);
        let mut line = String::new();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, "first\n");
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"second\n");
        assert_eq!(source.remaining(), b"third");
    }
}
