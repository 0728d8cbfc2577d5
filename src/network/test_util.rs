use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;

use super::{Receive, SocketError, SocketResult};

/// In-memory peer: hands out `data`, then reports an orderly close, or a
/// connection reset when built with [`ScriptedSource::failing`].
pub(crate) struct ScriptedSource {
    data: RefCell<VecDeque<u8>>,
    fail_at_end: bool,
    calls: Cell<usize>,
}

impl ScriptedSource {
    pub(crate) fn new(data: &[u8]) -> Self {
        ScriptedSource {
            data: RefCell::new(data.iter().copied().collect()),
            fail_at_end: false,
            calls: Cell::new(0),
        }
    }

    pub(crate) fn failing(data: &[u8]) -> Self {
        ScriptedSource {
            fail_at_end: true,
            ..ScriptedSource::new(data)
        }
    }

    pub(crate) fn remaining(&self) -> Vec<u8> {
        self.data.borrow().iter().copied().collect()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }

    fn take(&self, buf: &mut [u8]) -> SocketResult<usize> {
        let mut data = self.data.borrow_mut();
        if data.is_empty() && !buf.is_empty() && self.fail_at_end {
            return Err(SocketError::Receive(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )));
        }
        let n = buf.len().min(data.len());
        for (slot, byte) in buf.iter_mut().zip(data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Receive for ScriptedSource {
    fn receive(&self, buf: &mut [u8], exact: bool) -> SocketResult<usize> {
        if !exact {
            self.calls.set(self.calls.get() + 1);
            return self.take(buf);
        }
        match self.receive_fill(buf) {
            Ok(n) if n == buf.len() => Ok(n),
            _ => Ok(0),
        }
    }

    fn receive_fill(&self, buf: &mut [u8]) -> SocketResult<usize> {
        self.calls.set(self.calls.get() + 1);
        let mut filled = 0;
        while filled < buf.len() {
            match self.take(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}
