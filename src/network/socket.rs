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

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Socket as Socket2, Type};
use tracing::{debug, error, trace, warn};

use super::delimiter::DelimiterReader;
use super::{SocketError, SocketResult};

/// Descriptor value reported by [`Socket::fd`] for an unopened or closed socket.
pub const INVALID_DESCRIPTOR: RawFd = -1;

/// Pending-connection queue length used by [`Socket::listen`].
pub const LISTEN_BACKLOG: i32 = 5;

/// Consecutive "temporarily unavailable" write results tolerated without any
/// forward progress before `send` gives up. With a send timeout set, one such
/// result already means the deadline passed and `send` fails at once.
const SEND_STALL_LIMIT: usize = 64;

/// Standard socket options surfaced by [`Socket::set_socket_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    ReuseAddress(bool),
    /// `None` blocks indefinitely.
    ReceiveTimeout(Option<Duration>),
    /// `None` blocks indefinitely.
    SendTimeout(Option<Duration>),
}

impl SocketOption {
    pub fn name(&self) -> &'static str {
        match self {
            SocketOption::ReuseAddress(_) => "SO_REUSEADDR",
            SocketOption::ReceiveTimeout(_) => "SO_RCVTIMEO",
            SocketOption::SendTimeout(_) => "SO_SNDTIMEO",
        }
    }
}

/// Byte-level receive contract shared by [`Socket`] and anything a
/// [`DelimiterReader`] or [`RecordStream`](super::RecordStream) can sit on.
pub trait Receive {
    /// Best-effort (`exact == false`) or exact-length receive, see
    /// [`Socket::receive`].
    fn receive(&self, buf: &mut [u8], exact: bool) -> SocketResult<usize>;

    /// Fill `buf`, stopping early only when the peer closes. See
    /// [`Socket::receive_fill`].
    fn receive_fill(&self, buf: &mut [u8]) -> SocketResult<usize>;
}

/// An IPv4 TCP or UDP socket owning at most one descriptor.
///
/// A `Socket` starts unopened, becomes open through [`create_socket`],
/// [`listen`] or [`connect`], and returns to the unopened state on [`close`].
/// It is move-only: the descriptor is released exactly once, either by
/// `close` or when the value is dropped.
///
/// [`create_socket`]: Socket::create_socket
/// [`listen`]: Socket::listen
/// [`connect`]: Socket::connect
/// [`close`]: Socket::close
#[derive(Debug, Default)]
pub struct Socket {
    inner: Option<Socket2>,
}

impl Socket {
    /// An unopened socket.
    pub fn new() -> Self {
        Socket { inner: None }
    }

    fn open(&self) -> SocketResult<&Socket2> {
        self.inner.as_ref().ok_or(SocketError::NotOpen)
    }

    /// Allocate a stream (TCP) or datagram (UDP) descriptor.
    ///
    /// A descriptor already held by this socket is released first.
    pub fn create_socket(&mut self, datagram: bool) -> SocketResult<RawFd> {
        debug!("create socket, datagram: {}", datagram);
        if let Some(previous) = self.inner.take() {
            warn!("create socket replaces open fd: {}", previous.as_raw_fd());
        }
        let (ty, protocol) = if datagram {
            (Type::DGRAM, Protocol::UDP)
        } else {
            (Type::STREAM, Protocol::TCP)
        };
        let socket = Socket2::new(Domain::IPV4, ty, Some(protocol)).map_err(|e| {
            error!("create socket error: {}", e);
            SocketError::Resource(e)
        })?;
        let fd = socket.as_raw_fd();
        self.inner = Some(socket);
        debug!("created socket fd: {}", fd);
        Ok(fd)
    }

    /// Bind to `address:port`. `address` is a host-order IPv4 address; `0`
    /// means any local address and port `0` asks for an ephemeral port.
    ///
    /// The socket stays open when binding fails.
    pub fn bind(&self, port: u16, address: u32) -> SocketResult<()> {
        let socket = self.open().inspect_err(|_| {
            error!("bind: socket is not initialized");
        })?;
        let addr = SocketAddrV4::new(Ipv4Addr::from(address), port);
        debug!("bind fd: {} to {}", socket.as_raw_fd(), addr);
        socket.bind(&SockAddr::from(addr)).map_err(|e| {
            error!("bind fd: {} to {} error: {}", socket.as_raw_fd(), addr, e);
            SocketError::Bind { addr, source: e }
        })
    }

    /// Open a socket, optionally mark it address-reusable, bind it to
    /// `ANY:port` and, for stream sockets, start listening with a backlog of
    /// [`LISTEN_BACKLOG`].
    ///
    /// Datagram sockets have no connection queue and stop after binding. The
    /// first failing step is returned and later steps are not attempted.
    pub fn listen(&mut self, port: u16, datagram: bool, reuse_address: bool) -> SocketResult<()> {
        debug!("listen port: {}, datagram: {}", port, datagram);
        self.create_socket(datagram)?;
        if reuse_address {
            self.set_reuse_address(true)?;
        }
        self.bind(port, u32::from(Ipv4Addr::UNSPECIFIED))?;
        if !datagram {
            let socket = self.open()?;
            socket.listen(LISTEN_BACKLOG).map_err(|e| {
                error!("listen fd: {} error: {}", socket.as_raw_fd(), e);
                SocketError::Listen(e)
            })?;
        }
        Ok(())
    }

    /// Block until a peer connects and return it as a new socket.
    ///
    /// The listening socket is left unchanged and keeps listening.
    pub fn accept(&self) -> SocketResult<Socket> {
        let listener = self.open()?;
        debug!("accepting on fd: {}", listener.as_raw_fd());
        let (socket, peer) = listener.accept().map_err(|e| {
            error!("accept on fd: {} error: {}", listener.as_raw_fd(), e);
            SocketError::Accept(e)
        })?;
        debug!(
            "accepted fd: {} from {:?}",
            socket.as_raw_fd(),
            peer.as_socket_ipv4()
        );
        Ok(Socket {
            inner: Some(socket),
        })
    }

    /// Blocking connect to `address:port`.
    ///
    /// An unopened socket gets a stream descriptor first. When the connect
    /// fails the socket closes itself and is unopened again.
    pub fn connect(&mut self, address: Ipv4Addr, port: u16) -> SocketResult<()> {
        let addr = SocketAddrV4::new(address, port);
        debug!("connecting to {}", addr);
        if !self.is_valid() {
            self.create_socket(false)?;
        }
        let result = self.open()?.connect(&SockAddr::from(addr));
        match result {
            Ok(()) => {
                debug!("connected to {}", addr);
                Ok(())
            }
            Err(e) => {
                error!("connect to {} error: {}", addr, e);
                self.close()?;
                Err(SocketError::Connect { addr, source: e })
            }
        }
    }

    /// [`connect`](Socket::connect) to a dotted-decimal address.
    pub fn connect_str(&mut self, address: &str, port: u16) -> SocketResult<()> {
        let address: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| SocketError::InvalidAddress(address.to_string()))?;
        self.connect(address, port)
    }

    /// Write all of `data`.
    ///
    /// Partial writes are resumed, and writes reporting a temporarily
    /// unavailable condition are retried. An expired send timeout and any
    /// other failure abort; an unknown prefix of `data` may have been sent by
    /// then.
    pub fn send(&self, data: &[u8]) -> SocketResult<usize> {
        let socket = self.open()?;
        trace!("send fd: {} raw binary of length: {}", socket.as_raw_fd(), data.len());
        let stall_limit = match socket.write_timeout() {
            Ok(Some(_)) => 1,
            _ => SEND_STALL_LIMIT,
        };
        write_retrying(socket, data, stall_limit).map_err(|e| {
            error!("send fd: {} error: {}", socket.as_raw_fd(), e);
            SocketError::Send(e)
        })
    }

    pub fn send_str(&self, value: &str) -> SocketResult<usize> {
        self.send(value.as_bytes())
    }

    /// Send `value` in native byte order. Only meaningful between endpoints
    /// sharing the same endianness.
    pub fn send_u16(&self, value: u16) -> SocketResult<usize> {
        trace!("send 16bit value: {:#06x}", value);
        self.send(&value.to_ne_bytes())
    }

    /// Send `value` in native byte order. Only meaningful between endpoints
    /// sharing the same endianness.
    pub fn send_u32(&self, value: u32) -> SocketResult<usize> {
        trace!("send 32bit value: {:#010x}", value);
        self.send(&value.to_ne_bytes())
    }

    /// Receive into `buf`.
    ///
    /// With `exact == false` this is a single read: it returns whatever was
    /// available, `0` when the peer closed in an orderly way, or an error.
    ///
    /// With `exact == true` reads repeat until `buf` is full and the result
    /// is `buf.len()`. If the peer closes first, or a read fails, the result
    /// is `0`: a partial delivery and a failure are deliberately not told
    /// apart here. Use [`receive_fill`](Socket::receive_fill) to see how many
    /// bytes arrived.
    pub fn receive(&self, buf: &mut [u8], exact: bool) -> SocketResult<usize> {
        let socket = self.open()?;
        if !exact {
            let mut reader = socket;
            return reader.read(buf).map_err(|e| {
                error!("receive fd: {} error: {}", socket.as_raw_fd(), e);
                SocketError::Receive(e)
            });
        }
        match fill_from(socket, buf) {
            Ok(n) if n == buf.len() => Ok(n),
            Ok(n) => {
                debug!(
                    "receive fd: {} peer closed after {} of {} bytes",
                    socket.as_raw_fd(),
                    n,
                    buf.len()
                );
                Ok(0)
            }
            Err(e) => {
                error!("receive fd: {} error: {}", socket.as_raw_fd(), e);
                Ok(0)
            }
        }
    }

    /// Read until `buf` is full or the peer closes, returning the number of
    /// bytes obtained. Read failures are reported as errors.
    pub fn receive_fill(&self, buf: &mut [u8]) -> SocketResult<usize> {
        let socket = self.open()?;
        fill_from(socket, buf).map_err(|e| {
            error!("receive fd: {} error: {}", socket.as_raw_fd(), e);
            SocketError::Receive(e)
        })
    }

    /// Receive one datagram along with the sender's address.
    pub fn receive_from(&self, buf: &mut [u8]) -> SocketResult<(usize, SocketAddrV4)> {
        let socket = self.open()?;
        // SAFETY: `recv_from` only writes initialized bytes into the slice and
        // `buf` is already initialized, so viewing it as `MaybeUninit<u8>` is sound.
        let uninit: &mut [MaybeUninit<u8>] = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<MaybeUninit<u8>>(), buf.len())
        };
        let (n, from) = socket.recv_from(uninit).map_err(|e| {
            error!("recvfrom fd: {} error: {}", socket.as_raw_fd(), e);
            SocketError::Receive(e)
        })?;
        let from = from
            .as_socket_ipv4()
            .ok_or_else(|| SocketError::InvalidAddress(format!("{:?}", from)))?;
        Ok((n, from))
    }

    /// Send one datagram to `addr`.
    pub fn send_to(&self, data: &[u8], addr: SocketAddrV4) -> SocketResult<usize> {
        let socket = self.open()?;
        socket.send_to(data, &SockAddr::from(addr)).map_err(|e| {
            error!("sendto fd: {} {} error: {}", socket.as_raw_fd(), addr, e);
            SocketError::Send(e)
        })
    }

    pub fn set_socket_option(&self, option: SocketOption) -> SocketResult<()> {
        let socket = self.open()?;
        let result = match option {
            SocketOption::ReuseAddress(reuse) => socket.set_reuse_address(reuse),
            SocketOption::ReceiveTimeout(timeout) => socket.set_read_timeout(timeout),
            SocketOption::SendTimeout(timeout) => socket.set_write_timeout(timeout),
        };
        result.map_err(|e| {
            error!("{} on fd: {} error: {}", option.name(), socket.as_raw_fd(), e);
            SocketError::SocketOption {
                option: option.name(),
                source: e,
            }
        })
    }

    /// Bound every blocking receive and send by `seconds`; `0` removes the
    /// bound. The receive timeout is set first, and a failure there leaves
    /// the send timeout untouched.
    pub fn set_timeout(&self, seconds: u32) -> SocketResult<()> {
        let timeout = (seconds > 0).then(|| Duration::from_secs(u64::from(seconds)));
        self.set_socket_option(SocketOption::ReceiveTimeout(timeout))?;
        self.set_socket_option(SocketOption::SendTimeout(timeout))
    }

    pub fn set_reuse_address(&self, value: bool) -> SocketResult<()> {
        debug!("set reuse address: {}", value);
        self.set_socket_option(SocketOption::ReuseAddress(value))
    }

    /// Release the descriptor. Closing an unopened socket is a no-op.
    pub fn close(&mut self) -> SocketResult<()> {
        if let Some(socket) = self.inner.take() {
            debug!("close fd: {}", socket.as_raw_fd());
        }
        Ok(())
    }

    /// True unless the socket is unopened or was closed through this value.
    /// Says nothing about whether the peer is still connected.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn fd(&self) -> RawFd {
        self.inner
            .as_ref()
            .map_or(INVALID_DESCRIPTOR, AsRawFd::as_raw_fd)
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> SocketResult<SocketAddrV4> {
        let addr = self.open()?.local_addr().map_err(SocketError::Address)?;
        addr.as_socket_ipv4()
            .ok_or_else(|| SocketError::InvalidAddress(format!("{:?}", addr)))
    }

    pub fn peer_addr(&self) -> SocketResult<SocketAddrV4> {
        let addr = self.open()?.peer_addr().map_err(SocketError::Address)?;
        addr.as_socket_ipv4()
            .ok_or_else(|| SocketError::InvalidAddress(format!("{:?}", addr)))
    }

    /// Render an address as `a.b.c.d [port]`.
    pub fn address_to_string(addr: &SocketAddrV4) -> String {
        format!("{} [{}]", addr.ip(), addr.port())
    }

    /// Read up to and excluding `delim`, see [`DelimiterReader::read_to_delim`].
    pub fn read_to_delim(&self, delim: &[u8]) -> SocketResult<Bytes> {
        DelimiterReader::new(self).read_to_delim(delim)
    }
}

impl Receive for Socket {
    fn receive(&self, buf: &mut [u8], exact: bool) -> SocketResult<usize> {
        Socket::receive(self, buf, exact)
    }

    fn receive_fill(&self, buf: &mut [u8]) -> SocketResult<usize> {
        Socket::receive_fill(self, buf)
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd: {}", self.fd())
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.fd() == other.fd()
    }
}

impl Eq for Socket {}

impl PartialOrd for Socket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Socket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fd().cmp(&other.fd())
    }
}

/// Write the whole of `data`, resuming after partial writes and interrupted
/// calls, and retrying temporarily-unavailable results until `stall_limit` of
/// them in a row make no progress.
fn write_retrying<W: Write>(mut writer: W, data: &[u8], stall_limit: usize) -> io::Result<usize> {
    let mut written = 0;
    let mut stalls = 0;
    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                written += n;
                stalls = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                stalls += 1;
                if stalls >= stall_limit {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

/// Read until `buf` is full or the reader reports end of stream.
fn fill_from<R: Read>(mut reader: R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    enum Step {
        Take(usize),
        Unavailable,
        Broken,
    }

    struct ScriptedWriter {
        plan: VecDeque<Step>,
        sent: Vec<u8>,
    }

    impl ScriptedWriter {
        fn new(plan: Vec<Step>) -> Self {
            ScriptedWriter {
                plan: plan.into(),
                sent: Vec::new(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.plan.pop_front().unwrap_or(Step::Take(usize::MAX)) {
                Step::Take(n) => {
                    let n = n.min(buf.len());
                    self.sent.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Step::Unavailable => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Step::Broken => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ChunkedReader {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    #[test]
    fn test_send_resumes_after_unavailable() {
        let mut writer = ScriptedWriter::new(vec![
            Step::Take(3),
            Step::Unavailable,
            Step::Unavailable,
            Step::Take(2),
            Step::Unavailable,
        ]);
        let sent = write_retrying(&mut writer, b"hello world", SEND_STALL_LIMIT).unwrap();
        assert_eq!(sent, 11);
        assert_eq!(writer.sent, b"hello world");
    }

    #[test]
    fn test_send_aborts_on_hard_error() {
        let mut writer = ScriptedWriter::new(vec![Step::Take(4), Step::Broken]);
        let err = write_retrying(&mut writer, b"hello world", SEND_STALL_LIMIT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.sent, b"hell");
    }

    #[test]
    fn test_send_gives_up_without_progress() {
        let plan = (0..SEND_STALL_LIMIT).map(|_| Step::Unavailable).collect();
        let mut writer = ScriptedWriter::new(plan);
        let err = write_retrying(&mut writer, b"x", SEND_STALL_LIMIT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(writer.sent.is_empty());
    }

    #[test]
    fn test_send_with_deadline_fails_on_first_stall() {
        let mut writer = ScriptedWriter::new(vec![Step::Take(2), Step::Unavailable, Step::Take(9)]);
        let err = write_retrying(&mut writer, b"hello world", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(writer.sent, b"he");
    }

    #[test]
    fn test_fill_collects_chunks_and_stops_at_close() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from(vec![Ok(b"ab".to_vec()), Ok(b"cde".to_vec())]),
        };
        let mut buf = [0u8; 8];
        assert_eq!(fill_from(&mut reader, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"abcde");
    }

    #[test]
    fn test_fill_skips_interrupted_reads() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from(vec![
                Ok(b"ab".to_vec()),
                Err(io::Error::from(io::ErrorKind::Interrupted)),
                Ok(b"cd".to_vec()),
            ]),
        };
        let mut buf = [0u8; 4];
        assert_eq!(fill_from(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn test_unopened_socket() {
        let mut socket = Socket::new();
        assert!(!socket.is_valid());
        assert_eq!(socket.fd(), INVALID_DESCRIPTOR);
        assert_eq!(socket.to_string(), "fd: -1");
        assert!(matches!(socket.bind(0, 0), Err(SocketError::NotOpen)));
        assert!(matches!(socket.send(b"x"), Err(SocketError::NotOpen)));
        assert!(matches!(socket.accept(), Err(SocketError::NotOpen)));
        assert!(socket.close().is_ok());
    }

    #[test]
    fn test_option_names() {
        assert_eq!(SocketOption::ReuseAddress(true).name(), "SO_REUSEADDR");
        assert_eq!(SocketOption::ReceiveTimeout(None).name(), "SO_RCVTIMEO");
        assert_eq!(SocketOption::SendTimeout(None).name(), "SO_SNDTIMEO");
    }

    #[test]
    fn test_address_to_string() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 1), 8080);
        assert_eq!(Socket::address_to_string(&addr), "192.168.4.1 [8080]");
    }
}
