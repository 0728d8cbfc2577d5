//! Network Module Implementation
//!
//! Blocking IPv4 TCP/UDP transport for the endpoint, built on `socket2`.
//!
//! # Components
//!
//! - `Socket`: owns one descriptor, with create/bind/listen/accept/connect/close,
//!   best-effort and exact-length receive, and retrying send
//! - `DelimiterReader`: reads a message up to a multi-byte terminator
//! - `RecordStream`: pulls a record of known length through a buffer refilled
//!   in bulk
//!
//! Readers and streams borrow the socket they read from; closing it stays with
//! whoever obtained it.

pub use delimiter::{Delimited, DelimiterReader};
pub use record_stream::RecordStream;
pub use socket::{Receive, Socket, SocketOption, INVALID_DESCRIPTOR, LISTEN_BACKLOG};
pub use socket_error::{SocketError, SocketResult};

mod delimiter;
mod record_stream;
mod socket;
mod socket_error;
#[cfg(test)]
mod test_util;
