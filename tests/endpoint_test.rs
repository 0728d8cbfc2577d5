use std::net::{Ipv4Addr, SocketAddrV4};
use std::thread;
use std::time::{Duration, Instant};

use meshsock::{
    client, setup_local_tracing, AppError, DelimiterReader, Endpoint, EndpointConfig, Socket,
};

fn start(config: EndpointConfig) -> u16 {
    // only the first test to get here installs the subscriber
    let _ = setup_local_tracing();
    let endpoint = Endpoint::bind(config).unwrap();
    let port = endpoint.local_addr().unwrap().port();
    thread::spawn(move || endpoint.run());
    port
}

fn stream_config() -> EndpointConfig {
    let mut config = EndpointConfig::default();
    config.network.port = 0;
    config.network.timeout_secs = 5;
    config
}

#[test]
fn test_request_is_echoed() {
    let port = start(stream_config());
    let reply = client::request(Ipv4Addr::LOCALHOST, port, b"hello", b"\r\n").unwrap();
    assert_eq!(&reply[..], b"hello");
}

#[test]
fn test_connection_serves_many_messages() {
    let mut config = stream_config();
    config.stream.delimiter = ";".to_string();
    let port = start(config);

    let mut socket = Socket::new();
    socket.connect(Ipv4Addr::LOCALHOST, port).unwrap();
    socket.send(b"one;two;three;").unwrap();
    let reader = DelimiterReader::new(&socket);
    assert_eq!(reader.read_to_delim_string(";").unwrap(), "one");
    assert_eq!(reader.read_to_delim_string(";").unwrap(), "two");
    assert_eq!(reader.read_to_delim_string(";").unwrap(), "three");
    socket.close().unwrap();
}

#[test]
fn test_fetch_record_reads_reply_of_known_length() {
    let mut config = stream_config();
    config.stream.buffer_size = 3;
    let port = start(config);

    let reply = client::fetch_record(Ipv4Addr::LOCALHOST, port, b"0123456789\r\n", 12, 3).unwrap();
    assert_eq!(&reply[..], b"0123456789\r\n");
}

#[test]
fn test_message_at_size_limit_is_echoed() {
    let mut config = stream_config();
    config.stream.max_message_size = 8;
    let port = start(config);

    let reply = client::request(Ipv4Addr::LOCALHOST, port, b"01234567", b"\r\n").unwrap();
    assert_eq!(&reply[..], b"01234567");
}

#[test]
fn test_oversized_message_ends_connection() {
    let mut config = stream_config();
    config.stream.max_message_size = 8;
    let port = start(config);

    let err = client::request(Ipv4Addr::LOCALHOST, port, b"far too long for it", b"\r\n")
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::IllegalStateError(_) | AppError::Socket(_)
    ));
}

#[test]
fn test_connections_over_limit_are_closed() {
    let mut config = stream_config();
    config.network.max_connection = 1;
    let port = start(config);

    let mut first = Socket::new();
    first.connect(Ipv4Addr::LOCALHOST, port).unwrap();
    first.send(b"held\r\n").unwrap();
    assert_eq!(&first.read_to_delim(b"\r\n").unwrap()[..], b"held");

    assert!(client::request(Ipv4Addr::LOCALHOST, port, b"rejected", b"\r\n").is_err());

    first.close().unwrap();
    // the slot is released once the handler notices the close
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match client::request(Ipv4Addr::LOCALHOST, port, b"accepted", b"\r\n") {
            Ok(reply) => {
                assert_eq!(&reply[..], b"accepted");
                break;
            }
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("slot was not released: {}", e),
        }
    }
}

#[test]
fn test_datagrams_are_echoed() {
    let mut config = stream_config();
    config.network.datagram = true;
    config.network.timeout_secs = 1;
    let port = start(config);

    let mut socket = Socket::new();
    socket.create_socket(true).unwrap();
    socket.set_timeout(5).unwrap();
    socket
        .send_to(b"ping", SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
        .unwrap();
    let mut buf = [0u8; 16];
    let (n, from) = socket.receive_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(from.port(), port);
}
