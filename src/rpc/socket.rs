//! UDP socket layer: the listening socket serving requests, and blocking outbound requests.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace};

use crate::common::{
    resolve_endpoint, ErrorSpecific, Message, MessageType, RequestSpecific, ResponseSpecific,
};

pub const VERSION: [u8; 4] = [b'C', b'K', 0, 1]; // "CK" version 01
/// Largest UDP payload, big enough for a Store carrying a full chunk.
const MAX_DATAGRAM_SIZE: usize = 65_507;
/// How long the listener blocks on an empty socket before checking for shutdown.
pub const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The socket a session listens on for requests from other peers.
#[derive(Debug)]
pub struct KrpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl KrpcSocket {
    /// Bind to the given `"host:port"` endpoint.
    pub fn bind(endpoint: &str) -> crate::Result<Self> {
        let address = resolve_endpoint(endpoint)?;
        let socket = UdpSocket::bind(address)?;

        socket.set_read_timeout(Some(LISTEN_POLL_INTERVAL))?;

        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // === Public Methods ===

    /// Send a response to the given address.
    pub fn response(&self, address: SocketAddr, transaction_id: u16, response: ResponseSpecific) {
        let message = response_message(MessageType::Response(response), transaction_id);

        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending response message");
        });
    }

    /// Send an error to the given address.
    pub fn error(&self, address: SocketAddr, transaction_id: u16, error: ErrorSpecific) {
        let message = response_message(MessageType::Error(error), transaction_id);

        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending error message");
        });
    }

    /// Receives a single request on the socket, waiting at most [LISTEN_POLL_INTERVAL].
    ///
    /// Responses and errors arriving here are stray and dropped, undecodable requests
    /// are answered with an error.
    pub fn recv_request(&self) -> Option<(u16, RequestSpecific, SocketAddr)> {
        let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, from)) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Request from port 0"
                    );
                    return None;
                }

                match Message::from_bytes(bytes) {
                    Ok(Message {
                        transaction_id,
                        message_type: MessageType::Request(request),
                        ..
                    }) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?request,
                            ?from,
                            "Received request message"
                        );

                        return Some((transaction_id, request, from));
                    }
                    Ok(message) => {
                        trace!(
                            context = "socket_validation",
                            ?message,
                            ?from,
                            "Unexpected response on the listening socket"
                        );
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid Bencode message."
                        );

                        if let Some(reply) = Message::error_reply_for(bytes) {
                            let _ = self.send(from, reply);
                        }
                    }
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    fn send(&self, address: SocketAddr, message: Message) -> Result<(), RpcError> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", ?message, ?address);

        Ok(())
    }
}

/// Send a request to `address` from an ephemeral socket and block until the matching
/// response arrives or `timeout` elapses.
pub fn request(
    address: SocketAddr,
    request: RequestSpecific,
    timeout: Duration,
) -> Result<ResponseSpecific, RpcError> {
    let socket = match address {
        SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
        SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
    };

    let transaction_id: u16 = rand::thread_rng().gen();
    let message = Message {
        transaction_id,
        version: Some(VERSION.to_vec()),
        message_type: MessageType::Request(request),
    };

    socket.send_to(&message.to_bytes()?, address)?;
    trace!(context = "socket_message_sending", ?message, ?address);

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RpcError::Timeout);
        }
        socket.set_read_timeout(Some(remaining))?;

        let (amt, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(RpcError::Timeout)
            }
            Err(e) => return Err(e.into()),
        };

        if !compare_socket_addr(&address, &from) {
            trace!(
                context = "socket_validation",
                message = "Response from wrong address"
            );
            continue;
        }

        let message = match Message::from_bytes(&buf[..amt]) {
            Ok(message) => message,
            Err(error) => {
                trace!(context = "socket_error", ?error, ?from, "Invalid response");
                continue;
            }
        };

        if message.transaction_id != transaction_id {
            trace!(
                context = "socket_validation",
                message = "Unexpected response id"
            );
            continue;
        }

        trace!(context = "socket_message_receiving", ?message, ?from);

        return match message.message_type {
            MessageType::Response(response) => Ok(response),
            MessageType::Error(error) => Err(RpcError::Remote(error)),
            MessageType::Request(_) => Err(RpcError::UnexpectedResponse),
        };
    }
}

fn response_message(message: MessageType, request_tid: u16) -> Message {
    Message {
        transaction_id: request_tid,
        version: Some(VERSION.to_vec()),
        message_type: message,
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors of a single request to a peer.
pub enum RpcError {
    #[error("Request timed out")]
    /// No matching response within the request timeout.
    Timeout,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    /// Encoding the request, decoding the response, or resolving the endpoint failed.
    Message(#[from] crate::Error),

    #[error("Peer answered with error {}: {}", .0.code, .0.description)]
    /// The peer answered with an error message.
    Remote(ErrorSpecific),

    #[error("Peer answered with an unexpected response")]
    /// The response does not match the request's method.
    UnexpectedResponse,
}

impl RpcError {
    /// Returns `true` if the peer could not be reached at all.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, RpcError::Timeout | RpcError::IO(_) | RpcError::Message(_))
    }
}

// Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
fn compare_socket_addr(a: &SocketAddr, b: &SocketAddr) -> bool {
    if a.port() != b.port() {
        return false;
    }

    if a.ip().is_unspecified() {
        return true;
    }

    a.ip() == b.ip()
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::common::{Key, Peer, PingResponseArguments, RequestTypeSpecific};

    use super::*;

    fn ping(requester: &Peer) -> RequestSpecific {
        RequestSpecific {
            requester: requester.clone(),
            request_type: RequestTypeSpecific::Ping,
        }
    }

    #[test]
    fn request_response() {
        let server = KrpcSocket::bind("127.0.0.1:0").unwrap();
        let server_address = server.local_addr();

        let requester = Peer::new(Key::random(), "127.0.0.1:1");
        let responder = Peer::new(Key::random(), server_address.to_string());

        let expected_request = ping(&requester);
        let response_peer = responder.clone();

        let server_thread = thread::spawn(move || loop {
            if let Some((tid, request, from)) = server.recv_request() {
                assert_eq!(request, expected_request);

                server.response(
                    from,
                    tid,
                    ResponseSpecific::Ping(PingResponseArguments {
                        responder: response_peer,
                    }),
                );
                break;
            }
        });

        let response = request(server_address, ping(&requester), DEFAULT_TIMEOUT).unwrap();

        assert_eq!(
            response,
            ResponseSpecific::Ping(PingResponseArguments { responder })
        );

        server_thread.join().unwrap();
    }

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn request_timeout() {
        // Bound but never answering.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = silent.local_addr().unwrap();

        let started = Instant::now();
        let result = request(
            address,
            ping(&Peer::new(Key::random(), "127.0.0.1:1")),
            Duration::from_millis(100),
        );

        assert!(matches!(result, Err(RpcError::Timeout)));
        assert!(result.unwrap_err().is_transport_failure());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn remote_error() {
        let server = KrpcSocket::bind("127.0.0.1:0").unwrap();
        let server_address = server.local_addr();

        let server_thread = thread::spawn(move || loop {
            if let Some((tid, _, from)) = server.recv_request() {
                server.error(
                    from,
                    tid,
                    ErrorSpecific {
                        code: ErrorSpecific::GENERIC,
                        description: "Generic Error".to_string(),
                    },
                );
                break;
            }
        });

        let result = request(
            server_address,
            ping(&Peer::new(Key::random(), "127.0.0.1:1")),
            DEFAULT_TIMEOUT,
        );

        match result {
            Err(RpcError::Remote(error)) => assert_eq!(error.code, ErrorSpecific::GENERIC),
            other => panic!("expected remote error, got {other:?}"),
        }

        server_thread.join().unwrap();
    }

    #[test]
    fn ignore_response_from_wrong_address() {
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target_address = target.local_addr().unwrap();

        let impostor = KrpcSocket::bind("127.0.0.1:0").unwrap();

        let impostor_thread = thread::spawn(move || {
            let mut buf = [0_u8; 1024];
            let (amt, from) = target.recv_from(&mut buf).unwrap();
            let message = Message::from_bytes(&buf[..amt]).unwrap();

            impostor.response(
                from,
                message.transaction_id,
                ResponseSpecific::Ping(PingResponseArguments {
                    responder: Peer::new(Key::random(), "127.0.0.1:1"),
                }),
            );
        });

        let result = request(
            target_address,
            ping(&Peer::new(Key::random(), "127.0.0.1:1")),
            Duration::from_millis(300),
        );

        assert!(matches!(result, Err(RpcError::Timeout)));

        impostor_thread.join().unwrap();
    }

    #[test]
    fn unknown_method_gets_error_reply() {
        let server = KrpcSocket::bind("127.0.0.1:0").unwrap();
        let server_address = server.local_addr();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client
            .send_to(b"d1:ad2:id3:abce1:q4:vote1:t2:ab1:y1:qe", server_address)
            .unwrap();

        assert!(server.recv_request().is_none());

        let mut buf = [0_u8; 1024];
        let (amt, _) = client.recv_from(&mut buf).unwrap();
        let reply = Message::from_bytes(&buf[..amt]).unwrap();

        assert!(matches!(
            reply.message_type,
            MessageType::Error(ErrorSpecific {
                code: ErrorSpecific::METHOD_UNKNOWN,
                ..
            })
        ));
    }
}
