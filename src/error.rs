//! Main Crate Error

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
/// chunkdht crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    /// Errors related to parsing DHT messages.
    BencodeError(#[from] serde_bencode::Error),

    #[error("Invalid Key size, expected 20, got {0}")]
    /// Keys are exactly 20 bytes.
    InvalidKeySize(usize),

    #[error("Invalid Key encoding: {0}")]
    /// Hex encoded key could not be parsed.
    InvalidKeyEncoding(String),

    /// Indicates that the message transaction_id is not two bytes.
    #[error("Invalid transaction_id: {0:?}")]
    InvalidTransactionId(Vec<u8>),

    #[error("Endpoint {0:?} does not resolve to a socket address")]
    /// Endpoints are `"host:port"` strings.
    InvalidEndpoint(String),

    #[error("Bootstrap peer {endpoint} did not answer within {elapsed:?}")]
    /// Startup gave up on reaching the bootstrap peer.
    BootstrapTimeout { endpoint: String, elapsed: Duration },

    #[error("Chunk of {size} bytes exceeds the maximum of {max} bytes")]
    /// Chunks have to fit in a single Store datagram.
    ChunkTooLarge { size: usize, max: usize },

    #[error("Invalid message: {0}")]
    /// A decoded message violates the protocol.
    InvalidMessage(&'static str),
}
