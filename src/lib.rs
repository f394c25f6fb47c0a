#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;
pub mod rpc;
mod session;
mod testnet;

pub use crate::common::{
    Chunk, Dist, Insertion, Key, Peer, RoutingTable, KEY_BITS, KEY_SIZE, MAX_BUCKET_SIZE_K,
    MAX_CHUNK_SIZE,
};
pub use bytes::Bytes;
pub use error::Error;
pub use rpc::{Config, Info, State};
pub use session::{Session, SessionBuilder};
pub use testnet::Testnet;

/// Alias Result to be the crate Result.
pub type Result<T, E = Error> = core::result::Result<T, E>;
