//! Miscellaneous common structs used throughout the library.

mod chunk;
mod id;
pub mod messages;
mod peer;
mod routing_table;

pub use chunk::*;
pub use id::*;
pub use messages::*;
pub use peer::*;
pub use routing_table::*;
