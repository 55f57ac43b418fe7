//! State-history block stream.
//!
//! Maintains a persistent duplex connection to a state-history endpoint,
//! requests block ranges, decodes the binary results through the
//! deserializer pool and hands fully decoded blocks to the receiver.

mod client;
mod models;
mod reader;
mod wire;

pub use client::ShipClient;
pub use models::BlockPos;
pub use models::GetBlocksResult;
pub use models::GetStatusResult;
pub use models::ShipResult;
pub use reader::BlockReader;
pub use reader::ReaderConfig;
pub use reader::ReaderEvent;
pub use wire::ShipRequest;
