//! Chain HTTP API access.
//!
//! Used once at startup for handler configuration and ABI bootstrap.
//! The block stream itself comes from the state-history socket.

mod api;
mod models;

pub use api::ChainApi;
pub use models::ChainInfo;
pub use models::TableRowsParams;
