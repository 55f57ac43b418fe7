//! Contract handler framework.
//!
//! A handler owns a contract's domain tables and notification channels.
//! It declares a scope of action/table filters and reacts to the
//! receiver's hook calls, mutating state through the per-block database
//! transaction and deferring cross-entity work to its priority queue.

mod handler;
mod jobs;
mod notify;

pub use handler::ContractHandler;
pub use handler::Scope;
pub use handler::ScopeFilter;
pub use handler::TxMeta;
pub use jobs::Job;
pub use jobs::JobQueue;
pub use notify::chain_channel;
pub use notify::fork_payload;
pub use notify::MemorySink;
pub use notify::Notification;
pub use notify::NotificationBuffer;
pub use notify::NotificationSink;
pub use notify::RedisSink;
