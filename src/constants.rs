use crate::types::BlockNum;

/// Prefix of all notification channels.
pub const CHANNEL_PREFIX: &str = "eosio-contract-api";

/// System account publishing ABI updates.
pub const SYSTEM_ACCOUNT: &str = "eosio";

/// Priorities for per-block update jobs. Higher runs first.
///
/// Table-sync jobs must land before the action jobs that read the rows
/// they write, hence the two bands.
pub mod priorities {
    pub const TABLE_BALANCES: i32 = 90;
    pub const TABLE_MARKETPLACES: i32 = 80;
    pub const TABLE_SALES: i32 = 70;
    pub const TABLE_AUCTIONS: i32 = 65;
    pub const TABLE_BUYOFFERS: i32 = 60;
    pub const ACTION_UPDATE_SALE: i32 = 50;
    pub const ACTION_UPDATE_AUCTION: i32 = 45;
    pub const ACTION_UPDATE_BUYOFFER: i32 = 40;
    pub const ACTION_UPDATE_OFFER: i32 = 30;
}

pub mod settings {
    use super::BlockNum;

    /// Default number of deserializer workers.
    pub const DS_POOL_SIZE: usize = 4;

    /// Default number of blocks acknowledged in one ack message.
    pub const SHIP_ACK_BATCH: u32 = 10;

    /// Default bound on decoded blocks in flight between reader and receiver.
    pub const SHIP_WINDOW: usize = 20;

    /// Default port of the `/status` endpoint.
    pub const MONITOR_PORT: u16 = 9101;

    /// Database retries per block before halting.
    pub const DB_RETRIES: u32 = 3;

    /// Reconnect backoff bounds.
    pub const BACKOFF_BASE_MS: u64 = 500;
    pub const BACKOFF_CAP_MS: u64 = 30_000;

    /// Blocks to wait before retrying a failed block on a database error.
    pub const DB_RETRY_DELAY_MS: u64 = 1_000;

    /// Maximum number of blocks that can be rolled back.
    ///
    /// If exceeded, the affected handlers have to be resynced from scratch.
    pub const ROLLBACK_HORIZON: BlockNum = 400;
}
