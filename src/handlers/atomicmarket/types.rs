use serde::Deserialize;
use serde_json::Value;

use crate::handlers::i64_str;
use crate::handlers::u64_str;
use crate::handlers::vec_u64_str;
use crate::types::Timestamp;

/// Stored sale lifecycle. `Invalid` only ever exists as a derived
/// state, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleState {
    Waiting = 0,
    Listed = 1,
    Canceled = 2,
    Sold = 3,
}

pub const SALE_STATE_INVALID: i16 = 4;

impl SaleState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Stored auction lifecycle. `Sold` and `Invalid` are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionState {
    Waiting = 0,
    Listed = 1,
    Canceled = 2,
}

pub const AUCTION_STATE_SOLD: i16 = 3;
pub const AUCTION_STATE_INVALID: i16 = 4;

impl AuctionState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyofferState {
    Pending = 0,
    Declined = 1,
    Canceled = 2,
    Accepted = 3,
}

impl BuyofferState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// State a sale presents to consumers: a listed sale whose backing
/// offer is no longer pending counts as invalid.
pub fn effective_sale_state(state: i16, offer_pending: bool) -> i16 {
    if state == SaleState::Listed.as_i16() && !offer_pending {
        return SALE_STATE_INVALID;
    }
    state
}

/// State an auction presents to consumers: a listed auction past its
/// end time is sold when it has a buyer, invalid otherwise, regardless
/// of any missing claim action.
pub fn effective_auction_state(
    state: i16,
    end_time_sec: u32,
    now_ms: Timestamp,
    has_buyer: bool,
) -> i16 {
    if state == AuctionState::Listed.as_i16() && (end_time_sec as i64) * 1000 < now_ms {
        if has_buyer {
            return AUCTION_STATE_SOLD;
        }
        return AUCTION_STATE_INVALID;
    }
    state
}

#[derive(Debug, Deserialize)]
pub struct LogNewSale {
    #[serde(with = "u64_str")]
    pub sale_id: u64,
    pub seller: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    pub listing_price: String,
    pub settlement_symbol: String,
    #[serde(default)]
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct LogSaleStart {
    #[serde(with = "u64_str")]
    pub sale_id: u64,
    #[serde(with = "u64_str")]
    pub offer_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct SaleId {
    #[serde(with = "u64_str")]
    pub sale_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseSale {
    pub buyer: String,
    #[serde(with = "u64_str")]
    pub sale_id: u64,
    #[serde(default, with = "i64_str")]
    pub intended_delphi_median: i64,
    #[serde(default)]
    pub taker_marketplace: String,
}

#[derive(Debug, Deserialize)]
pub struct LogNewAuction {
    #[serde(with = "u64_str")]
    pub auction_id: u64,
    pub seller: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    pub starting_bid: String,
    #[serde(default)]
    pub duration: u32,
    pub end_time: u32,
    #[serde(default)]
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct AuctionId {
    #[serde(with = "u64_str")]
    pub auction_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct AuctionBid {
    pub bidder: String,
    #[serde(with = "u64_str")]
    pub auction_id: u64,
    pub bid: String,
    #[serde(default)]
    pub taker_marketplace: String,
}

#[derive(Debug, Deserialize)]
pub struct LogNewBuyoffer {
    #[serde(with = "u64_str")]
    pub buyoffer_id: u64,
    pub buyer: String,
    pub recipient: String,
    pub price: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct BuyofferId {
    #[serde(with = "u64_str")]
    pub buyoffer_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct AcceptBuyoffer {
    #[serde(with = "u64_str")]
    pub buyoffer_id: u64,
    #[serde(default)]
    pub taker_marketplace: String,
}

#[derive(Debug, Deserialize)]
pub struct DeclineBuyoffer {
    #[serde(with = "u64_str")]
    pub buyoffer_id: u64,
    #[serde(default)]
    pub decline_memo: String,
}

/// AtomicAssets `acceptoffer`, watched for sale settlement.
#[derive(Debug, Deserialize)]
pub struct OfferRef {
    #[serde(with = "u64_str")]
    pub offer_id: u64,
}

/// `sales` table row.
#[derive(Debug, Clone, Deserialize)]
pub struct SaleTableRow {
    #[serde(with = "u64_str")]
    pub sale_id: u64,
    pub seller: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    #[serde(with = "i64_str")]
    pub offer_id: i64,
    pub listing_price: String,
    pub settlement_symbol: String,
    #[serde(default)]
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

/// `auctions` table row.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionTableRow {
    #[serde(with = "u64_str")]
    pub auction_id: u64,
    pub seller: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    pub end_time: u32,
    #[serde(default)]
    pub assets_transferred: bool,
    pub current_bid: String,
    #[serde(default)]
    pub current_bidder: String,
    #[serde(default)]
    pub claimed_by_seller: bool,
    #[serde(default)]
    pub claimed_by_buyer: bool,
    #[serde(default)]
    pub maker_marketplace: String,
    #[serde(default)]
    pub taker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

/// `buyoffers` table row.
#[derive(Debug, Clone, Deserialize)]
pub struct BuyofferTableRow {
    #[serde(with = "u64_str")]
    pub buyoffer_id: u64,
    pub buyer: String,
    pub recipient: String,
    pub price: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

/// `marketplaces` table row.
#[derive(Debug, Deserialize)]
pub struct MarketplaceRow {
    pub marketplace_name: String,
    pub creator: String,
}

/// `balances` table row.
#[derive(Debug, Deserialize)]
pub struct BalanceRow {
    pub owner: String,
    #[serde(default)]
    pub quantities: Vec<String>,
}

/// `config` singleton row.
#[derive(Debug, Deserialize)]
pub struct MarketConfigRow {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub maker_market_fee: f64,
    #[serde(default)]
    pub taker_market_fee: f64,
    #[serde(default)]
    pub minimum_bid_increase: f64,
    #[serde(default)]
    pub minimum_auction_duration: u32,
    #[serde(default)]
    pub maximum_auction_duration: u32,
    #[serde(default)]
    pub auction_reset_duration: u32,
    #[serde(default)]
    pub supported_tokens: Value,
    #[serde(default)]
    pub supported_symbol_pairs: Value,
}

/// `sympairs` table row.
#[derive(Debug, Deserialize)]
pub struct SymbolPairRow {
    pub listing_symbol: String,
    pub settlement_symbol: String,
    pub delphi_pair_name: String,
    #[serde(default)]
    pub invert_delphi_pair: bool,
}

/// delphioracle `datapoints` table row (scope = pair name).
#[derive(Debug, Deserialize)]
pub struct DelphiDatapointRow {
    #[serde(with = "u64_str")]
    pub id: u64,
    #[serde(default)]
    pub owner: String,
    #[serde(default, with = "i64_str")]
    pub value: i64,
    #[serde(default, with = "i64_str")]
    pub median: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_values() {
        assert_eq!(SaleState::Waiting.as_i16(), 0);
        assert_eq!(SaleState::Listed.as_i16(), 1);
        assert_eq!(SaleState::Canceled.as_i16(), 2);
        assert_eq!(SaleState::Sold.as_i16(), 3);
        assert_eq!(SALE_STATE_INVALID, 4);
        assert_eq!(AuctionState::Waiting.as_i16(), 0);
        assert_eq!(AuctionState::Listed.as_i16(), 1);
        assert_eq!(AuctionState::Canceled.as_i16(), 2);
        assert_eq!(AUCTION_STATE_SOLD, 3);
        assert_eq!(AUCTION_STATE_INVALID, 4);
    }

    #[test]
    fn test_effective_sale_state() {
        let listed = SaleState::Listed.as_i16();
        assert_eq!(effective_sale_state(listed, true), listed);
        assert_eq!(effective_sale_state(listed, false), SALE_STATE_INVALID);
        // Terminal states are never derived away.
        let sold = SaleState::Sold.as_i16();
        assert_eq!(effective_sale_state(sold, false), sold);
    }

    #[test]
    fn test_effective_auction_state() {
        let listed = AuctionState::Listed.as_i16();
        let end = 1_000_000u32;
        let before = (end as i64) * 1000 - 1;
        let after = (end as i64) * 1000 + 1;
        // Still running.
        assert_eq!(effective_auction_state(listed, end, before, true), listed);
        // Ended with a buyer counts as sold even without a claim action.
        assert_eq!(
            effective_auction_state(listed, end, after, true),
            AUCTION_STATE_SOLD
        );
        // Ended without a buyer.
        assert_eq!(
            effective_auction_state(listed, end, after, false),
            AUCTION_STATE_INVALID
        );
        // Canceled stays canceled.
        let canceled = AuctionState::Canceled.as_i16();
        assert_eq!(effective_auction_state(canceled, end, after, true), canceled);
    }

    #[test]
    fn test_sale_row_payload() {
        let row: SaleTableRow = serde_json::from_value(serde_json::json!({
            "sale_id": "5",
            "seller": "alice",
            "asset_ids": ["42"],
            "offer_id": "7",
            "listing_price": "100.00000000 WAX",
            "settlement_symbol": "8,WAX",
            "maker_marketplace": "",
            "collection_name": "dragons",
            "collection_fee": 0.05
        }))
        .unwrap();
        assert_eq!(row.sale_id, 5);
        assert_eq!(row.offer_id, 7);
    }
}
