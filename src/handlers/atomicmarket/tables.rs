use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::effective_auction_state;
use super::types::AuctionState;
use super::types::AuctionTableRow;
use super::types::BalanceRow;
use super::types::BuyofferState;
use super::types::BuyofferTableRow;
use super::types::DelphiDatapointRow;
use super::types::MarketConfigRow;
use super::types::MarketplaceRow;
use super::types::SaleState;
use super::types::SaleTableRow;
use super::types::SymbolPairRow;
use super::AtomicMarketHandler;
use super::MarketJob;
use super::NAME;
use crate::constants::priorities;
use crate::db::Condition;
use crate::db::ContractDbTx;
use crate::db::Row;
use crate::db::SqlValue;
use crate::errors::DbError;
use crate::errors::FillError;
use crate::handlers::ids_to_json;
use crate::handlers::parse_asset;
use crate::types::TableDelta;

fn dbe(site: &'static str) -> impl FnOnce(DbError) -> FillError {
    move |e| FillError::handler(NAME, site, e)
}

fn row_payload<T: DeserializeOwned>(delta: &TableDelta) -> Result<T, FillError> {
    let value = delta.decoded.clone().ok_or_else(|| {
        FillError::handler(
            NAME,
            "table",
            format!("missing decoded row for table {}", delta.table),
        )
    })?;
    serde_json::from_value(value)
        .map_err(|e| FillError::handler(NAME, "table", format!("{}: {e}", delta.table)))
}

impl AtomicMarketHandler {
    pub(super) fn on_sales_delta(&mut self, delta: &TableDelta) -> Result<(), FillError> {
        if !delta.present {
            // Sales are erased on purchase/cancel; the state machine is
            // driven by the log actions.
            return Ok(());
        }
        let row: SaleTableRow = row_payload(delta)?;
        self.jobs.push(
            priorities::TABLE_SALES,
            "atomicmarket::sales_delta",
            MarketJob::SyncSale { row },
        );
        Ok(())
    }

    pub(super) fn on_auctions_delta(&mut self, delta: &TableDelta) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: AuctionTableRow = row_payload(delta)?;
        self.jobs.push(
            priorities::TABLE_AUCTIONS,
            "atomicmarket::auctions_delta",
            MarketJob::SyncAuction { row },
        );
        Ok(())
    }

    pub(super) fn on_buyoffers_delta(&mut self, delta: &TableDelta) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: BuyofferTableRow = row_payload(delta)?;
        self.jobs.push(
            priorities::TABLE_BUYOFFERS,
            "atomicmarket::buyoffers_delta",
            MarketJob::SyncBuyoffer { row },
        );
        Ok(())
    }

    pub(super) fn on_balances_delta(&mut self, delta: &TableDelta) -> Result<(), FillError> {
        let (owner, quantities) = if delta.present {
            let row: BalanceRow = row_payload(delta)?;
            (row.owner, row.quantities)
        } else {
            (delta.scope.clone(), vec![])
        };
        self.jobs.push(
            priorities::TABLE_BALANCES,
            "atomicmarket::balances_delta",
            MarketJob::SyncBalance { owner, quantities },
        );
        Ok(())
    }

    pub(super) async fn on_marketplaces_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: MarketplaceRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("marketplace_name", row.marketplace_name.as_str().into()),
            ("creator", row.creator.as_str().into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_marketplaces",
            &record,
            &["contract", "marketplace_name"],
        )
        .await
        .map_err(dbe("marketplaces_delta"))?;
        Ok(())
    }

    pub(super) async fn on_config_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: MarketConfigRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let set: Row = vec![
            ("version", row.version.as_str().into()),
            ("maker_market_fee", row.maker_market_fee.into()),
            ("taker_market_fee", row.taker_market_fee.into()),
            ("minimum_bid_increase", row.minimum_bid_increase.into()),
            (
                "minimum_auction_duration",
                (row.minimum_auction_duration as i64).into(),
            ),
            (
                "maximum_auction_duration",
                (row.maximum_auction_duration as i64).into(),
            ),
            (
                "auction_reset_duration",
                (row.auction_reset_duration as i64).into(),
            ),
            ("supported_tokens", SqlValue::Json(row.supported_tokens)),
            (
                "supported_symbol_pairs",
                SqlValue::Json(row.supported_symbol_pairs),
            ),
        ];
        let cond: Condition = vec![("contract", contract.as_str().into())];
        db.update(NAME, "atomicmarket_config", &set, &cond)
            .await
            .map_err(dbe("config_delta"))?;
        Ok(())
    }

    pub(super) async fn on_sympairs_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: SymbolPairRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("listing_symbol", row.listing_symbol.as_str().into()),
            ("settlement_symbol", row.settlement_symbol.as_str().into()),
            ("delphi_pair_name", row.delphi_pair_name.as_str().into()),
            ("invert_delphi_pair", row.invert_delphi_pair.into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_symbol_pairs",
            &record,
            &["contract", "listing_symbol", "settlement_symbol"],
        )
        .await
        .map_err(dbe("sympairs_delta"))?;
        Ok(())
    }

    /// delphioracle datapoints for a registered pair: record the median
    /// used to stamp final sale prices.
    pub(super) async fn on_datapoints_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: DelphiDatapointRow = row_payload(delta)?;
        if row.median <= 0 {
            return Ok(());
        }
        let contract = self.contract().to_owned();
        let pair_known = db
            .query_opt(
                "select delphi_pair_name from atomicmarket_symbol_pairs
                where contract = $1 and delphi_pair_name = $2;",
                &[&contract, &delta.scope],
            )
            .await
            .map_err(dbe("datapoints_delta"))?;
        if pair_known.is_none() {
            return Ok(());
        }
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("delphi_pair_name", delta.scope.as_str().into()),
            ("median", row.median.into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_prices",
            &record,
            &["contract", "delphi_pair_name", "created_at_block"],
        )
        .await
        .map_err(dbe("datapoints_delta"))?;
        Ok(())
    }

    pub(super) async fn sync_balance(
        &mut self,
        db: &mut ContractDbTx<'_>,
        owner: &str,
        quantities: &[String],
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        if quantities.is_empty() {
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("owner", owner.into()),
            ];
            db.delete(NAME, "atomicmarket_balances", &cond).await?;
            return Ok(());
        }
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("owner", owner.into()),
            ("quantities", SqlValue::Json(json!(quantities))),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_balances",
            &record,
            &["contract", "owner"],
        )
        .await?;
        Ok(())
    }

    /// Mirror the chain's sale row. Never downgrades a terminal state.
    pub(super) async fn sync_sale(
        &mut self,
        db: &mut ContractDbTx<'_>,
        row: &SaleTableRow,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let price = parse_asset(&row.listing_price);
        let existing = db
            .query_opt(
                "select state from atomicmarket_sales
                where contract = $1 and sale_id = $2;",
                &[&contract, &(row.sale_id as i64)],
            )
            .await?;

        let offer_id: SqlValue = if row.offer_id >= 0 {
            row.offer_id.into()
        } else {
            SqlValue::Null
        };

        match existing {
            None => {
                let state = if row.offer_id >= 0 {
                    SaleState::Listed
                } else {
                    SaleState::Waiting
                };
                let record: Row = vec![
                    ("contract", contract.as_str().into()),
                    ("sale_id", row.sale_id.into()),
                    ("seller", row.seller.as_str().into()),
                    ("buyer", SqlValue::Null),
                    ("asset_ids", SqlValue::Json(ids_to_json(&row.asset_ids))),
                    ("offer_id", offer_id),
                    ("listing_price", price.as_ref().map(|p| p.amount).into()),
                    (
                        "listing_symbol",
                        price.as_ref().map(|p| p.symbol_code.clone()).into(),
                    ),
                    ("settlement_symbol", row.settlement_symbol.as_str().into()),
                    ("maker_marketplace", row.maker_marketplace.as_str().into()),
                    ("taker_marketplace", SqlValue::Null),
                    ("collection_name", row.collection_name.as_str().into()),
                    ("collection_fee", row.collection_fee.into()),
                    ("state", state.as_i16().into()),
                    ("final_price", SqlValue::Null),
                    ("created_at_block", db.block_num().into()),
                    ("created_at_time", db.timestamp().into()),
                    ("updated_at_block", db.block_num().into()),
                    ("updated_at_time", db.timestamp().into()),
                ];
                db.insert(NAME, "atomicmarket_sales", &record, &["contract", "sale_id"])
                    .await?;
            }
            Some(existing) => {
                let state: i16 = existing.get(0);
                let mut set: Row = vec![
                    ("asset_ids", SqlValue::Json(ids_to_json(&row.asset_ids))),
                    ("offer_id", offer_id),
                    ("listing_price", price.as_ref().map(|p| p.amount).into()),
                    (
                        "listing_symbol",
                        price.as_ref().map(|p| p.symbol_code.clone()).into(),
                    ),
                    ("updated_at_block", db.block_num().into()),
                    ("updated_at_time", db.timestamp().into()),
                ];
                if state == SaleState::Waiting.as_i16() && row.offer_id >= 0 {
                    set.push(("state", SaleState::Listed.as_i16().into()));
                }
                let cond: Condition = vec![
                    ("contract", contract.as_str().into()),
                    ("sale_id", row.sale_id.into()),
                ];
                db.update(NAME, "atomicmarket_sales", &set, &cond).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn sync_auction(
        &mut self,
        db: &mut ContractDbTx<'_>,
        row: &AuctionTableRow,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let bid = parse_asset(&row.current_bid);
        let buyer: SqlValue = if row.current_bidder.is_empty() {
            SqlValue::Null
        } else {
            row.current_bidder.as_str().into()
        };
        let exists = db
            .query_opt(
                "select auction_id from atomicmarket_auctions
                where contract = $1 and auction_id = $2;",
                &[&contract, &(row.auction_id as i64)],
            )
            .await?
            .is_some();

        if exists {
            let mut set: Row = vec![
                ("buyer", buyer),
                ("price", bid.as_ref().map(|p| p.amount).into()),
                ("end_time", row.end_time.into()),
                ("claimed_by_seller", row.claimed_by_seller.into()),
                ("claimed_by_buyer", row.claimed_by_buyer.into()),
                ("updated_at_block", db.block_num().into()),
                ("updated_at_time", db.timestamp().into()),
            ];
            // Chain truth can move waiting -> listed, never out of a
            // terminal state.
            if row.assets_transferred {
                let current = self
                    .stored_auction_state(db, &contract, row.auction_id)
                    .await?;
                if current == AuctionState::Waiting.as_i16() {
                    set.push(("state", AuctionState::Listed.as_i16().into()));
                }
            }
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("auction_id", row.auction_id.into()),
            ];
            db.update(NAME, "atomicmarket_auctions", &set, &cond).await?;
        } else {
            let record: Row = vec![
                ("contract", contract.as_str().into()),
                ("auction_id", row.auction_id.into()),
                ("seller", row.seller.as_str().into()),
                ("buyer", buyer),
                ("asset_ids", SqlValue::Json(ids_to_json(&row.asset_ids))),
                ("price", bid.as_ref().map(|p| p.amount).into()),
                (
                    "token_symbol",
                    bid.as_ref().map(|p| p.symbol_code.clone()).into(),
                ),
                ("end_time", row.end_time.into()),
                ("bid_number", 0i32.into()),
                ("claimed_by_seller", row.claimed_by_seller.into()),
                ("claimed_by_buyer", row.claimed_by_buyer.into()),
                ("maker_marketplace", row.maker_marketplace.as_str().into()),
                ("taker_marketplace", row.taker_marketplace.as_str().into()),
                ("collection_name", row.collection_name.as_str().into()),
                ("collection_fee", row.collection_fee.into()),
                (
                    "state",
                    if row.assets_transferred {
                        AuctionState::Listed.as_i16().into()
                    } else {
                        AuctionState::Waiting.as_i16().into()
                    },
                ),
                ("created_at_block", db.block_num().into()),
                ("created_at_time", db.timestamp().into()),
                ("updated_at_block", db.block_num().into()),
                ("updated_at_time", db.timestamp().into()),
            ];
            db.insert(
                NAME,
                "atomicmarket_auctions",
                &record,
                &["contract", "auction_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn sync_buyoffer(
        &mut self,
        db: &mut ContractDbTx<'_>,
        row: &BuyofferTableRow,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let price = parse_asset(&row.price);
        let exists = db
            .query_opt(
                "select buyoffer_id from atomicmarket_buyoffers
                where contract = $1 and buyoffer_id = $2;",
                &[&contract, &(row.buyoffer_id as i64)],
            )
            .await?
            .is_some();
        if exists {
            return Ok(());
        }
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("buyoffer_id", row.buyoffer_id.into()),
            ("buyer", row.buyer.as_str().into()),
            ("seller", row.recipient.as_str().into()),
            ("asset_ids", SqlValue::Json(ids_to_json(&row.asset_ids))),
            ("price", price.as_ref().map(|p| p.amount).into()),
            (
                "token_symbol",
                price.as_ref().map(|p| p.symbol_code.clone()).into(),
            ),
            ("memo", row.memo.as_str().into()),
            ("decline_memo", SqlValue::Null),
            ("maker_marketplace", row.maker_marketplace.as_str().into()),
            ("taker_marketplace", SqlValue::Null),
            ("collection_name", row.collection_name.as_str().into()),
            ("collection_fee", row.collection_fee.into()),
            ("state", BuyofferState::Pending.as_i16().into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.insert(
            NAME,
            "atomicmarket_buyoffers",
            &record,
            &["contract", "buyoffer_id"],
        )
        .await?;
        Ok(())
    }

    /// An accepted AtomicAssets offer settles the sale built on it.
    pub(super) async fn sale_sold_by_offer(
        &mut self,
        db: &mut ContractDbTx<'_>,
        offer_id: u64,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let listed = SaleState::Listed.as_i16();
        let rows = db
            .query(
                "select sale_id, listing_price from atomicmarket_sales
                where contract = $1 and offer_id = $2 and state = $3;",
                &[&contract, &(offer_id as i64), &listed],
            )
            .await?;
        for row in rows {
            let sale_id: i64 = row.get(0);
            let listing_price: Option<i64> = row.get(1);
            let set: Row = vec![
                ("state", SaleState::Sold.as_i16().into()),
                ("final_price", listing_price.into()),
                ("updated_at_block", db.block_num().into()),
                ("updated_at_time", db.timestamp().into()),
            ];
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("sale_id", sale_id.into()),
            ];
            db.update(NAME, "atomicmarket_sales", &set, &cond).await?;
            self.notifications.stage(
                db,
                &contract,
                "sales",
                "state_change",
                json!({
                    "sale_id": sale_id.to_string(),
                    "state": SaleState::Sold.as_i16(),
                }),
                None,
            );
        }
        Ok(())
    }

    pub(super) async fn sale_purchased(
        &mut self,
        db: &mut ContractDbTx<'_>,
        sale_id: u64,
        buyer: &str,
        taker_marketplace: &str,
        intended_delphi_median: i64,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select listing_price from atomicmarket_sales
                where contract = $1 and sale_id = $2;",
                &[&contract, &(sale_id as i64)],
            )
            .await?;
        let Some(row) = row else {
            tracing::warn!("purchase of unknown sale {sale_id}");
            return Ok(());
        };
        let listing_price: Option<i64> = row.get(0);
        let set: Row = vec![
            ("state", SaleState::Sold.as_i16().into()),
            ("buyer", buyer.into()),
            ("taker_marketplace", taker_marketplace.into()),
            ("final_price", listing_price.into()),
            ("intended_delphi_median", intended_delphi_median.into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("sale_id", sale_id.into()),
        ];
        db.update(NAME, "atomicmarket_sales", &set, &cond).await?;
        self.notifications.stage(
            db,
            &contract,
            "sales",
            "state_change",
            json!({
                "sale_id": sale_id.to_string(),
                "state": SaleState::Sold.as_i16(),
                "buyer": buyer,
            }),
            None,
        );
        Ok(())
    }

    pub(super) async fn auction_bid_placed(
        &mut self,
        db: &mut ContractDbTx<'_>,
        auction_id: u64,
        bidder: &str,
        bid: &str,
        taker_marketplace: &str,
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select coalesce(max(bid_number), 0) from atomicmarket_auction_bids
                where contract = $1 and auction_id = $2;",
                &[&contract, &(auction_id as i64)],
            )
            .await?;
        let bid_number: i32 = row.map(|r| r.get(0)).unwrap_or(0);
        let amount = parse_asset(bid);
        let set: Row = vec![
            ("buyer", bidder.into()),
            ("price", amount.as_ref().map(|p| p.amount).into()),
            ("bid_number", bid_number.into()),
            ("taker_marketplace", taker_marketplace.into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", auction_id.into()),
        ];
        db.update(NAME, "atomicmarket_auctions", &set, &cond).await?;
        Ok(())
    }

    /// Stored state of an auction row.
    async fn stored_auction_state(
        &mut self,
        db: &mut ContractDbTx<'_>,
        contract: &str,
        auction_id: u64,
    ) -> Result<i16, DbError> {
        let row = db
            .query_opt(
                "select state from atomicmarket_auctions
                where contract = $1 and auction_id = $2;",
                &[&contract.to_owned(), &(auction_id as i64)],
            )
            .await?;
        Ok(row
            .map(|r| r.get(0))
            .unwrap_or(AuctionState::Waiting.as_i16()))
    }

    /// Derived consumer-facing state of an auction at block time.
    pub(super) async fn effective_auction_state_of(
        &mut self,
        db: &mut ContractDbTx<'_>,
        contract: &str,
        auction_id: u64,
    ) -> Result<i16, DbError> {
        let row = db
            .query_opt(
                "select state, end_time, buyer from atomicmarket_auctions
                where contract = $1 and auction_id = $2;",
                &[&contract.to_owned(), &(auction_id as i64)],
            )
            .await?;
        let Some(row) = row else {
            return Ok(AuctionState::Waiting.as_i16());
        };
        let state: i16 = row.get(0);
        let end_time: i64 = row.get(1);
        let buyer: Option<String> = row.get(2);
        Ok(effective_auction_state(
            state,
            end_time as u32,
            db.timestamp(),
            buyer.is_some(),
        ))
    }
}
