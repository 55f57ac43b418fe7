use serde_json::json;
use serde_json::Value;

use super::types::AcceptBuyoffer;
use super::types::AuctionBid;
use super::types::AuctionId;
use super::types::AuctionState;
use super::types::BuyofferId;
use super::types::BuyofferState;
use super::types::DeclineBuyoffer;
use super::types::LogNewAuction;
use super::types::LogNewBuyoffer;
use super::types::LogNewSale;
use super::types::LogSaleStart;
use super::types::OfferRef;
use super::types::PurchaseSale;
use super::types::SaleId;
use super::types::SaleState;
use super::AtomicMarketHandler;
use super::MarketJob;
use super::LOGS_TABLE;
use super::NAME;
use crate::constants::priorities;
use crate::db::Condition;
use crate::db::ContractDbTx;
use crate::db::Row;
use crate::db::SqlValue;
use crate::errors::DbError;
use crate::errors::FillError;
use crate::framework::TxMeta;
use crate::handlers::ids_to_json;
use crate::handlers::insert_log;
use crate::handlers::parse_asset;
use crate::types::ActionTrace;

fn dbe(site: &'static str) -> impl FnOnce(DbError) -> FillError {
    move |e| FillError::handler(NAME, site, e)
}

fn touched(db: &ContractDbTx<'_>) -> [(&'static str, SqlValue); 2] {
    [
        ("updated_at_block", db.block_num().into()),
        ("updated_at_time", db.timestamp().into()),
    ]
}

impl AtomicMarketHandler {
    async fn log(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
        relation_name: &str,
        relation_id: &str,
        data: &Value,
    ) -> Result<(), FillError> {
        if !self.args.store_logs {
            return Ok(());
        }
        let contract = self.contract().to_owned();
        insert_log(
            db,
            NAME,
            LOGS_TABLE,
            &contract,
            relation_name,
            relation_id,
            &trace.name,
            data,
            tx,
            trace.global_sequence,
        )
        .await
        .map_err(dbe("log"))
    }

    pub(super) async fn on_lognewsale(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogNewSale = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let price = parse_asset(&act.listing_price);
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("sale_id", act.sale_id.into()),
            ("seller", act.seller.as_str().into()),
            ("buyer", SqlValue::Null),
            ("asset_ids", SqlValue::Json(ids_to_json(&act.asset_ids))),
            ("offer_id", SqlValue::Null),
            (
                "listing_price",
                price.as_ref().map(|p| p.amount).into(),
            ),
            (
                "listing_symbol",
                price.as_ref().map(|p| p.symbol_code.clone()).into(),
            ),
            ("settlement_symbol", act.settlement_symbol.as_str().into()),
            ("maker_marketplace", act.maker_marketplace.as_str().into()),
            ("taker_marketplace", SqlValue::Null),
            ("collection_name", act.collection_name.as_str().into()),
            ("collection_fee", act.collection_fee.into()),
            ("state", SaleState::Waiting.as_i16().into()),
            ("final_price", SqlValue::Null),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(NAME, "atomicmarket_sales", &row, &["contract", "sale_id"])
            .await
            .map_err(dbe("lognewsale"))?;

        self.log(
            db,
            tx,
            trace,
            "sale",
            &act.sale_id.to_string(),
            &json!({"seller": act.seller}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "sales",
            "create",
            json!({"sale_id": act.sale_id.to_string(), "seller": act.seller}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logsalestart(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogSaleStart = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![
            ("offer_id", act.offer_id.into()),
            ("state", SaleState::Listed.as_i16().into()),
        ];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("sale_id", act.sale_id.into()),
        ];
        db.update(NAME, "atomicmarket_sales", &set, &cond)
            .await
            .map_err(dbe("logsalestart"))?;

        self.log(
            db,
            tx,
            trace,
            "sale",
            &act.sale_id.to_string(),
            &json!({"offer_id": act.offer_id.to_string()}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "sales",
            "state_change",
            json!({
                "sale_id": act.sale_id.to_string(),
                "state": SaleState::Listed.as_i16(),
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_cancelsale(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: SaleId = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("state", SaleState::Canceled.as_i16().into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("sale_id", act.sale_id.into()),
        ];
        db.update(NAME, "atomicmarket_sales", &set, &cond)
            .await
            .map_err(dbe("cancelsale"))?;

        self.log(db, tx, trace, "sale", &act.sale_id.to_string(), &json!({}))
            .await?;
        self.notifications.stage(
            db,
            &contract,
            "sales",
            "state_change",
            json!({
                "sale_id": act.sale_id.to_string(),
                "state": SaleState::Canceled.as_i16(),
            }),
            Some(tx),
        );
        Ok(())
    }

    /// Settlement happens in a job so it runs after this block's sale
    /// row sync has landed.
    pub(super) fn on_purchasesale(&mut self, trace: &ActionTrace) -> Result<(), FillError> {
        let act: PurchaseSale = self.payload(trace)?;
        self.jobs.push(
            priorities::ACTION_UPDATE_SALE,
            "atomicmarket::purchasesale",
            MarketJob::SalePurchased {
                sale_id: act.sale_id,
                buyer: act.buyer,
                taker_marketplace: act.taker_marketplace,
                intended_delphi_median: act.intended_delphi_median,
            },
        );
        Ok(())
    }

    pub(super) fn on_acceptoffer(&mut self, trace: &ActionTrace) -> Result<(), FillError> {
        let act: OfferRef = self.payload(trace)?;
        self.jobs.push(
            priorities::ACTION_UPDATE_SALE,
            "atomicmarket::acceptoffer",
            MarketJob::SaleSoldByOffer {
                offer_id: act.offer_id,
            },
        );
        Ok(())
    }

    pub(super) async fn on_lognewauct(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogNewAuction = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let bid = parse_asset(&act.starting_bid);
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", act.auction_id.into()),
            ("seller", act.seller.as_str().into()),
            ("buyer", SqlValue::Null),
            ("asset_ids", SqlValue::Json(ids_to_json(&act.asset_ids))),
            ("price", bid.as_ref().map(|p| p.amount).into()),
            (
                "token_symbol",
                bid.as_ref().map(|p| p.symbol_code.clone()).into(),
            ),
            ("end_time", act.end_time.into()),
            ("bid_number", 0i32.into()),
            ("claimed_by_seller", false.into()),
            ("claimed_by_buyer", false.into()),
            ("maker_marketplace", act.maker_marketplace.as_str().into()),
            ("taker_marketplace", SqlValue::Null),
            ("collection_name", act.collection_name.as_str().into()),
            ("collection_fee", act.collection_fee.into()),
            ("state", AuctionState::Waiting.as_i16().into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_auctions",
            &row,
            &["contract", "auction_id"],
        )
        .await
        .map_err(dbe("lognewauct"))?;

        self.log(
            db,
            tx,
            trace,
            "auction",
            &act.auction_id.to_string(),
            &json!({"seller": act.seller}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "auctions",
            "create",
            json!({"auction_id": act.auction_id.to_string(), "seller": act.seller}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logauctstart(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: AuctionId = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let waiting = AuctionState::Waiting.as_i16();
        let mut set: Row = vec![("state", AuctionState::Listed.as_i16().into())];
        set.extend(touched(db));
        let mut cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", act.auction_id.into()),
        ];
        cond.push(("state", waiting.into()));
        db.update(NAME, "atomicmarket_auctions", &set, &cond)
            .await
            .map_err(dbe("logauctstart"))?;

        self.log(
            db,
            tx,
            trace,
            "auction",
            &act.auction_id.to_string(),
            &json!({}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "auctions",
            "state_change",
            json!({
                "auction_id": act.auction_id.to_string(),
                "state": AuctionState::Listed.as_i16(),
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_cancelauct(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: AuctionId = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("state", AuctionState::Canceled.as_i16().into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", act.auction_id.into()),
        ];
        db.update(NAME, "atomicmarket_auctions", &set, &cond)
            .await
            .map_err(dbe("cancelauct"))?;

        self.log(
            db,
            tx,
            trace,
            "auction",
            &act.auction_id.to_string(),
            &json!({}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "auctions",
            "state_change",
            json!({
                "auction_id": act.auction_id.to_string(),
                "state": AuctionState::Canceled.as_i16(),
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_auctionbid(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: AuctionBid = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let bid = parse_asset(&act.bid);

        let row = db
            .query_opt(
                "select bid_number from atomicmarket_auctions
                where contract = $1 and auction_id = $2;",
                &[&contract, &(act.auction_id as i64)],
            )
            .await
            .map_err(dbe("auctionbid"))?;
        let row = row.ok_or_else(|| {
            FillError::handler(
                NAME,
                "auctionbid",
                format!("unknown auction {}", act.auction_id),
            )
        })?;
        let bid_number: i32 = row.get::<_, i32>(0) + 1;

        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", act.auction_id.into()),
            ("bid_number", bid_number.into()),
            ("account", act.bidder.as_str().into()),
            ("amount", bid.as_ref().map(|p| p.amount).into()),
            (
                "txid",
                SqlValue::Bytea(hex::decode(&tx.txid).unwrap_or_default()),
            ),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_auction_bids",
            &record,
            &["contract", "auction_id", "bid_number"],
        )
        .await
        .map_err(dbe("auctionbid"))?;

        self.jobs.push(
            priorities::ACTION_UPDATE_AUCTION,
            "atomicmarket::auctionbid",
            MarketJob::AuctionBidPlaced {
                auction_id: act.auction_id,
                bidder: act.bidder.clone(),
                bid: act.bid.clone(),
                taker_marketplace: act.taker_marketplace.clone(),
            },
        );

        self.log(
            db,
            tx,
            trace,
            "auction",
            &act.auction_id.to_string(),
            &json!({"bidder": act.bidder, "bid": act.bid}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "bids",
            "create",
            json!({
                "auction_id": act.auction_id.to_string(),
                "bid_number": bid_number,
                "account": act.bidder,
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_auction_claim(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
        claim_column: &'static str,
    ) -> Result<(), FillError> {
        let act: AuctionId = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![(claim_column, true.into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("auction_id", act.auction_id.into()),
        ];
        db.update(NAME, "atomicmarket_auctions", &set, &cond)
            .await
            .map_err(dbe("auction_claim"))?;

        self.log(
            db,
            tx,
            trace,
            "auction",
            &act.auction_id.to_string(),
            &json!({"claim": claim_column}),
        )
        .await?;

        // The claim implies the auction settled; report the derived state.
        let state = self
            .effective_auction_state_of(db, &contract, act.auction_id)
            .await
            .map_err(dbe("auction_claim"))?;
        self.notifications.stage(
            db,
            &contract,
            "auctions",
            "state_change",
            json!({"auction_id": act.auction_id.to_string(), "state": state}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_lognewbuyo(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogNewBuyoffer = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let price = parse_asset(&act.price);
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("buyoffer_id", act.buyoffer_id.into()),
            ("buyer", act.buyer.as_str().into()),
            ("seller", act.recipient.as_str().into()),
            ("asset_ids", SqlValue::Json(ids_to_json(&act.asset_ids))),
            ("price", price.as_ref().map(|p| p.amount).into()),
            (
                "token_symbol",
                price.as_ref().map(|p| p.symbol_code.clone()).into(),
            ),
            ("memo", act.memo.as_str().into()),
            ("decline_memo", SqlValue::Null),
            ("maker_marketplace", act.maker_marketplace.as_str().into()),
            ("taker_marketplace", SqlValue::Null),
            ("collection_name", act.collection_name.as_str().into()),
            ("collection_fee", act.collection_fee.into()),
            ("state", BuyofferState::Pending.as_i16().into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicmarket_buyoffers",
            &row,
            &["contract", "buyoffer_id"],
        )
        .await
        .map_err(dbe("lognewbuyo"))?;

        self.log(
            db,
            tx,
            trace,
            "buyoffer",
            &act.buyoffer_id.to_string(),
            &json!({"buyer": act.buyer}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "buyoffers",
            "create",
            json!({"buyoffer_id": act.buyoffer_id.to_string(), "buyer": act.buyer}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_cancelbuyo(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: BuyofferId = self.payload(trace)?;
        self.buyoffer_state(db, tx, trace, act.buyoffer_id, BuyofferState::Canceled, None, None)
            .await
    }

    pub(super) async fn on_acceptbuyo(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: AcceptBuyoffer = self.payload(trace)?;
        self.buyoffer_state(
            db,
            tx,
            trace,
            act.buyoffer_id,
            BuyofferState::Accepted,
            Some(act.taker_marketplace),
            None,
        )
        .await
    }

    pub(super) async fn on_declinebuyo(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: DeclineBuyoffer = self.payload(trace)?;
        self.buyoffer_state(
            db,
            tx,
            trace,
            act.buyoffer_id,
            BuyofferState::Declined,
            None,
            Some(act.decline_memo),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn buyoffer_state(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
        buyoffer_id: u64,
        state: BuyofferState,
        taker_marketplace: Option<String>,
        decline_memo: Option<String>,
    ) -> Result<(), FillError> {
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("state", state.as_i16().into())];
        if let Some(taker) = &taker_marketplace {
            set.push(("taker_marketplace", taker.as_str().into()));
        }
        if let Some(memo) = &decline_memo {
            set.push(("decline_memo", memo.as_str().into()));
        }
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("buyoffer_id", buyoffer_id.into()),
        ];
        db.update(NAME, "atomicmarket_buyoffers", &set, &cond)
            .await
            .map_err(dbe("buyoffer_state"))?;

        self.log(
            db,
            tx,
            trace,
            "buyoffer",
            &buyoffer_id.to_string(),
            &json!({"state": state.as_i16()}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "buyoffers",
            "state_change",
            json!({"buyoffer_id": buyoffer_id.to_string(), "state": state.as_i16()}),
            Some(tx),
        );
        Ok(())
    }
}
