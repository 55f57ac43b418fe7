mod actions;
mod tables;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_postgres::Client;

use crate::chain::ChainApi;
use crate::chain::TableRowsParams;
use crate::config::Config;
use crate::db;
use crate::db::ContractDbTx;
use crate::errors::DbError;
use crate::errors::FillError;
use crate::framework::ContractHandler;
use crate::framework::JobQueue;
use crate::framework::NotificationBuffer;
use crate::framework::NotificationSink;
use crate::framework::Scope;
use crate::framework::ScopeFilter;
use crate::framework::TxMeta;
use crate::types::ActionTrace;
use crate::types::Block;
use crate::types::TableDelta;

use types::AuctionTableRow;
use types::BuyofferTableRow;
use types::SaleTableRow;

const NAME: &str = "atomicmarket";
const LOGS_TABLE: &str = "atomicmarket_logs";

const TABLES: [&str; 10] = [
    "atomicmarket_sales",
    "atomicmarket_auctions",
    "atomicmarket_auction_bids",
    "atomicmarket_buyoffers",
    "atomicmarket_marketplaces",
    "atomicmarket_balances",
    "atomicmarket_symbol_pairs",
    "atomicmarket_prices",
    "atomicmarket_config",
    "atomicmarket_logs",
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtomicMarketArgs {
    pub atomicmarket_account: String,
    pub atomicassets_account: String,
    pub delphioracle_account: String,
    #[serde(default = "default_true")]
    pub store_logs: bool,
}

enum MarketJob {
    SyncBalance {
        owner: String,
        quantities: Vec<String>,
    },
    SyncSale {
        row: SaleTableRow,
    },
    SyncAuction {
        row: AuctionTableRow,
    },
    SyncBuyoffer {
        row: BuyofferTableRow,
    },
    /// An AtomicAssets offer backing a listed sale was accepted: the
    /// sale is settled. Runs after the sale row sync of the same block.
    SaleSoldByOffer {
        offer_id: u64,
    },
    SalePurchased {
        sale_id: u64,
        buyer: String,
        taker_marketplace: String,
        intended_delphi_median: i64,
    },
    AuctionBidPlaced {
        auction_id: u64,
        bidder: String,
        bid: String,
        taker_marketplace: String,
    },
}

/// Maintains sales, auctions, buy-offers, bids, marketplaces, the token
/// list, symbol pairs and oracle-linked pricing for one AtomicMarket
/// deployment.
pub struct AtomicMarketHandler {
    args: AtomicMarketArgs,
    scope: Scope,
    notifications: NotificationBuffer,
    jobs: JobQueue<MarketJob>,
    sink: Arc<dyn NotificationSink>,
}

impl AtomicMarketHandler {
    pub fn new(
        args: &serde_json::Value,
        config: &Config,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, FillError> {
        let args: AtomicMarketArgs = serde_json::from_value(args.clone())
            .map_err(|e| FillError::Config(format!("atomicmarket args: {e}")))?;
        let market = args.atomicmarket_account.clone();
        let assets = args.atomicassets_account.clone();
        let delphi = args.delphioracle_account.clone();
        let scope = Scope {
            actions: vec![
                ScopeFilter::new(&format!("{market}:*"), true),
                ScopeFilter::new(&format!("{assets}:acceptoffer"), true),
            ],
            tables: [
                "sales",
                "auctions",
                "buyoffers",
                "marketplaces",
                "balances",
                "config",
                "sympairs",
            ]
            .iter()
            .map(|table| ScopeFilter::new(&format!("{market}:{table}"), true))
            .chain(std::iter::once(ScopeFilter::new(
                &format!("{delphi}:datapoints"),
                true,
            )))
            .collect(),
        };
        Ok(Self {
            notifications: NotificationBuffer::new(&config.chain_name, &config.reader_name, NAME),
            args,
            scope,
            jobs: JobQueue::new(),
            sink,
        })
    }

    fn contract(&self) -> &str {
        &self.args.atomicmarket_account
    }

    fn payload<T: DeserializeOwned>(&self, trace: &ActionTrace) -> Result<T, FillError> {
        let value = trace.decoded.clone().ok_or_else(|| {
            FillError::handler(
                NAME,
                "payload",
                format!("missing decoded data for action {}", trace.name),
            )
        })?;
        serde_json::from_value(value)
            .map_err(|e| FillError::handler(NAME, "payload", format!("{}: {e}", trace.name)))
    }

    async fn ensure_config(&mut self, client: &Client, chain: &ChainApi) -> Result<(), FillError> {
        let market = self.contract().to_owned();
        let existing = client
            .query_opt(
                "select contract from atomicmarket_config where contract = $1;",
                &[&market],
            )
            .await
            .map_err(|e| FillError::Db(e.into()))?;
        if existing.is_some() {
            return Ok(());
        }

        tracing::info!("no persisted config for {market} - reading from chain");
        let config: types::MarketConfigRow = chain
            .table_rows(TableRowsParams::new(&market, &market, "config"))
            .await?
            .into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| FillError::handler(NAME, "init", format!("config row: {e}")))?
            .ok_or_else(|| FillError::handler(NAME, "init", "chain config table is empty"))?;

        client
            .execute(
                "insert into atomicmarket_config
                    (contract, version, maker_market_fee, taker_market_fee,
                     minimum_bid_increase, minimum_auction_duration,
                     maximum_auction_duration, auction_reset_duration,
                     supported_tokens, supported_symbol_pairs)
                values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                on conflict (contract) do nothing;",
                &[
                    &market,
                    &config.version,
                    &config.maker_market_fee,
                    &config.taker_market_fee,
                    &config.minimum_bid_increase,
                    &(config.minimum_auction_duration as i64),
                    &(config.maximum_auction_duration as i64),
                    &(config.auction_reset_duration as i64),
                    &config.supported_tokens,
                    &config.supported_symbol_pairs,
                ],
            )
            .await
            .map_err(|e| FillError::Db(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl ContractHandler for AtomicMarketHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn tracked_contracts(&self) -> Vec<String> {
        vec![
            self.args.atomicmarket_account.clone(),
            self.args.atomicassets_account.clone(),
            self.args.delphioracle_account.clone(),
        ]
    }

    async fn init(&mut self, client: &Client, chain: &ChainApi) -> Result<(), FillError> {
        for table in TABLES {
            if !db::table_exists(client, table).await.map_err(FillError::Db)? {
                return Err(FillError::handler(
                    NAME,
                    "init",
                    format!("missing relation {table} - load the atomicmarket schema first"),
                ));
            }
        }
        self.ensure_config(client, chain).await
    }

    async fn delete_db(&self, client: &Client) -> Result<(), DbError> {
        for table in TABLES {
            client.execute(&format!("delete from {table};"), &[]).await?;
        }
        Ok(())
    }

    async fn on_block_start(&mut self, _block: &Block) -> Result<(), FillError> {
        self.jobs.clear();
        self.notifications.clear();
        Ok(())
    }

    async fn on_action(
        &mut self,
        db: &mut ContractDbTx<'_>,
        _block: &Block,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        if trace.account == self.args.atomicassets_account {
            if trace.name == "acceptoffer" {
                return self.on_acceptoffer(trace);
            }
            return Ok(());
        }
        if trace.account != self.args.atomicmarket_account {
            return Ok(());
        }
        match trace.name.as_str() {
            "lognewsale" => self.on_lognewsale(db, tx, trace).await,
            "logsalestart" => self.on_logsalestart(db, tx, trace).await,
            "cancelsale" => self.on_cancelsale(db, tx, trace).await,
            "purchasesale" => self.on_purchasesale(trace),
            "lognewauct" => self.on_lognewauct(db, tx, trace).await,
            "logauctstart" => self.on_logauctstart(db, tx, trace).await,
            "cancelauct" => self.on_cancelauct(db, tx, trace).await,
            "auctionbid" => self.on_auctionbid(db, tx, trace).await,
            "auctclaimbuy" => self.on_auction_claim(db, tx, trace, "claimed_by_buyer").await,
            "auctclaimsel" => self.on_auction_claim(db, tx, trace, "claimed_by_seller").await,
            "lognewbuyo" => self.on_lognewbuyo(db, tx, trace).await,
            "cancelbuyo" => self.on_cancelbuyo(db, tx, trace).await,
            "acceptbuyo" => self.on_acceptbuyo(db, tx, trace).await,
            "declinebuyo" => self.on_declinebuyo(db, tx, trace).await,
            _ => Ok(()),
        }
    }

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTx<'_>,
        _block: &Block,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if delta.contract == self.args.delphioracle_account {
            if delta.table == "datapoints" {
                return self.on_datapoints_delta(db, delta).await;
            }
            return Ok(());
        }
        match delta.table.as_str() {
            "sales" => self.on_sales_delta(delta),
            "auctions" => self.on_auctions_delta(delta),
            "buyoffers" => self.on_buyoffers_delta(delta),
            "marketplaces" => self.on_marketplaces_delta(db, delta).await,
            "balances" => self.on_balances_delta(delta),
            "config" => self.on_config_delta(db, delta).await,
            "sympairs" => self.on_sympairs_delta(db, delta).await,
            _ => Ok(()),
        }
    }

    async fn on_block_complete(
        &mut self,
        db: &mut ContractDbTx<'_>,
        _block: &Block,
    ) -> Result<(), FillError> {
        while let Some(job) = self.jobs.pop() {
            let site = job.site;
            let result = match job.kind {
                MarketJob::SyncBalance { owner, quantities } => {
                    self.sync_balance(db, &owner, &quantities).await
                }
                MarketJob::SyncSale { row } => self.sync_sale(db, &row).await,
                MarketJob::SyncAuction { row } => self.sync_auction(db, &row).await,
                MarketJob::SyncBuyoffer { row } => self.sync_buyoffer(db, &row).await,
                MarketJob::SaleSoldByOffer { offer_id } => {
                    self.sale_sold_by_offer(db, offer_id).await
                }
                MarketJob::SalePurchased {
                    sale_id,
                    buyer,
                    taker_marketplace,
                    intended_delphi_median,
                } => {
                    self.sale_purchased(db, sale_id, &buyer, &taker_marketplace, intended_delphi_median)
                        .await
                }
                MarketJob::AuctionBidPlaced {
                    auction_id,
                    bidder,
                    bid,
                    taker_marketplace,
                } => {
                    self.auction_bid_placed(db, auction_id, &bidder, &bid, &taker_marketplace)
                        .await
                }
            };
            result.map_err(|e| FillError::handler(NAME, site, e))?;
        }
        Ok(())
    }

    async fn on_commit(&mut self) -> Result<(), FillError> {
        let sink = self.sink.clone();
        self.notifications.flush(sink.as_ref()).await;
        Ok(())
    }
}
