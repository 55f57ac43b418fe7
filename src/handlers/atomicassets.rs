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

pub(crate) use types::OfferState;

const NAME: &str = "atomicassets";
const LOGS_TABLE: &str = "atomicassets_logs";

const TABLES: [&str; 9] = [
    "atomicassets_collections",
    "atomicassets_schemas",
    "atomicassets_templates",
    "atomicassets_assets",
    "atomicassets_offers",
    "atomicassets_transfers",
    "atomicassets_balances",
    "atomicassets_config",
    "atomicassets_logs",
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtomicAssetsArgs {
    pub atomicassets_account: String,
    #[serde(default = "default_true")]
    pub store_transfers: bool,
    #[serde(default = "default_true")]
    pub store_logs: bool,
}

#[derive(Debug)]
enum AssetsJob {
    /// Pending offers holding any of these assets are no longer
    /// fulfillable and must be marked invalid.
    InvalidateOffers { asset_ids: Vec<u64> },
}

/// Maintains collections, schemas, templates, assets, offers and
/// transfers for one AtomicAssets contract deployment.
pub struct AtomicAssetsHandler {
    args: AtomicAssetsArgs,
    scope: Scope,
    notifications: NotificationBuffer,
    jobs: JobQueue<AssetsJob>,
    sink: Arc<dyn NotificationSink>,
}

impl AtomicAssetsHandler {
    pub fn new(
        args: &serde_json::Value,
        config: &Config,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, FillError> {
        let args: AtomicAssetsArgs = serde_json::from_value(args.clone())
            .map_err(|e| FillError::Config(format!("atomicassets args: {e}")))?;
        let account = args.atomicassets_account.clone();
        let scope = Scope {
            actions: vec![ScopeFilter::new(&format!("{account}:*"), true)],
            tables: ["config", "tokenconfigs", "balances", "templates"]
                .iter()
                .map(|table| ScopeFilter::new(&format!("{account}:{table}"), true))
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
        &self.args.atomicassets_account
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

    /// Load persisted config, bootstrapping it from chain RPC once.
    async fn ensure_config(&mut self, client: &Client, chain: &ChainApi) -> Result<(), FillError> {
        let account = self.contract().to_owned();
        let existing = client
            .query_opt(
                "select contract from atomicassets_config where contract = $1;",
                &[&account],
            )
            .await
            .map_err(|e| FillError::Db(e.into()))?;
        if existing.is_some() {
            return Ok(());
        }

        tracing::info!("no persisted config for {account} - reading from chain");
        let config_rows = chain
            .table_rows(TableRowsParams::new(&account, &account, "config"))
            .await?;
        let config: types::ConfigRow = match config_rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| FillError::handler(NAME, "init", format!("config row: {e}")))?,
            None => {
                return Err(FillError::handler(
                    NAME,
                    "init",
                    "chain config table is empty",
                ))
            }
        };
        let tokenconfigs: types::TokenConfigsRow = chain
            .table_rows(TableRowsParams::new(&account, &account, "tokenconfigs"))
            .await?
            .into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| FillError::handler(NAME, "init", format!("tokenconfigs row: {e}")))?
            .unwrap_or(types::TokenConfigsRow {
                standard: String::new(),
                version: String::new(),
            });

        client
            .execute(
                "insert into atomicassets_config
                    (contract, version, collection_format, supported_tokens)
                values ($1, $2, $3, $4)
                on conflict (contract) do nothing;",
                &[
                    &account,
                    &tokenconfigs.version,
                    &config.collection_format,
                    &config.supported_tokens,
                ],
            )
            .await
            .map_err(|e| FillError::Db(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl ContractHandler for AtomicAssetsHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn tracked_contracts(&self) -> Vec<String> {
        vec![self.args.atomicassets_account.clone()]
    }

    async fn init(&mut self, client: &Client, chain: &ChainApi) -> Result<(), FillError> {
        for table in TABLES {
            if !db::table_exists(client, table).await.map_err(FillError::Db)? {
                return Err(FillError::handler(
                    NAME,
                    "init",
                    format!("missing relation {table} - load the atomicassets schema first"),
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
        // Leftovers from an aborted attempt at this block.
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
        if trace.account != self.args.atomicassets_account {
            return Ok(());
        }
        match trace.name.as_str() {
            "createcol" => self.on_createcol(db, tx, trace).await,
            "setcoldata" => self.on_setcoldata(db, tx, trace).await,
            "addcolauth" => self.on_addcolauth(db, tx, trace).await,
            "remcolauth" => self.on_remcolauth(db, tx, trace).await,
            "setmarketfee" => self.on_setmarketfee(db, tx, trace).await,
            "forbidnotify" => self.on_forbidnotify(db, tx, trace).await,
            "createschema" => self.on_createschema(db, tx, trace).await,
            "extendschema" => self.on_extendschema(db, tx, trace).await,
            "lognewtempl" => self.on_lognewtempl(db, tx, trace).await,
            "locktemplate" => self.on_locktemplate(db, tx, trace).await,
            "logmint" => self.on_logmint(db, tx, trace).await,
            "logsetdata" => self.on_logsetdata(db, tx, trace).await,
            "logbackasset" => self.on_logbackasset(db, tx, trace).await,
            "logburnasset" => self.on_logburnasset(db, tx, trace).await,
            "logtransfer" => self.on_logtransfer(db, tx, trace).await,
            "lognewoffer" => self.on_lognewoffer(db, tx, trace).await,
            "acceptoffer" => self.on_offer_state(db, tx, trace, OfferState::Accepted).await,
            "declineoffer" => self.on_offer_state(db, tx, trace, OfferState::Declined).await,
            "canceloffer" => self.on_offer_state(db, tx, trace, OfferState::Canceled).await,
            _ => Ok(()),
        }
    }

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTx<'_>,
        _block: &Block,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        match delta.table.as_str() {
            "config" => self.on_config_delta(db, delta).await,
            "tokenconfigs" => self.on_tokenconfigs_delta(db, delta).await,
            "balances" => self.on_balances_delta(db, delta).await,
            "templates" => self.on_templates_delta(db, delta).await,
            _ => Ok(()),
        }
    }

    async fn on_block_complete(
        &mut self,
        db: &mut ContractDbTx<'_>,
        _block: &Block,
    ) -> Result<(), FillError> {
        while let Some(job) = self.jobs.pop() {
            match job.kind {
                AssetsJob::InvalidateOffers { asset_ids } => self
                    .invalidate_offers(db, &asset_ids)
                    .await
                    .map_err(|e| FillError::handler(NAME, job.site, e))?,
            }
        }
        Ok(())
    }

    async fn on_commit(&mut self) -> Result<(), FillError> {
        let sink = self.sink.clone();
        self.notifications.flush(sink.as_ref()).await;
        Ok(())
    }
}
