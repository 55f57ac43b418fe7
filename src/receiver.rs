use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_postgres::Client;

use crate::abi::decode_packed_abi;
use crate::abi::AbiCache;
use crate::abi::ByteReader;
use crate::chain::ChainApi;
use crate::config::Config;
use crate::constants::settings;
use crate::constants::SYSTEM_ACCOUNT;
use crate::db;
use crate::db::readers;
use crate::db::readers::ReaderPosition;
use crate::db::rollback;
use crate::db::ContractDbTx;
use crate::errors::DbError;
use crate::errors::DecodeError;
use crate::errors::FillError;
use crate::errors::ShipError;
use crate::framework::chain_channel;
use crate::framework::fork_payload;
use crate::framework::ContractHandler;
use crate::framework::NotificationSink;
use crate::framework::TxMeta;
use crate::monitor::BlockMessage;
use crate::monitor::MonitorMessage;
use crate::ship::ReaderEvent;
use crate::types::Block;
use crate::types::BlockNum;

/// Orchestrates the ingestion pipeline.
///
/// Owns the loaded handlers, the ABI cache, the reader checkpoint and
/// the fork window. Blocks are processed strictly sequentially on this
/// task; the reader and the deserializer pool are the only parallel
/// actors and talk to us through messages.
pub struct StateReceiver {
    config: Config,
    client: Client,
    chain: ChainApi,
    sink: Arc<dyn NotificationSink>,
    handlers: Vec<Box<dyn ContractHandler>>,
    abi_cache: AbiCache,
    position: Option<ReaderPosition>,
    monitor_tx: mpsc::Sender<MonitorMessage>,
}

impl StateReceiver {
    pub async fn new(
        config: Config,
        handlers: Vec<Box<dyn ContractHandler>>,
        sink: Arc<dyn NotificationSink>,
        monitor_tx: mpsc::Sender<MonitorMessage>,
    ) -> Result<Self, FillError> {
        let mut client = db::connect(&config.postgres_uri).await.map_err(FillError::Db)?;
        db::init_core_schema(&mut client).await.map_err(FillError::Db)?;
        let chain = ChainApi::new(&config.chain_http);

        let mut receiver = Self {
            config,
            client,
            chain,
            sink,
            handlers,
            abi_cache: AbiCache::new(),
            position: None,
            monitor_tx,
        };

        for handler in receiver.handlers.iter_mut() {
            handler.init(&receiver.client, &receiver.chain).await?;
        }
        receiver.bootstrap_abis().await?;
        receiver.position = readers::get(&receiver.client, &receiver.config.reader_name)
            .await
            .map_err(FillError::Db)?;
        if let Some(position) = &receiver.position {
            tracing::info!(
                "reader {} resuming after block {}",
                receiver.config.reader_name,
                position.block_num
            );
        }
        Ok(receiver)
    }

    /// First block to request from the stream: last committed + 1, or
    /// the configured start block on a fresh database.
    pub fn start_block(&self) -> BlockNum {
        match &self.position {
            Some(position) => position.block_num + 1,
            None => self.config.start_block.unwrap_or(1),
        }
    }

    /// Fetch the current ABI of every tracked contract once, installing
    /// it as the base version. Later `setabi` actions layer on top.
    async fn bootstrap_abis(&mut self) -> Result<(), FillError> {
        let mut contracts: Vec<String> = self
            .handlers
            .iter()
            .flat_map(|handler| handler.tracked_contracts())
            .collect();
        contracts.sort();
        contracts.dedup();
        for contract in contracts {
            match self.chain.abi(&contract).await? {
                Some(abi) => self.abi_cache.install(&contract, 0, abi),
                None => tracing::warn!("no ABI deployed for tracked contract {contract}"),
            }
        }
        Ok(())
    }

    async fn refresh_abis(&mut self, block_num: BlockNum) -> Result<(), FillError> {
        let mut contracts: Vec<String> = self
            .handlers
            .iter()
            .flat_map(|handler| handler.tracked_contracts())
            .collect();
        contracts.sort();
        contracts.dedup();
        for contract in contracts {
            if let Some(abi) = self.chain.abi(&contract).await? {
                self.abi_cache.install(&contract, block_num, abi);
            }
        }
        Ok(())
    }

    /// Consume reader events until shutdown or stream end.
    ///
    /// Returns the last committed block height.
    pub async fn start(
        mut self,
        mut rx: mpsc::Receiver<ReaderEvent>,
    ) -> Result<BlockNum, FillError> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("[receiver] got a ctrl-c message");
                    break;
                },
                event = rx.recv() => match event {
                    Some(ReaderEvent::Block(block)) => self.process_block(*block).await?,
                    Some(ReaderEvent::Fork { at }) => self.handle_fork(at).await?,
                    None => {
                        tracing::info!("[receiver] block stream ended");
                        break;
                    }
                }
            }
        }
        Ok(self.position.as_ref().map(|p| p.block_num).unwrap_or(0))
    }

    /// Apply one block under the retry/halt policy:
    /// decode failures retry once after an ABI refresh, database
    /// failures retry a bounded number of times, handler failures halt.
    async fn process_block(&mut self, mut block: Block) -> Result<(), FillError> {
        let mut refreshed_abi = false;
        let mut db_attempts: u32 = 0;
        loop {
            match self.apply_block(&mut block).await {
                Ok(()) => return Ok(()),
                Err(FillError::Decode(e)) if !refreshed_abi => {
                    tracing::warn!(
                        "decode failure at block {}: {e} - refreshing ABIs and retrying",
                        block.block_num
                    );
                    refreshed_abi = true;
                    self.refresh_abis(block.block_num).await?;
                }
                Err(FillError::Db(e)) if db_attempts < settings::DB_RETRIES => {
                    db_attempts += 1;
                    tracing::warn!(
                        "database failure at block {} (attempt {db_attempts}): {e}",
                        block.block_num
                    );
                    tokio::time::sleep(Duration::from_millis(settings::DB_RETRY_DELAY_MS)).await;
                }
                Err(e) => {
                    tracing::error!("halting at block {}: {e}", block.block_num);
                    return Err(e);
                }
            }
        }
    }

    async fn apply_block(&mut self, block: &mut Block) -> Result<(), FillError> {
        if let Some(position) = &self.position {
            // Blocks at or below our head can arrive right after a
            // restart. Ignore them.
            if block.block_num <= position.block_num {
                return Ok(());
            }
            if block.block_num != position.block_num + 1 {
                return Err(FillError::Ship(ShipError::OutOfOrder {
                    expected: position.block_num + 1,
                    received: block.block_num,
                }));
            }
            if !position.block_id.is_empty()
                && !block.prev_id.is_empty()
                && position.block_id != block.prev_id
            {
                return Err(FillError::Ship(ShipError::OutOfOrder {
                    expected: position.block_num + 1,
                    received: block.block_num,
                }));
            }
        }

        self.prepare_block(block)?;

        for handler in self.handlers.iter_mut() {
            handler.on_block_start(block).await?;
        }

        let mut dbtx = ContractDbTx::begin(&mut self.client, block)
            .await
            .map_err(FillError::Db)?;

        let result = match run_hooks(&mut self.handlers, &mut dbtx, block).await {
            Ok(()) => {
                let bookkeeping: Result<(), DbError> = async {
                    readers::update(
                        dbtx.pgtx(),
                        &self.config.reader_name,
                        block.block_num,
                        &block.block_id,
                        block.reversible(),
                    )
                    .await?;
                    rollback::prune(dbtx.pgtx(), block.last_irreversible).await?;
                    Ok(())
                }
                .await;
                match bookkeeping {
                    Ok(()) => dbtx.commit().await.map_err(FillError::Db),
                    Err(e) => {
                        let _ = dbtx.abort().await;
                        Err(FillError::Db(e))
                    }
                }
            }
            Err(e) => {
                let _ = dbtx.abort().await;
                Err(e)
            }
        };
        result?;

        self.position = Some(ReaderPosition {
            block_num: block.block_num,
            block_id: block.block_id.clone(),
        });
        for handler in self.handlers.iter_mut() {
            handler.on_commit().await?;
        }
        let _ = self
            .monitor_tx
            .send(MonitorMessage::Block(BlockMessage::new(
                self.config.reader_name.clone(),
                block.block_num,
                block.last_irreversible,
            )))
            .await;
        tracing::debug!("committed block {}", block.block_num);
        Ok(())
    }

    /// Decode matched payloads and install streamed ABI updates.
    ///
    /// Traces run first, in execution order, so a `setabi` takes effect
    /// for everything after it in the same block, deltas included.
    fn prepare_block(&mut self, block: &mut Block) -> Result<(), FillError> {
        for transaction in &mut block.transactions {
            for trace in &mut transaction.traces {
                if trace.account == SYSTEM_ACCOUNT && trace.name == "setabi" {
                    self.install_streamed_abi(block.block_num, &trace.data)?;
                    continue;
                }
                let mut wants = None;
                for handler in &self.handlers {
                    if let Some(ds) = handler
                        .scope()
                        .matches_action(&trace.account, &trace.name)
                    {
                        wants = Some(wants.unwrap_or(false) || ds);
                    }
                }
                if wants != Some(true) {
                    continue;
                }
                match self.abi_cache.get(&trace.account, block.block_num) {
                    Some(decoder) => {
                        match decoder.decode_action(&trace.name, &trace.data) {
                            Ok(value) => trace.decoded = Some(value),
                            // Wildcard filters match actions the ABI does
                            // not declare; nothing can dispatch on those.
                            Err(DecodeError::UnknownType(t)) => {
                                tracing::debug!("skipping undeclared action type {t}")
                            }
                            Err(e) => return Err(FillError::Decode(e)),
                        }
                    }
                    None => tracing::warn!(
                        "no ABI cached for {} - skipping decode of {}",
                        trace.account,
                        trace.name
                    ),
                }
            }
        }

        for delta in &mut block.deltas {
            let mut wants = None;
            for handler in &self.handlers {
                if let Some(ds) = handler
                    .scope()
                    .matches_table(&delta.contract, &delta.table)
                {
                    wants = Some(wants.unwrap_or(false) || ds);
                }
            }
            if wants != Some(true) || delta.data.is_empty() {
                continue;
            }
            match self.abi_cache.get(&delta.contract, block.block_num) {
                Some(decoder) => match decoder.decode_table_row(&delta.table, &delta.data) {
                    Ok(value) => delta.decoded = Some(value),
                    Err(DecodeError::UnknownType(t)) => {
                        tracing::debug!("skipping undeclared table type {t}")
                    }
                    Err(e) => return Err(FillError::Decode(e)),
                },
                None => tracing::warn!(
                    "no ABI cached for {} - skipping decode of table {}",
                    delta.contract,
                    delta.table
                ),
            }
        }
        Ok(())
    }

    /// Handle `eosio::setabi` for a tracked contract.
    fn install_streamed_abi(
        &mut self,
        block_num: BlockNum,
        data: &[u8],
    ) -> Result<(), FillError> {
        let mut reader = ByteReader::new(data);
        let account = reader
            .read_name("setabi.account")
            .map_err(FillError::Decode)?;
        if !self.abi_cache.contains(&account) {
            return Ok(());
        }
        let abi_bytes = reader.read_bytes("setabi.abi").map_err(FillError::Decode)?;
        let abi = decode_packed_abi(abi_bytes).map_err(FillError::Decode)?;
        self.abi_cache.install(&account, block_num, abi);
        Ok(())
    }

    /// A fork is not an error: restore state to the end of block
    /// `at - 1` and resume from there.
    async fn handle_fork(&mut self, at: BlockNum) -> Result<(), FillError> {
        let Some(position) = self.position.clone() else {
            return Ok(());
        };
        if position.block_num < at {
            // Fork above our head, nothing applied yet.
            return Ok(());
        }
        let depth = position.block_num - at + 1;
        tracing::warn!("fork at block {at}: rolling back {depth} block(s)");
        if depth > settings::ROLLBACK_HORIZON {
            tracing::error!(
                "fork depth {depth} exceeds rollback horizon ({})",
                settings::ROLLBACK_HORIZON
            );
        }

        let undone = rollback::roll_back_from(&mut self.client, &self.config.reader_name, at)
            .await
            .map_err(FillError::Db)?;
        self.position = Some(ReaderPosition {
            block_num: at - 1,
            block_id: String::new(),
        });

        let _ = self.monitor_tx.send(MonitorMessage::Rollback(at)).await;
        let channel = chain_channel(&self.config.chain_name, &self.config.reader_name);
        if let Err(e) = self.sink.publish(&channel, &fork_payload(at)).await {
            tracing::warn!("failed to publish fork notification: {e}");
        }
        tracing::info!("applied {undone} rollback operations, resuming at block {at}");
        Ok(())
    }
}

/// Dispatch one block through every handler, then drain job queues.
///
/// A trace or delta may match multiple handlers; they run in
/// registration order. Traces go first in chain execution order, then
/// deltas, then each handler's update queue in priority order.
async fn run_hooks(
    handlers: &mut [Box<dyn ContractHandler>],
    db: &mut ContractDbTx<'_>,
    block: &Block,
) -> Result<(), FillError> {
    for transaction in &block.transactions {
        let tx = TxMeta {
            txid: transaction.txid.clone(),
        };
        for trace in &transaction.traces {
            for handler in handlers.iter_mut() {
                if handler
                    .scope()
                    .matches_action(&trace.account, &trace.name)
                    .is_some()
                {
                    handler.on_action(db, block, &tx, trace).await?;
                }
            }
        }
    }
    for delta in &block.deltas {
        for handler in handlers.iter_mut() {
            if handler
                .scope()
                .matches_table(&delta.contract, &delta.table)
                .is_some()
            {
                handler.on_table_change(db, block, delta).await?;
            }
        }
    }
    for handler in handlers.iter_mut() {
        handler.on_block_complete(db, block).await?;
    }
    Ok(())
}
