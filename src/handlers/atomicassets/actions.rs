use serde_json::json;
use serde_json::Value;

use super::types::AddColAuth;
use super::types::CreateCollection;
use super::types::CreateSchema;
use super::types::ExtendSchema;
use super::types::ForbidNotify;
use super::types::LockTemplate;
use super::types::LogBackAsset;
use super::types::LogBurnAsset;
use super::types::LogMint;
use super::types::LogNewOffer;
use super::types::LogNewTemplate;
use super::types::LogSetData;
use super::types::LogTransfer;
use super::types::OfferId;
use super::types::OfferState;
use super::types::RemColAuth;
use super::types::SetCollectionData;
use super::types::SetMarketFee;
use super::AssetsJob;
use super::AtomicAssetsHandler;
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
use crate::handlers::attributes_to_object;
use crate::handlers::ids_to_json;
use crate::handlers::insert_log;
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

impl AtomicAssetsHandler {
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

    pub(super) async fn on_createcol(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: CreateCollection = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("author", act.author.as_str().into()),
            ("allow_notify", act.allow_notify.into()),
            (
                "authorized_accounts",
                SqlValue::Json(json!(act.authorized_accounts)),
            ),
            ("notify_accounts", SqlValue::Json(json!(act.notify_accounts))),
            ("market_fee", act.market_fee.into()),
            ("data", SqlValue::Json(attributes_to_object(&act.data))),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicassets_collections",
            &row,
            &["contract", "collection_name"],
        )
        .await
        .map_err(dbe("createcol"))?;

        self.log(
            db,
            tx,
            trace,
            "collection",
            &act.collection_name,
            &json!({"author": act.author}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "collections",
            "create",
            json!({"collection_name": act.collection_name, "author": act.author}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_setcoldata(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: SetCollectionData = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![(
            "data",
            SqlValue::Json(attributes_to_object(&act.data)),
        )];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
        ];
        db.update(NAME, "atomicassets_collections", &set, &cond)
            .await
            .map_err(dbe("setcoldata"))?;

        self.log(db, tx, trace, "collection", &act.collection_name, &json!({}))
            .await?;
        self.notifications.stage(
            db,
            &contract,
            "collections",
            "update",
            json!({"collection_name": act.collection_name}),
            Some(tx),
        );
        Ok(())
    }

    async fn edit_collection_accounts(
        &mut self,
        db: &mut ContractDbTx<'_>,
        collection_name: &str,
        account: &str,
        add: bool,
        site: &'static str,
    ) -> Result<(), FillError> {
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select authorized_accounts from atomicassets_collections
                where contract = $1 and collection_name = $2;",
                &[&contract, &collection_name],
            )
            .await
            .map_err(dbe(site))?;
        let row = row.ok_or_else(|| {
            FillError::handler(NAME, site, format!("unknown collection {collection_name}"))
        })?;
        let mut accounts: Value = row.get(0);
        if let Some(list) = accounts.as_array_mut() {
            if add {
                if !list.iter().any(|v| v.as_str() == Some(account)) {
                    list.push(json!(account));
                }
            } else {
                list.retain(|v| v.as_str() != Some(account));
            }
        }
        let mut set: Row = vec![("authorized_accounts", SqlValue::Json(accounts))];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", collection_name.into()),
        ];
        db.update(NAME, "atomicassets_collections", &set, &cond)
            .await
            .map_err(dbe(site))
            .map(|_| ())
    }

    pub(super) async fn on_addcolauth(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: AddColAuth = self.payload(trace)?;
        self.edit_collection_accounts(
            db,
            &act.collection_name,
            &act.account_to_add,
            true,
            "addcolauth",
        )
        .await?;
        self.log(
            db,
            tx,
            trace,
            "collection",
            &act.collection_name,
            &json!({"account": act.account_to_add}),
        )
        .await
    }

    pub(super) async fn on_remcolauth(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: RemColAuth = self.payload(trace)?;
        self.edit_collection_accounts(
            db,
            &act.collection_name,
            &act.account_to_remove,
            false,
            "remcolauth",
        )
        .await?;
        self.log(
            db,
            tx,
            trace,
            "collection",
            &act.collection_name,
            &json!({"account": act.account_to_remove}),
        )
        .await
    }

    pub(super) async fn on_setmarketfee(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: SetMarketFee = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("market_fee", act.market_fee.into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
        ];
        db.update(NAME, "atomicassets_collections", &set, &cond)
            .await
            .map_err(dbe("setmarketfee"))?;
        self.log(
            db,
            tx,
            trace,
            "collection",
            &act.collection_name,
            &json!({"market_fee": act.market_fee}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "collections",
            "update",
            json!({"collection_name": act.collection_name}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_forbidnotify(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: ForbidNotify = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("allow_notify", false.into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
        ];
        db.update(NAME, "atomicassets_collections", &set, &cond)
            .await
            .map_err(dbe("forbidnotify"))?;
        self.log(db, tx, trace, "collection", &act.collection_name, &json!({}))
            .await
    }

    pub(super) async fn on_createschema(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: CreateSchema = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("schema_name", act.schema_name.as_str().into()),
            ("format", SqlValue::Json(act.schema_format.clone())),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicassets_schemas",
            &row,
            &["contract", "collection_name", "schema_name"],
        )
        .await
        .map_err(dbe("createschema"))?;

        let relation_id = format!("{}:{}", act.collection_name, act.schema_name);
        self.log(db, tx, trace, "schema", &relation_id, &json!({}))
            .await?;
        self.notifications.stage(
            db,
            &contract,
            "schemas",
            "create",
            json!({
                "collection_name": act.collection_name,
                "schema_name": act.schema_name,
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_extendschema(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: ExtendSchema = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select format from atomicassets_schemas
                where contract = $1 and collection_name = $2 and schema_name = $3;",
                &[&contract, &act.collection_name, &act.schema_name],
            )
            .await
            .map_err(dbe("extendschema"))?;
        let row = row.ok_or_else(|| {
            FillError::handler(
                NAME,
                "extendschema",
                format!("unknown schema {}:{}", act.collection_name, act.schema_name),
            )
        })?;
        let mut format: Value = row.get(0);
        if let (Some(list), Some(extension)) =
            (format.as_array_mut(), act.schema_format_extension.as_array())
        {
            list.extend(extension.iter().cloned());
        }
        let set: Row = vec![("format", SqlValue::Json(format))];
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("schema_name", act.schema_name.as_str().into()),
        ];
        db.update(NAME, "atomicassets_schemas", &set, &cond)
            .await
            .map_err(dbe("extendschema"))?;

        let relation_id = format!("{}:{}", act.collection_name, act.schema_name);
        self.log(db, tx, trace, "schema", &relation_id, &json!({}))
            .await?;
        self.notifications.stage(
            db,
            &contract,
            "schemas",
            "update",
            json!({
                "collection_name": act.collection_name,
                "schema_name": act.schema_name,
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_lognewtempl(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogNewTemplate = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("template_id", act.template_id.into()),
            ("schema_name", act.schema_name.as_str().into()),
            ("transferable", act.transferable.into()),
            ("burnable", act.burnable.into()),
            ("max_supply", act.max_supply.into()),
            ("issued_supply", 0i64.into()),
            (
                "immutable_data",
                SqlValue::Json(attributes_to_object(&act.immutable_data)),
            ),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicassets_templates",
            &row,
            &["contract", "collection_name", "template_id"],
        )
        .await
        .map_err(dbe("lognewtempl"))?;

        self.log(
            db,
            tx,
            trace,
            "template",
            &act.template_id.to_string(),
            &json!({"collection_name": act.collection_name}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "templates",
            "create",
            json!({
                "collection_name": act.collection_name,
                "template_id": act.template_id,
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_locktemplate(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LockTemplate = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select issued_supply from atomicassets_templates
                where contract = $1 and collection_name = $2 and template_id = $3;",
                &[&contract, &act.collection_name, &act.template_id],
            )
            .await
            .map_err(dbe("locktemplate"))?;
        let row = row.ok_or_else(|| {
            FillError::handler(
                NAME,
                "locktemplate",
                format!("unknown template {}", act.template_id),
            )
        })?;
        let issued: i64 = row.get(0);
        let mut set: Row = vec![("max_supply", issued.into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("template_id", act.template_id.into()),
        ];
        db.update(NAME, "atomicassets_templates", &set, &cond)
            .await
            .map_err(dbe("locktemplate"))?;
        self.log(
            db,
            tx,
            trace,
            "template",
            &act.template_id.to_string(),
            &json!({"max_supply": issued}),
        )
        .await
    }

    pub(super) async fn on_logmint(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogMint = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let template_id = if act.template_id >= 0 {
            SqlValue::Int(act.template_id)
        } else {
            SqlValue::Null
        };
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("asset_id", act.asset_id.into()),
            ("collection_name", act.collection_name.as_str().into()),
            ("schema_name", act.schema_name.as_str().into()),
            ("template_id", template_id),
            ("owner", act.new_asset_owner.as_str().into()),
            (
                "immutable_data",
                SqlValue::Json(attributes_to_object(&act.immutable_data)),
            ),
            (
                "mutable_data",
                SqlValue::Json(attributes_to_object(&act.mutable_data)),
            ),
            ("backed_tokens", SqlValue::Json(json!(act.backed_tokens))),
            ("minted_at_block", db.block_num().into()),
            ("minted_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
            ("transferred_at_block", db.block_num().into()),
            ("transferred_at_time", db.timestamp().into()),
        ];
        db.replace(NAME, "atomicassets_assets", &row, &["contract", "asset_id"])
            .await
            .map_err(dbe("logmint"))?;

        self.log(
            db,
            tx,
            trace,
            "asset",
            &act.asset_id.to_string(),
            &json!({"minter": act.authorized_minter, "new_asset_owner": act.new_asset_owner}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "assets",
            "new_asset",
            json!({"asset_id": act.asset_id.to_string(), "owner": act.new_asset_owner}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logsetdata(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogSetData = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![(
            "mutable_data",
            SqlValue::Json(attributes_to_object(&act.new_data)),
        )];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("asset_id", act.asset_id.into()),
        ];
        db.update(NAME, "atomicassets_assets", &set, &cond)
            .await
            .map_err(dbe("logsetdata"))?;

        self.log(
            db,
            tx,
            trace,
            "asset",
            &act.asset_id.to_string(),
            &json!({
                "old_data": attributes_to_object(&act.old_data),
                "new_data": attributes_to_object(&act.new_data),
            }),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "assets",
            "update",
            json!({"asset_id": act.asset_id.to_string()}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logbackasset(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogBackAsset = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row = db
            .query_opt(
                "select backed_tokens from atomicassets_assets
                where contract = $1 and asset_id = $2;",
                &[&contract, &(act.asset_id as i64)],
            )
            .await
            .map_err(dbe("logbackasset"))?;
        let row = row.ok_or_else(|| {
            FillError::handler(
                NAME,
                "logbackasset",
                format!("unknown asset {}", act.asset_id),
            )
        })?;
        let mut backed: Value = row.get(0);
        if let Some(list) = backed.as_array_mut() {
            list.push(json!(act.backed_token));
        }
        let mut set: Row = vec![("backed_tokens", SqlValue::Json(backed))];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("asset_id", act.asset_id.into()),
        ];
        db.update(NAME, "atomicassets_assets", &set, &cond)
            .await
            .map_err(dbe("logbackasset"))?;

        self.log(
            db,
            tx,
            trace,
            "asset",
            &act.asset_id.to_string(),
            &json!({"backed_token": act.backed_token}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "assets",
            "back",
            json!({"asset_id": act.asset_id.to_string()}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logburnasset(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogBurnAsset = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let set: Row = vec![
            ("owner", SqlValue::Null),
            ("burned_by_account", act.asset_owner.as_str().into()),
            ("burned_at_block", db.block_num().into()),
            ("burned_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("asset_id", act.asset_id.into()),
        ];
        db.update(NAME, "atomicassets_assets", &set, &cond)
            .await
            .map_err(dbe("logburnasset"))?;

        self.log(
            db,
            tx,
            trace,
            "asset",
            &act.asset_id.to_string(),
            &json!({"owner": act.asset_owner}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "assets",
            "burn",
            json!({"asset_id": act.asset_id.to_string(), "owner": act.asset_owner}),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_logtransfer(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogTransfer = self.payload(trace)?;
        let contract = self.contract().to_owned();
        for asset_id in &act.asset_ids {
            let set: Row = vec![
                ("owner", act.recipient.as_str().into()),
                ("transferred_at_block", db.block_num().into()),
                ("transferred_at_time", db.timestamp().into()),
                ("updated_at_block", db.block_num().into()),
                ("updated_at_time", db.timestamp().into()),
            ];
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("asset_id", (*asset_id).into()),
            ];
            db.update(NAME, "atomicassets_assets", &set, &cond)
                .await
                .map_err(dbe("logtransfer"))?;

            self.log(
                db,
                tx,
                trace,
                "asset",
                &asset_id.to_string(),
                &json!({"from": act.sender, "to": act.recipient}),
            )
            .await?;
            self.notifications.stage(
                db,
                &contract,
                "assets",
                "update",
                json!({"asset_id": asset_id.to_string(), "owner": act.recipient}),
                Some(tx),
            );
        }

        if self.args.store_transfers {
            let row: Row = vec![
                ("contract", contract.as_str().into()),
                ("transfer_id", trace.global_sequence.into()),
                ("sender", act.sender.as_str().into()),
                ("recipient", act.recipient.as_str().into()),
                ("memo", act.memo.as_str().into()),
                ("asset_ids", SqlValue::Json(ids_to_json(&act.asset_ids))),
                (
                    "txid",
                    SqlValue::Bytea(hex::decode(&tx.txid).unwrap_or_default()),
                ),
                ("created_at_block", db.block_num().into()),
                ("created_at_time", db.timestamp().into()),
            ];
            db.replace(
                NAME,
                "atomicassets_transfers",
                &row,
                &["contract", "transfer_id"],
            )
            .await
            .map_err(dbe("logtransfer"))?;
            self.notifications.stage(
                db,
                &contract,
                "transfers",
                "create",
                json!({
                    "transfer_id": trace.global_sequence.to_string(),
                    "sender": act.sender,
                    "recipient": act.recipient,
                    "asset_ids": ids_to_json(&act.asset_ids),
                }),
                Some(tx),
            );
        }

        // Any pending offer holding one of these assets just went stale.
        self.jobs.push(
            priorities::ACTION_UPDATE_OFFER,
            "atomicassets::logtransfer",
            AssetsJob::InvalidateOffers {
                asset_ids: act.asset_ids.clone(),
            },
        );
        Ok(())
    }

    pub(super) async fn on_lognewoffer(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError> {
        let act: LogNewOffer = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let row: Row = vec![
            ("contract", contract.as_str().into()),
            ("offer_id", act.offer_id.into()),
            ("sender", act.sender.as_str().into()),
            ("recipient", act.recipient.as_str().into()),
            (
                "sender_asset_ids",
                SqlValue::Json(ids_to_json(&act.sender_asset_ids)),
            ),
            (
                "recipient_asset_ids",
                SqlValue::Json(ids_to_json(&act.recipient_asset_ids)),
            ),
            ("memo", act.memo.as_str().into()),
            ("state", OfferState::Pending.as_i16().into()),
            ("created_at_block", db.block_num().into()),
            ("created_at_time", db.timestamp().into()),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicassets_offers",
            &row,
            &["contract", "offer_id"],
        )
        .await
        .map_err(dbe("lognewoffer"))?;

        self.log(
            db,
            tx,
            trace,
            "offer",
            &act.offer_id.to_string(),
            &json!({"sender": act.sender, "recipient": act.recipient}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "offers",
            "create",
            json!({
                "offer_id": act.offer_id.to_string(),
                "sender": act.sender,
                "recipient": act.recipient,
            }),
            Some(tx),
        );
        Ok(())
    }

    pub(super) async fn on_offer_state(
        &mut self,
        db: &mut ContractDbTx<'_>,
        tx: &TxMeta,
        trace: &ActionTrace,
        state: OfferState,
    ) -> Result<(), FillError> {
        let act: OfferId = self.payload(trace)?;
        let contract = self.contract().to_owned();
        let mut set: Row = vec![("state", state.as_i16().into())];
        set.extend(touched(db));
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("offer_id", act.offer_id.into()),
        ];
        db.update(NAME, "atomicassets_offers", &set, &cond)
            .await
            .map_err(dbe("offer_state"))?;

        self.log(
            db,
            tx,
            trace,
            "offer",
            &act.offer_id.to_string(),
            &json!({"state": state.as_i16()}),
        )
        .await?;
        self.notifications.stage(
            db,
            &contract,
            "offers",
            "state_change",
            json!({"offer_id": act.offer_id.to_string(), "state": state.as_i16()}),
            Some(tx),
        );
        Ok(())
    }

    /// Job body: mark pending offers holding moved assets as invalid.
    pub(super) async fn invalidate_offers(
        &mut self,
        db: &mut ContractDbTx<'_>,
        asset_ids: &[u64],
    ) -> Result<(), DbError> {
        let contract = self.contract().to_owned();
        let ids: Vec<String> = asset_ids.iter().map(u64::to_string).collect();
        let pending = OfferState::Pending.as_i16();
        let rows = db
            .query(
                "select offer_id from atomicassets_offers
                where contract = $1 and state = $2
                    and (sender_asset_ids ?| $3 or recipient_asset_ids ?| $3);",
                &[&contract, &pending, &ids],
            )
            .await?;
        for row in rows {
            let offer_id: i64 = row.get(0);
            let mut set: Row = vec![("state", OfferState::Invalid.as_i16().into())];
            set.extend(touched(db));
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("offer_id", offer_id.into()),
            ];
            db.update(NAME, "atomicassets_offers", &set, &cond).await?;
            self.notifications.stage(
                db,
                &contract,
                "offers",
                "state_change",
                json!({
                    "offer_id": offer_id.to_string(),
                    "state": OfferState::Invalid.as_i16(),
                }),
                None,
            );
        }
        Ok(())
    }
}
