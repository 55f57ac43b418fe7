use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::BalanceRow;
use super::types::ConfigRow;
use super::types::TemplateRow;
use super::types::TokenConfigsRow;
use super::AtomicAssetsHandler;
use super::NAME;
use crate::db::Condition;
use crate::db::ContractDbTx;
use crate::db::Row;
use crate::db::SqlValue;
use crate::errors::DbError;
use crate::errors::FillError;
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

impl AtomicAssetsHandler {
    pub(super) async fn on_config_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: ConfigRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let set: Row = vec![
            ("collection_format", SqlValue::Json(row.collection_format)),
            ("supported_tokens", SqlValue::Json(row.supported_tokens)),
        ];
        let cond: Condition = vec![("contract", contract.as_str().into())];
        db.update(NAME, "atomicassets_config", &set, &cond)
            .await
            .map_err(dbe("config_delta"))?;
        Ok(())
    }

    pub(super) async fn on_tokenconfigs_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: TokenConfigsRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let set: Row = vec![("version", row.version.as_str().into())];
        let cond: Condition = vec![("contract", contract.as_str().into())];
        db.update(NAME, "atomicassets_config", &set, &cond)
            .await
            .map_err(dbe("tokenconfigs_delta"))?;
        Ok(())
    }

    pub(super) async fn on_balances_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        let contract = self.contract().to_owned();
        if !delta.present {
            // Row removed on-chain: all balances withdrawn.
            let cond: Condition = vec![
                ("contract", contract.as_str().into()),
                ("owner", delta.scope.as_str().into()),
            ];
            db.delete(NAME, "atomicassets_balances", &cond)
                .await
                .map_err(dbe("balances_delta"))?;
            return Ok(());
        }
        let row: BalanceRow = row_payload(delta)?;
        let record: Row = vec![
            ("contract", contract.as_str().into()),
            ("owner", row.owner.as_str().into()),
            ("quantities", SqlValue::Json(json!(row.quantities))),
            ("updated_at_block", db.block_num().into()),
            ("updated_at_time", db.timestamp().into()),
        ];
        db.replace(
            NAME,
            "atomicassets_balances",
            &record,
            &["contract", "owner"],
        )
        .await
        .map_err(dbe("balances_delta"))?;
        Ok(())
    }

    /// Tracks issued/max supply, which only the chain state knows
    /// authoritatively (mints can burn-and-reissue).
    pub(super) async fn on_templates_delta(
        &mut self,
        db: &mut ContractDbTx<'_>,
        delta: &TableDelta,
    ) -> Result<(), FillError> {
        if !delta.present {
            return Ok(());
        }
        let row: TemplateRow = row_payload(delta)?;
        let contract = self.contract().to_owned();
        let set: Row = vec![
            ("issued_supply", (row.issued_supply as i64).into()),
            ("max_supply", (row.max_supply as i64).into()),
        ];
        let cond: Condition = vec![
            ("contract", contract.as_str().into()),
            ("collection_name", delta.scope.as_str().into()),
            ("template_id", row.template_id.into()),
        ];
        let touched = db
            .update(NAME, "atomicassets_templates", &set, &cond)
            .await
            .map_err(dbe("templates_delta"))?;
        if touched == 0 {
            tracing::debug!(
                "templates delta for unknown template {}:{}",
                delta.scope,
                row.template_id
            );
        }
        Ok(())
    }
}
