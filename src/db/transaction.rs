use postgres_types::ToSql;
use serde_json::Value;
use tokio_postgres::Client;
use tokio_postgres::Transaction;

use super::ops;
use super::ops::Condition;
use super::ops::Row;
use super::rollback;
use crate::errors::DbError;
use crate::types::Block;
use crate::types::BlockId;
use crate::types::BlockNum;
use crate::types::Timestamp;

/// One database transaction per block, with rollback-history capture.
///
/// Every mutation made while `reversible` appends a compensating
/// operation to the rollback table, in the same transaction. Any failed
/// operation poisons the transaction; later calls fail without touching
/// the database. Handlers receive this only inside hook calls.
pub struct ContractDbTx<'a> {
    pgtx: Transaction<'a>,
    block_num: BlockNum,
    block_id: BlockId,
    timestamp: Timestamp,
    last_irreversible: BlockNum,
    reversible: bool,
    poisoned: bool,
}

impl<'a> ContractDbTx<'a> {
    pub async fn begin(client: &'a mut Client, block: &Block) -> Result<ContractDbTx<'a>, DbError> {
        let pgtx = client.transaction().await?;
        Ok(Self {
            pgtx,
            block_num: block.block_num,
            block_id: block.block_id.clone(),
            timestamp: block.timestamp,
            last_irreversible: block.last_irreversible,
            reversible: block.reversible(),
            poisoned: false,
        })
    }

    pub fn block_num(&self) -> BlockNum {
        self.block_num
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn last_irreversible(&self) -> BlockNum {
        self.last_irreversible
    }

    pub fn reversible(&self) -> bool {
        self.reversible
    }

    pub(crate) fn pgtx(&self) -> &Transaction<'a> {
        &self.pgtx
    }

    fn check(&self) -> Result<(), DbError> {
        if self.poisoned {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }

    pub async fn insert(
        &mut self,
        handler: &str,
        table: &str,
        row: &Row,
        primary: &[&str],
    ) -> Result<(), DbError> {
        self.check()?;
        let result = insert_inner(
            &self.pgtx,
            self.reversible,
            self.block_num,
            handler,
            table,
            row,
            primary,
        )
        .await;
        self.absorb(result)
    }

    /// Insert or overwrite by primary key.
    pub async fn replace(
        &mut self,
        handler: &str,
        table: &str,
        row: &Row,
        primary: &[&str],
    ) -> Result<(), DbError> {
        self.check()?;
        let result = replace_inner(
            &self.pgtx,
            self.reversible,
            self.block_num,
            handler,
            table,
            row,
            primary,
        )
        .await;
        self.absorb(result)
    }

    /// Update rows matching `cond`, returning the number of rows touched.
    ///
    /// Conditions are expected to identify rows by key; every prior row
    /// is captured for rollback.
    pub async fn update(
        &mut self,
        handler: &str,
        table: &str,
        set: &Row,
        cond: &Condition,
    ) -> Result<u64, DbError> {
        self.check()?;
        let result = update_inner(
            &self.pgtx,
            self.reversible,
            self.block_num,
            handler,
            table,
            set,
            cond,
        )
        .await;
        self.absorb(result)
    }

    pub async fn delete(
        &mut self,
        handler: &str,
        table: &str,
        cond: &Condition,
    ) -> Result<u64, DbError> {
        self.check()?;
        let result = delete_inner(
            &self.pgtx,
            self.reversible,
            self.block_num,
            handler,
            table,
            cond,
        )
        .await;
        self.absorb(result)
    }

    pub async fn query(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>, DbError> {
        self.check()?;
        let result = self.pgtx.query(sql, params).await.map_err(DbError::from);
        self.absorb(result)
    }

    pub async fn query_opt(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<tokio_postgres::Row>, DbError> {
        self.check()?;
        let result = self.pgtx.query_opt(sql, params).await.map_err(DbError::from);
        self.absorb(result)
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        self.check()?;
        let result = self.pgtx.execute(sql, params).await.map_err(DbError::from);
        self.absorb(result)
    }

    fn absorb<T>(&mut self, result: Result<T, DbError>) -> Result<T, DbError> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Flush and release. The transaction object is dead afterwards.
    pub async fn commit(self) -> Result<(), DbError> {
        if self.poisoned {
            return Err(DbError::Poisoned);
        }
        self.pgtx.commit().await?;
        Ok(())
    }

    /// Roll back the underlying transaction without committing.
    pub async fn abort(self) -> Result<(), DbError> {
        self.pgtx.rollback().await?;
        Ok(())
    }
}

fn params_of<'a>(pairs: &'a [(&'static str, super::ops::SqlValue)]) -> Vec<&'a (dyn ToSql + Sync)> {
    pairs
        .iter()
        .map(|(_, value)| value as &(dyn ToSql + Sync))
        .collect()
}

fn columns_of<'r>(pairs: &'r [(&'static str, super::ops::SqlValue)]) -> Vec<&'r str> {
    pairs.iter().map(|(column, _)| *column).collect()
}

async fn select_prior(
    pgtx: &Transaction<'_>,
    table: &str,
    cond: &Condition,
) -> Result<Vec<Value>, DbError> {
    let sql = ops::select_prior_sql(table, &columns_of(cond));
    let rows = pgtx.query(&sql, &params_of(cond)).await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

async fn insert_inner(
    pgtx: &Transaction<'_>,
    reversible: bool,
    block_num: BlockNum,
    handler: &str,
    table: &str,
    row: &Row,
    primary: &[&str],
) -> Result<(), DbError> {
    let sql = ops::insert_sql(table, &columns_of(row));
    pgtx.execute(&sql, &params_of(row)).await?;
    if reversible {
        let condition = ops::columns_json(row, primary);
        rollback::record(pgtx, block_num, handler, "delete", table, Some(&condition), None)
            .await?;
    }
    Ok(())
}

async fn replace_inner(
    pgtx: &Transaction<'_>,
    reversible: bool,
    block_num: BlockNum,
    handler: &str,
    table: &str,
    row: &Row,
    primary: &[&str],
) -> Result<(), DbError> {
    let prior = if reversible {
        let pk_cond: Condition = row
            .iter()
            .filter(|(column, _)| primary.contains(column))
            .cloned()
            .collect();
        select_prior(pgtx, table, &pk_cond).await?
    } else {
        vec![]
    };

    let sql = ops::replace_sql(table, &columns_of(row), primary);
    pgtx.execute(&sql, &params_of(row)).await?;

    if reversible {
        match prior.first() {
            Some(prior_row) => {
                // The row now carries the replacing values.
                let condition = ops::row_json(row);
                rollback::record(
                    pgtx,
                    block_num,
                    handler,
                    "update",
                    table,
                    Some(&condition),
                    Some(prior_row),
                )
                .await?;
            }
            None => {
                let condition = ops::columns_json(row, primary);
                rollback::record(
                    pgtx,
                    block_num,
                    handler,
                    "delete",
                    table,
                    Some(&condition),
                    None,
                )
                .await?;
            }
        }
    }
    Ok(())
}

async fn update_inner(
    pgtx: &Transaction<'_>,
    reversible: bool,
    block_num: BlockNum,
    handler: &str,
    table: &str,
    set: &Row,
    cond: &Condition,
) -> Result<u64, DbError> {
    if reversible {
        for prior_row in select_prior(pgtx, table, cond).await? {
            // Identify the row by its post-update image.
            let condition = ops::post_image(&prior_row, set);
            rollback::record(
                pgtx,
                block_num,
                handler,
                "update",
                table,
                Some(&condition),
                Some(&prior_row),
            )
            .await?;
        }
    }
    let sql = ops::update_sql(table, &columns_of(set), &columns_of(cond));
    let mut params = params_of(set);
    params.extend(params_of(cond));
    Ok(pgtx.execute(&sql, &params).await?)
}

async fn delete_inner(
    pgtx: &Transaction<'_>,
    reversible: bool,
    block_num: BlockNum,
    handler: &str,
    table: &str,
    cond: &Condition,
) -> Result<u64, DbError> {
    if reversible {
        for prior_row in select_prior(pgtx, table, cond).await? {
            rollback::record(
                pgtx,
                block_num,
                handler,
                "insert",
                table,
                None,
                Some(&prior_row),
            )
            .await?;
        }
    }
    let sql = ops::delete_sql(table, &columns_of(cond));
    Ok(pgtx.execute(&sql, &params_of(cond)).await?)
}
