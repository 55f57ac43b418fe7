use serde_json::Value;
use tokio_postgres::Client;
use tokio_postgres::Transaction;

use crate::errors::DbError;
use crate::types::BlockNum;

/// Append a compensating operation for a mutation in the current block.
///
/// `operation` names the op to run at rollback time ("insert", "update"
/// or "delete"), not the mutation being shadowed.
pub(crate) async fn record(
    pgtx: &Transaction<'_>,
    block_num: BlockNum,
    handler: &str,
    operation: &str,
    table: &str,
    condition: Option<&Value>,
    values: Option<&Value>,
) -> Result<(), DbError> {
    tracing::trace!("record {operation} {table} at {block_num}");
    let sql = "
        insert into reversible_queries
            (block_num, handler, operation, table_name, condition, row_values)
        values ($1, $2, $3, $4, $5, $6);";
    pgtx.execute(
        sql,
        &[
            &(block_num as i64),
            &handler,
            &operation,
            &table,
            &condition,
            &values,
        ],
    )
    .await?;
    Ok(())
}

/// Drop rollback rows at or below the irreversible height.
pub(crate) async fn prune(pgtx: &Transaction<'_>, through: BlockNum) -> Result<u64, DbError> {
    tracing::trace!("prune rollback rows through {through}");
    Ok(pgtx
        .execute(
            "delete from reversible_queries where block_num <= $1;",
            &[&(through as i64)],
        )
        .await?)
}

/// Restore the database to its state at the end of block `height - 1`.
///
/// Applies every recorded compensating operation from `height` upwards
/// in reverse order, deletes those records and rewinds the reader
/// checkpoint, all in one transaction. Returns the number of operations
/// applied.
pub async fn roll_back_from(
    client: &mut Client,
    reader: &str,
    height: BlockNum,
) -> Result<u64, DbError> {
    let pgtx = client.transaction().await?;
    let rows = pgtx
        .query(
            "select operation, table_name, condition, row_values
            from reversible_queries
            where block_num >= $1
            order by block_num desc, global_seq desc;",
            &[&(height as i64)],
        )
        .await?;
    let count = rows.len() as u64;
    for row in &rows {
        let operation: String = row.get(0);
        let table: String = row.get(1);
        let condition: Option<Value> = row.get(2);
        let values: Option<Value> = row.get(3);
        apply(&pgtx, &operation, &table, condition, values).await?;
    }
    pgtx.execute(
        "delete from reversible_queries where block_num >= $1;",
        &[&(height as i64)],
    )
    .await?;
    pgtx.execute(
        "update contract_readers set block_num = $1, block_id = '', updated = now()
        where name = $2;",
        &[&(height as i64 - 1), &reader],
    )
    .await?;
    pgtx.commit().await?;
    tracing::info!("applied {count} rollback operations from block {height}");
    Ok(count)
}

async fn apply(
    pgtx: &Transaction<'_>,
    operation: &str,
    table: &str,
    condition: Option<Value>,
    values: Option<Value>,
) -> Result<(), DbError> {
    match operation {
        "delete" => {
            let condition = condition
                .ok_or_else(|| DbError::BadValue("rollback delete without condition".to_owned()))?;
            pgtx.execute(
                &format!("delete from {table} t where to_jsonb(t) @> $1;"),
                &[&condition],
            )
            .await?;
        }
        "insert" => {
            let values = values
                .ok_or_else(|| DbError::BadValue("rollback insert without values".to_owned()))?;
            pgtx.execute(
                &format!(
                    "insert into {table} select * from jsonb_populate_record(null::{table}, $1);"
                ),
                &[&values],
            )
            .await?;
        }
        "update" => {
            let condition = condition
                .ok_or_else(|| DbError::BadValue("rollback update without condition".to_owned()))?;
            let values = values
                .ok_or_else(|| DbError::BadValue("rollback update without values".to_owned()))?;
            pgtx.execute(
                &format!("delete from {table} t where to_jsonb(t) @> $1;"),
                &[&condition],
            )
            .await?;
            pgtx.execute(
                &format!(
                    "insert into {table} select * from jsonb_populate_record(null::{table}, $1);"
                ),
                &[&values],
            )
            .await?;
        }
        other => {
            return Err(DbError::BadValue(format!(
                "unknown rollback operation `{other}`"
            )));
        }
    }
    Ok(())
}
