use tokio_postgres::Client;
use tokio_postgres::Transaction;

use crate::errors::DbError;
use crate::types::BlockId;
use crate::types::BlockNum;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderPosition {
    pub block_num: BlockNum,
    pub block_id: BlockId,
}

/// Get the committed position of the reader, if any.
pub async fn get(client: &Client, name: &str) -> Result<Option<ReaderPosition>, DbError> {
    tracing::trace!("get reader position for {name}");
    let qry = "
        select block_num, block_id
        from contract_readers
        where name = $1;";
    Ok(client.query_opt(qry, &[&name]).await?.map(|row| {
        let block_num: i64 = row.get(0);
        ReaderPosition {
            block_num: block_num as BlockNum,
            block_id: row.get(1),
        }
    }))
}

/// Upsert the reader checkpoint, in the block's own transaction.
pub async fn update(
    pgtx: &Transaction<'_>,
    name: &str,
    block_num: BlockNum,
    block_id: &str,
    live: bool,
) -> Result<(), DbError> {
    tracing::trace!("update reader {name} to {block_num}");
    let sql = "
        insert into contract_readers (name, block_num, block_id, live, updated)
        values ($1, $2, $3, $4, now())
        on conflict (name) do update
        set block_num = excluded.block_num
            , block_id = excluded.block_id
            , live = excluded.live
            , updated = excluded.updated;";
    pgtx.execute(sql, &[&name, &(block_num as i64), &block_id, &live])
        .await?;
    Ok(())
}
