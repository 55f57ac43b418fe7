//! Database access.
//!
//! One `ContractDbTx` wraps one underlying transaction per block. Every
//! mutation made while the block is reversible records a compensating
//! operation in the `reversible_queries` table, written in the same
//! transaction, so a fork can restore the exact prior state.

mod ops;
pub mod readers;
pub mod rollback;
mod transaction;

pub use ops::Condition;
pub use ops::Row;
pub use ops::SqlValue;
pub use transaction::ContractDbTx;

use tokio_postgres::Client;
use tokio_postgres::NoTls;

use crate::errors::DbError;

/// Connect to postgres, driving the connection on its own task.
pub async fn connect(uri: &str) -> Result<Client, DbError> {
    let (client, connection) = tokio_postgres::connect(uri, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });
    Ok(client)
}

/// Initialize the core relations (checkpoints and rollback history).
pub async fn init_core_schema(client: &mut Client) -> Result<(), DbError> {
    if table_exists(client, "reversible_queries").await? {
        return Ok(());
    }
    tracing::debug!("loading core schema");
    let pgtx = client.transaction().await?;
    pgtx.batch_execute(include_str!("db/schema.sql")).await?;
    pgtx.commit().await?;
    Ok(())
}

/// Returns true if a table with given `name` exists in the public schema.
pub async fn table_exists(client: &Client, name: &str) -> Result<bool, DbError> {
    let qry = "
    select exists(
        select table_name
        from information_schema.tables
        where table_schema = 'public' and table_name = $1
    );";
    Ok(client.query_one(qry, &[&name]).await?.get(0))
}
