use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;

use super::handler::TxMeta;
use crate::constants::CHANNEL_PREFIX;
use crate::db::ContractDbTx;
use crate::errors::NotifyError;
use crate::types::BlockNum;

/// Channel carrying chain-level events (forks).
pub fn chain_channel(chain: &str, reader: &str) -> String {
    format!("{CHANNEL_PREFIX}:{chain}:{reader}:chain")
}

/// Envelope for a chain-topic fork event.
///
/// Same `{action, data, block}` shape as handler notifications. The new
/// branch's block id is not known yet when the fork is reported.
pub fn fork_payload(block_num: BlockNum) -> String {
    json!({
        "action": "fork",
        "data": {"block_num": block_num},
        "block": {"block_num": block_num, "block_id": Value::Null},
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Where published messages go. A seam so tests can observe traffic.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;
}

pub struct RedisSink {
    conn: redis::aio::ConnectionManager,
}

impl RedisSink {
    pub async fn connect(uri: &str) -> Result<Self, NotifyError> {
        let client = redis::Client::open(uri)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl NotificationSink for RedisSink {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    messages: std::sync::Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap()
            .push((channel.to_owned(), payload.to_owned()));
        Ok(())
    }
}

/// Per-handler staging buffer for change notifications.
///
/// Messages are staged during block processing and flushed only after
/// the block's transaction commits. Staging is a no-op while the block
/// is not reversible, which silences history backfills.
pub struct NotificationBuffer {
    chain: String,
    reader: String,
    handler: &'static str,
    staged: Vec<Notification>,
}

impl NotificationBuffer {
    pub fn new(chain: &str, reader: &str, handler: &'static str) -> Self {
        Self {
            chain: chain.to_owned(),
            reader: reader.to_owned(),
            handler,
            staged: Vec::new(),
        }
    }

    /// Stage a "this entity changed" event for the current block.
    pub fn stage(
        &mut self,
        db: &ContractDbTx<'_>,
        contract: &str,
        topic: &str,
        action: &str,
        data: Value,
        tx: Option<&TxMeta>,
    ) {
        self.stage_inner(
            db.reversible(),
            db.block_num(),
            db.block_id(),
            contract,
            topic,
            action,
            data,
            tx,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn stage_inner(
        &mut self,
        reversible: bool,
        block_num: BlockNum,
        block_id: &str,
        contract: &str,
        topic: &str,
        action: &str,
        data: Value,
        tx: Option<&TxMeta>,
    ) {
        if !reversible {
            return;
        }
        let channel = format!(
            "{CHANNEL_PREFIX}:{}:{}:{}:{contract}:{topic}",
            self.chain, self.reader, self.handler
        );
        let mut payload = json!({
            "action": action,
            "data": data,
            "block": {"block_num": block_num, "block_id": block_id},
        });
        if let Some(tx) = tx {
            payload["transaction"] = json!({"id": tx.txid});
        }
        self.staged.push(Notification {
            channel,
            payload: payload.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Drop staged messages (aborted block).
    pub fn clear(&mut self) {
        self.staged.clear();
    }

    /// Publish everything staged, in enqueue order.
    ///
    /// Publish failures are logged and swallowed - they cannot roll
    /// back committed data.
    pub async fn flush(&mut self, sink: &dyn NotificationSink) {
        for notification in self.staged.drain(..) {
            if let Err(e) = sink.publish(&notification.channel, &notification.payload).await {
                tracing::warn!(
                    "failed to publish on {}: {e}",
                    notification.channel
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn buffer() -> NotificationBuffer {
        NotificationBuffer::new("wax", "atomic-1", "atomicassets")
    }

    #[test]
    fn test_channel_name_scheme() {
        let mut buffer = buffer();
        buffer.stage_inner(
            true,
            100,
            "aa",
            "atomicassets",
            "assets",
            "mint",
            json!({"asset_id": "42"}),
            None,
        );
        assert_eq!(
            buffer.staged[0].channel,
            "eosio-contract-api:wax:atomic-1:atomicassets:atomicassets:assets"
        );
    }

    #[test]
    fn test_reversibility_gate() {
        let mut buffer = buffer();
        // At block_num == last irreversible the block is not reversible:
        // the row is written but no message may reach the bus.
        buffer.stage_inner(false, 100, "aa", "c", "assets", "mint", json!({}), None);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_flush_preserves_order_and_drains() {
        let mut buffer = buffer();
        let tx = TxMeta {
            txid: "cc".repeat(32),
        };
        buffer.stage_inner(true, 100, "aa", "c", "assets", "new_asset", json!({}), Some(&tx));
        buffer.stage_inner(true, 100, "aa", "c", "assets", "update", json!({}), Some(&tx));
        assert_eq!(buffer.len(), 2);

        let sink = MemorySink::new();
        buffer.flush(&sink).await;
        assert!(buffer.is_empty());

        let messages = sink.take();
        assert_eq!(messages.len(), 2);
        let first: Value = serde_json::from_str(&messages[0].1).unwrap();
        let second: Value = serde_json::from_str(&messages[1].1).unwrap();
        assert_eq!(first["action"], "new_asset");
        assert_eq!(second["action"], "update");
        assert_eq!(first["block"]["block_num"], 100);
        assert_eq!(first["transaction"]["id"], tx.txid.as_str());
    }

    #[test]
    fn test_fork_payload_shape() {
        let payload: Value = serde_json::from_str(&fork_payload(301)).unwrap();
        assert_eq!(payload["action"], "fork");
        assert_eq!(payload["data"]["block_num"], 301);
        assert_eq!(payload["block"]["block_num"], 301);
        assert_eq!(payload["block"]["block_id"], Value::Null);
    }

    #[test]
    fn test_clear_discards_staged() {
        let mut buffer = buffer();
        buffer.stage_inner(true, 100, "aa", "c", "assets", "mint", json!({}), None);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
