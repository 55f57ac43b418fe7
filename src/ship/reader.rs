use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use serde_json::Value;
use tokio::sync::mpsc;

use super::client::ShipClient;
use super::models::parse_result;
use super::models::BlockPos;
use super::models::GetBlocksResult;
use super::models::ShipResult;
use super::wire::ShipRequest;
use crate::abi::DeserializerPool;
use crate::errors::ShipError;
use crate::types::ActionTrace;
use crate::types::Block;
use crate::types::BlockNum;
use crate::types::PermissionLevel;
use crate::types::TableDelta;
use crate::types::Timestamp;
use crate::types::Transaction;

/// Chain epoch (2000-01-01T00:00:00Z) in milliseconds.
const BLOCK_EPOCH_MS: i64 = 946_684_800_000;
/// Half-second block timestamp slots.
const BLOCK_INTERVAL_MS: i64 = 500;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub ship_endpoint: String,
    pub start_block: BlockNum,
    /// Stop before this block. None streams forever.
    pub stop_block: Option<BlockNum>,
    pub ack_batch: u32,
    pub window: usize,
    pub ds_threads: usize,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

pub enum ReaderEvent {
    Block(Box<Block>),
    Fork { at: BlockNum },
}

enum SessionEnd {
    /// Requested range fully delivered.
    RangeDone,
    /// Receiver side dropped; nothing left to do.
    Downstream,
}

/// Streams decoded blocks from a state-history endpoint.
///
/// Owns the socket and a deserializer pool. Decoded blocks go through a
/// bounded channel, so the reader suspends whenever the receiver lags by
/// more than the configured window.
pub struct BlockReader {
    config: ReaderConfig,
    tx: mpsc::Sender<ReaderEvent>,
}

impl BlockReader {
    pub fn new(config: ReaderConfig) -> (Self, mpsc::Receiver<ReaderEvent>) {
        let (tx, rx) = mpsc::channel(config.window.max(1));
        (Self { config, tx }, rx)
    }

    pub async fn start(self) {
        let mut next_block = self.config.start_block;
        let mut last: Option<BlockPos> = None;
        let mut backoff = Backoff::new(self.config.backoff_base_ms, self.config.backoff_cap_ms);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("[reader] got a ctrl-c message");
                    break;
                },
                res = self.run_session(&mut next_block, &mut last, &mut backoff) => match res {
                    Ok(SessionEnd::RangeDone) => {
                        tracing::info!("[reader] reached end of requested range");
                        break;
                    }
                    Ok(SessionEnd::Downstream) => break,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            "[reader] state-history session failed: {e} - reconnecting in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn run_session(
        &self,
        next_block: &mut BlockNum,
        last: &mut Option<BlockPos>,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, ShipError> {
        let (mut client, abi) = ShipClient::connect(&self.config.ship_endpoint).await?;
        let pool = DeserializerPool::spawn("ship", Arc::new(abi), self.config.ds_threads);

        client.send(&ShipRequest::GetStatus).await?;
        let status = loop {
            let frame = client.recv().await?;
            match parse_result(pool.decode("result", frame).await?)? {
                ShipResult::Status(status) => break status,
                // Stale block results from a previous session's window.
                ShipResult::Blocks(_) => continue,
            }
        };
        tracing::info!(
            "[reader] state-history head {} (irreversible {})",
            status.head.block_num,
            status.last_irreversible.block_num
        );
        backoff.reset();

        let end_block = self.config.stop_block.unwrap_or(BlockNum::MAX);
        if *next_block >= end_block {
            return Ok(SessionEnd::RangeDone);
        }
        client
            .send(&ShipRequest::GetBlocks {
                start_block: *next_block,
                end_block,
                max_messages_in_flight: self.config.ack_batch,
                irreversible_only: false,
                fetch_block: true,
                fetch_traces: true,
                fetch_deltas: true,
            })
            .await?;

        let mut unacked: u32 = 0;
        loop {
            let frame = client.recv().await?;
            let result = match parse_result(pool.decode("result", frame).await?)? {
                ShipResult::Blocks(result) => result,
                ShipResult::Status(_) => continue,
            };
            unacked += 1;
            if unacked >= self.config.ack_batch {
                client
                    .send(&ShipRequest::GetBlocksAck {
                        num_messages: unacked,
                    })
                    .await?;
                unacked = 0;
            }

            let Some(this_block) = result.this_block.clone() else {
                // Head-of-chain heartbeat.
                continue;
            };

            match chain_check(last.as_ref(), &this_block, result.prev_block.as_ref()) {
                ChainCheck::Ok => {}
                ChainCheck::Fork { at } => {
                    tracing::warn!("[reader] fork detected at block {at}");
                    if self.tx.send(ReaderEvent::Fork { at }).await.is_err() {
                        return Ok(SessionEnd::Downstream);
                    }
                }
                ChainCheck::Gap { expected } => {
                    return Err(ShipError::OutOfOrder {
                        expected,
                        received: this_block.block_num,
                    });
                }
            }

            let block = build_block(&pool, &result, &this_block).await?;
            *last = Some(this_block.clone());
            *next_block = this_block.block_num + 1;
            if self.tx.send(ReaderEvent::Block(Box::new(block))).await.is_err() {
                return Ok(SessionEnd::Downstream);
            }
            if this_block.block_num + 1 >= end_block {
                return Ok(SessionEnd::RangeDone);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChainCheck {
    Ok,
    Fork { at: BlockNum },
    Gap { expected: BlockNum },
}

/// Out-of-order defense: verify a received block chains onto the last
/// delivered one.
fn chain_check(last: Option<&BlockPos>, this: &BlockPos, prev: Option<&BlockPos>) -> ChainCheck {
    let Some(last) = last else {
        return ChainCheck::Ok;
    };
    if this.block_num <= last.block_num {
        return ChainCheck::Fork {
            at: this.block_num,
        };
    }
    if this.block_num > last.block_num + 1 {
        return ChainCheck::Gap {
            expected: last.block_num + 1,
        };
    }
    match prev {
        Some(prev) if prev.block_id != last.block_id => ChainCheck::Fork {
            at: this.block_num,
        },
        _ => ChainCheck::Ok,
    }
}

async fn build_block(
    pool: &DeserializerPool,
    result: &GetBlocksResult,
    this_block: &BlockPos,
) -> Result<Block, ShipError> {
    let transactions = match &result.traces {
        Some(blob) if !blob.is_empty() => {
            let bytes = decode_hex(blob, "traces")?;
            let value = pool.decode("transaction_trace[]", bytes).await?;
            parse_traces(&value)?
        }
        _ => vec![],
    };
    let deltas = match &result.deltas {
        Some(blob) if !blob.is_empty() => {
            let bytes = decode_hex(blob, "deltas")?;
            let value = pool.decode("table_delta[]", bytes).await?;
            parse_deltas(&value)?
        }
        _ => vec![],
    };
    let timestamp = match &result.block {
        Some(blob) if !blob.is_empty() => {
            let bytes = decode_hex(blob, "block")?;
            let value = pool.decode("signed_block", bytes).await?;
            block_timestamp_ms(u64_field(&value, "timestamp")? as u32)
        }
        _ => 0,
    };

    Ok(Block {
        block_num: this_block.block_num,
        block_id: this_block.block_id.clone(),
        prev_id: result
            .prev_block
            .as_ref()
            .map(|p| p.block_id.clone())
            .unwrap_or_default(),
        last_irreversible: result.last_irreversible.block_num,
        timestamp,
        transactions,
        deltas,
    })
}

fn block_timestamp_ms(slot: u32) -> Timestamp {
    BLOCK_EPOCH_MS + slot as i64 * BLOCK_INTERVAL_MS
}

fn decode_hex(blob: &str, ctx: &str) -> Result<Vec<u8>, ShipError> {
    hex::decode(blob).map_err(|_| ShipError::BadResult(format!("bad hex in {ctx}")))
}

fn variant_pair<'v>(value: &'v Value, ctx: &str) -> Result<(&'v str, &'v Value), ShipError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| ShipError::BadResult(format!("{ctx}: not a variant pair")))?;
    let tag = pair[0]
        .as_str()
        .ok_or_else(|| ShipError::BadResult(format!("{ctx}: missing variant tag")))?;
    Ok((tag, &pair[1]))
}

fn str_field(value: &Value, key: &str) -> Result<String, ShipError> {
    value[key]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ShipError::BadResult(format!("missing field `{key}`")))
}

/// Accepts both number and string renditions of 64-bit integers.
fn u64_field(value: &Value, key: &str) -> Result<u64, ShipError> {
    let field = &value[key];
    if let Some(n) = field.as_u64() {
        return Ok(n);
    }
    if let Some(s) = field.as_str() {
        return s
            .parse()
            .map_err(|_| ShipError::BadResult(format!("bad integer in `{key}`")));
    }
    Err(ShipError::BadResult(format!("missing field `{key}`")))
}

/// Flatten decoded transaction traces into execution order.
///
/// Only executed transactions are kept. Action traces are restricted to
/// receiver == account (the canonical execution; notification copies are
/// dropped) and ordered depth-first by action ordinal.
fn parse_traces(value: &Value) -> Result<Vec<Transaction>, ShipError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ShipError::BadResult("traces: not an array".to_owned()))?;
    let mut transactions = Vec::new();
    for entry in entries {
        let (tag, body) = variant_pair(entry, "transaction_trace")?;
        if tag != "transaction_trace_v0" {
            return Err(ShipError::UnexpectedMessage(tag.to_owned()));
        }
        // status 0 = executed
        if u64_field(body, "status")? != 0 {
            continue;
        }
        let txid = str_field(body, "id")?;
        let raw_traces = body["action_traces"]
            .as_array()
            .ok_or_else(|| ShipError::BadResult("missing action_traces".to_owned()))?;

        let mut ordered: Vec<(u64, ActionTrace)> = Vec::new();
        for raw in raw_traces {
            let (_tag, at) = variant_pair(raw, "action_trace")?;
            let act = &at["act"];
            let account = str_field(act, "account")?;
            let receiver = str_field(at, "receiver")?;
            // Keep the canonical execution only, not notification copies.
            if receiver != account {
                continue;
            }
            let global_sequence = match at["receipt"].as_array() {
                Some(receipt) if receipt.len() == 2 => {
                    u64_field(&receipt[1], "global_sequence").unwrap_or(0)
                }
                _ => 0,
            };
            let authorization: Vec<PermissionLevel> =
                serde_json::from_value(act["authorization"].clone())
                    .map_err(|e| ShipError::BadResult(format!("bad authorization: {e}")))?;
            let data = act["data"]
                .as_str()
                .map(|blob| decode_hex(blob, "act.data"))
                .transpose()?
                .unwrap_or_default();
            ordered.push((
                u64_field(at, "action_ordinal")?,
                ActionTrace {
                    global_sequence,
                    account,
                    name: str_field(act, "name")?,
                    authorization,
                    data,
                    decoded: None,
                },
            ));
        }
        let traces: Vec<ActionTrace> = ordered
            .into_iter()
            .sorted_by_key(|(ordinal, _)| *ordinal)
            .map(|(_, trace)| trace)
            .collect();
        if !traces.is_empty() {
            transactions.push(Transaction { txid, traces });
        }
    }
    Ok(transactions)
}

/// Extract contract rows from decoded table deltas.
fn parse_deltas(value: &Value) -> Result<Vec<TableDelta>, ShipError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ShipError::BadResult("deltas: not an array".to_owned()))?;
    let mut deltas = Vec::new();
    for entry in entries {
        if entry["name"].as_str() != Some("contract_row") {
            continue;
        }
        let rows = entry["rows"]
            .as_array()
            .ok_or_else(|| ShipError::BadResult("missing delta rows".to_owned()))?;
        for row in rows {
            let present = row["present"]
                .as_bool()
                .ok_or_else(|| ShipError::BadResult("missing row.present".to_owned()))?;
            let (_tag, body) = variant_pair(&row["data"], "contract_row")?;
            deltas.push(TableDelta {
                contract: str_field(body, "code")?,
                scope: str_field(body, "scope")?,
                table: str_field(body, "table")?,
                primary_key: u64_field(body, "primary_key")?,
                payer: str_field(body, "payer")?,
                present,
                data: body["value"]
                    .as_str()
                    .map(|blob| decode_hex(blob, "row.value"))
                    .transpose()?
                    .unwrap_or_default(),
                decoded: None,
            });
        }
    }
    Ok(deltas)
}

/// Capped exponential reconnect backoff.
struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    attempt: u32,
}

impl Backoff {
    fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let ms = self
            .base_ms
            .saturating_mul(1u64 << self.attempt.min(16))
            .min(self.cap_ms);
        self.attempt += 1;
        Duration::from_millis(ms)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pos(block_num: BlockNum, block_id: &str) -> BlockPos {
        BlockPos {
            block_num,
            block_id: block_id.to_owned(),
        }
    }

    #[test]
    fn test_chain_check_accepts_child() {
        let last = pos(100, "aa");
        let this = pos(101, "bb");
        let prev = pos(100, "aa");
        assert_eq!(
            chain_check(Some(&last), &this, Some(&prev)),
            ChainCheck::Ok
        );
    }

    #[test]
    fn test_chain_check_first_block() {
        let this = pos(101, "bb");
        assert_eq!(chain_check(None, &this, None), ChainCheck::Ok);
    }

    #[test]
    fn test_chain_check_detects_fork_on_lower_height() {
        let last = pos(100, "aa");
        let this = pos(99, "xx");
        assert_eq!(
            chain_check(Some(&last), &this, None),
            ChainCheck::Fork { at: 99 }
        );
    }

    #[test]
    fn test_chain_check_detects_fork_on_parent_mismatch() {
        let last = pos(100, "aa");
        let this = pos(101, "bb");
        let prev = pos(100, "zz");
        assert_eq!(
            chain_check(Some(&last), &this, Some(&prev)),
            ChainCheck::Fork { at: 101 }
        );
    }

    #[test]
    fn test_chain_check_detects_gap() {
        let last = pos(100, "aa");
        let this = pos(105, "bb");
        assert_eq!(
            chain_check(Some(&last), &this, None),
            ChainCheck::Gap { expected: 101 }
        );
    }

    #[test]
    fn test_block_timestamp_slots() {
        assert_eq!(block_timestamp_ms(0), 946_684_800_000);
        assert_eq!(block_timestamp_ms(2), 946_684_801_000);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(500, 30_000);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(30_000));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    fn trace_entry(ordinal: u64, account: &str, receiver: &str, name: &str, seq: u64) -> Value {
        json!([
            "action_trace_v1",
            {
                "action_ordinal": ordinal,
                "creator_action_ordinal": 0,
                "receipt": ["action_receipt_v0", {"global_sequence": seq.to_string()}],
                "receiver": receiver,
                "act": {
                    "account": account,
                    "name": name,
                    "authorization": [{"actor": "alice", "permission": "active"}],
                    "data": "00ff"
                }
            }
        ])
    }

    #[test]
    fn test_parse_traces_orders_and_filters() {
        let value = json!([
            [
                "transaction_trace_v0",
                {
                    "id": "dd".repeat(32),
                    "status": 0,
                    "action_traces": [
                        trace_entry(2, "atomicassets", "atomicassets", "logtransfer", 11),
                        // notification copy, dropped
                        trace_entry(3, "atomicassets", "alice", "logtransfer", 12),
                        trace_entry(1, "atomicassets", "atomicassets", "logmint", 10),
                    ]
                }
            ],
            [
                "transaction_trace_v0",
                {"id": "ee".repeat(32), "status": 1, "action_traces": []}
            ]
        ]);
        let transactions = parse_traces(&value).unwrap();
        assert_eq!(transactions.len(), 1);
        let traces = &transactions[0].traces;
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].name, "logmint");
        assert_eq!(traces[0].global_sequence, 10);
        assert_eq!(traces[0].data, vec![0x00, 0xff]);
        assert_eq!(traces[1].name, "logtransfer");
        assert_eq!(traces[1].authorization[0].actor, "alice");
    }

    #[test]
    fn test_parse_deltas_keeps_contract_rows() {
        let value = json!([
            {"name": "resource_limits", "rows": [{"present": true, "data": ["x", {}]}]},
            {
                "name": "contract_row",
                "rows": [
                    {
                        "present": false,
                        "data": [
                            "contract_row_v0",
                            {
                                "code": "atomicassets",
                                "scope": "atomicassets",
                                "table": "offers",
                                "primary_key": "7",
                                "payer": "alice",
                                "value": "beef"
                            }
                        ]
                    }
                ]
            }
        ]);
        let deltas = parse_deltas(&value).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].table, "offers");
        assert_eq!(deltas[0].primary_key, 7);
        assert!(!deltas[0].present);
        assert_eq!(deltas[0].data, vec![0xbe, 0xef]);
    }
}
