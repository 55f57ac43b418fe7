pub type BlockNum = u32;
pub type BlockId = String;
pub type Name = String;
/// Milliseconds since unix epoch.
pub type Timestamp = i64;
pub type GlobalSequence = u64;

/// Position of a block in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPosition {
    pub block_num: BlockNum,
    pub block_id: BlockId,
}

impl BlockPosition {
    pub fn new(block_num: BlockNum, block_id: &str) -> Self {
        Self {
            block_num,
            block_id: block_id.to_owned(),
        }
    }
}

/// A fully decoded block, ready for handler dispatch.
///
/// Traces come pre-flattened in chain execution order. Table deltas
/// follow all traces, also in execution order.
#[derive(Debug)]
pub struct Block {
    pub block_num: BlockNum,
    pub block_id: BlockId,
    pub prev_id: BlockId,
    pub last_irreversible: BlockNum,
    pub timestamp: Timestamp,
    pub transactions: Vec<Transaction>,
    pub deltas: Vec<TableDelta>,
}

impl Block {
    /// True while the block is above the irreversible height.
    pub fn reversible(&self) -> bool {
        self.block_num > self.last_irreversible
    }
}

#[derive(Debug)]
pub struct Transaction {
    pub txid: String,
    pub traces: Vec<ActionTrace>,
}

#[derive(Debug)]
pub struct ActionTrace {
    pub global_sequence: GlobalSequence,
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    /// Raw action payload bytes.
    pub data: Vec<u8>,
    /// ABI-decoded payload. Populated only for traces matched by a
    /// scope filter with `deserialize = true`.
    pub decoded: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

/// A row-level change to a contract table.
#[derive(Debug)]
pub struct TableDelta {
    pub contract: Name,
    pub scope: Name,
    pub table: Name,
    pub primary_key: u64,
    pub payer: Name,
    /// False marks a deletion.
    pub present: bool,
    /// Raw serialized row value.
    pub data: Vec<u8>,
    /// ABI-decoded row. Populated only for deltas matched by a scope
    /// filter with `deserialize = true`.
    pub decoded: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::distributions::DistString;

    fn random_digest32() -> String {
        Alphanumeric.sample_string(&mut rand::thread_rng(), 64)
    }

    impl Block {
        pub fn dummy() -> Self {
            Self {
                block_num: 100,
                block_id: random_digest32(),
                prev_id: random_digest32(),
                last_irreversible: 50,
                timestamp: 1690000000000,
                transactions: vec![],
                deltas: vec![],
            }
        }

        /// Returns block with modified height.
        pub fn block_num(mut self, block_num: BlockNum) -> Self {
            self.block_num = block_num;
            self
        }

        /// Returns block with modified irreversible height.
        pub fn last_irreversible(mut self, lib: BlockNum) -> Self {
            self.last_irreversible = lib;
            self
        }

        /// Returns block with appended transaction.
        pub fn add_tx(mut self, tx: Transaction) -> Self {
            self.transactions.push(tx);
            self
        }
    }

    impl Transaction {
        pub fn dummy() -> Self {
            Self {
                txid: random_digest32(),
                traces: vec![],
            }
        }

        /// Returns tx with appended trace.
        pub fn add_trace(mut self, trace: ActionTrace) -> Self {
            self.traces.push(trace);
            self
        }
    }

    impl ActionTrace {
        pub fn dummy(account: &str, name: &str) -> Self {
            Self {
                global_sequence: 1,
                account: account.to_owned(),
                name: name.to_owned(),
                authorization: vec![],
                data: vec![],
                decoded: None,
            }
        }

        pub fn decoded(mut self, value: serde_json::Value) -> Self {
            self.decoded = Some(value);
            self
        }
    }

    #[test]
    fn test_block_reversibility() {
        let block = Block::dummy().block_num(100).last_irreversible(99);
        assert!(block.reversible());
        let block = Block::dummy().block_num(100).last_irreversible(100);
        assert!(!block.reversible());
    }

    #[test]
    fn test_block_builders() {
        let block = Block::dummy().add_tx(
            Transaction::dummy()
                .add_trace(ActionTrace::dummy("atomicassets", "logmint"))
                .add_trace(
                    ActionTrace::dummy("atomicassets", "logtransfer")
                        .decoded(serde_json::json!({"from": "alice"})),
                ),
        );
        assert_eq!(block.transactions.len(), 1);
        let traces = &block.transactions[0].traces;
        assert_eq!(traces[0].name, "logmint");
        assert!(traces[0].decoded.is_none());
        assert_eq!(traces[1].decoded.as_ref().unwrap()["from"], "alice");
    }
}
