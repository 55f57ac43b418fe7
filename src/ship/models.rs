use serde::Deserialize;
use serde_json::Value;

use crate::errors::ShipError;
use crate::types::BlockId;
use crate::types::BlockNum;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockPos {
    pub block_num: BlockNum,
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetStatusResult {
    pub head: BlockPos,
    pub last_irreversible: BlockPos,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub trace_begin_block: Option<BlockNum>,
    #[serde(default)]
    pub trace_end_block: Option<BlockNum>,
}

/// Decoded `get_blocks_result_v0`.
///
/// The `block`, `traces` and `deltas` fields stay hex-encoded blobs at
/// this level; they require a second ABI-driven decode pass each.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlocksResult {
    pub head: BlockPos,
    pub last_irreversible: BlockPos,
    #[serde(default)]
    pub this_block: Option<BlockPos>,
    #[serde(default)]
    pub prev_block: Option<BlockPos>,
    #[serde(default)]
    pub block: Option<String>,
    #[serde(default)]
    pub traces: Option<String>,
    #[serde(default)]
    pub deltas: Option<String>,
}

#[derive(Debug)]
pub enum ShipResult {
    Status(GetStatusResult),
    Blocks(GetBlocksResult),
}

/// Split a decoded `result` variant into its typed view.
pub fn parse_result(value: Value) -> Result<ShipResult, ShipError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| ShipError::BadResult("not a variant pair".to_owned()))?;
    let tag = pair[0]
        .as_str()
        .ok_or_else(|| ShipError::BadResult("missing variant tag".to_owned()))?;
    match tag {
        "get_status_result_v0" => {
            let status = serde_json::from_value(pair[1].clone())
                .map_err(|e| ShipError::BadResult(e.to_string()))?;
            Ok(ShipResult::Status(status))
        }
        "get_blocks_result_v0" => {
            let blocks = serde_json::from_value(pair[1].clone())
                .map_err(|e| ShipError::BadResult(e.to_string()))?;
            Ok(ShipResult::Blocks(blocks))
        }
        other => Err(ShipError::UnexpectedMessage(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_blocks_result() {
        let value = json!([
            "get_blocks_result_v0",
            {
                "head": {"block_num": 105, "block_id": "aa"},
                "last_irreversible": {"block_num": 100, "block_id": "bb"},
                "this_block": {"block_num": 101, "block_id": "cc"},
                "prev_block": {"block_num": 100, "block_id": "bb"},
                "block": "00",
                "traces": null,
                "deltas": null
            }
        ]);
        match parse_result(value).unwrap() {
            ShipResult::Blocks(r) => {
                assert_eq!(r.this_block.unwrap().block_num, 101);
                assert_eq!(r.last_irreversible.block_num, 100);
                assert!(r.traces.is_none());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let value = json!(["get_blocks_result_v9", {}]);
        assert!(matches!(
            parse_result(value),
            Err(ShipError::UnexpectedMessage(_))
        ));
    }
}
