use serde::Deserialize;
use serde::Serialize;

use crate::types::BlockNum;

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: BlockNum,
    pub last_irreversible_block_num: BlockNum,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRowsParams {
    pub code: String,
    pub scope: String,
    pub table: String,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    pub json: bool,
}

impl TableRowsParams {
    pub fn new(code: &str, scope: &str, table: &str) -> Self {
        Self {
            code: code.to_owned(),
            scope: scope.to_owned(),
            table: table.to_owned(),
            limit: 100,
            lower_bound: None,
            json: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRowsResult {
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub next_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetAbiResult {
    pub account_name: String,
    #[serde(default)]
    pub abi: Option<serde_json::Value>,
}
