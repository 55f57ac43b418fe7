use serde::Deserialize;
use serde_json::Value;

use crate::handlers::u64_str;
use crate::handlers::vec_u64_str;

/// Offer lifecycle. Stored as a smallint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferState {
    Pending = 0,
    Invalid = 1,
    Unknown = 2,
    Accepted = 3,
    Declined = 4,
    Canceled = 5,
}

impl OfferState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCollection {
    pub author: String,
    pub collection_name: String,
    pub allow_notify: bool,
    pub authorized_accounts: Vec<String>,
    pub notify_accounts: Vec<String>,
    pub market_fee: f64,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct SetCollectionData {
    pub collection_name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct AddColAuth {
    pub collection_name: String,
    pub account_to_add: String,
}

#[derive(Debug, Deserialize)]
pub struct RemColAuth {
    pub collection_name: String,
    pub account_to_remove: String,
}

#[derive(Debug, Deserialize)]
pub struct SetMarketFee {
    pub collection_name: String,
    pub market_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct ForbidNotify {
    pub collection_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchema {
    pub authorized_creator: String,
    pub collection_name: String,
    pub schema_name: String,
    #[serde(default)]
    pub schema_format: Value,
}

#[derive(Debug, Deserialize)]
pub struct ExtendSchema {
    pub authorized_editor: String,
    pub collection_name: String,
    pub schema_name: String,
    #[serde(default)]
    pub schema_format_extension: Value,
}

#[derive(Debug, Deserialize)]
pub struct LogNewTemplate {
    pub template_id: i32,
    pub authorized_creator: String,
    pub collection_name: String,
    pub schema_name: String,
    pub transferable: bool,
    pub burnable: bool,
    pub max_supply: u32,
    #[serde(default)]
    pub immutable_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct LockTemplate {
    pub authorized_editor: String,
    pub collection_name: String,
    pub template_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct LogMint {
    #[serde(with = "u64_str")]
    pub asset_id: u64,
    pub authorized_minter: String,
    pub collection_name: String,
    pub schema_name: String,
    pub template_id: i32,
    pub new_asset_owner: String,
    #[serde(default)]
    pub immutable_data: Value,
    #[serde(default)]
    pub mutable_data: Value,
    #[serde(default)]
    pub backed_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogSetData {
    pub asset_owner: String,
    #[serde(with = "u64_str")]
    pub asset_id: u64,
    #[serde(default)]
    pub old_data: Value,
    #[serde(default)]
    pub new_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct LogBackAsset {
    pub asset_owner: String,
    #[serde(with = "u64_str")]
    pub asset_id: u64,
    pub backed_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogBurnAsset {
    pub asset_owner: String,
    #[serde(with = "u64_str")]
    pub asset_id: u64,
    pub collection_name: String,
    pub schema_name: String,
    pub template_id: i32,
    #[serde(default)]
    pub backed_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogTransfer {
    pub collection_name: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipient: String,
    #[serde(with = "vec_u64_str")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct LogNewOffer {
    #[serde(with = "u64_str")]
    pub offer_id: u64,
    pub sender: String,
    pub recipient: String,
    #[serde(with = "vec_u64_str")]
    pub sender_asset_ids: Vec<u64>,
    #[serde(with = "vec_u64_str")]
    pub recipient_asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct OfferId {
    #[serde(with = "u64_str")]
    pub offer_id: u64,
}

/// `config` singleton row.
#[derive(Debug, Deserialize)]
pub struct ConfigRow {
    #[serde(default, with = "u64_str_default")]
    pub asset_counter: u64,
    #[serde(default)]
    pub template_counter: u32,
    #[serde(default, with = "u64_str_default")]
    pub offer_counter: u64,
    #[serde(default)]
    pub collection_format: Value,
    #[serde(default)]
    pub supported_tokens: Value,
}

/// `tokenconfigs` singleton row.
#[derive(Debug, Deserialize)]
pub struct TokenConfigsRow {
    #[serde(default)]
    pub standard: String,
    #[serde(default)]
    pub version: String,
}

/// `balances` table row.
#[derive(Debug, Deserialize)]
pub struct BalanceRow {
    pub owner: String,
    #[serde(default)]
    pub quantities: Vec<String>,
}

/// `templates` table row (scope = collection name).
#[derive(Debug, Deserialize)]
pub struct TemplateRow {
    pub template_id: i32,
    pub schema_name: String,
    pub transferable: bool,
    pub burnable: bool,
    pub max_supply: u32,
    pub issued_supply: u32,
}

/// Tolerant u64 parsing that also accepts a missing field default.
mod u64_str_default {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(0),
            Some(v) => crate::handlers::u64_str::parse(&v).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_offer_state_values() {
        assert_eq!(OfferState::Pending.as_i16(), 0);
        assert_eq!(OfferState::Invalid.as_i16(), 1);
        assert_eq!(OfferState::Unknown.as_i16(), 2);
        assert_eq!(OfferState::Accepted.as_i16(), 3);
        assert_eq!(OfferState::Declined.as_i16(), 4);
        assert_eq!(OfferState::Canceled.as_i16(), 5);
    }

    #[test]
    fn test_logmint_payload() {
        let payload: LogMint = serde_json::from_value(json!({
            "asset_id": "1099511627776",
            "authorized_minter": "minter",
            "collection_name": "dragons",
            "schema_name": "beasts",
            "template_id": 7,
            "new_asset_owner": "alice",
            "immutable_data": [{"key": "name", "value": ["string", "Smaug"]}],
            "mutable_data": [],
            "backed_tokens": []
        }))
        .unwrap();
        assert_eq!(payload.asset_id, 1099511627776);
        assert_eq!(payload.new_asset_owner, "alice");
    }

    #[test]
    fn test_logtransfer_renames() {
        let payload: LogTransfer = serde_json::from_value(json!({
            "collection_name": "dragons",
            "from": "alice",
            "to": "bob",
            "asset_ids": ["42", 43],
            "memo": "gift"
        }))
        .unwrap();
        assert_eq!(payload.sender, "alice");
        assert_eq!(payload.recipient, "bob");
        assert_eq!(payload.asset_ids, vec![42, 43]);
    }
}
