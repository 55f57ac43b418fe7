//! Concrete contract handlers.

mod atomicassets;
mod atomicmarket;

pub use atomicassets::AtomicAssetsHandler;
pub use atomicmarket::AtomicMarketHandler;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::db::ContractDbTx;
use crate::db::Row;
use crate::db::SqlValue;
use crate::errors::DbError;
use crate::errors::FillError;
use crate::framework::ContractHandler;
use crate::framework::NotificationSink;
use crate::framework::TxMeta;
use crate::types::GlobalSequence;

/// Instantiate the configured handlers, in registration order.
pub fn build(
    config: &Config,
    sink: &Arc<dyn NotificationSink>,
) -> Result<Vec<Box<dyn ContractHandler>>, FillError> {
    let mut handlers: Vec<Box<dyn ContractHandler>> = Vec::new();
    for entry in &config.handlers {
        match entry.handler.as_str() {
            "atomicassets" => handlers.push(Box::new(AtomicAssetsHandler::new(
                &entry.args,
                config,
                sink.clone(),
            )?)),
            "atomicmarket" => handlers.push(Box::new(AtomicMarketHandler::new(
                &entry.args,
                config,
                sink.clone(),
            )?)),
            other => {
                return Err(FillError::Config(format!("unknown handler `{other}`")));
            }
        }
    }
    Ok(handlers)
}

/// Append a row to a handler's append-only log table.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_log(
    db: &mut ContractDbTx<'_>,
    handler: &'static str,
    table: &'static str,
    contract: &str,
    relation_name: &str,
    relation_id: &str,
    name: &str,
    data: &Value,
    tx: &TxMeta,
    global_sequence: GlobalSequence,
) -> Result<(), DbError> {
    let row: Row = vec![
        ("log_id", SqlValue::from(global_sequence)),
        ("contract", contract.into()),
        ("relation_name", relation_name.into()),
        ("relation_id", relation_id.into()),
        ("name", name.into()),
        ("data", SqlValue::Json(data.clone())),
        (
            "txid",
            SqlValue::Bytea(hex::decode(&tx.txid).unwrap_or_default()),
        ),
        ("created_at_block", db.block_num().into()),
        ("created_at_time", db.timestamp().into()),
    ];
    // Idempotent under replay: keyed by the chain's global sequence.
    // One trace may log several relations (multi-asset transfers).
    db.replace(handler, table, &row, &["log_id", "relation_id"]).await
}

/// Convert a decoded attribute map (`[{key, value: [type, v]}]`) into a
/// plain json object.
pub(crate) fn attributes_to_object(value: &Value) -> Value {
    let Some(items) = value.as_array() else {
        return value.clone();
    };
    let mut map = serde_json::Map::new();
    for item in items {
        let Some(key) = item["key"].as_str() else {
            continue;
        };
        let attr = match item["value"].as_array() {
            Some(pair) if pair.len() == 2 => pair[1].clone(),
            _ => item["value"].clone(),
        };
        map.insert(key.to_owned(), attr);
    }
    Value::Object(map)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedAsset {
    /// Amount in integer base units.
    pub amount: i64,
    pub symbol_code: String,
    pub precision: u32,
}

/// Parse an asset string like "1.0000 WAX".
pub(crate) fn parse_asset(text: &str) -> Option<ParsedAsset> {
    let (number, code) = text.split_once(' ')?;
    let precision = number
        .split_once('.')
        .map(|(_, frac)| frac.len() as u32)
        .unwrap_or(0);
    let amount: i64 = number.replace('.', "").parse().ok()?;
    Some(ParsedAsset {
        amount,
        symbol_code: code.to_owned(),
        precision,
    })
}

/// Serde helpers for 64-bit ids that chain APIs render as strings.
pub(crate) mod u64_str {
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        parse(&Value::deserialize(deserializer)?).map_err(D::Error::custom)
    }

    pub(crate) fn parse(value: &Value) -> Result<u64, String> {
        match value {
            Value::Number(n) => n.as_u64().ok_or_else(|| format!("bad u64: {n}")),
            Value::String(s) => s.parse().map_err(|_| format!("bad u64: {s}")),
            other => Err(format!("bad u64: {other}")),
        }
    }
}

pub(crate) mod vec_u64_str {
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        values
            .iter()
            .map(|v| super::u64_str::parse(v).map_err(D::Error::custom))
            .collect()
    }
}

pub(crate) mod i64_str {
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().ok_or_else(|| D::Error::custom("bad i64")),
            Value::String(s) => s.parse().map_err(|_| D::Error::custom("bad i64")),
            other => Err(D::Error::custom(format!("bad i64: {other}"))),
        }
    }
}

/// Json array of string ids, the form asset id lists are stored in.
pub(crate) fn ids_to_json(ids: &[u64]) -> Value {
    Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_attributes_to_object() {
        let value = json!([
            {"key": "name", "value": ["string", "Dragon"]},
            {"key": "level", "value": ["uint64", "3"]}
        ]);
        assert_eq!(
            attributes_to_object(&value),
            json!({"name": "Dragon", "level": "3"})
        );
    }

    #[test]
    fn test_parse_asset() {
        assert_eq!(
            parse_asset("1.0000 WAX"),
            Some(ParsedAsset {
                amount: 10000,
                symbol_code: "WAX".to_owned(),
                precision: 4
            })
        );
        assert_eq!(
            parse_asset("42 TOKEN"),
            Some(ParsedAsset {
                amount: 42,
                symbol_code: "TOKEN".to_owned(),
                precision: 0
            })
        );
        assert_eq!(parse_asset("junk"), None);
    }

    #[test]
    fn test_u64_str_parse() {
        assert_eq!(u64_str::parse(&json!("42")), Ok(42));
        assert_eq!(u64_str::parse(&json!(42)), Ok(42));
        assert!(u64_str::parse(&json!(null)).is_err());
    }

    #[test]
    fn test_ids_to_json() {
        assert_eq!(ids_to_json(&[1, 2]), json!(["1", "2"]));
    }
}
