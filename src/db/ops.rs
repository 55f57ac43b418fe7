use bytes::BytesMut;
use postgres_types::to_sql_checked;
use postgres_types::IsNull;
use postgres_types::ToSql;
use postgres_types::Type;
use serde_json::json;
use serde_json::Value;

/// A database value, typed at runtime.
///
/// Handlers build rows out of these; the rollback layer needs every
/// value renderable as json, which the variants here guarantee.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Bytea(Vec<u8>),
    Json(Value),
}

/// Ordered list of `(column, value)` pairs.
pub type Row = Vec<(&'static str, SqlValue)>;
/// Equality condition over columns, AND-ed together.
pub type Condition = Vec<(&'static str, SqlValue)>;

impl SqlValue {
    /// Json rendition, consistent with postgres `to_jsonb` for the
    /// scalar variants (bytea excepted - do not use bytea in keys).
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => json!(v),
            Self::Int2(v) => json!(v),
            Self::Int(v) => json!(v),
            Self::BigInt(v) => json!(v),
            Self::Double(v) => json!(v),
            Self::Text(v) => json!(v),
            Self::Bytea(v) => json!(hex::encode(v)),
            Self::Json(v) => v.clone(),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => v.to_sql(ty, out),
            Self::Int2(v) => v.to_sql(ty, out),
            Self::Int(v) => v.to_sql(ty, out),
            Self::BigInt(v) => v.to_sql(ty, out),
            Self::Double(v) => v.to_sql(ty, out),
            Self::Text(v) => v.to_sql(ty, out),
            Self::Bytea(v) => v.to_sql(ty, out),
            Self::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Runtime-typed; mismatches surface as encode errors.
        true
    }

    to_sql_checked!();
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        Self::Int2(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::BigInt(v as i64)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::BigInt(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytea(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

pub(super) fn insert_sql(table: &str, columns: &[&str]) -> String {
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "insert into {} ({}) values ({});",
        table,
        columns.join(", "),
        params.join(", ")
    )
}

pub(super) fn replace_sql(table: &str, columns: &[&str], primary: &[&str]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !primary.contains(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let action = if updates.is_empty() {
        "nothing".to_owned()
    } else {
        format!("update set {}", updates.join(", "))
    };
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "insert into {} ({}) values ({}) on conflict ({}) do {};",
        table,
        columns.join(", "),
        params.join(", "),
        primary.join(", "),
        action
    )
}

pub(super) fn update_sql(table: &str, set_columns: &[&str], cond_columns: &[&str]) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c, i + 1))
        .collect();
    let conditions: Vec<String> = cond_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c, i + 1 + set_columns.len()))
        .collect();
    format!(
        "update {} set {} where {};",
        table,
        assignments.join(", "),
        conditions.join(" and ")
    )
}

pub(super) fn delete_sql(table: &str, cond_columns: &[&str]) -> String {
    let conditions: Vec<String> = cond_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c, i + 1))
        .collect();
    format!("delete from {} where {};", table, conditions.join(" and "))
}

pub(super) fn select_prior_sql(table: &str, cond_columns: &[&str]) -> String {
    let conditions: Vec<String> = cond_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("t.{} = ${}", c, i + 1))
        .collect();
    format!(
        "select to_jsonb(t) from {} t where {};",
        table,
        conditions.join(" and ")
    )
}

/// Json object of the given columns, used as a rollback key.
pub(super) fn columns_json(pairs: &[(&'static str, SqlValue)], columns: &[&str]) -> Value {
    let mut map = serde_json::Map::new();
    for (column, value) in pairs {
        if columns.contains(column) {
            map.insert((*column).to_owned(), value.to_json());
        }
    }
    Value::Object(map)
}

/// Json object of all given pairs.
pub(super) fn row_json(pairs: &[(&'static str, SqlValue)]) -> Value {
    let mut map = serde_json::Map::new();
    for (column, value) in pairs {
        map.insert((*column).to_owned(), value.to_json());
    }
    Value::Object(map)
}

/// Image of a prior row after applying `set` - identifies the mutated
/// row at rollback time.
pub(super) fn post_image(prior: &Value, set: &[(&'static str, SqlValue)]) -> Value {
    let mut image = prior.clone();
    if let Value::Object(map) = &mut image {
        for (column, value) in set {
            map.insert((*column).to_owned(), value.to_json());
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql("atomicassets_assets", &["asset_id", "owner"]),
            "insert into atomicassets_assets (asset_id, owner) values ($1, $2);"
        );
    }

    #[test]
    fn test_replace_sql() {
        assert_eq!(
            replace_sql("atomicassets_assets", &["asset_id", "owner"], &["asset_id"]),
            "insert into atomicassets_assets (asset_id, owner) values ($1, $2) \
             on conflict (asset_id) do update set owner = excluded.owner;"
        );
    }

    #[test]
    fn test_update_sql() {
        assert_eq!(
            update_sql("atomicassets_offers", &["state"], &["offer_id"]),
            "update atomicassets_offers set state = $1 where offer_id = $2;"
        );
    }

    #[test]
    fn test_delete_sql() {
        assert_eq!(
            delete_sql("atomicassets_offers", &["offer_id", "sender"]),
            "delete from atomicassets_offers where offer_id = $1 and sender = $2;"
        );
    }

    #[test]
    fn test_row_and_columns_json() {
        let row: Row = vec![
            ("asset_id", SqlValue::BigInt(42)),
            ("owner", "alice".into()),
            ("data", SqlValue::Json(serde_json::json!({"img": "x"}))),
        ];
        assert_eq!(
            row_json(&row),
            serde_json::json!({"asset_id": 42, "owner": "alice", "data": {"img": "x"}})
        );
        assert_eq!(
            columns_json(&row, &["asset_id"]),
            serde_json::json!({"asset_id": 42})
        );
    }

    #[test]
    fn test_post_image_overlays_set_columns() {
        let prior = serde_json::json!({"asset_id": 42, "owner": "alice", "burned": false});
        let set: Row = vec![("owner", "bob".into())];
        assert_eq!(
            post_image(&prior, &set),
            serde_json::json!({"asset_id": 42, "owner": "bob", "burned": false})
        );
    }

    #[test]
    fn test_sql_value_from_option() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(5i64)), SqlValue::BigInt(5));
    }
}
