use async_trait::async_trait;
use tokio_postgres::Client;

use crate::chain::ChainApi;
use crate::db::ContractDbTx;
use crate::errors::DbError;
use crate::errors::FillError;
use crate::types::ActionTrace;
use crate::types::Block;
use crate::types::TableDelta;

/// Transaction context passed alongside action traces.
#[derive(Debug, Clone)]
pub struct TxMeta {
    pub txid: String,
}

/// An `account:name` pattern selecting traces or deltas.
///
/// Either side can be `*`. `deserialize` asks the receiver to decode
/// the matched payload against the contract ABI before dispatch.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    pub filter: String,
    pub deserialize: bool,
}

impl ScopeFilter {
    pub fn new(filter: &str, deserialize: bool) -> Self {
        Self {
            filter: filter.to_owned(),
            deserialize,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub actions: Vec<ScopeFilter>,
    pub tables: Vec<ScopeFilter>,
}

impl Scope {
    /// Some(deserialize) when any action filter matches.
    pub fn matches_action(&self, account: &str, name: &str) -> Option<bool> {
        matches(&self.actions, account, name)
    }

    /// Some(deserialize) when any table filter matches.
    pub fn matches_table(&self, contract: &str, table: &str) -> Option<bool> {
        matches(&self.tables, contract, table)
    }
}

fn matches(filters: &[ScopeFilter], account: &str, name: &str) -> Option<bool> {
    let mut matched = None;
    for filter in filters {
        if filter_matches(&filter.filter, account, name) {
            matched = Some(matched.unwrap_or(false) || filter.deserialize);
        }
    }
    matched
}

fn filter_matches(filter: &str, account: &str, name: &str) -> bool {
    match filter.split_once(':') {
        Some((fa, fn_)) => (fa == "*" || fa == account) && (fn_ == "*" || fn_ == name),
        None => false,
    }
}

/// A plug-in owning one contract's domain state.
///
/// Hooks run on the receiver's thread, strictly sequenced. The database
/// transaction is only ever lent for the duration of a hook call.
#[async_trait]
pub trait ContractHandler: Send {
    fn name(&self) -> &'static str;

    fn scope(&self) -> &Scope;

    /// Contracts whose ABIs the receiver must keep cached for this handler.
    fn tracked_contracts(&self) -> Vec<String>;

    /// Runs once at startup: verify schema presence and load (or
    /// bootstrap from chain) the persisted contract configuration.
    async fn init(&mut self, client: &Client, chain: &ChainApi) -> Result<(), FillError>;

    /// Drop all of this handler's rows so it can be resynced from scratch.
    async fn delete_db(&self, client: &Client) -> Result<(), DbError>;

    async fn on_block_start(&mut self, block: &Block) -> Result<(), FillError>;

    async fn on_action(
        &mut self,
        db: &mut ContractDbTx<'_>,
        block: &Block,
        tx: &TxMeta,
        trace: &ActionTrace,
    ) -> Result<(), FillError>;

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTx<'_>,
        block: &Block,
        delta: &TableDelta,
    ) -> Result<(), FillError>;

    /// End of block: drain the update queue in priority order.
    async fn on_block_complete(
        &mut self,
        db: &mut ContractDbTx<'_>,
        block: &Block,
    ) -> Result<(), FillError>;

    /// After commit: release staged notifications.
    async fn on_commit(&mut self) -> Result<(), FillError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope {
            actions: vec![
                ScopeFilter::new("atomicassets:logmint", true),
                ScopeFilter::new("atomicassets:lognewoffer", false),
            ],
            tables: vec![
                ScopeFilter::new("atomicassets:*", true),
                ScopeFilter::new("delphioracle:datapoints", false),
            ],
        }
    }

    #[test]
    fn test_exact_action_match() {
        let scope = scope();
        assert_eq!(scope.matches_action("atomicassets", "logmint"), Some(true));
        assert_eq!(
            scope.matches_action("atomicassets", "lognewoffer"),
            Some(false)
        );
        assert_eq!(scope.matches_action("atomicassets", "unknown"), None);
        assert_eq!(scope.matches_action("eosio", "logmint"), None);
    }

    #[test]
    fn test_wildcard_table_match() {
        let scope = scope();
        assert_eq!(scope.matches_table("atomicassets", "assets"), Some(true));
        assert_eq!(
            scope.matches_table("delphioracle", "datapoints"),
            Some(false)
        );
        assert_eq!(scope.matches_table("delphioracle", "pairs"), None);
    }

    #[test]
    fn test_deserialize_is_union_over_matches() {
        let scope = Scope {
            actions: vec![
                ScopeFilter::new("a:x", false),
                ScopeFilter::new("a:*", true),
            ],
            tables: vec![],
        };
        // Any matching filter wanting decode wins.
        assert_eq!(scope.matches_action("a", "x"), Some(true));
    }

    #[test]
    fn test_malformed_filter_never_matches() {
        let scope = Scope {
            actions: vec![ScopeFilter::new("nocolon", true)],
            tables: vec![],
        };
        assert_eq!(scope.matches_action("nocolon", "nocolon"), None);
    }
}
