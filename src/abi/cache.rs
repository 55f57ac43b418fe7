use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::decode::AbiDecoder;
use super::types::AbiDef;
use crate::types::BlockNum;
use crate::types::Name;

/// Tracks the ABI version active for each contract at each height.
///
/// Written only from the receiver thread, when a `setabi` action for a
/// tracked contract appears in the stream.
pub struct AbiCache {
    contracts: HashMap<Name, BTreeMap<BlockNum, Arc<AbiDecoder>>>,
}

impl AbiCache {
    pub fn new() -> Self {
        Self {
            contracts: HashMap::new(),
        }
    }

    /// Install an ABI version for `contract`, effective from `block_num`.
    pub fn install(&mut self, contract: &str, block_num: BlockNum, abi: AbiDef) {
        tracing::info!("installing ABI for {contract} at block {block_num}");
        let decoder = Arc::new(AbiDecoder::new(Arc::new(abi)));
        self.contracts
            .entry(contract.to_owned())
            .or_default()
            .insert(block_num, decoder);
    }

    /// Decoder for the ABI effective at `block_num` (largest key <= target).
    pub fn get(&self, contract: &str, block_num: BlockNum) -> Option<Arc<AbiDecoder>> {
        self.contracts
            .get(contract)?
            .range(..=block_num)
            .next_back()
            .map(|(_, decoder)| decoder.clone())
    }

    pub fn contains(&self, contract: &str) -> bool {
        self.contracts.contains_key(contract)
    }
}

impl Default for AbiCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ActionDef;

    fn abi_with_action(action: &str) -> AbiDef {
        AbiDef {
            actions: vec![ActionDef {
                name: action.to_owned(),
                type_name: action.to_owned(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_picks_latest_at_or_below_target() {
        let mut cache = AbiCache::new();
        cache.install("atomicassets", 0, abi_with_action("old"));
        cache.install("atomicassets", 500, abi_with_action("new"));

        // A block replayed from before the switch uses the previous ABI.
        let at_499 = cache.get("atomicassets", 499).unwrap();
        assert_eq!(at_499.abi().action_type("old"), Some("old"));
        assert_eq!(at_499.abi().action_type("new"), None);

        // The switch block and everything after use the new one.
        for height in [500, 501, 10_000] {
            let decoder = cache.get("atomicassets", height).unwrap();
            assert_eq!(decoder.abi().action_type("new"), Some("new"));
        }
    }

    #[test]
    fn test_unknown_contract() {
        let cache = AbiCache::new();
        assert!(cache.get("nobody", 100).is_none());
        assert!(!cache.contains("nobody"));
    }
}
