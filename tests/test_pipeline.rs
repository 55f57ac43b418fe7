use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use chainfill::abi::string_to_name;
use chainfill::abi::AbiCache;
use chainfill::abi::AbiDef;
use chainfill::abi::DeserializerPool;
use chainfill::constants::priorities;
use chainfill::framework::JobQueue;
use chainfill::framework::Scope;
use chainfill::framework::ScopeFilter;
use chainfill::ship::ShipRequest;

fn encode_name(name: &str) -> Vec<u8> {
    string_to_name(name).to_le_bytes().to_vec()
}

fn encode_string(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn atomicassets_abi(version_tag: &str) -> AbiDef {
    let doc = format!(
        r#"{{
            "version": "eosio::abi/1.1",
            "structs": [
                {{
                    "name": "logtransfer",
                    "base": "",
                    "fields": [
                        {{"name": "collection_name", "type": "name"}},
                        {{"name": "from", "type": "name"}},
                        {{"name": "to", "type": "name"}},
                        {{"name": "asset_ids", "type": "uint64[]"}},
                        {{"name": "memo", "type": "string"}}
                        {version_tag}
                    ]
                }}
            ],
            "actions": [
                {{"name": "logtransfer", "type": "logtransfer"}}
            ]
        }}"#
    );
    AbiDef::from_json(&doc).unwrap()
}

fn transfer_payload(with_extra: bool) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(encode_name("dragons"));
    data.extend(encode_name("alice"));
    data.extend(encode_name("bob"));
    data.push(0x01);
    data.extend(42u64.to_le_bytes());
    data.extend(encode_string("gift"));
    if with_extra {
        data.push(0x01); // new bool field added by the ABI switch
    }
    data
}

/// A `setabi` mid-stream changes the action signature; replayed blocks
/// below the switch height must decode with the previous version.
#[test]
fn test_abi_switch_mid_stream() {
    let mut cache = AbiCache::new();
    cache.install("atomicassets", 0, atomicassets_abi(""));
    cache.install(
        "atomicassets",
        500,
        atomicassets_abi(r#", {"name": "extra", "type": "bool"}"#),
    );

    // Block 500 decodes with the new ABI.
    let decoder = cache.get("atomicassets", 500).unwrap();
    let value = decoder
        .decode_action("logtransfer", &transfer_payload(true))
        .unwrap();
    assert_eq!(value["from"], "alice");
    assert_eq!(value["extra"], true);

    // A block at 499 replayed after a rollback uses the previous one.
    let decoder = cache.get("atomicassets", 499).unwrap();
    let value = decoder
        .decode_action("logtransfer", &transfer_payload(false))
        .unwrap();
    assert_eq!(value["asset_ids"], json!(["42"]));
    assert_eq!(value.get("extra"), None);

    // Old payloads do not decode against the new layout.
    let decoder = cache.get("atomicassets", 501).unwrap();
    assert!(decoder
        .decode_action("logtransfer", &transfer_payload(false))
        .is_err());
}

#[tokio::test]
async fn test_pool_decodes_on_isolated_workers() {
    let pool = DeserializerPool::spawn(
        "atomicassets",
        Arc::new(atomicassets_abi("")),
        3,
    );
    for _ in 0..10 {
        let value = pool
            .decode("logtransfer", transfer_payload(false))
            .await
            .unwrap();
        assert_eq!(value["to"], "bob");
        assert_eq!(value["memo"], "gift");
    }
}

/// The within-block ordering behind offer-to-sale state propagation:
/// the sale row sync (delta priority) must drain before the action job
/// that reads it.
#[test]
fn test_sale_update_runs_after_sale_table_sync() {
    let mut queue = JobQueue::new();
    queue.push(
        priorities::ACTION_UPDATE_SALE,
        "acceptoffer",
        "update_sale_state",
    );
    queue.push(priorities::TABLE_SALES, "sales_delta", "sync_sale_row");
    queue.push(priorities::TABLE_BALANCES, "balances_delta", "sync_balance");

    let drained: Vec<&str> = std::iter::from_fn(|| queue.pop().map(|job| job.kind)).collect();
    assert_eq!(
        drained,
        vec!["sync_balance", "sync_sale_row", "update_sale_state"]
    );
}

#[test]
fn test_scope_filters_select_handler_traffic() {
    let scope = Scope {
        actions: vec![
            ScopeFilter::new("atomicmarket:*", true),
            ScopeFilter::new("atomicassets:acceptoffer", true),
        ],
        tables: vec![
            ScopeFilter::new("atomicmarket:sales", true),
            ScopeFilter::new("delphioracle:datapoints", true),
        ],
    };
    assert_eq!(scope.matches_action("atomicmarket", "purchasesale"), Some(true));
    assert_eq!(scope.matches_action("atomicassets", "acceptoffer"), Some(true));
    assert_eq!(scope.matches_action("atomicassets", "logmint"), None);
    assert_eq!(scope.matches_table("atomicmarket", "sales"), Some(true));
    assert_eq!(scope.matches_table("atomicmarket", "auctions"), None);
}

#[test]
fn test_ship_request_wire_layout() {
    // get_blocks_request_v0 with the flags the filler always sets
    let request = ShipRequest::GetBlocks {
        start_block: 100,
        end_block: u32::MAX,
        max_messages_in_flight: 10,
        irreversible_only: false,
        fetch_block: true,
        fetch_traces: true,
        fetch_deltas: true,
    };
    let bytes = request.encode();
    assert_eq!(bytes[0], 0x01);
    assert_eq!(&bytes[1..5], &100u32.to_le_bytes());
    assert_eq!(bytes[bytes.len() - 4..], [0x00, 0x01, 0x01, 0x01]);
}
