//! Contract tests every StateStore backend must pass.

use std::collections::BTreeMap;

use driftwall_core::{Backend, Patch, StateStore};
use driftwall_store::open_store;
use proptest::prelude::*;
use serde_json::{json, Value};

fn entity_stability(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("other", json!(0)).unwrap();
    let first = store.set("tag.01", json!("A")).unwrap();
    for i in 0..10 {
        assert_eq!(store.clear("tag.01").unwrap(), first);
        assert_eq!(store.set("tag.01", json!(i)).unwrap(), first);
    }
    assert_eq!(first, "e2");
}

fn reversibility(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("k", json!("v1")).unwrap();
    store.clear("k").unwrap();
    assert_eq!(store.get("k").unwrap(), None);
    store.set("k", json!("v2")).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!("v2")));
}

fn list_active_first_seen_order(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("b", json!(1)).unwrap();
    store.set("a", json!(2)).unwrap();
    store.set("c", json!(3)).unwrap();
    store.clear("a").unwrap();
    // Re-setting "b" must not move it behind "c".
    store.set("b", json!(4)).unwrap();

    let active = store.list_active().unwrap();
    let keys: Vec<_> = active.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["b", "c"]);
    assert_eq!(active[0].value, json!(4));
    assert_eq!(active[0].created_seq, 1);
    assert_eq!(active[0].updated_seq, 5);
}

fn apply_patch_order(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("old", json!(true)).unwrap();
    let patch: Patch =
        serde_json::from_str(r#"{"set": {"y": 1, "x": 2}, "clear": ["old", "x"]}"#).unwrap();

    let touched = store.apply_patch(&patch).unwrap();
    assert_eq!(touched, vec!["e2", "e3", "e1", "e3"]);
    assert_eq!(store.get("x").unwrap(), None);
    assert_eq!(store.get("y").unwrap(), Some(json!(1)));
    assert_eq!(store.events().unwrap().len(), 5);
}

fn snapshot_shape(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("z", json!("last")).unwrap();
    store.set("a", json!(null)).unwrap();
    store.set("m", json!(3)).unwrap();
    store.clear("m").unwrap();

    let snap = store.snapshot().unwrap();
    assert_eq!(snap.backend, backend);
    assert_eq!(snap.experimental, backend == Backend::Experimental);
    assert_eq!(store.is_experimental(), snap.experimental);
    assert_eq!(snap.next_id, 4);
    assert_eq!(snap.records.len(), 3);
    assert_eq!(snap.events.len(), 4);
    assert_eq!(
        serde_json::to_string(&snap.active).unwrap(),
        r#"{"z":"last","a":null}"#
    );

    let value = serde_json::to_value(&snap).unwrap();
    let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    assert_eq!(
        keys,
        vec!["backend", "experimental", "next_id", "active", "records", "events"]
    );
}

fn replay_idempotence(backend: Backend) {
    let mut live = open_store(backend).unwrap();
    live.set("a", json!(1)).unwrap();
    live.set("b", json!("two")).unwrap();
    live.clear("a").unwrap();
    live.set("c", json!(null)).unwrap();
    live.set("a", json!(3)).unwrap();

    let mut fresh = open_store(backend).unwrap();
    fresh.replay(&live.events().unwrap()).unwrap();

    let (l, f) = (live.snapshot().unwrap(), fresh.snapshot().unwrap());
    assert_eq!(
        serde_json::to_string(&l.active).unwrap(),
        serde_json::to_string(&f.active).unwrap()
    );
    assert_eq!(live.entity_ids().unwrap(), fresh.entity_ids().unwrap());
    assert_eq!(l, f);
}

fn replay_ignores_get_touched_keys(backend: Backend) {
    let mut live = open_store(backend).unwrap();
    live.get("probe").unwrap();
    live.set("a", json!(1)).unwrap();
    live.get("probe2").unwrap();
    live.set("b", json!(2)).unwrap();

    let mut fresh = open_store(backend).unwrap();
    fresh.replay(&live.events().unwrap()).unwrap();

    let ids = fresh.entity_ids().unwrap();
    assert_eq!(ids.get("a").map(String::as_str), Some("e2"));
    assert_eq!(ids.get("b").map(String::as_str), Some("e4"));
    assert_eq!(fresh.set("new", json!(0)).unwrap(), "e5");
}

fn replay_raw_skips_malformed(backend: Backend) {
    let raw = vec![
        json!({"op": "set", "key": "a", "value": 1, "entity_id": "e1", "seq": 1}),
        json!({"key": "b", "value": 2}),
        json!({"op": "set", "key": 42, "value": 2}),
        json!({"op": "rename", "key": "a"}),
        json!({"op": "set", "key": "c", "value": "x"}),
        json!({"op": "clear", "key": "a", "entity_id": "e1", "seq": 3}),
    ];
    let mut store = open_store(backend).unwrap();
    store.set("stale", json!(true)).unwrap();

    let skipped = store.replay_raw(&raw).unwrap();
    assert_eq!(skipped, 3);
    assert_eq!(store.get("stale").unwrap(), None);
    assert_eq!(store.get("a").unwrap(), None);
    assert_eq!(store.get("c").unwrap(), Some(json!("x")));
    assert_eq!(store.events().unwrap().len(), 3);
}

fn replay_out_of_range_ids_get_fresh(backend: Backend) {
    let raw = vec![
        json!({"op": "set", "key": "a", "value": 1, "entity_id": "e18446744073709551615"}),
        json!({"op": "set", "key": "b", "value": 2}),
        json!({"op": "set", "key": "c", "value": 3, "entity_id": "e9223372036854775808"}),
        json!({"op": "set", "key": "d", "value": 4, "entity_id": "e9"}),
    ];
    let mut store = open_store(backend).unwrap();
    assert_eq!(store.replay_raw(&raw).unwrap(), 0);

    let active: Vec<(String, String)> = store
        .list_active()
        .unwrap()
        .into_iter()
        .map(|r| (r.key, r.entity_id))
        .collect();
    let expected = [("a", "e1"), ("b", "e2"), ("c", "e3"), ("d", "e9")];
    assert_eq!(
        active,
        expected.map(|(k, id)| (k.to_string(), id.to_string())).to_vec()
    );
    assert_eq!(store.set("e", json!(5)).unwrap(), "e10");
}

fn failed_replay_keeps_state(backend: Backend) {
    let mut store = open_store(backend).unwrap();
    store.set("keep", json!(true)).unwrap();
    store.get("touched").unwrap();
    let before = store.snapshot().unwrap();

    // The largest id is accepted, after which no fresh id is left for `b`.
    let raw = vec![
        json!({"op": "set", "key": "a", "value": 1, "entity_id": "e9223372036854775807"}),
        json!({"op": "set", "key": "b", "value": 2}),
    ];
    assert!(store.replay_raw(&raw).is_err());

    assert_eq!(store.snapshot().unwrap(), before);
    assert_eq!(store.set("next", json!(0)).unwrap(), "e3");
}

macro_rules! contract_suite {
    ($module:ident, $backend:expr) => {
        mod $module {
            use super::*;

            #[test]
            fn test_entity_stability() {
                entity_stability($backend);
            }

            #[test]
            fn test_reversibility() {
                reversibility($backend);
            }

            #[test]
            fn test_list_active_first_seen_order() {
                list_active_first_seen_order($backend);
            }

            #[test]
            fn test_apply_patch_order() {
                apply_patch_order($backend);
            }

            #[test]
            fn test_snapshot_shape() {
                snapshot_shape($backend);
            }

            #[test]
            fn test_replay_idempotence() {
                replay_idempotence($backend);
            }

            #[test]
            fn test_replay_ignores_get_touched_keys() {
                replay_ignores_get_touched_keys($backend);
            }

            #[test]
            fn test_replay_raw_skips_malformed() {
                replay_raw_skips_malformed($backend);
            }

            #[test]
            fn test_replay_out_of_range_ids_get_fresh() {
                replay_out_of_range_ids_get_fresh($backend);
            }

            #[test]
            fn test_failed_replay_keeps_state() {
                failed_replay_keeps_state($backend);
            }
        }
    };
}

contract_suite!(current, Backend::Current);
contract_suite!(experimental, Backend::Experimental);

#[test]
fn test_backends_agree_on_out_of_range_ids() {
    let raw = vec![
        json!({"op": "set", "key": "a", "value": 1, "entity_id": "e9223372036854775808"}),
        json!({"op": "set", "key": "b", "value": 2, "entity_id": "e1"}),
    ];
    let mut current = open_store(Backend::Current).unwrap();
    let mut experimental = open_store(Backend::Experimental).unwrap();
    current.replay_raw(&raw).unwrap();
    experimental.replay_raw(&raw).unwrap();

    let current = current.snapshot().unwrap();
    let experimental = experimental.snapshot().unwrap();
    assert_eq!(current.records, experimental.records);
    assert_eq!(current.active, experimental.active);
    assert_eq!(current.next_id, experimental.next_id);
    let keys: Vec<&str> = current.records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Set(String, Value),
    Clear(String),
    Get(String),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let key = prop::sample::select(vec!["a", "b", "c", "d", "tag.01"]).prop_map(String::from);
    let value = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-50i64..50).prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ];
    prop_oneof![
        3 => (key.clone(), value).prop_map(|(k, v)| Op::Set(k, v)),
        2 => key.clone().prop_map(Op::Clear),
        1 => key.prop_map(Op::Get),
    ]
}

fn run_ops(backend: Backend, ops: &[Op]) -> Box<dyn StateStore> {
    let mut store = open_store(backend).unwrap();
    for op in ops {
        match op {
            Op::Set(k, v) => {
                store.set(k, v.clone()).unwrap();
            }
            Op::Clear(k) => {
                store.clear(k).unwrap();
            }
            Op::Get(k) => {
                store.get(k).unwrap();
            }
        }
    }
    store
}

/// Entity ids of keys that appear in the event log.
fn logged_ids(store: &dyn StateStore) -> BTreeMap<String, String> {
    store
        .events()
        .unwrap()
        .into_iter()
        .map(|e| (e.key, e.entity_id))
        .collect()
}

proptest! {
    #[test]
    fn prop_replay_reproduces_state(
        ops in prop::collection::vec(arb_op(), 0..40),
        backend in prop_oneof![Just(Backend::Current), Just(Backend::Experimental)],
    ) {
        let live = run_ops(backend, &ops);
        let mut fresh = open_store(backend).unwrap();
        fresh.replay(&live.events().unwrap()).unwrap();

        let (l, f) = (live.snapshot().unwrap(), fresh.snapshot().unwrap());
        prop_assert_eq!(
            serde_json::to_string(&l.active).unwrap(),
            serde_json::to_string(&f.active).unwrap()
        );
        prop_assert_eq!(logged_ids(live.as_ref()), logged_ids(fresh.as_ref()));
        prop_assert_eq!(l.events, f.events);
    }

    #[test]
    fn prop_backends_agree(ops in prop::collection::vec(arb_op(), 0..40)) {
        let current = run_ops(Backend::Current, &ops).snapshot().unwrap();
        let experimental = run_ops(Backend::Experimental, &ops).snapshot().unwrap();
        prop_assert_eq!(current.next_id, experimental.next_id);
        prop_assert_eq!(current.active, experimental.active);
        prop_assert_eq!(current.records, experimental.records);
        prop_assert_eq!(current.events, experimental.events);
    }
}
