//! Handle discipline integration tests
//!
//! Exercises the reference rules a host has to live by: owned handles are
//! released exactly once, container inserts share rather than transfer,
//! and handles never cross contexts.

use quayside::{Context, HandleError, JsonError, Kind, OrderResponse, ValueStore};

#[test]
fn test_owned_handles_release_exactly_once() {
    let mut store = ValueStore::new();
    let obj = store.object_new();
    let num = store.number(7.0);
    assert!(store.set(obj, "n", num).unwrap());

    // The insert shared the value; the host still owns its handle.
    store.release(num).unwrap();
    assert_eq!(
        store.release(num),
        Err(HandleError::AlreadyReleased(num.raw()))
    );

    // The object still reaches the value.
    let got = store.get(obj, "n").unwrap();
    assert_eq!(store.as_number(got).unwrap(), 7.0);
    store.release(got).unwrap();
    store.release(obj).unwrap();
    assert_eq!(store.stats().live(), 0);
}

#[test]
fn test_accessors_hand_out_fresh_obligations() {
    let mut store = ValueStore::new();
    let obj = store.object_new();
    let s = store.string("shared");
    store.set(obj, "a", s).unwrap();
    store.release(s).unwrap();

    // Each get is its own reference to the same slot.
    let first = store.get(obj, "a").unwrap();
    let second = store.get(obj, "a").unwrap();
    assert_eq!(first, second);
    store.release(first).unwrap();
    // The second reference still dereferences.
    assert_eq!(store.as_str(second).unwrap(), Some("shared"));
    store.release(second).unwrap();

    store.release(obj).unwrap();
    assert_eq!(store.stats().live(), 0);
}

#[test]
fn test_handles_never_cross_contexts() {
    let mut one = ValueStore::new();
    let mut two = ValueStore::new();
    let handle = one.number(1.0);
    assert!(matches!(
        two.as_number(handle),
        Err(HandleError::ForeignContext(_))
    ));
    assert!(matches!(
        two.release(handle),
        Err(HandleError::ForeignContext(_))
    ));
    one.release(handle).unwrap();
}

#[test]
fn test_stale_handles_detected_after_reuse() {
    let mut store = ValueStore::new();
    let first = store.number(1.0);
    store.release(first).unwrap();
    // The slot is recycled under a new generation.
    let second = store.number(2.0);
    assert!(matches!(
        store.as_number(first),
        Err(HandleError::Stale(_))
    ));
    assert_eq!(store.as_number(second).unwrap(), 2.0);
    store.release(second).unwrap();
}

#[test]
fn test_missing_keys_and_bounds() {
    let mut store = ValueStore::new();
    let obj = store.object_new();
    let arr = store.array_new();

    // Missing key reads as undefined, not an error.
    let missing = store.get(obj, "nope").unwrap();
    assert_eq!(store.kind_of(missing).unwrap(), Kind::Undefined);
    store.release(missing).unwrap();

    // Out-of-bounds index reads as nothing at all.
    assert!(store.array_get(arr, 0).unwrap().is_none());
    assert_eq!(store.array_length(arr).unwrap(), 0);

    let item = store.boolean(true);
    assert!(store.array_push(arr, item).unwrap());
    store.release(item).unwrap();
    assert_eq!(store.array_length(arr).unwrap(), 1);

    store.release(obj).unwrap();
    store.release(arr).unwrap();
    assert_eq!(store.stats().live(), 0);
}

#[test]
fn test_json_parse_error_is_typed() {
    let mut store = ValueStore::new();
    let err = store.json_parse("{ not json").unwrap_err();
    assert!(matches!(err, JsonError::Parse(_)));
    assert_eq!(store.stats().live(), 0);
}

#[test]
fn test_json_round_trip_preserves_key_order() {
    let mut store = ValueStore::new();
    let root = store
        .json_parse(r#"{ "zebra": 1.5, "apple": [true, null], "mango": "m" }"#)
        .unwrap();
    let text = store.json_stringify(root).unwrap().unwrap();
    assert_eq!(text, r#"{"zebra":1.5,"apple":[true,null],"mango":"m"}"#);
    store.release(root).unwrap();
}

#[test]
fn test_cyclic_values_do_not_serialize() {
    let mut store = ValueStore::new();
    let a = store.object_new();
    let b = store.object_new();
    store.set(a, "b", b).unwrap();
    store.set(b, "a", a).unwrap();

    assert!(store.export_json(a).unwrap().is_none());
    assert!(store.json_stringify(a).unwrap().is_none());

    store.release(a).unwrap();
    store.release(b).unwrap();
}

#[test]
fn test_non_serializable_members_omitted() {
    // Promises only exist bound to orders, so build one through a context.
    let mut ctx = Context::new();
    let id = ctx.place_order(None);
    let promise = ctx.create_order_promise(id).unwrap();
    ctx.fulfill_orders(&[OrderResponse::ok(id, Some(promise))])
        .unwrap();

    let store = ctx.store_mut();
    let obj = store.object_new();
    let undef = store.undefined();
    store.set(obj, "u", undef).unwrap();
    store.set(obj, "p", promise).unwrap();
    let n = store.number(1.0);
    store.set(obj, "n", n).unwrap();
    store.release(undef).unwrap();
    store.release(n).unwrap();

    // Object members that cannot serialize vanish.
    let text = store.json_stringify(obj).unwrap().unwrap();
    assert_eq!(text, r#"{"n":1.0}"#);

    // Array elements that cannot serialize become null instead.
    let arr = store.array_new();
    store.array_push(arr, promise).unwrap();
    let m = store.number(2.0);
    store.array_push(arr, m).unwrap();
    store.release(m).unwrap();
    let text = store.json_stringify(arr).unwrap().unwrap();
    assert_eq!(text, "[null,2.0]");

    // A promise at top level does not serialize at all.
    assert!(store.json_stringify(promise).unwrap().is_none());

    store.release(obj).unwrap();
    store.release(arr).unwrap();
    store.release(promise).unwrap();
}

#[test]
fn test_number_edge_cases_serialize_as_null() {
    let mut store = ValueStore::new();
    let arr = store.array_new();
    for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5] {
        let h = store.number(value);
        store.array_push(arr, h).unwrap();
        store.release(h).unwrap();
    }
    let text = store.json_stringify(arr).unwrap().unwrap();
    assert_eq!(text, "[null,null,null,1.5]");
    store.release(arr).unwrap();
}
