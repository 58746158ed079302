use serde_json::json;

use super::*;

fn obj(value: serde_json::Value) -> Item {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn test_flatten_joins_nested_paths_with_dot() {
    let item = obj(json!({"a": {"b": 1, "c": {"d": 2}}, "e": 3}));
    let flat = flatten(&item);
    assert_eq!(flat.get("a.b"), Some(&json!(1)));
    assert_eq!(flat.get("a.c.d"), Some(&json!(2)));
    assert_eq!(flat.get("e"), Some(&json!(3)));
}

#[test]
fn test_flatten_treats_arrays_as_leaves() {
    let item = obj(json!({"tags": ["a", "b"]}));
    let flat = flatten(&item);
    assert_eq!(flat.get("tags"), Some(&json!(["a", "b"])));
}

#[test]
fn test_get_path_distinguishes_absent_from_null() {
    let item = obj(json!({"a": null}));
    assert_eq!(get_path(&item, "a"), Some(Value::Null));
    assert_eq!(get_path(&item, "missing"), None);
}

#[test]
fn test_get_path_descends_nested_objects() {
    let item = obj(json!({"a": {"b": {"c": 5}}}));
    assert_eq!(get_path(&item, "a.b.c"), Some(json!(5)));
    assert_eq!(get_path(&item, "a.b.missing"), None);
}

#[test]
fn test_get_path_stops_at_non_object_segment() {
    let item = obj(json!({"a": 1}));
    assert_eq!(get_path(&item, "a.b"), None);
}

#[test]
fn test_index_scalar_ordering_matches_json_number_ordering() {
    let a = IndexScalar::from_value(&json!(1));
    let b = IndexScalar::from_value(&json!(2));
    assert!(a < b);
}

#[test]
fn test_index_scalar_equality_across_value_kinds() {
    assert_eq!(IndexScalar::from_value(&Value::Null), IndexScalar::Null);
    assert_eq!(IndexScalar::from_value(&json!(true)), IndexScalar::Bool(true));
    assert_eq!(IndexScalar::from_value(&json!("x")), IndexScalar::Str("x".into()));
}

#[test]
fn test_index_scalar_treats_objects_as_opaque_keys() {
    let a = IndexScalar::from_value(&json!({"x": 1}));
    let b = IndexScalar::from_value(&json!({"x": 1}));
    assert_eq!(a, b);
}
