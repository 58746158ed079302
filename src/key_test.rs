use super::*;
use crate::value::IndexScalar;

#[test]
fn test_index_name_joins_with_plus() {
    assert_eq!(index_name(&["lastName".into(), "firstName".into()]), "lastName+firstName");
}

#[test]
fn test_index_collection_name_uses_colon_separator() {
    assert_eq!(
        index_collection_name("People", &["lastName".into()]),
        "People:lastName"
    );
}

#[test]
fn test_item_key_rejects_empty_string() {
    let err = ItemKey::from_value(&Value::String(String::new())).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_item_key_accepts_number_and_string() {
    assert_eq!(ItemKey::from_value(&Value::from(42)).unwrap(), ItemKey::Int(42));
    assert_eq!(ItemKey::from_value(&Value::from("u1")).unwrap(), ItemKey::Str("u1".into()));
}

#[test]
fn test_item_key_rejects_other_types() {
    assert!(ItemKey::from_value(&Value::Bool(true)).is_err());
    assert!(ItemKey::from_value(&Value::Null).is_err());
}

#[test]
fn test_store_descriptor_key_is_single_element() {
    let key = KeyCodec::store_descriptor_key("S");
    assert_eq!(key, Key::new(vec![KeyElem::str("S")]));
}

#[test]
fn test_item_key_layout() {
    let key = KeyCodec::item_key("S", "People", &ItemKey::Str("u1".into()));
    assert_eq!(
        key,
        Key::new(vec![KeyElem::str("S"), KeyElem::str("People"), KeyElem::str("u1")])
    );
}

#[test]
fn test_index_entry_key_layout() {
    let values = vec![IndexScalar::Str("L".into())];
    let key = KeyCodec::index_entry_key("S", "People", &["lastName".into()], &values, &ItemKey::Str("u1".into()));
    assert_eq!(
        key,
        Key::new(vec![
            KeyElem::str("S"),
            KeyElem::str("People:lastName"),
            KeyElem::str("L"),
            KeyElem::str("u1"),
        ])
    );
}

#[test]
fn test_index_query_prefix_truncates_to_provided_values() {
    let values = vec![IndexScalar::Str("L".into())];
    let prefix = KeyCodec::index_query_prefix(
        "S",
        "People",
        &["lastName".into(), "firstName".into()],
        &values,
    );
    assert_eq!(
        prefix,
        Key::new(vec![KeyElem::str("S"), KeyElem::str("People:lastName+firstName"), KeyElem::str("L")])
    );
}

#[test]
fn test_key_is_prefix_of() {
    let prefix = Key::new(vec![KeyElem::str("S"), KeyElem::str("People")]);
    let full = Key::new(vec![KeyElem::str("S"), KeyElem::str("People"), KeyElem::str("u1")]);
    assert!(prefix.is_prefix_of(&full));
    assert!(!full.is_prefix_of(&prefix));
}

#[test]
fn test_key_ordering_is_per_element_lexicographic() {
    let a = Key::new(vec![KeyElem::str("S"), KeyElem::str("People"), KeyElem::str("a")]);
    let b = Key::new(vec![KeyElem::str("S"), KeyElem::str("People"), KeyElem::str("b")]);
    assert!(a < b);
}
