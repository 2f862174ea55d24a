//! Property-based test generators using proptest.
//!
//! Strategies produce application states shaped like the ones the engine
//! syncs: a map of top-level fields that never uses a reserved field name.

use proptest::prelude::*;
use questsync_codec::{Value, RESERVED_FIELDS};
use std::collections::BTreeMap;

/// Strategy for top-level field names that are not reserved.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("Field name must not be reserved", |s| {
            !RESERVED_FIELDS.contains(&s.as_str())
        })
}

/// Strategy for scalar values. Floats are finite.
pub fn leaf_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[ -~]{0,24}".prop_map(Value::Text),
    ]
}

/// Strategy for arbitrary nested values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_value_strategy().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,10}", inner, 0..6).prop_map(Value::Map),
        ]
    })
}

/// Strategy for a single task entry.
pub fn task_strategy() -> impl Strategy<Value = Value> {
    (
        "[a-z0-9]{8}",
        "[ -~]{1,40}",
        any::<bool>(),
        0i64..500,
    )
        .prop_map(|(id, title, done, xp)| {
            Value::map([
                ("id", Value::Text(id)),
                ("title", Value::Text(title)),
                ("done", Value::Bool(done)),
                ("xp", Value::Integer(xp)),
            ])
        })
}

/// Strategy for a complete application state.
///
/// Always carries `tasks`, `xp`, `achievements` and `settings`, plus a few
/// arbitrary extra fields.
pub fn app_state_strategy() -> impl Strategy<Value = Value> {
    (
        prop::collection::vec(task_strategy(), 0..8),
        0i64..1_000_000,
        prop::collection::vec("[a-z_]{3,16}".prop_map(Value::Text), 0..6),
        prop::collection::btree_map("[a-z]{1,12}", leaf_value_strategy(), 0..5),
        prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..3),
    )
        .prop_map(|(tasks, xp, achievements, settings, extra)| {
            let mut fields: BTreeMap<String, Value> = extra;
            fields.insert("tasks".into(), Value::Array(tasks));
            fields.insert("xp".into(), Value::Integer(xp));
            fields.insert("achievements".into(), Value::Array(achievements));
            fields.insert("settings".into(), Value::Map(settings));
            Value::Map(fields)
        })
}

/// Strategy for reset epochs.
pub fn reset_epoch_strategy() -> impl Strategy<Value = i64> {
    0i64..1_000
}
