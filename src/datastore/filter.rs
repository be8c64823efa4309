//! Filter matching and update application shared by the backends.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{StoreError, StoreResult};
use crate::engine::path::{get_path, set_path};

/// Check every key, operator and `$and`/`$or` branch of `filter` without
/// looking at any document.
pub fn validate_filter(filter: &Value) -> StoreResult<()> {
    let Value::Object(filter) = filter else {
        return Err(StoreError::Rejected(format!(
            "filter must be an object, got {}",
            filter
        )));
    };

    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                for sub in sub_filters(key, condition)? {
                    validate_filter(sub)?;
                }
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Rejected(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            _ => validate_condition(condition)?,
        }
    }
    Ok(())
}

fn validate_condition(condition: &Value) -> StoreResult<()> {
    let Value::Object(ops) = condition else {
        return Ok(());
    };
    if !is_operator_object(condition) {
        return Ok(());
    }
    for (op, operand) in ops {
        match op.as_str() {
            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {}
            "$in" | "$nin" => {
                operand
                    .as_array()
                    .ok_or_else(|| StoreError::Rejected(format!("'{}' expects an array", op)))?;
            }
            "$exists" => {
                operand.as_bool().ok_or_else(|| {
                    StoreError::Rejected("'$exists' expects a boolean".to_string())
                })?;
            }
            other => {
                return Err(StoreError::Rejected(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Does `document` satisfy `filter`? Call [`validate_filter`] first; this
/// stops at the first clause that fails.
pub fn matches(document: &Value, filter: &Value) -> StoreResult<bool> {
    let Value::Object(filter) = filter else {
        return Err(StoreError::Rejected(format!(
            "filter must be an object, got {}",
            filter
        )));
    };

    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    all &= matches(document, sub)?;
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    any |= matches(document, sub)?;
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Rejected(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            path => field_matches(get_path(document, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> StoreResult<&'a Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| StoreError::Rejected(format!("'{}' expects an array of filters", op)))
}

fn is_operator_object(condition: &Value) -> bool {
    match condition {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(field: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    if !is_operator_object(condition) {
        return Ok(field_equals(field, condition));
    }

    let Value::Object(ops) = condition else {
        return Ok(false);
    };
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => field_equals(field, operand),
            "$ne" => !field_equals(field, operand),
            "$gt" => ordered(field, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(field, operand, |o| o != Ordering::Less),
            "$lt" => ordered(field, operand, |o| o == Ordering::Less),
            "$lte" => ordered(field, operand, |o| o != Ordering::Greater),
            "$in" => in_list(op, field, operand)?,
            "$nin" => !in_list(op, field, operand)?,
            "$exists" => {
                let want = operand.as_bool().ok_or_else(|| {
                    StoreError::Rejected("'$exists' expects a boolean".to_string())
                })?;
                field.is_some() == want
            }
            other => {
                return Err(StoreError::Rejected(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality; a missing field equals null, an array field matches when any
/// element equals a scalar.
fn field_equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordered(field: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = field else {
        return false;
    };
    let ordering = match (value, operand) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ordering.is_some_and(accept)
}

fn in_list(op: &str, field: Option<&Value>, operand: &Value) -> StoreResult<bool> {
    let list = operand
        .as_array()
        .ok_or_else(|| StoreError::Rejected(format!("'{}' expects an array", op)))?;
    Ok(list.iter().any(|candidate| field_equals(field, candidate)))
}

/// Apply `changes` to `document`. `changes` is either `{"$set": {...}}` or a
/// plain object treated the same way. Returns whether anything changed.
pub fn apply_set(document: &mut Value, changes: &Value) -> StoreResult<bool> {
    let Value::Object(changes) = changes else {
        return Err(StoreError::Rejected("update data must be an object".to_string()));
    };

    let fields = match changes.get("$set") {
        Some(Value::Object(set)) if changes.len() == 1 => set,
        Some(_) if changes.len() == 1 => {
            return Err(StoreError::Rejected("'$set' expects an object".to_string()))
        }
        _ => {
            if let Some(op) = changes.keys().find(|k| k.starts_with('$')) {
                return Err(StoreError::Rejected(format!(
                    "unsupported update operator '{}'",
                    op
                )));
            }
            changes
        }
    };

    let Value::Object(target) = document else {
        return Err(StoreError::Rejected("stored document is not an object".to_string()));
    };

    let mut modified = false;
    for (path, value) in fields {
        if path == "_id" {
            return Err(StoreError::Rejected("'_id' cannot be modified".to_string()));
        }
        if get_in(target, path) != Some(value) {
            set_path(target, path, value.clone());
            modified = true;
        }
    }
    Ok(modified)
}

/// Validate a document for insertion and make sure it has a string `_id`.
pub fn prepare_insert(document: Value) -> StoreResult<(String, Value)> {
    let Value::Object(mut map) = document else {
        return Err(StoreError::Rejected(format!(
            "only objects can be inserted, got {}",
            document
        )));
    };

    let id = match map.get("_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => uuid::Uuid::new_v4().to_string(),
        Some(other) => {
            return Err(StoreError::Rejected(format!(
                "'_id' must be a string, got {}",
                other
            )))
        }
    };
    map.insert("_id".to_string(), Value::String(id.clone()));
    Ok((id, Value::Object(map)))
}

fn get_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (first, rest) = path.split_once('.').unwrap_or((path, ""));
    get_path(map.get(first)?, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "_id": "u1",
            "name": "Ann",
            "age": 30,
            "active": true,
            "tags": ["admin", "ops"],
            "address": {"city": "Oslo"}
        })
    }

    #[test]
    fn test_equality_and_paths() {
        assert!(matches(&doc(), &json!({})).unwrap());
        assert!(matches(&doc(), &json!({"active": true, "address.city": "Oslo"})).unwrap());
        assert!(!matches(&doc(), &json!({"address.city": "Bergen"})).unwrap());
        assert!(matches(&doc(), &json!({"age": 30.0})).unwrap());
        assert!(matches(&doc(), &json!({"tags": "ops"})).unwrap());
        assert!(matches(&doc(), &json!({"missing": null})).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        assert!(matches(&doc(), &json!({"age": {"$gte": 18, "$lt": 65}})).unwrap());
        assert!(!matches(&doc(), &json!({"age": {"$gt": 30}})).unwrap());
        assert!(matches(&doc(), &json!({"name": {"$lt": "Bob"}})).unwrap());
        assert!(!matches(&doc(), &json!({"name": {"$gt": 3}})).unwrap());
        assert!(matches(&doc(), &json!({"name": {"$ne": "Bob"}})).unwrap());
    }

    #[test]
    fn test_set_operators() {
        assert!(matches(&doc(), &json!({"name": {"$in": ["Ann", "Bob"]}})).unwrap());
        assert!(matches(&doc(), &json!({"name": {"$nin": ["Cid"]}})).unwrap());
        assert!(matches(&doc(), &json!({"nickname": {"$exists": false}})).unwrap());
        assert!(!matches(&doc(), &json!({"name": {"$exists": false}})).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        assert!(matches(&doc(), &json!({"$or": [{"name": "Bob"}, {"age": 30}]})).unwrap());
        assert!(!matches(&doc(), &json!({"$and": [{"name": "Ann"}, {"age": 31}]})).unwrap());
    }

    #[test]
    fn test_rejections() {
        assert!(matches(&doc(), &json!([1])).is_err());
        assert!(matches(&doc(), &json!({"age": {"$regex": "3"}})).is_err());
        assert!(matches(&doc(), &json!({"$where": "1"})).is_err());
        assert!(matches(&doc(), &json!({"name": {"$in": "Ann"}})).is_err());
    }

    #[test]
    fn test_validate_filter_checks_every_clause() {
        assert!(validate_filter(&json!({"age": {"$gt": 1, "$lte": 9}, "name": "Ann"})).is_ok());
        assert!(validate_filter(&json!({"$or": [{"a": 1}, {"b": {"$in": [1]}}]})).is_ok());
        assert!(validate_filter(&json!({"tags": {"nested": 1}})).is_ok());

        // a failing earlier clause must not hide a bad later one
        let mixed = json!({"age": {"$gt": 1000, "$regex": "x"}});
        assert!(!matches(&doc(), &json!({"age": {"$gt": 1000}})).unwrap());
        assert!(matches!(
            validate_filter(&mixed),
            Err(StoreError::Rejected(msg)) if msg.contains("$regex")
        ));
        assert!(validate_filter(&json!({"active": false, "name": {"$regex": "x"}})).is_err());
        assert!(validate_filter(&json!({"$and": [{"a": 1}, {"b": {"$exists": "yes"}}]})).is_err());
        assert!(validate_filter(&json!({"$or": {"a": 1}})).is_err());
        assert!(validate_filter(&json!("x")).is_err());
    }

    #[test]
    fn test_apply_set() {
        let mut d = doc();
        assert!(apply_set(&mut d, &json!({"$set": {"age": 31, "address.zip": "0150"}})).unwrap());
        assert_eq!(d["age"], 31);
        assert_eq!(d["address"]["zip"], "0150");

        assert!(!apply_set(&mut d, &json!({"age": 31})).unwrap());
        assert!(apply_set(&mut d, &json!({"$inc": {"age": 1}})).is_err());
        assert!(apply_set(&mut d, &json!({"_id": "other"})).is_err());
    }

    #[test]
    fn test_prepare_insert() {
        let (id, stored) = prepare_insert(json!({"name": "Ann"})).unwrap();
        assert_eq!(stored["_id"], Value::String(id.clone()));
        assert_eq!(id.len(), 36);

        let (id, _) = prepare_insert(json!({"_id": "fixed"})).unwrap();
        assert_eq!(id, "fixed");

        assert!(prepare_insert(json!([1, 2])).is_err());
        assert!(prepare_insert(json!({"_id": {"nested": 1}})).is_err());
    }
}
