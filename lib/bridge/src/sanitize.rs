use std::collections::HashSet;

use opentelemetry::{Array, KeyValue, StringValue, Value};

use crate::payload::{ErrorDetails, EventValue, Payload};

/// Payload keys used to hand a span and context token through the bus payload.
/// They belong to the handoff protocol and never become attributes.
pub const SPAN_HANDLE_KEY: &str = "__otel_span";
pub const CONTEXT_TOKEN_KEY: &str = "__otel_ctx_token";

/// Payload keys carrying the exception raised inside the instrumented event.
/// They feed the span status and `exception` event instead of attributes.
pub const EXCEPTION_KEY: &str = "exception";
pub const EXCEPTION_OBJECT_KEY: &str = "exception_object";

pub(crate) fn is_reserved_key(key: &str) -> bool {
    key == SPAN_HANDLE_KEY || key == CONTEXT_TOKEN_KEY
}

fn is_exception_key(key: &str) -> bool {
    key == EXCEPTION_KEY || key == EXCEPTION_OBJECT_KEY
}

/// Looks up the designated exception entry of a payload.
pub(crate) fn designated_exception(payload: &Payload) -> Option<&ErrorDetails> {
    match payload.get(EXCEPTION_OBJECT_KEY) {
        Some(EventValue::Error(details)) => Some(details),
        _ => None,
    }
}

/// Turns a payload into span attributes.
///
/// Reserved handoff keys, exception carrier keys, and denylisted keys are
/// dropped before value coercion. Values that cannot be represented as
/// OpenTelemetry attribute values are dropped silently; this function never
/// fails, whatever the payload holds.
pub fn sanitized_attributes(payload: &Payload, denylist: &HashSet<String>) -> Vec<KeyValue> {
    let mut attributes = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        if is_reserved_key(key) || is_exception_key(key) || denylist.contains(key) {
            continue;
        }
        if let Some(value) = sanitize_value(value) {
            attributes.push(KeyValue::new(key.clone(), value));
        }
    }
    attributes
}

/// Scalar type of a coerced array element, used for the homogeneity check.
#[derive(Clone, Copy, PartialEq)]
enum ScalarKind {
    Bool,
    Int,
    Float,
    String,
}

fn scalar_kind(value: &EventValue) -> Option<ScalarKind> {
    match value {
        EventValue::Bool(_) => Some(ScalarKind::Bool),
        EventValue::Int(_) => Some(ScalarKind::Int),
        EventValue::Float(_) => Some(ScalarKind::Float),
        EventValue::String(_) | EventValue::Symbol(_) => Some(ScalarKind::String),
        _ => None,
    }
}

fn sanitize_value(value: &EventValue) -> Option<Value> {
    match value {
        EventValue::Bool(value) => Some(Value::Bool(*value)),
        EventValue::Int(value) => Some(Value::I64(*value)),
        EventValue::Float(value) => Some(Value::F64(*value)),
        EventValue::String(value) | EventValue::Symbol(value) => {
            Some(Value::String(StringValue::from(value.clone())))
        }
        EventValue::Array(items) => sanitize_array(items),
        EventValue::Null
        | EventValue::Map(_)
        | EventValue::Error(_)
        | EventValue::Opaque(_) => None,
    }
}

/// Arrays survive only when every element coerces to the same scalar type.
/// A single mismatching element drops the whole key; partial arrays would
/// misrepresent the payload.
fn sanitize_array(items: &[EventValue]) -> Option<Value> {
    let Some(first) = items.first() else {
        // OpenTelemetry arrays are typed; an empty payload array is kept as an
        // empty string array.
        return Some(Value::Array(Array::String(Vec::new())));
    };

    match scalar_kind(first)? {
        ScalarKind::Bool => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    EventValue::Bool(value) => values.push(*value),
                    _ => return None,
                }
            }
            Some(Value::Array(Array::Bool(values)))
        }
        ScalarKind::Int => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    EventValue::Int(value) => values.push(*value),
                    _ => return None,
                }
            }
            Some(Value::Array(Array::I64(values)))
        }
        ScalarKind::Float => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    EventValue::Float(value) => values.push(*value),
                    _ => return None,
                }
            }
            Some(Value::Array(Array::F64(values)))
        }
        ScalarKind::String => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    EventValue::String(value) | EventValue::Symbol(value) => {
                        values.push(StringValue::from(value.clone()));
                    }
                    _ => return None,
                }
            }
            Some(Value::Array(Array::String(values)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn attributes_of(payload: Payload) -> HashMap<String, Value> {
        sanitized_attributes(&payload, &HashSet::new())
            .into_iter()
            .map(|kv| (kv.key.as_str().to_owned(), kv.value))
            .collect()
    }

    #[test]
    fn test_scalars_are_copied_as_is() {
        let attributes = attributes_of(HashMap::from([
            ("string".to_owned(), EventValue::from("x")),
            ("numeric".to_owned(), EventValue::from(1)),
            ("float".to_owned(), EventValue::from(2.5)),
            ("bool".to_owned(), EventValue::from(true)),
        ]));

        assert_eq!(attributes["string"], Value::from("x"));
        assert_eq!(attributes["numeric"], Value::I64(1));
        assert_eq!(attributes["float"], Value::F64(2.5));
        assert_eq!(attributes["bool"], Value::Bool(true));
    }

    #[test]
    fn test_symbols_and_strings_store_identically() {
        let attributes = attributes_of(HashMap::from([
            ("as_symbol".to_owned(), EventValue::symbol("y")),
            ("as_string".to_owned(), EventValue::from("y")),
        ]));

        assert_eq!(attributes["as_symbol"], attributes["as_string"]);
    }

    #[test]
    fn test_null_and_complex_values_are_rejected() {
        let attributes = attributes_of(HashMap::from([
            ("nil_val".to_owned(), EventValue::Null),
            (
                "nested".to_owned(),
                EventValue::Map(HashMap::from([("a".to_owned(), EventValue::from(1))])),
            ),
            ("opaque".to_owned(), EventValue::Opaque("IO")),
            (
                "stray_error".to_owned(),
                EventValue::from(ErrorDetails::new("Exception", "not in the designated slot")),
            ),
            ("kept".to_owned(), EventValue::from("still here")),
        ]));

        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes["kept"], Value::from("still here"));
    }

    #[test]
    fn test_homogeneous_arrays_are_kept() {
        let attributes = attributes_of(HashMap::from([
            ("empty".to_owned(), EventValue::Array(Vec::new())),
            (
                "symbols".to_owned(),
                EventValue::Array(vec![EventValue::symbol("one"), EventValue::symbol("two")]),
            ),
            ("ints".to_owned(), EventValue::from(vec![1, 2, 3])),
        ]));

        assert_eq!(attributes["empty"], Value::Array(Array::String(Vec::new())));
        assert_eq!(
            attributes["symbols"],
            Value::Array(Array::String(vec!["one".into(), "two".into()]))
        );
        assert_eq!(attributes["ints"], Value::Array(Array::I64(vec![1, 2, 3])));
    }

    #[test]
    fn test_heterogeneous_and_nested_arrays_are_dropped() {
        let attributes = attributes_of(HashMap::from([
            (
                "mixed".to_owned(),
                EventValue::Array(vec![EventValue::from(1), EventValue::from(false)]),
            ),
            (
                "int_then_float".to_owned(),
                EventValue::Array(vec![EventValue::from(1), EventValue::from(2.5)]),
            ),
            (
                "nested".to_owned(),
                EventValue::Array(vec![EventValue::Array(vec![EventValue::from(1)])]),
            ),
            (
                "null_element".to_owned(),
                EventValue::Array(vec![EventValue::from("a"), EventValue::Null]),
            ),
        ]));

        assert!(attributes.is_empty());
    }

    #[test]
    fn test_denylisted_keys_are_dropped_unconditionally() {
        let payload = HashMap::from([
            ("foo".to_owned(), EventValue::from("bar")),
            ("baz".to_owned(), EventValue::from("bat")),
        ]);
        let denylist = HashSet::from(["foo".to_owned()]);

        let attributes: HashMap<_, _> = sanitized_attributes(&payload, &denylist)
            .into_iter()
            .map(|kv| (kv.key.as_str().to_owned(), kv.value))
            .collect();

        assert!(!attributes.contains_key("foo"));
        assert_eq!(attributes["baz"], Value::from("bat"));
    }

    #[test]
    fn test_reserved_and_exception_keys_never_become_attributes() {
        let attributes = attributes_of(HashMap::from([
            (SPAN_HANDLE_KEY.to_owned(), EventValue::from("handle")),
            (CONTEXT_TOKEN_KEY.to_owned(), EventValue::from(7)),
            (
                EXCEPTION_KEY.to_owned(),
                EventValue::from(vec!["Exception", "is_not_set_as_attribute"]),
            ),
            (
                EXCEPTION_OBJECT_KEY.to_owned(),
                EventValue::from(ErrorDetails::new("Exception", "is_not_set_as_attribute")),
            ),
        ]));

        assert!(attributes.is_empty());
    }

    #[test]
    fn test_designated_exception_lookup() {
        let payload = HashMap::from([(
            EXCEPTION_OBJECT_KEY.to_owned(),
            EventValue::from(ErrorDetails::new("Exception", "boom")),
        )]);
        let details = designated_exception(&payload).expect("exception entry");
        assert_eq!(details.type_name, "Exception");
        assert_eq!(details.message, "boom");

        let not_designated = HashMap::from([(
            "some_error".to_owned(),
            EventValue::from(ErrorDetails::new("Exception", "boom")),
        )]);
        assert!(designated_exception(&not_designated).is_none());
    }
}
