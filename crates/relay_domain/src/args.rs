use serde_json::{Map, Value};

/// Control field a client may set on any call to bypass the response cache
/// and the local fast-path for that one request. Never forwarded upstream.
pub const FORCE_REFRESH_FIELD: &str = "__mcpFastForceRefresh";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFields {
    pub force_refresh: bool,
}

/// Splits reserved control fields off a call's arguments. Total: any input
/// shape passes through unchanged apart from the removed fields.
pub fn split_control_fields(args: Value) -> (Value, ControlFields) {
    match args {
        Value::Object(mut map) => {
            let force_refresh = matches!(map.remove(FORCE_REFRESH_FIELD), Some(Value::Bool(true)));
            (Value::Object(map), ControlFields { force_refresh })
        }
        other => (other, ControlFields::default()),
    }
}

/// Re-parses string values that carry a serialized object or array.
///
/// Some MCP clients serialize nested structures to strings before sending
/// them. Any string whose trimmed form is `{...}` or `[...]` and parses to an
/// object or array is replaced by the parsed value, recursively.
pub fn rehydrate_arguments(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, rehydrate_arguments(item)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(rehydrate_arguments).collect())
        }
        Value::String(text) => match parse_embedded_json(&text) {
            Some(parsed) => rehydrate_arguments(parsed),
            None => Value::String(text),
        },
        scalar => scalar,
    }
}

fn parse_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !looks_structured {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Some(parsed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_split_removes_force_refresh() {
        let fixture = json!({"page_id": "x", FORCE_REFRESH_FIELD: true});

        let (actual, control) = split_control_fields(fixture);

        assert_eq!(actual, json!({"page_id": "x"}));
        assert_eq!(control.force_refresh, true);
    }

    #[test]
    fn test_split_requires_literal_true() {
        let fixture = json!({FORCE_REFRESH_FIELD: "true"});

        let (actual, control) = split_control_fields(fixture);

        assert_eq!(actual, json!({}));
        assert_eq!(control.force_refresh, false);
    }

    #[test]
    fn test_split_is_total_on_non_objects() {
        let (actual, control) = split_control_fields(json!([1, 2]));

        assert_eq!(actual, json!([1, 2]));
        assert_eq!(control, ControlFields::default());
    }

    #[test]
    fn test_rehydrate_parses_serialized_objects() {
        let fixture = json!({"filter": "{\"property\": \"object\", \"value\": \"page\"}"});

        let actual = rehydrate_arguments(fixture);
        let expected = json!({"filter": {"property": "object", "value": "page"}});

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_rehydrate_recurses_into_parsed_values() {
        let fixture = json!({"outer": "{\"inner\": \"[1, 2]\"}"});

        let actual = rehydrate_arguments(fixture);
        let expected = json!({"outer": {"inner": [1, 2]}});

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_rehydrate_leaves_plain_strings_alone() {
        let fixture = json!({"query": "{not json", "title": "hello"});

        let actual = rehydrate_arguments(fixture.clone());

        assert_eq!(actual, fixture);
    }

    #[test]
    fn test_rehydrate_ignores_scalar_json_strings() {
        // "42" parses as JSON but is not an object or array.
        let fixture = json!({"value": "42"});

        let actual = rehydrate_arguments(fixture.clone());

        assert_eq!(actual, fixture);
    }

    #[test]
    fn test_rehydrate_handles_arrays_of_strings() {
        let fixture = json!(["{\"a\": 1}", "plain"]);

        let actual = rehydrate_arguments(fixture);
        let expected = json!([{"a": 1}, "plain"]);

        assert_eq!(actual, expected);
    }
}
