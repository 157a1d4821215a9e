//! Schema-driven argument normalization.
//!
//! Models get argument names and types slightly wrong all the time. Before
//! a tool runs, its arguments go through [`normalize`]:
//!
//! 1. common synonyms are renamed to the declared property name,
//! 2. values are coerced toward the declared type,
//! 3. the result is validated against `required`, `type` and `enum`.
//!
//! Validation failure is data, not an error: the message is fed back to the
//! model so it can correct itself. Messages list properties in sorted order
//! so identical mistakes always produce identical feedback.

use serde_json::{Map, Value};

/// `(alias, canonical)` pairs. An alias is applied only when the canonical
/// name is a declared property, is absent, and the alias itself is not
/// declared.
const ALIASES: &[(&str, &str)] = &[
    ("msg", "message"),
    ("text", "message"),
    ("body", "message"),
    ("content", "message"),
    ("qty", "quantity"),
    ("count", "quantity"),
    ("ticker", "symbol"),
    ("to", "recipient"),
    ("q", "query"),
    ("search", "query"),
];

/// Normalized arguments plus the validation verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub args: Value,
    pub error: Option<String>,
}

impl Normalized {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Normalize `raw_args` for `tool_name` against its JSON schema.
pub fn normalize(tool_name: &str, raw_args: &Value, schema: &Value) -> Normalized {
    let mut args = match raw_args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Normalized {
                args: other.clone(),
                error: Some(format!(
                    "Invalid arguments for tool '{tool_name}': expected a JSON object, got {}",
                    type_name(other)
                )),
            };
        }
    };

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    apply_aliases(&mut args, properties);

    for (name, prop_schema) in properties {
        if let Some(value) = args.get_mut(name) {
            coerce(value, &declared_types(prop_schema));
        }
    }

    let mut problems = validate(&args, properties, schema);
    problems.sort_by(|a, b| a.0.cmp(&b.0));
    let error = if problems.is_empty() {
        None
    } else {
        let details: Vec<String> = problems.into_iter().map(|(_, msg)| msg).collect();
        Some(format!(
            "Invalid arguments for tool '{tool_name}': {}",
            details.join("; ")
        ))
    };

    Normalized {
        args: Value::Object(args),
        error,
    }
}

fn apply_aliases(args: &mut Map<String, Value>, properties: &Map<String, Value>) {
    for (alias, canonical) in ALIASES {
        if properties.contains_key(*canonical)
            && !properties.contains_key(*alias)
            && !args.contains_key(*canonical)
            && let Some(value) = args.remove(*alias)
        {
            args.insert((*canonical).to_string(), value);
        }
    }
}

fn declared_types(prop_schema: &Value) -> Vec<&str> {
    match prop_schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Coerce `value` toward the first declared type it can become. Values that
/// already match a declared type are left alone.
fn coerce(value: &mut Value, types: &[&str]) {
    if types.is_empty() || types.iter().any(|t| matches_type(value, t)) {
        return;
    }
    for ty in types {
        if let Some(converted) = convert(value, ty) {
            *value = converted;
            return;
        }
    }
}

fn convert(value: &Value, ty: &str) -> Option<Value> {
    match (ty, value) {
        ("integer", Value::String(s)) => parse_integer(s.trim()),
        ("integer", Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| Value::from(f as i64)),
        ("number", Value::String(s)) => parse_number(s.trim()),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn parse_integer(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| Value::from(f as i64))
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Problems keyed by property name, unsorted.
fn validate(
    args: &Map<String, Value>,
    properties: &Map<String, Value>,
    schema: &Value,
) -> Vec<(String, String)> {
    let mut problems = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                problems.push((
                    name.to_string(),
                    format!("missing required property '{name}'"),
                ));
            }
        }
    }

    for (name, prop_schema) in properties {
        let Some(value) = args.get(name) else {
            continue;
        };

        let types = declared_types(prop_schema);
        if !types.is_empty() && !types.iter().any(|t| matches_type(value, t)) {
            problems.push((
                name.clone(),
                format!(
                    "property '{name}' must be {}, got {}",
                    types.join(" or "),
                    type_name(value)
                ),
            ));
            continue;
        }

        if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array)
            && !allowed.contains(value)
        {
            let listed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            problems.push((
                name.clone(),
                format!("property '{name}' must be one of [{}]", listed.join(", ")),
            ));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "quantity": { "type": "integer" },
                "side": { "type": "string", "enum": ["buy", "sell"] },
                "dry_run": { "type": "boolean" },
                "limit": { "type": "number" }
            },
            "required": ["symbol", "quantity", "side"]
        })
    }

    #[test]
    fn numeric_string_becomes_integer() {
        let n = normalize(
            "place_order",
            &json!({"symbol": "AAPL", "quantity": "12", "side": "buy"}),
            &order_schema(),
        );
        assert!(n.is_valid(), "{:?}", n.error);
        assert_eq!(n.args["quantity"], json!(12));
    }

    #[test]
    fn aliases_map_to_declared_names() {
        let n = normalize(
            "place_order",
            &json!({"ticker": "AAPL", "qty": 3, "side": "sell"}),
            &order_schema(),
        );
        assert!(n.is_valid(), "{:?}", n.error);
        assert_eq!(n.args["symbol"], json!("AAPL"));
        assert_eq!(n.args["quantity"], json!(3));
        assert!(n.args.get("ticker").is_none());
    }

    #[test]
    fn alias_ignored_when_canonical_present() {
        let n = normalize(
            "place_order",
            &json!({"symbol": "MSFT", "ticker": "AAPL", "quantity": 1, "side": "buy"}),
            &order_schema(),
        );
        assert_eq!(n.args["symbol"], json!("MSFT"));
        assert_eq!(n.args["ticker"], json!("AAPL"));
    }

    #[test]
    fn alias_ignored_when_canonical_not_declared() {
        let schema = json!({"type": "object", "properties": {"text": {"type": "string"}}});
        let n = normalize("echo", &json!({"text": "hi"}), &schema);
        assert_eq!(n.args, json!({"text": "hi"}));
    }

    #[test]
    fn boolean_and_number_coercion() {
        let n = normalize(
            "place_order",
            &json!({"symbol": "A", "quantity": 1, "side": "buy", "dry_run": "Yes", "limit": "10.5"}),
            &order_schema(),
        );
        assert_eq!(n.args["dry_run"], json!(true));
        assert_eq!(n.args["limit"], json!(10.5));

        let n = normalize(
            "place_order",
            &json!({"symbol": "A", "quantity": 1, "side": "buy", "dry_run": "0"}),
            &order_schema(),
        );
        assert_eq!(n.args["dry_run"], json!(false));
    }

    #[test]
    fn numbers_become_strings_for_string_properties() {
        let n = normalize(
            "place_order",
            &json!({"symbol": 1234, "quantity": 1, "side": "buy"}),
            &order_schema(),
        );
        assert_eq!(n.args["symbol"], json!("1234"));
    }

    #[test]
    fn unknown_properties_pass_through() {
        let n = normalize(
            "place_order",
            &json!({"symbol": "A", "quantity": 1, "side": "buy", "note": "x"}),
            &order_schema(),
        );
        assert!(n.is_valid());
        assert_eq!(n.args["note"], json!("x"));
    }

    #[test]
    fn errors_are_sorted_and_deterministic() {
        let args = json!({"quantity": "many", "side": "hold"});
        let first = normalize("place_order", &args, &order_schema());
        let second = normalize("place_order", &args, &order_schema());
        assert_eq!(first, second);
        assert_eq!(
            first.error.as_deref(),
            Some(
                "Invalid arguments for tool 'place_order': \
                 property 'quantity' must be integer, got string; \
                 property 'side' must be one of [\"buy\", \"sell\"]; \
                 missing required property 'symbol'"
            )
        );
    }

    #[test]
    fn non_object_args_rejected() {
        let n = normalize("place_order", &json!("AAPL 12"), &order_schema());
        assert_eq!(
            n.error.as_deref(),
            Some("Invalid arguments for tool 'place_order': expected a JSON object, got string")
        );
        assert_eq!(n.args, json!("AAPL 12"));
    }

    #[test]
    fn null_args_treated_as_empty_object() {
        let schema = json!({"type": "object", "properties": {}});
        let n = normalize("current_time", &Value::Null, &schema);
        assert!(n.is_valid());
        assert_eq!(n.args, json!({}));
    }

    #[test]
    fn corrected_args_converge() {
        // What a model typically sends after reading the feedback
        let bad = normalize("place_order", &json!({"symbol": "A"}), &order_schema());
        assert!(!bad.is_valid());
        let fixed = normalize(
            "place_order",
            &json!({"symbol": "A", "quantity": "2", "side": "buy"}),
            &order_schema(),
        );
        assert!(fixed.is_valid());
    }

    #[test]
    fn union_types_accept_either() {
        let schema = json!({"type": "object", "properties": {"n": {"type": ["integer", "null"]}}});
        assert!(normalize("t", &json!({"n": null}), &schema).is_valid());
        assert_eq!(normalize("t", &json!({"n": "7"}), &schema).args["n"], json!(7));
    }
}
