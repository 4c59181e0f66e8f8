use std::collections::BTreeMap;
use std::sync::Arc;

use fm_infra::types::Instance;

/// A runtime value inside an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Instance(Arc<Instance>),
    Builtin(&'static str),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Instance(_) => "instance",
            Self::Builtin(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::List(_) | Self::Object(_) | Self::Instance(_) | Self::Builtin(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => string_to_number(s),
            Self::List(items) if items.is_empty() => 0.0,
            Self::List(items) if items.len() == 1 => items[0].to_number(),
            _ => f64::NAN,
        }
    }

    /// String coercion with JavaScript's rules for primitives and lists.
    pub fn to_display(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(|v| match v {
                    Self::Undefined | Self::Null => String::new(),
                    other => other.to_display(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) | Self::Instance(_) => "[object Object]".into(),
            Self::Builtin(name) => format!("function {name}()"),
        }
    }

    /// Strict equality: same type and same value, lists and objects by
    /// structure.
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => a.id == b.id,
            (a, b) => a == b,
        }
    }

    /// Loose equality: strict, except `null == undefined`.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null | Self::Undefined, Self::Null | Self::Undefined) => true,
            (a, b) => a.strict_eq(b),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON projection; `None` for values JSON cannot carry.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Self::Undefined | Self::Builtin(_) => return None,
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_json().unwrap_or(serde_json::Value::Null))
                    .collect(),
            ),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.to_json()?)))
                    .collect(),
            ),
            Self::Instance(instance) => serde_json::to_value(instance.as_ref()).ok()?,
        })
    }
}

/// JavaScript `Number(string)`: blank is zero, `0x`/`0o`/`0b` literals are
/// unsigned integers, `Infinity` is the only spelled-out value.
fn string_to_number(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }

    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return f64::NAN;
        }
        return digits
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    }

    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned == "Infinity" {
        return if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let decimal = unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && unsigned
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !decimal {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// Format a number the way JavaScript's `String(n)` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }

    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        if n.fract() == 0.0 {
            return format!("{n:.0}");
        }
        return format!("{n}");
    }

    // Exponent form: Rust prints `1e21` and `1.5e-7`; JavaScript wants an
    // explicit sign on positive exponents.
    let formatted = format!("{n:e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_javascript() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(123456789012.0), "123456789012");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn string_coercion() {
        let list = Value::List(vec![Value::Number(1.0), Value::Null, Value::Str("a".into())]);
        assert_eq!(list.to_display(), "1,,a");
        assert_eq!(Value::Object(BTreeMap::new()).to_display(), "[object Object]");
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Str(" 42 ".into()).to_number(), 42.0);
        assert_eq!(Value::Str("".into()).to_number(), 0.0);
        assert!(Value::Str("x".into()).to_number().is_nan());
        assert_eq!(Value::Bool(true).to_number(), 1.0);
        assert!(Value::Undefined.to_number().is_nan());
    }

    #[test]
    fn string_numbers_follow_javascript_literals() {
        let num = |s: &str| Value::Str(s.into()).to_number();
        assert_eq!(num("0x10"), 16.0);
        assert_eq!(num("0b101"), 5.0);
        assert_eq!(num("0o17"), 15.0);
        assert_eq!(num(" -2.5e2 "), -250.0);
        assert_eq!(num(".5"), 0.5);
        assert_eq!(num("-Infinity"), f64::NEG_INFINITY);
        for rejected in ["inf", "infinity", "NaN", "-0x10", "0x", "1_000", "12px", "0xfg"] {
            assert!(num(rejected).is_nan(), "{rejected}");
        }
    }

    #[test]
    fn loose_equality_joins_null_and_undefined() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(!Value::Number(1.0).loose_eq(&Value::Str("1".into())));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Str(String::new()).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(Value::List(vec![]).truthy());
    }
}
