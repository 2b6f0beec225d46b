//! Parameter strings: `name=value;flag;other=1`
//!
//! Used for boot parameters. Values stay strings unless a [`Conversion`] is
//! registered for their name; a bare name is a `true` flag.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Value conversion applied to a named parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Int,
    Float,
    Bool,
    /// Any JSON value
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown parameter conversion '{0}'")]
pub struct UnknownConversion(pub String);

impl FromStr for Conversion {
    type Err = UnknownConversion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(Conversion::Int),
            "float" => Ok(Conversion::Float),
            "bool" => Ok(Conversion::Bool),
            "json" | "any" => Ok(Conversion::Json),
            other => Err(UnknownConversion(other.to_string())),
        }
    }
}

impl Conversion {
    /// Convert `raw`; `Null` when it does not parse.
    pub fn apply(self, raw: &str) -> Value {
        let value = match self {
            Conversion::Int => raw.parse::<i64>().ok().map(Value::from),
            Conversion::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            Conversion::Bool => parse_bool(raw).map(Value::Bool),
            Conversion::Json => serde_json::from_str(raw).ok(),
        };
        value.unwrap_or_else(|| {
            debug!(raw, conversion = ?self, "parameter does not convert");
            Value::Null
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a parameter string into a JSON object.
pub fn parse_params(input: &str, conversions: &HashMap<String, Conversion>) -> Map<String, Value> {
    let mut params = Map::new();
    extend_params(&mut params, input, conversions);
    params
}

/// Parse a parameter string into an existing object, overwriting duplicates.
pub fn extend_params(
    params: &mut Map<String, Value>,
    input: &str,
    conversions: &HashMap<String, Conversion>,
) {
    for part in input.split(';') {
        let (name, value) = match part.split_once('=') {
            Some((name, raw)) => {
                let name = name.trim();
                let raw = raw.trim();
                let value = match conversions.get(name) {
                    Some(conversion) if !raw.is_empty() => conversion.apply(raw),
                    _ => Value::String(raw.to_string()),
                };
                (name, value)
            }
            None => (part.trim(), Value::Bool(true)),
        };

        if name.is_empty() {
            continue;
        }
        params.insert(name.to_string(), value);
    }
}
