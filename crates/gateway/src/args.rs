//! Extraction of caller arguments. Calls arrive as a positional list
//! plus named arguments; builders consume the names they understand
//! and forward whatever remains as literal request parameters, the
//! way the original task signatures did.
use serde_json::{Map, Value};
use sigv2::normalize_marketplace;
use std::collections::BTreeMap;

pub struct ArgSet<'a> {
    args: &'a [Value],
    kwargs: Map<String, Value>,
}

impl<'a> ArgSet<'a> {
    pub fn new(args: &'a [Value], kwargs: &Map<String, Value>) -> Self {
        Self {
            args,
            kwargs: kwargs.clone(),
        }
    }

    /// A named argument, falling back to the positional at `position`.
    pub fn take(&mut self, name: &str, position: usize) -> Option<Value> {
        self.kwargs
            .remove(name)
            .or_else(|| self.args.get(position).cloned())
    }

    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        self.kwargs.remove(name)
    }

    /// Whatever the builder did not consume is forwarded verbatim.
    pub fn into_params(self) -> BTreeMap<String, Value> {
        self.kwargs.into_iter().collect()
    }
}

pub fn required_str(set: &mut ArgSet, name: &str, position: usize) -> anyhow::Result<String> {
    match set.take(name, position) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => anyhow::bail!("{name} must be a string, got {other}"),
        None => anyhow::bail!("missing required argument: {name}"),
    }
}

pub fn required_value(set: &mut ArgSet, name: &str, position: usize) -> anyhow::Result<Value> {
    set.take(name, position)
        .ok_or_else(|| anyhow::anyhow!("missing required argument: {name}"))
}

pub fn optional_str(set: &mut ArgSet, name: &str) -> Option<String> {
    match set.take_kwarg(name) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

/// The `marketplace_id` argument with the two-layer normalization:
/// two-letter codes resolve through the marketplace table (unknown
/// codes fall back to the US marketplace), longer strings pass
/// through, and an absent argument uses the gateway's default.
pub fn marketplace_param(set: &mut ArgSet, default_market: &str) -> String {
    match optional_str(set, "marketplace_id") {
        Some(value) => normalize_marketplace(&value),
        None => default_market.to_string(),
    }
}
