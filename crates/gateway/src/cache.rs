//! The shared result cache. Entries are keyed by the fully qualified
//! action plus an MD5 of the canonicalized call signature, so any
//! worker that makes the same call within the TTL reuses the result.
//!
//! The cache is strictly best-effort: a failing kvstore read is a
//! miss, a failing write is ignored, and the call proceeds either way.
use data_encoding::HEXLOWER;
use kvstore::Store;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cache key for one call: `"<task>_" + md5(canonical json)`. The
/// canonical form serializes `{"args": [...], "kwargs": {...}}` with
/// sorted kwarg keys; `priority` has already been removed by the
/// caller since it only affects pacing, not the result.
pub fn cache_key(task_name: &str, args: &[Value], kwargs: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = kwargs.iter().collect();
    let canonical = serde_json::json!({
        "args": args,
        "kwargs": sorted,
    });
    // BTreeMap-backed maps serialize deterministically.
    let payload = canonical.to_string();
    let digest = Md5::digest(payload.as_bytes());
    format!("{task_name}_{}", HEXLOWER.encode(&digest))
}

pub struct ResultCache {
    store: Store,
}

impl ResultCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("cache read for {key} failed, treating as a miss: {err:#}");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(err) = self.store.set_ex(key, value, ttl).await {
            tracing::warn!("cache write for {key} failed: {err:#}");
        }
    }
}
