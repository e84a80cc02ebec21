//! Per-action leaky-bucket throttling with state shared across worker
//! processes through the kvstore.
//!
//! Each action has a bucket of depth `quota_max`; one unit drains back
//! out every `restore_rate` seconds. Usage lives in the kvstore under
//! `"<task>_usage"` and a counter of in-flight requests lives under
//! `"<task>_pending"` with a TTL, so a crashed worker can only pin
//! quota until the counter expires. The coordination is eventually
//! consistent by design: availability is preferred over strict
//! fairness.
use kvstore::Store;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use thiserror::Error;

mod limits;

pub use limits::{default_limits, priority_quota, ActionLimits, MAX_PRIORITY};

/// How long a pending counter lives without being refreshed.
pub const DEFAULT_PENDING_EXPIRES: Duration = Duration::from_secs(200);

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
    #[error("kvstore error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Bucket occupancy for one action. `last_request` is a unix
/// timestamp; a record that has never admitted a request carries none,
/// which makes restoration a no-op and the wait zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionUsage {
    #[serde(deserialize_with = "quota_level")]
    pub quota_level: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<f64>,
}

/// The legacy writer stored restored quota levels as floats.
fn quota_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(value.max(0.0) as u64)
}

/// Decode a stored usage record. Strict JSON is what we write, but
/// records written as a single-quoted dict repr must also decode.
/// Anything unreadable counts as a fresh record.
pub fn parse_usage(raw: &str) -> ActionUsage {
    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_str(&raw.replace('\'', "\"")))
        .unwrap_or_default()
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Throttles actions against their quota envelopes. One instance per
/// gateway call: the limits table is copied at construction so
/// priority overrides never race across gateways, while the usage it
/// coordinates against lives in the shared store.
pub struct Throttler {
    limits: HashMap<String, ActionLimits>,
    usage: HashMap<String, ActionUsage>,
    store: Store,
    pending_expires: Duration,
}

impl Throttler {
    pub fn new(store: Store) -> Self {
        Self::with_limits(store, limits::default_limits())
    }

    pub fn with_limits(store: Store, limits: HashMap<String, ActionLimits>) -> Self {
        Self {
            limits,
            usage: HashMap::new(),
            store,
            pending_expires: DEFAULT_PENDING_EXPIRES,
        }
    }

    pub fn set_pending_expires(&mut self, expires: Duration) {
        self.pending_expires = expires;
    }

    pub fn limits(&self) -> &HashMap<String, ActionLimits> {
        &self.limits
    }

    pub fn usage(&self, action: &str) -> Option<&ActionUsage> {
        self.usage.get(action)
    }

    /// Install a usage snapshot for `action`, as acquire does with the
    /// record loaded from the shared store.
    pub fn seed_usage(&mut self, action: &str, usage: ActionUsage) {
        self.usage.insert(action.to_string(), usage);
    }

    /// Copy the quota ceiling for `action` from the per-priority
    /// table. Actions outside the table keep their documented quota.
    pub fn apply_priority(&mut self, action: &str, priority: i64) {
        if let Some(quota_max) = limits::priority_quota(action, priority) {
            if let Some(limits) = self.limits.get_mut(action) {
                tracing::debug!(action, quota_max, "priority quota override");
                limits.quota_max = quota_max;
            }
        }
    }

    /// Add a safety margin to the restore rate, for endpoints that
    /// throttle more tightly than documented.
    pub fn adjust_restore_rate(&mut self, action: &str, adjust: f64) {
        if adjust != 0.0 {
            if let Some(limits) = self.limits.get_mut(action) {
                limits.restore_rate += adjust;
            }
        }
    }

    /// Credit back the units restored since the last request. The
    /// restoration timestamp advances by exactly the credited amount,
    /// so calling this twice at the same clock value changes nothing.
    pub fn restore_quota(&mut self, action: &str, now: f64) {
        let Some(limits) = self.limits.get(action) else {
            return;
        };
        let Some(usage) = self.usage.get_mut(action) else {
            return;
        };
        let Some(last_request) = usage.last_request else {
            return;
        };

        let elapsed = now - last_request;
        let restored = (elapsed / limits.restore_rate).floor();
        if restored >= 1.0 {
            usage.quota_level = usage.quota_level.saturating_sub(restored as u64);
            usage.last_request = Some(last_request + restored * limits.restore_rate);
        }
    }

    /// Seconds to wait before `action` can be admitted. Zero whenever
    /// the bucket has room, the action has no limits, or no usage is
    /// known.
    pub fn calculate_wait(&self, action: &str, now: f64) -> f64 {
        let Some(limits) = self.limits.get(action) else {
            return 0.0;
        };
        let Some(usage) = self.usage.get(action) else {
            return 0.0;
        };
        let Some(last_request) = usage.last_request else {
            return 0.0;
        };

        if usage.quota_level < limits.quota_max {
            return 0.0;
        }

        let elapsed = now - last_request;
        let pending_units = (usage.quota_level + 1 - limits.quota_max) as f64;
        (pending_units * limits.restore_rate - elapsed).max(0.0)
    }

    /// Record an admission. Unthrottled actions are not tracked.
    pub fn add_to_quota(&mut self, action: &str, now: f64) {
        if !self.limits.contains_key(action) {
            return;
        }
        let usage = self.usage.entry(action.to_string()).or_default();
        usage.quota_level += 1;
        usage.last_request = Some(now);
    }

    /// Admit one request for `action`, sleeping as long as the quota
    /// envelope requires. `task_name` is the fully qualified action
    /// used for the shared kvstore keys.
    ///
    /// The returned lease must be released once the request completes;
    /// dropping it unreleased (cancellation, or an error that unwinds
    /// past the caller) spawns the release instead, so the pending
    /// counter always comes back down and usage is always persisted.
    pub async fn acquire(&mut self, task_name: &str, action: &str) -> Result<ThrottleLease, Error> {
        let usage_key = format!("{task_name}_usage");
        let pending_key = format!("{task_name}_pending");

        let values = self
            .store
            .mget(&[&usage_key, &pending_key])
            .await
            .map_err(Error::Store)?;
        self.store
            .incr_ex(&pending_key, self.pending_expires)
            .await
            .map_err(Error::Store)?;

        let mut usage = values
            .first()
            .and_then(|value| value.as_deref())
            .map(parse_usage)
            .unwrap_or_default();
        let pending: i64 = values
            .get(1)
            .and_then(|value| value.as_deref())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        // Requests in flight on other workers occupy the bucket too.
        if pending > 0 {
            usage.quota_level += pending as u64;
            usage.last_request = Some(unix_now());
        }
        tracing::debug!(
            task = task_name,
            quota_level = usage.quota_level,
            pending,
            "loaded usage"
        );
        self.seed_usage(action, usage.clone());

        let mut lease = ThrottleLease {
            store: self.store.clone(),
            usage_key,
            pending_key,
            usage,
            pending_expires: self.pending_expires,
            armed: true,
        };

        self.restore_quota(action, unix_now());
        let wait = self.calculate_wait(action, unix_now());
        if wait > 0.0 {
            tracing::debug!(action, wait, "throttling");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
        // Credit anything earned while we slept, so the admission is
        // not double-charged.
        self.restore_quota(action, unix_now());
        self.add_to_quota(action, unix_now());

        if let Some(usage) = self.usage.get(action) {
            lease.usage = usage.clone();
        }
        Ok(lease)
    }
}

/// Holds one admitted unit of quota. `release` persists the usage
/// record and decrements the pending counter; an unreleased lease does
/// the same from a spawned task when dropped.
pub struct ThrottleLease {
    store: Store,
    usage_key: String,
    pending_key: String,
    usage: ActionUsage,
    pending_expires: Duration,
    armed: bool,
}

impl ThrottleLease {
    pub fn usage(&self) -> &ActionUsage {
        &self.usage
    }

    pub async fn release(&mut self) {
        self.armed = false;

        match serde_json::to_string(&self.usage) {
            Ok(payload) => {
                if let Err(err) = self.store.set(&self.usage_key, &payload).await {
                    tracing::warn!("failed to persist {}: {err:#}", self.usage_key);
                }
            }
            Err(err) => {
                tracing::warn!("failed to encode {}: {err:#}", self.usage_key);
            }
        }

        if let Err(err) = self
            .store
            .decr_ex(&self.pending_key, self.pending_expires)
            .await
        {
            tracing::warn!("failed to decrement {}: {err:#}", self.pending_key);
        }
    }
}

impl Drop for ThrottleLease {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            let mut deferred = ThrottleLease {
                store: self.store.clone(),
                usage_key: std::mem::take(&mut self.usage_key),
                pending_key: std::mem::take(&mut self.pending_key),
                usage: self.usage.clone(),
                pending_expires: self.pending_expires,
                armed: false,
            };
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    deferred.release().await;
                });
            }
        }
    }
}
