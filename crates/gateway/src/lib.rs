//! The task gateway: one long-lived instance per worker that carries
//! a single outbound Amazon API call end to end.
//!
//! For each call the gateway checks the shared result cache, waits on
//! the per-action throttle, signs and dispatches the HTTP request,
//! normalizes the XML response, projects it into a JSON record,
//! releases the throttle and writes the cache. Amazon-signaled errors
//! come back as `{"error": {...}}` envelopes so callers do not need
//! to branch on transport shapes at every call site.
use amz_xml::AmzXmlResponse;
use kvstore::Store;
use serde_json::{Map, Value};
use sigv2::{Credentials, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use throttle::Throttler;

mod args;
pub mod cache;
pub mod http;
mod product_adv;
mod products;

pub use http::{Dispatch, HttpRequest, ReqwestDispatch};

/// Per-action cache lifetimes, in seconds.
const CACHE_TTLS: &[(&str, u64)] = &[
    ("GetServiceStatus", 300),
    ("ListMatchingProducts", 3600),
    ("GetMyFeesEstimate", 1800),
];
const DEFAULT_CACHE_TTL: u64 = 30;

pub const DEFAULT_SOFT_TIME_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub access_key: String,
    pub secret_key: String,
    pub seller_id: String,
    pub auth_token: Option<String>,
    /// Two-letter MWS region code or a literal host.
    pub domain: String,
    /// Two-letter country code or a literal marketplace id.
    pub default_market: String,
    /// Country code for the Product Advertising endpoint.
    pub pa_region: String,
    pub redis_url: Option<String>,
    /// Cache TTL overrides keyed by uppercased action name.
    pub cache_ttl_overrides: HashMap<String, u64>,
    /// Safety margin added to every action's restore rate.
    pub restore_rate_adjust: f64,
    pub soft_time_limit: Duration,
    pub pending_expires: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            access_key: "test_access_key".to_string(),
            secret_key: "test_secret_key".to_string(),
            seller_id: "test_account_id".to_string(),
            auth_token: None,
            domain: "NA".to_string(),
            default_market: "US".to_string(),
            pa_region: "US".to_string(),
            redis_url: None,
            cache_ttl_overrides: HashMap::new(),
            restore_rate_adjust: 0.0,
            soft_time_limit: DEFAULT_SOFT_TIME_LIMIT,
            pending_expires: throttle::DEFAULT_PENDING_EXPIRES,
        }
    }
}

impl GatewayConfig {
    /// Configuration from the environment: `MWS_ACCESS_KEY`,
    /// `MWS_SECRET_KEY`, `MWS_SELLER_ID`, optional `MWS_AUTH_TOKEN`,
    /// `REDIS_URL`, and per-action cache TTL overrides of the form
    /// `MWS_CACHE_TTL_<ACTION>=<seconds>`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("MWS_ACCESS_KEY") {
            config.access_key = value;
        }
        if let Ok(value) = std::env::var("MWS_SECRET_KEY") {
            config.secret_key = value;
        }
        if let Ok(value) = std::env::var("MWS_SELLER_ID") {
            config.seller_id = value;
        }
        if let Ok(value) = std::env::var("MWS_AUTH_TOKEN") {
            config.auth_token = Some(value);
        }
        if let Ok(value) = std::env::var("REDIS_URL") {
            config.redis_url = Some(value);
        }

        for (key, value) in std::env::vars() {
            if let Some(action) = key.strip_prefix("MWS_CACHE_TTL_") {
                match value.parse() {
                    Ok(ttl) => {
                        config
                            .cache_ttl_overrides
                            .insert(action.to_uppercase(), ttl);
                    }
                    Err(_) => {
                        tracing::warn!("ignoring unparseable cache TTL override {key}={value}");
                    }
                }
            }
        }

        config
    }
}

pub struct TaskGateway {
    credentials: Credentials,
    store: Store,
    cache: cache::ResultCache,
    dispatch: Arc<dyn Dispatch>,
    cache_ttl_overrides: HashMap<String, u64>,
    restore_rate_adjust: f64,
    pending_expires: Duration,
}

impl TaskGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let store = match &config.redis_url {
            Some(url) => Store::from_redis_url(url)?,
            None => {
                tracing::debug!("no kvstore configured, using the in-process store");
                Store::memory()
            }
        };
        let dispatch = Arc::new(ReqwestDispatch::new(config.soft_time_limit)?);
        Self::with_dispatch(config, store, dispatch)
    }

    /// Build a gateway over an explicit store and HTTP seam. This is
    /// how tests supply canned responses; embedders can use it to
    /// share one store or client across gateways.
    pub fn with_dispatch(
        config: GatewayConfig,
        store: Store,
        dispatch: Arc<dyn Dispatch>,
    ) -> anyhow::Result<Self> {
        let mut credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            &config.seller_id,
            &config.domain,
            &config.default_market,
        )?
        .with_pa_region(&config.pa_region)?;
        if let Some(token) = &config.auth_token {
            credentials = credentials.with_auth_token(token.clone());
        }

        Ok(Self {
            credentials,
            cache: cache::ResultCache::new(store.clone()),
            store,
            dispatch,
            cache_ttl_overrides: config.cache_ttl_overrides,
            restore_rate_adjust: config.restore_rate_adjust,
            pending_expires: config.pending_expires,
        })
    }

    fn cache_ttl_for(&self, action: &str) -> u64 {
        if let Some(ttl) = self.cache_ttl_overrides.get(&action.to_uppercase()) {
            return *ttl;
        }
        CACHE_TTLS
            .iter()
            .find_map(|(name, ttl)| if *name == action { Some(*ttl) } else { None })
            .unwrap_or(DEFAULT_CACHE_TTL)
    }

    /// Carry out one API call. `task_name` is the fully qualified
    /// action, `"<section>.<Action>"`; only its last two dot-separated
    /// segments matter, so broker task names with longer prefixes
    /// resolve too.
    pub async fn invoke(
        &self,
        task_name: &str,
        args: &[Value],
        kwargs: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let segments: Vec<&str> = task_name.split('.').collect();
        if segments.len() < 2 {
            anyhow::bail!("expected a fully qualified action like products.GetServiceStatus");
        }
        let section_name = segments[segments.len() - 2];
        let action = segments[segments.len() - 1];

        let section = sigv2::section(section_name)
            .ok_or_else(|| anyhow::anyhow!("unknown API section: {section_name}"))?;
        if !section.supports(action) {
            anyhow::bail!("{}.{action} is not a supported action", section.name);
        }

        let mut kwargs = kwargs;
        let priority = pop_priority(&mut kwargs);

        let cache_ttl = self.cache_ttl_for(action);
        let cache_key = cache::cache_key(task_name, args, &kwargs);
        if cache_ttl > 0 {
            if let Some(cached) = self.cache.get(&cache_key).await {
                match serde_json::from_str(&cached) {
                    Ok(value) => {
                        tracing::debug!(task = task_name, "returning cached result");
                        return Ok(value);
                    }
                    Err(err) => {
                        tracing::warn!("undecodable cache entry {cache_key}: {err:#}");
                    }
                }
            }
        }

        let body = match kwargs.remove("body") {
            Some(Value::String(body)) => Some(body),
            _ => None,
        };

        let params = if section.is_product_advertising() {
            let mut params = product_adv::build_request(action, args, &kwargs)?;
            params.insert(
                "Service".to_string(),
                Value::String("AWSECommerceService".to_string()),
            );
            params
        } else {
            products::build_request(action, args, &kwargs, &self.credentials.default_market)?
        };

        let mut throttler = Throttler::new(self.store.clone());
        throttler.set_pending_expires(self.pending_expires);
        throttler.apply_priority(action, priority);
        throttler.adjust_restore_rate(action, self.restore_rate_adjust);
        let mut lease = throttler.acquire(task_name, action).await?;

        let signer = Signer::new(&self.credentials, section);
        let url = match signer.build_url(section.method, action, &params) {
            Ok(url) => url,
            Err(err) => {
                lease.release().await;
                return Err(err);
            }
        };

        let request = HttpRequest::new(section.method, url, body);
        let response_text = match self.dispatch.dispatch(request).await {
            Ok(text) => text,
            Err(err) => {
                // Transport failures still count: the request may have
                // reached Amazon.
                lease.release().await;
                return Err(err);
            }
        };

        let response = match AmzXmlResponse::parse(&response_text) {
            Ok(response) => response,
            Err(err) => {
                lease.release().await;
                return Err(err.into());
            }
        };

        if response.error_code().is_some() {
            tracing::debug!(
                task = task_name,
                code = ?response.error_code(),
                "Amazon returned an error envelope"
            );
            lease.release().await;
            return Ok(response.error_as_json());
        }

        let record = if section.is_product_advertising() {
            product_adv::project(action, &response)
        } else {
            products::project(action, &response)
        };
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                lease.release().await;
                return Err(err);
            }
        };

        lease.release().await;

        if cache_ttl > 0 {
            match serde_json::to_string(&record) {
                Ok(encoded) => {
                    self.cache
                        .put(&cache_key, &encoded, Duration::from_secs(cache_ttl))
                        .await;
                }
                Err(err) => {
                    tracing::warn!("failed to encode cache entry {cache_key}: {err:#}");
                }
            }
        }

        Ok(record)
    }
}

/// The priority is pacing metadata, not a request parameter: it is
/// removed before the cache key is computed and before signing.
/// Values that do not parse as integers fall back to priority 0.
fn pop_priority(kwargs: &mut Map<String, Value>) -> i64 {
    let Some(value) = kwargs.remove("priority") else {
        return 0;
    };
    match &value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(text) => text.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid priority value {text:?}, using default priority (0)");
            0
        }),
        other => {
            tracing::warn!("invalid priority value {other}, using default priority (0)");
            0
        }
    }
}

#[cfg(test)]
mod test;
