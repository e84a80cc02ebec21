//! Request construction and AWS Signature Version 2 signing for the
//! Amazon MWS and Product Advertising APIs.
//!
//! The signature is computed over a canonical request string:
//!
//! ```text
//! METHOD + "\n" +
//! host (lowercase) + "\n" +
//! uri path + "\n" +
//! sorted, percent-encoded query parameters
//! ```
//!
//! and appended to the query as `&Signature=<urlencoded base64 HMAC>`.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;

pub mod endpoints;
pub mod section;

pub use endpoints::{marketplace_id, mws_domain, normalize_marketplace, pa_endpoint};
pub use section::{section, SectionSpec, SECTIONS};

type HmacSha256 = Hmac<Sha256>;

/// Encodes everything except the unreserved set: A-Z a-z 0-9 - _ . ~
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Account credentials plus the resolved endpoint hosts. Immutable
/// once constructed; construction validates two-letter region and
/// marketplace designations against the endpoint tables.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    secret_key: String,
    pub account_id: String,
    pub auth_token: Option<String>,
    /// Resolved MWS host.
    pub domain: String,
    /// Resolved default marketplace id.
    pub default_market: String,
    /// Resolved Product Advertising host.
    pub pa_host: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"REDACTED")
            .field("account_id", &self.account_id)
            .field("domain", &self.domain)
            .field("default_market", &self.default_market)
            .finish()
    }
}

impl Credentials {
    pub fn new(
        access_key: &str,
        secret_key: &str,
        account_id: &str,
        domain: &str,
        default_market: &str,
    ) -> anyhow::Result<Self> {
        if access_key.is_empty() || secret_key.is_empty() || account_id.is_empty() {
            anyhow::bail!("access_key, secret_key and account id must be non-empty");
        }

        let domain = if domain.len() == 2 {
            endpoints::mws_domain(domain)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "invalid region: {domain}. Recognized values are {}",
                        endpoints::known_regions()
                    )
                })?
                .to_string()
        } else {
            domain.to_string()
        };

        let default_market = if default_market.len() == 2 {
            endpoints::marketplace_id(default_market)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "invalid market designation: {default_market}. \
                         Recognized values are {}",
                        endpoints::known_marketplaces()
                    )
                })?
                .to_string()
        } else {
            default_market.to_string()
        };

        Ok(Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            account_id: account_id.to_string(),
            auth_token: None,
            domain,
            default_market,
            // US unless overridden via with_pa_region
            pa_host: "webservices.amazon.com".to_string(),
        })
    }

    pub fn with_auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_pa_region(mut self, region: &str) -> anyhow::Result<Self> {
        self.pa_host = endpoints::pa_endpoint(region)
            .ok_or_else(|| anyhow::anyhow!("invalid Product Advertising region: {region}"))?
            .to_string();
        Ok(self)
    }
}

/// Builds and signs requests for one section of the API.
pub struct Signer<'a> {
    credentials: &'a Credentials,
    section: &'static SectionSpec,
}

impl<'a> Signer<'a> {
    pub fn new(credentials: &'a Credentials, section: &'static SectionSpec) -> Self {
        Self {
            credentials,
            section,
        }
    }

    /// The host this section's requests go to.
    pub fn host(&self) -> &str {
        if self.section.is_product_advertising() {
            &self.credentials.pa_host
        } else {
            &self.credentials.domain
        }
    }

    /// Flatten a list-valued parameter into the indexed form MWS
    /// expects. `MarketplaceId` uses the item tag `Id`; other roots
    /// use the root name with the first `List` removed (`ASINList`
    /// becomes `ASIN`). Map-valued items expand their inner keys.
    pub fn enumerate_list(root: &str, values: &[Value]) -> BTreeMap<String, String> {
        let tag = if root == "MarketplaceId" {
            "Id".to_string()
        } else {
            root.replacen("List", "", 1)
        };

        let mut params = BTreeMap::new();
        for (idx, value) in values.iter().enumerate() {
            let base = format!("{root}.{tag}.{num}", num = idx + 1);
            match value {
                Value::Object(map) => {
                    for (key, inner) in map {
                        params.insert(format!("{base}.{key}"), render_scalar(inner));
                    }
                }
                other => {
                    params.insert(base, render_scalar(other));
                }
            }
        }
        params
    }

    /// Assemble the canonical query string for `action`: the standard
    /// signing parameters, the caller's parameters (list-valued keys
    /// expanded), every value percent-encoded, keys sorted, joined
    /// with `&`.
    pub fn build_params(&self, action: &str, kwargs: &BTreeMap<String, Value>) -> String {
        self.build_params_at(action, kwargs, Utc::now())
    }

    pub fn build_params_at(
        &self,
        action: &str,
        kwargs: &BTreeMap<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> String {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert(
            "AWSAccessKeyId".to_string(),
            self.credentials.access_key.clone(),
        );
        params.insert(self.section.action_param.to_string(), action.to_string());
        params.insert(
            self.section.account_param.to_string(),
            self.credentials.account_id.clone(),
        );
        params.insert("SignatureMethod".to_string(), "HmacSHA256".to_string());
        params.insert("SignatureVersion".to_string(), "2".to_string());
        params.insert(
            "Timestamp".to_string(),
            timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        params.insert("Version".to_string(), self.section.version.to_string());

        if let Some(token) = &self.credentials.auth_token {
            params.insert("MWSAuthToken".to_string(), token.clone());
        }

        for (key, value) in kwargs {
            if key.starts_with("List") || key.ends_with("List") {
                if let Value::Array(items) = value {
                    params.extend(Self::enumerate_list(key, items));
                    continue;
                }
            }
            if is_truthy(value) {
                params.insert(key.clone(), render_scalar(value));
            }
        }

        params
            .iter()
            .map(|(key, value)| format!("{key}={}", uri_encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Produce the full signed request URL for `action`.
    pub fn build_url(
        &self,
        method: &str,
        action: &str,
        kwargs: &BTreeMap<String, Value>,
    ) -> anyhow::Result<String> {
        self.build_url_at(method, action, kwargs, Utc::now())
    }

    pub fn build_url_at(
        &self,
        method: &str,
        action: &str,
        kwargs: &BTreeMap<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let method = method.to_uppercase();
        if method != "GET" && method != "POST" {
            anyhow::bail!("unsupported HTTP method: {method}");
        }

        let host = self.host().to_lowercase();
        let uri = self.section.uri_path;
        let params = self.build_params_at(action, kwargs, timestamp);

        let string_to_sign = format!("{method}\n{host}\n{uri}\n{params}");
        let signature = sign(&self.credentials.secret_key, &string_to_sign)?;

        Ok(format!(
            "https://{host}{uri}?{params}&Signature={signature}",
            host = self.host()
        ))
    }
}

/// base64(HMAC-SHA256(secret, data)), percent-encoded for use as a
/// query parameter value.
fn sign(secret: &str, data: &str) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow::anyhow!("building HMAC key: {err}"))?;
    mac.update(data.as_bytes());
    let digest = mac.finalize().into_bytes();
    let encoded = data_encoding::BASE64.encode(&digest);
    Ok(uri_encode(&encoded))
}

fn uri_encode(input: &str) -> String {
    percent_encode(input.as_bytes(), UNRESERVED).to_string()
}

/// Scalars render the way they appear on the wire: strings verbatim,
/// booleans lowercase, numbers without separators or extra digits.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Mirrors the truthiness filter applied to passthrough parameters:
/// empty strings, zero, false, null and empty containers are dropped.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
