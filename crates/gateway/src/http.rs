//! The outbound HTTP seam. The gateway talks to Amazon through the
//! [`Dispatch`] trait so tests can substitute canned responses; the
//! production implementation is a reqwest client with the call's soft
//! time limit as its timeout.
use anyhow::Context;
use data_encoding::BASE64;
use futures::future::BoxFuture;
use md5::{Digest, Md5};
use std::time::Duration;

pub const USER_AGENT: &str = "amazonmws/0.0.1 (Language=Rust)";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: &str, url: String, body: Option<String>) -> Self {
        let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
        if let Some(body) = &body {
            headers.push(("Content-MD5".to_string(), content_md5(body)));
            headers.push(("Content-Type".to_string(), "text/xml".to_string()));
        }
        Self {
            method: method.to_string(),
            url,
            body,
            headers,
        }
    }
}

/// base64 of the MD5 digest of the body, with any trailing newline
/// trimmed.
pub fn content_md5(body: &str) -> String {
    let digest = Md5::digest(body.as_bytes());
    BASE64.encode(&digest).trim_end_matches('\n').to_string()
}

pub trait Dispatch: Send + Sync {
    /// Perform the request and return the response body. Transport
    /// failures are errors; HTTP error statuses are not, because
    /// Amazon delivers its error envelopes on them and the caller
    /// needs the body either way.
    fn dispatch<'a>(&'a self, request: HttpRequest) -> BoxFuture<'a, anyhow::Result<String>>;
}

pub struct ReqwestDispatch {
    client: reqwest::Client,
}

impl ReqwestDispatch {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Dispatch for ReqwestDispatch {
    fn dispatch<'a>(&'a self, request: HttpRequest) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let method = match request.method.as_str() {
                "GET" => reqwest::Method::GET,
                "POST" => reqwest::Method::POST,
                other => anyhow::bail!("unsupported HTTP method: {other}"),
            };

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.context("dispatching request")?;
            let status = response.status();
            let text = response.text().await.with_context(|| {
                format!(
                    "request status {}: {}, and failed to read response body",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
            })?;

            if !status.is_success() {
                tracing::debug!(status = status.as_u16(), "non-success response");
            }
            Ok(text)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn body_headers() {
        let request = HttpRequest::new("POST", "https://example.com/".to_string(), None);
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers[0].0, "User-Agent");

        let request = HttpRequest::new(
            "POST",
            "https://example.com/".to_string(),
            Some("<Feed/>".to_string()),
        );
        let names: Vec<&str> = request
            .headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["User-Agent", "Content-MD5", "Content-Type"]);
    }

    #[test]
    fn content_md5_is_base64() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(content_md5(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
