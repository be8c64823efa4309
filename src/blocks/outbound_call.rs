//! Outbound call block - issue an HTTP request to a third-party endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::config::OutboundSettings;
use crate::engine::{value_to_text, Resolver};
use crate::error::{BlockError, EngineError};
use crate::workflow::config::{HttpMethod, OutboundCallConfig};
use crate::workflow::{BlockConfig, BlockKind};

/// Refuse loopback, private, link-local and metadata hosts, and non-http(s)
/// schemes. The returned error names the URL.
pub fn validate_url(url: &str) -> Result<reqwest::Url, BlockError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| BlockError::network(url, format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(BlockError::network(
                url,
                format!("unsupported URL scheme '{}'", scheme),
            ));
        }
    }

    if let Some(host) = parsed.host_str() {
        let host_lower = host.to_lowercase();
        let bare = host_lower.trim_start_matches('[').trim_end_matches(']');

        if bare == "localhost" || bare.ends_with(".localhost") {
            warn!(url = %url, "Blocked outbound call to localhost");
            return Err(BlockError::network(url, "access to localhost is not allowed"));
        }

        if let Ok(ip) = bare.parse::<IpAddr>() {
            if is_private_or_special_ip(&ip) {
                warn!(url = %url, "Blocked outbound call to private address");
                return Err(BlockError::network(
                    url,
                    "access to private or internal addresses is not allowed",
                ));
            }
        }

        if bare.ends_with(".local")
            || bare.ends_with(".internal")
            || bare == "metadata.google.internal"
        {
            warn!(url = %url, "Blocked outbound call to internal host");
            return Err(BlockError::network(
                url,
                "access to internal hostnames is not allowed",
            ));
        }
    }

    Ok(parsed)
}

fn is_private_or_special_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local() // includes 169.254.169.254
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xc0) == 64 // CGNAT
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6
                    .to_ipv4_mapped()
                    .map(|v4| is_private_or_special_ip(&IpAddr::V4(v4)))
                    .unwrap_or(false)
        }
    }
}

/// Headroom left between a request timeout and the engine's block deadline.
const DEADLINE_MARGIN: Duration = Duration::from_millis(250);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Outbound call block implementation.
pub struct OutboundCallBlock {
    client: Client,
    default_timeout: Duration,
    allow_internal_urls: bool,
    block_deadline: Option<Duration>,
}

impl OutboundCallBlock {
    pub fn from_settings(settings: &OutboundSettings) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout: Duration::from_secs(settings.default_timeout_seconds),
            allow_internal_urls: settings.allow_internal_urls,
            block_deadline: None,
        })
    }

    /// Keep request timeouts under the engine's per-block deadline, so a slow
    /// endpoint fails as a network error rather than a block timeout.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.block_deadline = Some(deadline);
        self
    }

    fn request_timeout(&self, requested: Option<u64>) -> Duration {
        let timeout = requested
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        match self.block_deadline {
            Some(deadline) => {
                let cap = deadline.saturating_sub(DEADLINE_MARGIN).max(MIN_REQUEST_TIMEOUT);
                timeout.min(cap)
            }
            None => timeout,
        }
    }

    fn describe(url: &str, timeout: Duration, e: &reqwest::Error) -> BlockError {
        if e.is_timeout() {
            BlockError::network(
                url,
                format!("request timed out after {}ms", timeout.as_millis()),
            )
        } else if e.is_connect() {
            BlockError::network(url, format!("connection failed: {}", e))
        } else {
            BlockError::network(url, format!("request failed: {}", e))
        }
    }

    async fn call(&self, config: &OutboundCallConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let url = resolver.resolve_str(&config.url).require_text("url")?;
        let parsed = if self.allow_internal_urls {
            reqwest::Url::parse(&url)
                .map_err(|e| BlockError::network(&url, format!("invalid URL: {}", e)))?
        } else {
            validate_url(&url)?
        };

        let method = config.method;
        let mut request = match method {
            HttpMethod::Get => self.client.get(parsed),
            HttpMethod::Post => self.client.post(parsed),
            HttpMethod::Put => self.client.put(parsed),
            HttpMethod::Patch => self.client.patch(parsed),
            HttpMethod::Delete => self.client.delete(parsed),
            HttpMethod::Head => self.client.head(parsed),
        };

        if let Some(Value::Object(headers)) = resolver.resolve(&config.headers).optional() {
            for (name, value) in headers {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    BlockError::validation(format!("invalid header name '{}'", name))
                })?;
                let header_value = HeaderValue::from_str(&value_to_text(&value)).map_err(|_| {
                    BlockError::validation(format!("invalid value for header '{}'", name))
                })?;
                request = request.header(header_name, header_value);
            }
        }

        if let Some(body) = &config.body {
            let body = resolver.resolve(body).require("body")?;
            if method.sends_json_body() {
                request = request.json(&body);
            } else if method == HttpMethod::Get {
                match body {
                    Value::Object(params) => {
                        let pairs: Vec<(String, String)> = params
                            .iter()
                            .map(|(k, v)| (k.clone(), value_to_text(v)))
                            .collect();
                        request = request.query(&pairs);
                    }
                    Value::Null => {}
                    other => {
                        return Err(BlockError::validation(format!(
                            "GET body must be an object of query parameters, got {}",
                            other
                        )))
                    }
                }
            }
        }

        let timeout = self.request_timeout(config.timeout);
        request = request.timeout(timeout);

        debug!(method = %method, url = %url, "Outbound call");
        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                crate::metrics::record_outbound_request(method.as_str(), 0);
                return Err(Self::describe(&url, timeout, &e));
            }
        };

        let status = response.status().as_u16();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.as_str().to_lowercase(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            );
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::describe(&url, timeout, &e))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        let duration = start.elapsed();
        crate::metrics::record_outbound_request(method.as_str(), status);
        info!(
            method = %method,
            url = %url,
            status,
            duration_ms = duration.as_millis() as u64,
            "Outbound call finished"
        );

        Ok(BlockOutput::with_metadata(
            json!({
                "status": status,
                "headers": headers,
                "body": body,
            }),
            json!({
                "duration_ms": duration.as_millis() as u64,
            }),
        ))
    }
}

#[async_trait]
impl BlockHandler for OutboundCallBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::OutboundCall
    }

    fn description(&self) -> &str {
        "Call a third-party HTTP endpoint"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::OutboundCall(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };
        self.call(config, resolver).await
    }
}
