//! HTTP collector and the `http_get` step bound to it.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

use quarry_types::{HttpCollectorSpec, HttpGetStepSpec, StepResult};

use crate::core::{Collector, Step};
use crate::errors::Interrupted;
use crate::registry::{collector_factory, step_factory, Registry};

pub const COLLECTOR_KIND: &str = "http";
pub const GET_STEP_KIND: &str = "http_get";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct HttpCollectorConfig {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
    pub timeout: Option<Duration>,
    pub insecure: bool,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub basic: Option<BasicAuthConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
    /// Pre-encoded base64 credentials. Takes precedence when non-empty.
    pub encoded: String,
}

impl HttpCollectorConfig {
    pub fn from_spec(spec: &HttpCollectorSpec) -> Self {
        Self {
            base_url: spec.base_url.clone(),
            headers: spec.headers.clone(),
            auth: spec.auth.as_ref().map(|auth| AuthConfig {
                basic: auth.basic.as_ref().map(|basic| BasicAuthConfig {
                    username: basic.username.clone(),
                    password: basic.password.clone(),
                    encoded: basic.encoded.clone(),
                }),
            }),
            timeout: spec.timeout.map(Duration::from_secs),
            insecure: spec.insecure,
        }
    }
}

/// Holds a pooled HTTP client plus the default headers applied to every
/// request. Per-request headers set by steps override the defaults. The
/// lifecycle hooks are no-ops: the connection pool needs no explicit
/// startup or teardown.
pub struct HttpCollector {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCollector")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpCollector {
    /// # Errors
    ///
    /// Returns an error for a missing or non-http(s) base URL, an invalid
    /// header name or value, or a client build failure.
    pub fn new(cfg: HttpCollectorConfig) -> Result<Self> {
        if cfg.base_url.is_empty() {
            bail!("base_url is required");
        }

        let base_url = reqwest::Url::parse(&cfg.base_url)
            .with_context(|| format!("failed to parse base_url '{}'", cfg.base_url))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            bail!(
                "base_url must use http or https scheme, got: {}",
                base_url.scheme()
            );
        }

        let mut headers = default_header_map()?;
        for (key, value) in &cfg.headers {
            insert_header(&mut headers, key, value)?;
        }
        if let Some(basic) = cfg.auth.as_ref().and_then(|auth| auth.basic.as_ref()) {
            let credentials = if basic.encoded.is_empty() {
                base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", basic.username, basic.password))
            } else {
                basic.encoded.clone()
            };
            insert_header(&mut headers, "Authorization", &format!("Basic {credentials}"))?;
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(cfg.timeout.unwrap_or(DEFAULT_TIMEOUT));
        if cfg.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("failed to build http client")?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn default_header_map() -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "User-Agent", USER_AGENT)?;
    insert_header(&mut headers, "Accept", "application/json")?;
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, key: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(key.as_bytes())
        .with_context(|| format!("invalid header name {key:?}"))?;
    let value =
        HeaderValue::from_str(value).with_context(|| format!("invalid value for header {key:?}"))?;
    headers.insert(name, value);
    Ok(())
}

#[async_trait]
impl Collector for HttpCollector {
    fn name(&self) -> String {
        format!(
            "{COLLECTOR_KIND}({})",
            self.base_url.host_str().unwrap_or_default()
        )
    }

    fn kind(&self) -> &'static str {
        COLLECTOR_KIND
    }

    async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetStepConfig {
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub response_type: Option<String>,
}

impl GetStepConfig {
    pub fn from_spec(spec: &HttpGetStepSpec) -> Self {
        Self {
            path: spec.path.clone(),
            headers: spec.headers.clone(),
            params: spec.params.clone(),
            response_type: spec.response_type.clone(),
        }
    }
}

/// Issues a GET against the collector's base URL and parses the response
/// per `response_type` (`json` by default, or `raw`).
pub struct GetStep {
    collector: Arc<HttpCollector>,
    config: GetStepConfig,
}

impl GetStep {
    pub fn new(collector: Arc<HttpCollector>, config: GetStepConfig) -> Result<Self> {
        Ok(Self { collector, config })
    }

    fn build_url(&self) -> Result<reqwest::Url> {
        let mut url = self
            .collector
            .base_url()
            .join(&self.config.path)
            .with_context(|| format!("failed to parse path '{}'", self.config.path))?;

        if !self.config.params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.config.params {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    async fn process_response(&self, response: reqwest::Response) -> Result<serde_json::Value> {
        match self.config.response_type.as_deref().unwrap_or("json") {
            "json" => response
                .json()
                .await
                .context("failed to parse JSON response"),
            "raw" => Ok(serde_json::Value::String(
                response
                    .text()
                    .await
                    .context("failed to read response body")?,
            )),
            other => bail!("unknown response_type: {other}"),
        }
    }
}

#[async_trait]
impl Step for GetStep {
    fn name(&self) -> String {
        format!("{GET_STEP_KIND}({})", self.config.path)
    }

    fn kind(&self) -> &'static str {
        GET_STEP_KIND
    }

    async fn resolve(&self, cancel: &CancellationToken) -> Result<StepResult> {
        let url = self.build_url().context("failed to build request URL")?;

        let mut request = self.collector.client().get(url.clone());
        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Interrupted::Cancelled.into()),
            response = request.send() => response
                .with_context(|| format!("failed to execute request to {url}"))?,
        };

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            bail!("request failed with status {}: {body}", status.as_u16());
        }

        let data = self
            .process_response(response)
            .await
            .context("failed to process response")?;
        Ok(StepResult::new(data))
    }
}

/// Registers the http collector and `http_get` step factories.
pub fn register(registry: &Registry) {
    registry.register_collector(
        COLLECTOR_KIND,
        collector_factory(COLLECTOR_KIND, |_ctx, spec: HttpCollectorSpec| {
            let collector = HttpCollector::new(HttpCollectorConfig::from_spec(&spec))?;
            Ok(Arc::new(collector) as Arc<dyn Collector>)
        }),
    );

    registry.register_step(
        GET_STEP_KIND,
        step_factory::<HttpCollector, HttpGetStepSpec, _>(
            GET_STEP_KIND,
            |_ctx, _id, collector, spec| {
                let step = GetStep::new(collector, GetStepConfig::from_spec(&spec))?;
                Ok(Box::new(step) as Box<dyn Step>)
            },
        ),
    );
}
