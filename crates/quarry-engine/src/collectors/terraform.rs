//! Terraform provider collector and the `terraform_datasource` step.
//!
//! The provider plugin transport is an external collaborator behind the
//! [`ProviderClient`] trait; the engine only drives the
//! create → configure → read → stop lifecycle. Tests substitute an
//! in-process fake.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use quarry_types::{StepResult, TerraformCollectorSpec, TerraformDataSourceStepSpec};

use crate::core::{Collector, Step};
use crate::errors::Interrupted;
use crate::registry::{collector_factory, step_factory, Registry};

pub const COLLECTOR_KIND: &str = "terraform";
pub const DATA_SOURCE_STEP_KIND: &str = "terraform_datasource";

pub type ProviderArgs = serde_json::Map<String, serde_json::Value>;

/// Identity of a provider plugin: `namespace/name` plus an optional version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// State returned by a data-source read.
#[derive(Debug, Clone, Default)]
pub struct DataSourceResult {
    pub state: ProviderArgs,
}

/// A running provider plugin.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn configure(&self, args: &ProviderArgs) -> Result<()>;

    fn is_configured(&self) -> bool;

    async fn read_data_source(&self, name: &str, args: &ProviderArgs) -> Result<DataSourceResult>;
}

/// Acquires and releases long-lived provider plugins. The concrete transport
/// (gRPC plugin protocol) lives outside the engine.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn create_provider(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>>;

    async fn stop_provider(&self, config: &ProviderConfig) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TerraformCollectorConfig {
    /// Provider source address, e.g. `hashicorp/aws`. A bare name defaults
    /// to the `hashicorp` namespace.
    pub provider: String,
    pub version: String,
    pub args: ProviderArgs,
}

impl TerraformCollectorConfig {
    pub fn from_spec(spec: &TerraformCollectorSpec) -> Self {
        Self {
            provider: spec.provider.clone(),
            version: spec.version.clone(),
            args: spec.args.clone(),
        }
    }
}

/// Owns one provider plugin. `start` is idempotent: the provider is created
/// and configured once; later calls are no-ops. `close` stops the provider
/// through the client.
pub struct TerraformCollector {
    provider_config: ProviderConfig,
    args: ProviderArgs,
    client: Arc<dyn ProviderClient>,
    provider: Mutex<Option<Arc<dyn Provider>>>,
}

impl std::fmt::Debug for TerraformCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformCollector")
            .field("provider_config", &self.provider_config)
            .finish()
    }
}

impl TerraformCollector {
    /// # Errors
    ///
    /// Returns an error when the provider source address does not parse.
    pub fn new(client: Arc<dyn ProviderClient>, cfg: TerraformCollectorConfig) -> Result<Self> {
        let (namespace, name) = parse_provider_source(&cfg.provider)
            .with_context(|| format!("failed to parse provider source '{}'", cfg.provider))?;
        let version = cfg.version.strip_prefix('v').unwrap_or(&cfg.version);

        Ok(Self {
            provider_config: ProviderConfig {
                namespace,
                name,
                version: version.to_string(),
            },
            args: cfg.args,
            client,
            provider: Mutex::new(None),
        })
    }

    pub fn provider_source(&self) -> String {
        format!(
            "{}/{}",
            self.provider_config.namespace, self.provider_config.name
        )
    }

    pub fn provider_version(&self) -> &str {
        &self.provider_config.version
    }

    /// Reads a data source through the started provider.
    ///
    /// # Errors
    ///
    /// Fails when the collector has not been started, the provider did not
    /// configure, or the read itself fails.
    pub async fn read_data_source(&self, name: &str, args: &ProviderArgs) -> Result<ProviderArgs> {
        let guard = self.provider.lock().await;
        let provider = guard.as_ref().ok_or_else(|| anyhow!("provider not started"))?;
        if !provider.is_configured() {
            bail!("provider not configured");
        }

        let result = provider
            .read_data_source(name, args)
            .await
            .context("failed to read data source")?;
        Ok(result.state)
    }
}

#[async_trait]
impl Collector for TerraformCollector {
    fn name(&self) -> String {
        format!("{COLLECTOR_KIND}({})", self.provider_config)
    }

    fn kind(&self) -> &'static str {
        COLLECTOR_KIND
    }

    async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
        let mut guard = self.provider.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let provider = self
            .client
            .create_provider(&self.provider_config)
            .await
            .context("failed to create provider")?;
        provider
            .configure(&self.args)
            .await
            .context("failed to configure provider")?;

        *guard = Some(provider);
        Ok(())
    }

    async fn close(&self, _cancel: &CancellationToken) -> Result<()> {
        self.client.stop_provider(&self.provider_config).await
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// Provider source syntax: an optional lowercase namespace, a slash, and a
// lowercase name; a bare name defaults to the hashicorp namespace.
fn parse_provider_source(source: &str) -> Result<(String, String)> {
    let (namespace, name) = match source.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => ("hashicorp", source),
    };

    if !is_valid_source_part(namespace) || !is_valid_source_part(name) {
        bail!("invalid provider source address {source:?}");
    }
    Ok((namespace.to_string(), name.to_string()))
}

fn is_valid_source_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !part.starts_with('-')
        && !part.ends_with('-')
}

/// Reads one data source through a terraform collector. `meta` carries the
/// provider source under `terraform_provider`.
pub struct DataSourceStep {
    collector: Arc<TerraformCollector>,
    name: String,
    args: ProviderArgs,
}

impl DataSourceStep {
    pub fn new(collector: Arc<TerraformCollector>, name: impl Into<String>, args: ProviderArgs) -> Self {
        Self {
            collector,
            name: name.into(),
            args,
        }
    }
}

#[async_trait]
impl Step for DataSourceStep {
    fn name(&self) -> String {
        format!("{DATA_SOURCE_STEP_KIND}({})", self.name)
    }

    fn kind(&self) -> &'static str {
        DATA_SOURCE_STEP_KIND
    }

    async fn resolve(&self, cancel: &CancellationToken) -> Result<StepResult> {
        let state = tokio::select! {
            () = cancel.cancelled() => return Err(Interrupted::Cancelled.into()),
            state = self.collector.read_data_source(&self.name, &self.args) => state?,
        };

        let meta = std::collections::BTreeMap::from([(
            "terraform_provider".to_string(),
            self.collector.provider_source(),
        )]);
        Ok(StepResult::with_meta(serde_json::Value::Object(state), meta))
    }
}

/// Registers the terraform collector and data-source step factories. The
/// collector factory requires a [`ProviderClient`] in the build context.
pub fn register(registry: &Registry) {
    registry.register_collector(
        COLLECTOR_KIND,
        collector_factory(COLLECTOR_KIND, |ctx, spec: TerraformCollectorSpec| {
            let client = ctx
                .terraform_client
                .clone()
                .ok_or_else(|| anyhow!("terraform provider client is not configured"))?;
            let collector =
                TerraformCollector::new(client, TerraformCollectorConfig::from_spec(&spec))?;
            Ok(Arc::new(collector) as Arc<dyn Collector>)
        }),
    );

    registry.register_step(
        DATA_SOURCE_STEP_KIND,
        step_factory::<TerraformCollector, TerraformDataSourceStepSpec, _>(
            DATA_SOURCE_STEP_KIND,
            |_ctx, _id, collector, spec| {
                Ok(Box::new(DataSourceStep::new(collector, spec.name, spec.args)) as Box<dyn Step>)
            },
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        configured: AtomicBool,
        configure_error: Option<String>,
        state: ProviderArgs,
        read_error: Option<String>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn configure(&self, _args: &ProviderArgs) -> Result<()> {
            if let Some(message) = &self.configure_error {
                bail!("{message}");
            }
            self.configured.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_configured(&self) -> bool {
            self.configured.load(Ordering::SeqCst)
        }

        async fn read_data_source(
            &self,
            _name: &str,
            _args: &ProviderArgs,
        ) -> Result<DataSourceResult> {
            if let Some(message) = &self.read_error {
                bail!("{message}");
            }
            Ok(DataSourceResult {
                state: self.state.clone(),
            })
        }
    }

    #[derive(Default)]
    struct FakeClient {
        provider: Option<Arc<FakeProvider>>,
        create_error: Option<String>,
        stop_error: Option<String>,
        creates: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for FakeClient {
        async fn create_provider(&self, _config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.create_error {
                bail!("{message}");
            }
            Ok(self
                .provider
                .clone()
                .unwrap_or_else(|| Arc::new(FakeProvider::default())))
        }

        async fn stop_provider(&self, _config: &ProviderConfig) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.stop_error {
                bail!("{message}");
            }
            Ok(())
        }
    }

    fn collector_with(client: Arc<FakeClient>, provider: &str, version: &str) -> TerraformCollector {
        TerraformCollector::new(
            client,
            TerraformCollectorConfig {
                provider: provider.to_string(),
                version: version.to_string(),
                args: ProviderArgs::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_parse_provider_source() {
        assert_eq!(
            parse_provider_source("hashicorp/aws").unwrap(),
            ("hashicorp".to_string(), "aws".to_string())
        );
        assert_eq!(
            parse_provider_source("google").unwrap(),
            ("hashicorp".to_string(), "google".to_string())
        );
        assert!(parse_provider_source("invalid provider").is_err());
        assert!(parse_provider_source("a/b/c").is_err());
        assert!(parse_provider_source("").is_err());
    }

    #[test]
    fn test_new_collector_rejects_bad_source() {
        let err = TerraformCollector::new(
            Arc::new(FakeClient::default()),
            TerraformCollectorConfig {
                provider: "invalid provider".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse provider source 'invalid provider'"));
    }

    #[test]
    fn test_name_and_kind() {
        let collector = collector_with(Arc::new(FakeClient::default()), "hashicorp/aws", "v5.0.0");
        assert_eq!(collector.name(), "terraform(hashicorp/aws@5.0.0)");
        assert_eq!(collector.kind(), "terraform");
        assert_eq!(collector.provider_version(), "5.0.0");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let client = Arc::new(FakeClient::default());
        let collector = collector_with(client.clone(), "hashicorp/aws", "");
        let cancel = CancellationToken::new();

        collector.start(&cancel).await.unwrap();
        collector.start(&cancel).await.unwrap();
        assert_eq!(client.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_create_failure_propagates() {
        let client = Arc::new(FakeClient {
            create_error: Some("provider not found".to_string()),
            ..Default::default()
        });
        let collector = collector_with(client, "hashicorp/aws", "");
        let err = collector.start(&CancellationToken::new()).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("failed to create provider"));
        assert!(message.contains("provider not found"));
    }

    #[tokio::test]
    async fn test_start_configure_failure_propagates() {
        let client = Arc::new(FakeClient {
            provider: Some(Arc::new(FakeProvider {
                configure_error: Some("invalid credentials".to_string()),
                ..Default::default()
            })),
            ..Default::default()
        });
        let collector = collector_with(client, "hashicorp/aws", "");
        let err = collector.start(&CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to configure provider"));
    }

    #[tokio::test]
    async fn test_read_before_start_fails() {
        let collector = collector_with(Arc::new(FakeClient::default()), "hashicorp/aws", "");
        let err = collector
            .read_data_source("aws_instance", &ProviderArgs::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider not started"));
    }

    #[tokio::test]
    async fn test_data_source_step_resolves_state_and_meta() {
        let mut state = ProviderArgs::new();
        state.insert("id".to_string(), serde_json::json!("i-12345"));
        let client = Arc::new(FakeClient {
            provider: Some(Arc::new(FakeProvider {
                state,
                ..Default::default()
            })),
            ..Default::default()
        });
        let collector = Arc::new(collector_with(client, "hashicorp/aws", "5.0.0"));
        collector.start(&CancellationToken::new()).await.unwrap();

        let step = DataSourceStep::new(collector, "aws_instance", ProviderArgs::new());
        assert_eq!(step.name(), "terraform_datasource(aws_instance)");

        let result = step.resolve(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.data, serde_json::json!({"id": "i-12345"}));
        assert_eq!(result.meta["terraform_provider"], "hashicorp/aws");
    }

    #[tokio::test]
    async fn test_close_stops_provider_and_propagates_errors() {
        let client = Arc::new(FakeClient::default());
        let collector = collector_with(client.clone(), "hashicorp/aws", "");
        collector.close(&CancellationToken::new()).await.unwrap();
        assert_eq!(client.stops.load(Ordering::SeqCst), 1);

        let failing = Arc::new(FakeClient {
            stop_error: Some("failed to stop".to_string()),
            ..Default::default()
        });
        let collector = collector_with(failing, "hashicorp/aws", "");
        assert!(collector.close(&CancellationToken::new()).await.is_err());
    }
}
