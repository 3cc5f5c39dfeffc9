//! Kind registry mapping collector and step kind strings to factories.
//!
//! Built-in kinds are dispatched by exhaustive match in
//! [`crate::builder`]; the registry exists for programmatically registered
//! extension kinds and mirrors the built-ins so their factories stay usable
//! through the same surface. The `serde_json::Value` → typed-spec cast and
//! the `dyn Collector` → concrete-collector downcast happen once each, inside
//! the typed adapter helpers, so every mismatch produces a uniform error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;

use crate::collectors::terraform::ProviderClient;
use crate::core::{Collector, Step};

/// Construction context handed to every factory.
#[derive(Clone, Default)]
pub struct BuildContext {
    /// Client used to acquire Terraform provider plugins. The RPC transport
    /// is an external collaborator; jobs that declare terraform collectors
    /// fail to build when no client is configured.
    pub terraform_client: Option<Arc<dyn ProviderClient>>,
}

impl BuildContext {
    pub fn with_terraform_client(client: Arc<dyn ProviderClient>) -> Self {
        Self {
            terraform_client: Some(client),
        }
    }
}

pub type CollectorFactory =
    Box<dyn Fn(&BuildContext, serde_json::Value) -> Result<Arc<dyn Collector>> + Send + Sync>;

pub type StepFactory = Box<
    dyn Fn(
            &BuildContext,
            &str,
            Option<Arc<dyn Collector>>,
            serde_json::Value,
        ) -> Result<Box<dyn Step>>
        + Send
        + Sync,
>;

/// Wraps a typed collector factory into a generic [`CollectorFactory`],
/// centralizing the payload deserialization.
pub fn collector_factory<S, F>(kind: &'static str, f: F) -> CollectorFactory
where
    S: DeserializeOwned,
    F: Fn(&BuildContext, S) -> Result<Arc<dyn Collector>> + Send + Sync + 'static,
{
    Box::new(move |ctx, payload| {
        let spec: S = serde_json::from_value(payload)
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("invalid collector spec for kind \"{kind}\""))?;
        f(ctx, spec)
    })
}

/// Wraps a typed step factory into a generic [`StepFactory`], centralizing
/// both the payload deserialization and the collector downcast.
pub fn step_factory<C, S, F>(kind: &'static str, f: F) -> StepFactory
where
    C: Collector + 'static,
    S: DeserializeOwned,
    F: Fn(&BuildContext, &str, Arc<C>, S) -> Result<Box<dyn Step>> + Send + Sync + 'static,
{
    Box::new(move |ctx, id, collector, payload| {
        let collector =
            collector.ok_or_else(|| anyhow!("step kind \"{kind}\" requires a collector"))?;
        let collector_name = collector.name();
        let typed = collector.as_any_arc().downcast::<C>().map_err(|_| {
            anyhow!(
                "invalid collector type for step kind \"{kind}\" with id \"{id}\": got {collector_name}"
            )
        })?;
        let spec: S = serde_json::from_value(payload)
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("invalid step spec for kind \"{kind}\" with id \"{id}\""))?;
        f(ctx, id, typed, spec)
    })
}

/// Wraps a typed step factory for standalone kinds that do not consume a
/// collector.
pub fn standalone_step_factory<S, F>(kind: &'static str, f: F) -> StepFactory
where
    S: DeserializeOwned,
    F: Fn(&BuildContext, &str, S) -> Result<Box<dyn Step>> + Send + Sync + 'static,
{
    Box::new(move |ctx, id, _collector, payload| {
        let spec: S = serde_json::from_value(payload)
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("invalid step spec for kind \"{kind}\" with id \"{id}\""))?;
        f(ctx, id, spec)
    })
}

/// Returned when a collector or step kind has no registered factory.
#[derive(Debug, Clone)]
pub struct UnsupportedType {
    pub category: &'static str,
    pub kind: String,
    /// Registered kinds, sorted.
    pub available: Vec<String>,
}

impl fmt::Display for UnsupportedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.available.is_empty() {
            write!(
                f,
                "unsupported {} type \"{}\": no {}s registered",
                self.category, self.kind, self.category
            )
        } else {
            write!(
                f,
                "unsupported {} type \"{}\" (available: {})",
                self.category,
                self.kind,
                self.available.join(", ")
            )
        }
    }
}

impl std::error::Error for UnsupportedType {}

/// Concurrency-safe registry with separate collector and step namespaces.
/// Read-mostly: lookups take a read lock, registration a write lock.
#[derive(Default)]
pub struct Registry {
    collectors: RwLock<HashMap<String, CollectorFactory>>,
    steps: RwLock<HashMap<String, StepFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in collector and step kind registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::collectors::http::register(&registry);
        crate::collectors::terraform::register(&registry);
        crate::steps::register(&registry);
        registry
    }

    pub fn register_collector(&self, kind: impl Into<String>, factory: CollectorFactory) {
        self.collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.into(), factory);
    }

    pub fn register_step(&self, kind: impl Into<String>, factory: StepFactory) {
        self.steps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.into(), factory);
    }

    /// # Errors
    ///
    /// Returns [`UnsupportedType`] when the kind is unknown, or the factory's
    /// error when construction fails.
    pub fn create_collector(
        &self,
        ctx: &BuildContext,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Arc<dyn Collector>> {
        let collectors = self
            .collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(factory) = collectors.get(kind) else {
            return Err(UnsupportedType {
                category: "collector",
                kind: kind.to_string(),
                available: sorted_keys(&collectors),
            }
            .into());
        };
        factory(ctx, payload)
    }

    /// # Errors
    ///
    /// Returns [`UnsupportedType`] when the kind is unknown, or the factory's
    /// error when construction fails.
    pub fn create_step(
        &self,
        ctx: &BuildContext,
        kind: &str,
        id: &str,
        collector: Option<Arc<dyn Collector>>,
        payload: serde_json::Value,
    ) -> Result<Box<dyn Step>> {
        let steps = self.steps.read().unwrap_or_else(PoisonError::into_inner);
        let Some(factory) = steps.get(kind) else {
            return Err(UnsupportedType {
                category: "step",
                kind: kind.to_string(),
                available: sorted_keys(&steps),
            }
            .into());
        };
        factory(ctx, id, collector, payload)
    }

    pub fn available_collectors(&self) -> Vec<String> {
        sorted_keys(
            &self
                .collectors
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn available_steps(&self) -> Vec<String> {
        sorted_keys(&self.steps.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::any::Any;
    use tokio_util::sync::CancellationToken;

    use quarry_types::StepResult;

    #[derive(Deserialize)]
    struct WidgetSpec {
        factor: u32,
    }

    struct WidgetStep {
        id: String,
        factor: u32,
    }

    #[async_trait]
    impl Step for WidgetStep {
        fn name(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> &'static str {
            "widget"
        }

        async fn resolve(&self, _cancel: &CancellationToken) -> Result<StepResult> {
            Ok(StepResult::new(serde_json::json!({ "factor": self.factor })))
        }
    }

    struct NopCollector;

    #[async_trait]
    impl Collector for NopCollector {
        fn name(&self) -> String {
            "nop".to_string()
        }

        fn kind(&self) -> &'static str {
            "nop"
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

    fn widget_registry() -> Registry {
        let registry = Registry::new();
        registry.register_step(
            "widget",
            standalone_step_factory("widget", |_ctx, id, spec: WidgetSpec| {
                Ok(Box::new(WidgetStep {
                    id: id.to_string(),
                    factor: spec.factor,
                }) as Box<dyn Step>)
            }),
        );
        registry
    }

    #[tokio::test]
    async fn test_create_registered_step() {
        let registry = widget_registry();
        let step = registry
            .create_step(
                &BuildContext::default(),
                "widget",
                "w1",
                None,
                serde_json::json!({"factor": 3}),
            )
            .unwrap();
        let result = step.resolve(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.data, serde_json::json!({"factor": 3}));
    }

    #[test]
    fn test_unknown_kind_lists_sorted_available() {
        let registry = widget_registry();
        registry.register_step(
            "alpha",
            standalone_step_factory("alpha", |_ctx, id, spec: WidgetSpec| {
                Ok(Box::new(WidgetStep {
                    id: id.to_string(),
                    factor: spec.factor,
                }) as Box<dyn Step>)
            }),
        );

        let err = registry
            .create_step(
                &BuildContext::default(),
                "missing",
                "s1",
                None,
                serde_json::Value::Null,
            )
            .unwrap_err();
        let unsupported = err.downcast_ref::<UnsupportedType>().unwrap();
        assert_eq!(unsupported.category, "step");
        assert_eq!(unsupported.available, vec!["alpha", "widget"]);
        assert!(err.to_string().contains("unsupported step type \"missing\""));
    }

    #[test]
    fn test_unknown_kind_with_empty_registry() {
        let registry = Registry::new();
        let err = registry
            .create_collector(&BuildContext::default(), "http", serde_json::Value::Null)
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("unsupported collector type \"http\": no collectors registered"));
    }

    #[test]
    fn test_invalid_payload_reports_kind() {
        let registry = widget_registry();
        let err = registry
            .create_step(
                &BuildContext::default(),
                "widget",
                "w1",
                None,
                serde_json::json!({"factor": "not-a-number"}),
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("invalid step spec for kind \"widget\""));
    }

    #[test]
    fn test_step_factory_requires_collector() {
        #[derive(Deserialize)]
        struct EmptySpec {}

        let factory = step_factory::<NopCollector, EmptySpec, _>(
            "typed",
            |_ctx, _id, _collector, _spec| -> Result<Box<dyn Step>> {
                unreachable!("factory body not reached in this test")
            },
        );

        let err = factory(&BuildContext::default(), "s1", None, serde_json::json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("requires a collector"));
    }

    #[test]
    fn test_builtin_registry_kinds() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.available_collectors(), vec!["http", "terraform"]);
        assert_eq!(
            registry.available_steps(),
            vec!["exec", "http_get", "static", "terraform_datasource"]
        );
    }
}
