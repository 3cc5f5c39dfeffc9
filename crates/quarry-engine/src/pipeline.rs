//! Ordered container of collectors and steps.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use quarry_types::StepResult;

use crate::core::{Collector, Step};
use crate::errors::Interrupted;

/// A step with its pipeline id, kept in declaration order.
#[derive(Debug)]
pub struct StepEntry {
    pub id: String,
    pub step: Box<dyn Step>,
}

/// Insertion-ordered pipeline. Collector lifecycle (start/close) is driven by
/// the [`crate::runner::Runner`] one level up, so that cleanup can use a
/// fresh, uncancelled token.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    date: DateTime<Utc>,
    collectors: IndexMap<String, Arc<dyn Collector>>,
    steps: Vec<StepEntry>,
}

impl Pipeline {
    /// `date` is the single UTC snapshot captured at job start; it is shared
    /// with the template variable map.
    pub fn new(name: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            date,
            collectors: IndexMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// # Errors
    ///
    /// Returns an error if a collector with the same id was already added.
    pub fn add_collector(&mut self, id: impl Into<String>, collector: Arc<dyn Collector>) -> Result<()> {
        let id = id.into();
        if self.collectors.contains_key(&id) {
            bail!("collector \"{id}\" already exists");
        }
        self.collectors.insert(id, collector);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if a step with the same id was already added.
    pub fn add_step(&mut self, id: impl Into<String>, step: Box<dyn Step>) -> Result<()> {
        let id = id.into();
        if self.steps.iter().any(|entry| entry.id == id) {
            bail!("step \"{id}\" already exists");
        }
        self.steps.push(StepEntry { id, step });
        Ok(())
    }

    pub fn get_collector(&self, id: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(id).cloned()
    }

    pub fn collectors(&self) -> impl Iterator<Item = (&str, &Arc<dyn Collector>)> {
        self.collectors.iter().map(|(id, c)| (id.as_str(), c))
    }

    pub fn steps(&self) -> &[StepEntry] {
        &self.steps
    }

    /// Resolves every step strictly sequentially, in declaration order.
    /// Cancellation is checked before each step. Each result's `id` field is
    /// overwritten with the step's pipeline id before it is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error on cancellation or on the first step failure; steps
    /// after the failing one are not resolved.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<IndexMap<String, StepResult>> {
        let mut results = IndexMap::with_capacity(self.steps.len());

        for entry in &self.steps {
            if cancel.is_cancelled() {
                return Err(anyhow::Error::new(Interrupted::Cancelled)
                    .context(format!("cancelled while running step \"{}\"", entry.id)));
            }

            tracing::debug!(step_id = %entry.id, step = %entry.step.name(), "resolving step");
            let mut result = entry
                .step
                .resolve(cancel)
                .await
                .with_context(|| format!("failed to resolve step \"{}\"", entry.id))?;

            result.id = entry.id.clone();
            results.insert(entry.id.clone(), result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::any::Any;

    struct FixedStep {
        data: serde_json::Value,
    }

    #[async_trait]
    impl Step for FixedStep {
        fn name(&self) -> String {
            "fixed".to_string()
        }

        fn kind(&self) -> &'static str {
            "fixed"
        }

        async fn resolve(&self, _cancel: &CancellationToken) -> Result<StepResult> {
            Ok(StepResult::new(self.data.clone()))
        }
    }

    struct FailingStep;

    #[async_trait]
    impl Step for FailingStep {
        fn name(&self) -> String {
            "failing".to_string()
        }

        fn kind(&self) -> &'static str {
            "failing"
        }

        async fn resolve(&self, _cancel: &CancellationToken) -> Result<StepResult> {
            bail!("boom")
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

    fn pipeline() -> Pipeline {
        Pipeline::new("test", Utc::now())
    }

    #[test]
    fn test_add_collector_duplicate_id_errors() {
        let mut p = pipeline();
        p.add_collector("c1", Arc::new(NopCollector)).unwrap();
        let err = p.add_collector("c1", Arc::new(NopCollector)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_add_step_duplicate_id_errors() {
        let mut p = pipeline();
        p.add_step("s1", Box::new(FixedStep { data: serde_json::json!(1) }))
            .unwrap();
        let err = p
            .add_step("s1", Box::new(FixedStep { data: serde_json::json!(2) }))
            .unwrap_err();
        assert!(err.to_string().contains("step \"s1\" already exists"));
    }

    #[test]
    fn test_get_collector() {
        let mut p = pipeline();
        p.add_collector("c1", Arc::new(NopCollector)).unwrap();
        assert!(p.get_collector("c1").is_some());
        assert!(p.get_collector("missing").is_none());
    }

    #[tokio::test]
    async fn test_run_preserves_declaration_order_and_ids() {
        let mut p = pipeline();
        for id in ["b", "a", "c"] {
            p.add_step(id, Box::new(FixedStep { data: serde_json::json!(id) }))
                .unwrap();
        }

        let results = p.run(&CancellationToken::new()).await.unwrap();
        let ids: Vec<&str> = results.keys().map(String::as_str).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        for (id, result) in &results {
            assert_eq!(&result.id, id);
        }
    }

    #[tokio::test]
    async fn test_run_wraps_step_failure() {
        let mut p = pipeline();
        p.add_step("bad", Box::new(FailingStep)).unwrap();
        let err = p.run(&CancellationToken::new()).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("failed to resolve step \"bad\""));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_checks_cancellation_before_steps() {
        let mut p = pipeline();
        p.add_step("s1", Box::new(FixedStep { data: serde_json::json!(1) }))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p.run(&cancel).await.unwrap_err();
        assert!(format!("{err:#}").contains("cancelled while running step \"s1\""));
        assert_eq!(
            err.downcast_ref::<Interrupted>(),
            Some(&Interrupted::Cancelled)
        );
    }
}
