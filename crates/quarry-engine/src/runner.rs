//! Top-level orchestrator: compile a job, build the pipeline and output
//! stack, run, and write results.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use quarry_types::{validate, CollectJob, StepResult};

use crate::builder::{build_encoder, build_sink, create_pipeline};
use crate::encoders::Encoder;
use crate::pipeline::Pipeline;
use crate::registry::{BuildContext, Registry};
use crate::sinks::Sink;
use crate::template::{build_variables, expand_job, Variables};

/// A job after the two compilation phases: structural validation, then
/// variable resolution plus template expansion. `date` is the single UTC
/// snapshot shared by the variable map and the pipeline.
#[derive(Debug)]
pub struct CompiledJob {
    pub job: CollectJob,
    pub date: DateTime<Utc>,
    pub variables: Variables,
}

/// Validates the job, builds the variable map from the allow-list, and
/// expands every template reference in place.
///
/// # Errors
///
/// Returns aggregated validation violations, aggregated missing environment
/// variables, or aggregated unresolved template references.
pub fn compile_job(mut job: CollectJob, allowed_env: &[String]) -> Result<CompiledJob> {
    validate(&job)?;

    let date = Utc::now();
    let variables = build_variables(&job.metadata.name, date, allowed_env)
        .context("failed to build variables")?;
    expand_job(&mut job, &variables).context("failed to expand templates")?;

    Ok(CompiledJob {
        job,
        date,
        variables,
    })
}

/// Owns the pipeline, encoder, and sink for one job execution.
#[derive(Debug)]
pub struct Runner {
    pipeline: Pipeline,
    encoder: Box<dyn Encoder>,
    sink: Box<dyn Sink>,
}

impl Runner {
    /// Builds the runner from a compiled job.
    ///
    /// # Errors
    ///
    /// Fails when the pipeline, encoder, or sink cannot be constructed.
    pub async fn new(
        compiled: &CompiledJob,
        registry: &Registry,
        ctx: &BuildContext,
    ) -> Result<Self> {
        tracing::info!(job_name = %compiled.job.metadata.name, "creating runner");

        let pipeline = create_pipeline(&compiled.job, compiled.date, registry, ctx)
            .context("failed to create pipeline")?;
        let encoder = build_encoder(&compiled.job).context("failed to build encoder")?;
        let sink = build_sink(&compiled.job).await.context("failed to build sink")?;

        Ok(Self::from_parts(pipeline, encoder, sink))
    }

    /// Assembles a runner from already-constructed parts. Useful for library
    /// callers and tests that substitute sinks or encoders.
    pub fn from_parts(pipeline: Pipeline, encoder: Box<dyn Encoder>, sink: Box<dyn Sink>) -> Self {
        Self {
            pipeline,
            encoder,
            sink,
        }
    }

    /// Starts every collector, runs the pipeline, writes the results, and
    /// closes the sink. Every collector's `close` is attempted afterwards
    /// under a fresh, uncancelled token regardless of the run outcome;
    /// close failures are logged, not propagated.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let outcome = self.run_inner(cancel).await;

        let cleanup = CancellationToken::new();
        for (id, collector) in self.pipeline.collectors() {
            if let Err(err) = collector.close(&cleanup).await {
                tracing::error!(
                    collector_id = %id,
                    collector = %collector.name(),
                    error = %format!("{err:#}"),
                    "failed to close collector"
                );
            }
        }

        outcome
    }

    async fn run_inner(&mut self, cancel: &CancellationToken) -> Result<()> {
        for (id, collector) in self.pipeline.collectors() {
            collector.start(cancel).await.with_context(|| {
                format!("failed to start collector \"{id}\" ({})", collector.name())
            })?;
        }

        let results = self
            .pipeline
            .run(cancel)
            .await
            .context("failed to run pipeline")?;

        self.write_results(cancel, results).await
    }

    /// Encodes and writes each result in declaration order, then closes the
    /// sink.
    async fn write_results(
        &mut self,
        cancel: &CancellationToken,
        results: IndexMap<String, StepResult>,
    ) -> Result<()> {
        for (step_id, result) in results {
            let encoded = self
                .encoder
                .encode_result(cancel, &result)
                .with_context(|| format!("failed to encode result for step \"{step_id}\""))?;

            let filename = format!("{step_id}.{}", self.encoder.file_extension());
            self.sink
                .write(cancel, &filename, encoded.into())
                .await
                .with_context(|| format!("failed to write result for step \"{step_id}\""))?;
        }

        self.sink
            .close(cancel)
            .await
            .context("failed to close sink")
    }
}
