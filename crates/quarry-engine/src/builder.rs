//! Construction of the pipeline and output stack from a compiled job.
//!
//! Built-in collector and step kinds are dispatched by exhaustive match on
//! the resolved spec variants; `Custom` variants go through the registry.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};

use quarry_types::{CollectJob, ResolvedCollectorSpec, ResolvedStepSpec, StepSpec};

use crate::archivers::TarArchiver;
use crate::collectors::http::{GetStep, GetStepConfig, HttpCollector, HttpCollectorConfig};
use crate::collectors::terraform::{
    DataSourceStep, TerraformCollector, TerraformCollectorConfig,
};
use crate::core::{Collector, Step};
use crate::encoders::{Encoder, JsonEncoder};
use crate::pipeline::Pipeline;
use crate::registry::{BuildContext, Registry};
use crate::sinks::{ArchiveSink, FilesystemSink, S3Config, S3Sink, Sink, StreamSink};
use crate::steps::{ExecStep, ExecStepConfig, StaticStep, StaticStepConfig};

/// Builds the pipeline: one collector instance per declared collector, one
/// step per declared step, each wired to its referenced collector.
///
/// # Errors
///
/// Fails on unresolved or mismatched collector references, on construction
/// failures of individual collectors/steps, and on duplicate ids.
pub fn create_pipeline(
    job: &CollectJob,
    date: DateTime<Utc>,
    registry: &Registry,
    ctx: &BuildContext,
) -> Result<Pipeline> {
    tracing::info!(job_name = %job.metadata.name, "creating pipeline");
    let mut pipeline = Pipeline::new(&job.metadata.name, date);

    for spec in &job.spec.collectors {
        let collector: Arc<dyn Collector> = match spec.resolved()? {
            ResolvedCollectorSpec::Http(http) => {
                let collector = HttpCollector::new(HttpCollectorConfig::from_spec(http))
                    .context("failed to build http collector")?;
                Arc::new(collector)
            }
            ResolvedCollectorSpec::Terraform(terraform) => {
                let client = ctx
                    .terraform_client
                    .clone()
                    .ok_or_else(|| anyhow!("terraform provider client is not configured"))?;
                let collector = TerraformCollector::new(
                    client,
                    TerraformCollectorConfig::from_spec(terraform),
                )
                .context("failed to build terraform collector")?;
                Arc::new(collector)
            }
            ResolvedCollectorSpec::Custom(custom) => registry
                .create_collector(ctx, &custom.kind, custom.payload.clone())
                .with_context(|| format!("failed to build collector \"{}\"", spec.id))?,
        };

        tracing::info!(collector_id = %spec.id, collector = %collector.name(), "created collector");
        pipeline.add_collector(&spec.id, collector)?;
    }

    for spec in &job.spec.steps {
        let step: Box<dyn Step> = match spec.resolved()? {
            ResolvedStepSpec::Static(static_) => Box::new(
                StaticStep::new(&spec.id, StaticStepConfig::from_spec(static_))
                    .with_context(|| format!("failed to build static step \"{}\"", spec.id))?,
            ),
            ResolvedStepSpec::Exec(exec) => Box::new(
                ExecStep::new(&spec.id, ExecStepConfig::from_spec(exec))
                    .with_context(|| format!("failed to build exec step \"{}\"", spec.id))?,
            ),
            ResolvedStepSpec::HttpGet(http_get) => {
                let collector = referenced_collector(&pipeline, spec)?;
                let http = collector.as_any_arc().downcast::<HttpCollector>().map_err(|_| {
                    anyhow!(
                        "step \"{}\" has invalid collector reference: collector \"{}\" is not an http collector",
                        spec.id,
                        spec.collector.as_deref().unwrap_or_default()
                    )
                })?;
                Box::new(GetStep::new(http, GetStepConfig::from_spec(http_get))?)
            }
            ResolvedStepSpec::TerraformDataSource(datasource) => {
                let collector = referenced_collector(&pipeline, spec)?;
                let terraform = collector
                    .as_any_arc()
                    .downcast::<TerraformCollector>()
                    .map_err(|_| {
                        anyhow!(
                            "step \"{}\" has invalid collector reference: collector \"{}\" is not a terraform collector",
                            spec.id,
                            spec.collector.as_deref().unwrap_or_default()
                        )
                    })?;
                Box::new(DataSourceStep::new(
                    terraform,
                    datasource.name.clone(),
                    datasource.args.clone(),
                ))
            }
            ResolvedStepSpec::Custom(custom) => {
                let collector = match &spec.collector {
                    Some(id) => Some(pipeline.get_collector(id).ok_or_else(|| {
                        anyhow!(
                            "step \"{}\" has invalid collector reference: collector \"{id}\" not found",
                            spec.id
                        )
                    })?),
                    None => None,
                };
                registry
                    .create_step(ctx, &custom.kind, &spec.id, collector, custom.payload.clone())
                    .with_context(|| format!("failed to build step \"{}\"", spec.id))?
            }
        };

        tracing::info!(step_id = %spec.id, step = %step.name(), "created step");
        pipeline.add_step(&spec.id, step)?;
    }

    Ok(pipeline)
}

fn referenced_collector(
    pipeline: &Pipeline,
    step: &StepSpec,
) -> Result<Arc<dyn Collector>> {
    let collector_id = step
        .collector
        .as_deref()
        .ok_or_else(|| anyhow!("step \"{}\" has no collector reference", step.id))?;
    pipeline.get_collector(collector_id).ok_or_else(|| {
        anyhow!(
            "step \"{}\" has invalid collector reference: collector \"{collector_id}\" not found",
            step.id
        )
    })
}

/// Builds the encoder from the output spec. Defaults to compact JSON.
pub fn build_encoder(job: &CollectJob) -> Result<Box<dyn Encoder>> {
    let Some(encoding) = job.spec.output.as_ref().and_then(|o| o.encoding.as_ref()) else {
        return Ok(Box::new(JsonEncoder::new("")));
    };

    if let Some(json) = &encoding.json {
        return Ok(Box::new(JsonEncoder::new(json.indent.clone())));
    }

    bail!("unknown encoding type");
}

/// Builds the sink from the output spec and wraps it with the archive
/// adapter when an archive is configured.
///
/// Defaults: stdout sink; filesystem base path defaults to the process
/// working directory; the archive base name defaults to `metadata.name`.
pub async fn build_sink(job: &CollectJob) -> Result<Box<dyn Sink>> {
    let sink = build_inner_sink(job).await?;

    let Some(archive) = job.spec.output.as_ref().and_then(|o| o.archive.as_ref()) else {
        return Ok(sink);
    };

    let archiver = TarArchiver::new(archive.compression.as_deref().unwrap_or("gzip"))
        .context("failed to create tar archiver")?;
    let name = archive
        .name
        .clone()
        .unwrap_or_else(|| job.metadata.name.clone());

    Ok(Box::new(ArchiveSink::new(sink, Box::new(archiver), name)))
}

async fn build_inner_sink(job: &CollectJob) -> Result<Box<dyn Sink>> {
    let output = job.spec.output.as_ref();
    let sink_spec = output.and_then(|o| o.sink.as_ref());
    let has_archive = output.map_or(false, |o| o.archive.is_some());

    // Stdout is the default, and the explicit stdout variant behaves the
    // same. An archive needs a sink that can take the single final payload
    // under a real name, so the stream sink is rejected outright.
    let Some(sink_spec) = sink_spec else {
        if has_archive {
            bail!("stdout sink cannot be used with archive configuration");
        }
        return Ok(Box::new(StreamSink::stdout()));
    };
    if sink_spec.stdout.is_some() {
        if has_archive {
            bail!("stdout sink cannot be used with archive configuration");
        }
        return Ok(Box::new(StreamSink::stdout()));
    }

    if let Some(filesystem) = &sink_spec.filesystem {
        let base = match &filesystem.path {
            Some(path) if !path.is_empty() => std::path::PathBuf::from(path),
            _ => std::env::current_dir().context("failed to get working directory")?,
        };
        let base = match &filesystem.prefix {
            Some(prefix) if !prefix.is_empty() => base.join(prefix),
            _ => base,
        };
        let sink = FilesystemSink::new(base).await?;
        return Ok(Box::new(sink));
    }

    if let Some(s3) = &sink_spec.s3 {
        let mut cfg = S3Config {
            bucket: s3.bucket.clone(),
            region: s3.region.clone().unwrap_or_default(),
            endpoint: s3.endpoint.clone().unwrap_or_default(),
            prefix: s3.prefix.clone().unwrap_or_default(),
            force_path_style: s3.force_path_style,
            ..Default::default()
        };
        if let Some(credentials) = &s3.credentials {
            cfg.access_key_id = credentials.access_key_id.clone();
            cfg.secret_access_key = credentials.secret_access_key.clone();
        }
        let sink = S3Sink::new(cfg).await?;
        return Ok(Box::new(sink));
    }

    bail!("invalid sink configuration: no sink type specified");
}
