//! Step that resolves data from a local file or an inline value.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quarry_types::{StaticStepSpec, StepResult};

use crate::core::Step;

pub const STATIC_STEP_KIND: &str = "static";

#[derive(Debug, Clone, Default)]
pub struct StaticStepConfig {
    pub filepath: Option<String>,
    pub value: Option<String>,
    pub parse_as: Option<String>,
}

impl StaticStepConfig {
    pub fn from_spec(spec: &StaticStepSpec) -> Self {
        Self {
            filepath: spec.filepath.clone(),
            value: spec.value.clone(),
            parse_as: spec.parse_as.clone(),
        }
    }
}

// Confines reads to a base directory: absolute paths and any `..` component
// are rejected before the filesystem is touched.
#[derive(Debug)]
struct SandboxDir {
    root: PathBuf,
}

impl SandboxDir {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let path = Path::new(relative);
        if path.is_absolute() {
            bail!("filepath {relative:?} must be relative to the working directory");
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("filepath {relative:?} escapes the working directory"),
            }
        }

        tokio::fs::read(self.root.join(path))
            .await
            .with_context(|| format!("failed to read filepath {relative}"))
    }
}

#[derive(Debug)]
enum Source {
    File { sandbox: SandboxDir, path: String },
    Value(String),
}

/// Resolves either a sandboxed local file or an inline string value.
///
/// Files ending in `.json` are parsed as JSON unless `parse_as: raw` is set;
/// detection is by filename suffix only, there is no magic-byte fallback.
/// Other files resolve to `{ basename: raw_string }`. Inline values parse
/// only with an explicit `parse_as: json` and otherwise resolve to
/// `{ "value": raw_string }`.
#[derive(Debug)]
pub struct StaticStep {
    id: String,
    source: Source,
    parse_as: Option<String>,
}

impl StaticStep {
    /// # Errors
    ///
    /// Returns an error unless exactly one of `filepath` and `value` is set.
    pub fn new(id: impl Into<String>, cfg: StaticStepConfig) -> Result<Self> {
        let source = match (cfg.filepath, cfg.value) {
            (Some(_), Some(_)) => bail!("both filepath and value are set"),
            (None, None) => bail!("neither filepath nor value is set"),
            (Some(path), None) => {
                let root = std::env::current_dir()
                    .context("failed to get working directory")?;
                Source::File {
                    sandbox: SandboxDir::new(root),
                    path,
                }
            }
            (None, Some(value)) => Source::Value(value),
        };

        Ok(Self {
            id: id.into(),
            source,
            parse_as: cfg.parse_as,
        })
    }

    async fn resolve_file(&self, sandbox: &SandboxDir, path: &str) -> Result<serde_json::Value> {
        let data = sandbox.read(path).await?;

        let has_json_extension = path.ends_with(".json");
        let parse_as_json =
            has_json_extension && self.parse_as.as_deref().map_or(true, |p| p == "json");
        if parse_as_json {
            return serde_json::from_slice(&data)
                .with_context(|| format!("failed to parse {path} as json"));
        }

        let basename = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(serde_json::json!({
            basename: String::from_utf8_lossy(&data).into_owned(),
        }))
    }

    fn resolve_value(&self, value: &str) -> Result<serde_json::Value> {
        if self.parse_as.as_deref() == Some("json") {
            return serde_json::from_str(value)
                .with_context(|| format!("failed to parse {value} as json"));
        }
        Ok(serde_json::json!({ "value": value }))
    }
}

#[async_trait]
impl Step for StaticStep {
    fn name(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> &'static str {
        STATIC_STEP_KIND
    }

    async fn resolve(&self, _cancel: &CancellationToken) -> Result<StepResult> {
        let data = match &self.source {
            Source::File { sandbox, path } => self.resolve_file(sandbox, path).await?,
            Source::Value(value) => self.resolve_value(value)?,
        };
        Ok(StepResult::new(data))
    }
}
