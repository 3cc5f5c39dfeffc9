//! Versioned collection job document model.
//!
//! A job document enumerates data-source collectors and ordered collection
//! steps, plus an optional output section (encoding, archive, sink). Documents
//! are strict: unknown fields are rejected at parse time. Polymorphic choices
//! (collector kind, step kind, sink kind) are modeled as one optional field
//! per kind with an exactly-one rule enforced by [`crate::validate`].

use std::collections::BTreeMap;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Document kind discriminator. `kind` must equal this value.
pub const COLLECT_JOB_KIND: &str = "CollectJob";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectJob {
    pub kind: String,
    pub metadata: Metadata,
    pub spec: CollectJobSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectJobSpec {
    #[serde(default)]
    pub collectors: Vec<CollectorSpec>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
}

/// A declared collector: a unique id plus exactly one kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCollectorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform: Option<TerraformCollectorSpec>,
    /// Programmatic extension point. Never populated from a document; the
    /// document schema is closed and unknown keys are rejected.
    #[serde(skip)]
    pub custom: Option<CustomSpec>,
}

/// Kind string plus an untyped payload for programmatically registered kinds.
#[derive(Debug, Clone)]
pub struct CustomSpec {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// The single non-null variant of a [`CollectorSpec`].
#[derive(Debug)]
pub enum ResolvedCollectorSpec<'a> {
    Http(&'a HttpCollectorSpec),
    Terraform(&'a TerraformCollectorSpec),
    Custom(&'a CustomSpec),
}

impl CollectorSpec {
    /// Picks the single non-null kind variant. Failing to pick exactly one is
    /// an error.
    pub fn resolved(&self) -> anyhow::Result<ResolvedCollectorSpec<'_>> {
        let mut found = Vec::with_capacity(1);
        if let Some(http) = &self.http {
            found.push(ResolvedCollectorSpec::Http(http));
        }
        if let Some(terraform) = &self.terraform {
            found.push(ResolvedCollectorSpec::Terraform(terraform));
        }
        if let Some(custom) = &self.custom {
            found.push(ResolvedCollectorSpec::Custom(custom));
        }
        match found.len() {
            0 => bail!("collector \"{}\" has no type specified", self.id),
            1 => Ok(found.remove(0)),
            _ => bail!("collector \"{}\" has more than one type specified", self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpCollectorSpec {
    /// Base URL for all requests, such as `https://api.example.com`.
    pub base_url: String,
    /// Headers to include in every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuthSpec>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpAuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<HttpBasicAuthSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpBasicAuthSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Pre-encoded base64 credentials. Takes precedence over username/password.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraformCollectorSpec {
    /// Provider source address, e.g. `hashicorp/aws`.
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Provider configuration arguments.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// A declared step: a unique id, an optional collector reference, and exactly
/// one kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub id: String,
    /// Reference to a declared collector. Required for kinds that consume a
    /// collector, forbidden for standalone kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<String>,
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticStepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecStepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetStepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_datasource: Option<TerraformDataSourceStepSpec>,
    /// Programmatic extension point; never populated from a document.
    #[serde(skip)]
    pub custom: Option<CustomSpec>,
}

/// The single non-null variant of a [`StepSpec`].
#[derive(Debug)]
pub enum ResolvedStepSpec<'a> {
    Static(&'a StaticStepSpec),
    Exec(&'a ExecStepSpec),
    HttpGet(&'a HttpGetStepSpec),
    TerraformDataSource(&'a TerraformDataSourceStepSpec),
    Custom(&'a CustomSpec),
}

impl StepSpec {
    /// Picks the single non-null kind variant. Failing to pick exactly one is
    /// an error.
    pub fn resolved(&self) -> anyhow::Result<ResolvedStepSpec<'_>> {
        let mut found = Vec::with_capacity(1);
        if let Some(static_) = &self.static_ {
            found.push(ResolvedStepSpec::Static(static_));
        }
        if let Some(exec) = &self.exec {
            found.push(ResolvedStepSpec::Exec(exec));
        }
        if let Some(http_get) = &self.http_get {
            found.push(ResolvedStepSpec::HttpGet(http_get));
        }
        if let Some(tf) = &self.terraform_datasource {
            found.push(ResolvedStepSpec::TerraformDataSource(tf));
        }
        if let Some(custom) = &self.custom {
            found.push(ResolvedStepSpec::Custom(custom));
        }
        match found.len() {
            0 => bail!("step \"{}\" has no type specified", self.id),
            1 => Ok(found.remove(0)),
            _ => bail!("step \"{}\" has more than one type specified", self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticStepSpec {
    /// Relative path to a local file, confined to the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    /// Inline value. Mutually exclusive with `filepath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Format to parse the content as: `json` or `raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_as: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecStepSpec {
    /// Program argv. The first element is resolved via PATH unless absolute.
    pub program: Vec<String>,
    /// JSON value serialized and fed to the child's standard input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Working directory, absolute or resolved against the process cwd.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Timeout in duration syntax, e.g. `30s` or `100ms`. Default 30s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Output format: `json` (default) or `raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Environment additions appended to the parent environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpGetStepSpec {
    /// Request path, resolved against the collector's base URL.
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Query parameters appended to the request URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Format to parse the response as: `json` (default) or `raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraformDataSourceStepSpec {
    /// Name of the provider data source to read.
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Output configuration: how results are encoded, bundled, and written.
///
/// Defaults: compact JSON encoding, no archive, stdout sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<EncodingSpec>,
    /// When set, all step results are bundled into a single archive before
    /// being written to the sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonEncodingSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonEncodingSpec {
    /// Indentation string. Empty = compact, `"  "` = 2 spaces, `"\t"` = tabs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub indent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSpec {
    /// Archive format. Currently only `tar` is supported.
    pub format: String,
    /// Compression algorithm: `gzip` (default), `zstd`, or `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// Archive base name. Supports template variables; the file extension is
    /// appended automatically. Default: `$JOB_NAME`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StdoutSinkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemSinkSpec>,
    /// S3-compatible object storage (AWS S3, Cloudflare R2, MinIO).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3SinkSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdoutSinkSpec {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemSinkSpec {
    /// Directory to write files to. Default: current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Prefix prepended to filenames. Supports template variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3SinkSpec {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible services (R2, MinIO).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Prefix prepended to object keys. Supports template variables;
    /// `$JOB_DATE_ISO8601` is recommended over RFC 3339, which contains
    /// colons that require URL encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Explicit credentials. When absent the SDK credential chain is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<S3CredentialsSpec>,
    /// Force path-style addressing (required for MinIO and some
    /// S3-compatible services).
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3CredentialsSpec {
    pub access_key_id: String,
    pub secret_access_key: String,
}
