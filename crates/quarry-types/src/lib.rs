//! Job document model, parsing, and validation for the quarry collection engine.

pub mod job;
pub mod parse;
pub mod result;
pub mod validate;

pub use job::{
    ArchiveSpec, CollectJob, CollectJobSpec, CollectorSpec, CustomSpec, EncodingSpec,
    ExecStepSpec, FilesystemSinkSpec, HttpAuthSpec, HttpBasicAuthSpec, HttpCollectorSpec,
    HttpGetStepSpec, JsonEncodingSpec, Metadata, OutputSpec, ResolvedCollectorSpec,
    ResolvedStepSpec, S3CredentialsSpec, S3SinkSpec, SinkSpec, StaticStepSpec, StdoutSinkSpec,
    StepSpec, TerraformCollectorSpec, TerraformDataSourceStepSpec, COLLECT_JOB_KIND,
};
pub use parse::parse_collect_job;
pub use result::StepResult;
pub use validate::{validate, ValidationError, Violation};
