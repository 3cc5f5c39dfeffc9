//! Declarative structural validation of job documents.
//!
//! Every rule violation is collected rather than short-circuiting, so a
//! single pass reports everything wrong with a document. Each violation
//! carries the dotted path of the offending field and the name of the rule
//! that failed.

use std::collections::BTreeSet;
use std::fmt;

use crate::job::{CollectJob, StepSpec, COLLECT_JOB_KIND};

const PARSE_FORMATS: &[&str] = &["json", "raw"];
const ARCHIVE_FORMATS: &[&str] = &["tar"];
const ARCHIVE_COMPRESSIONS: &[&str] = &["gzip", "zstd", "none"];

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending field, e.g. `spec.steps[2].static`.
    pub path: String,
    /// Name of the rule that failed, e.g. `required` or `oneof`.
    pub rule: String,
    /// Optional rule parameter, e.g. the allowed values of an enum check.
    pub param: Option<String>,
}

impl Violation {
    fn new(path: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rule: rule.into(),
            param: None,
        }
    }

    fn with_param(
        path: impl Into<String>,
        rule: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            rule: rule.into(),
            param: Some(param.into()),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: failed '{}' validation", self.path, self.rule)?;
        if let Some(param) = &self.param {
            write!(f, " (param: {param})")?;
        }
        Ok(())
    }
}

/// Aggregate of every violation found in a document.
#[derive(Debug, Clone, thiserror::Error)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job document has {} validation error(s):",
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  \u{2022} {violation}")?;
        }
        Ok(())
    }
}

/// Validates a parsed job document against the structural rules of the
/// schema: required fields, mutually-exclusive polymorphic choices,
/// enumerated values, and id uniqueness.
///
/// # Errors
///
/// Returns a [`ValidationError`] listing every violation found.
pub fn validate(job: &CollectJob) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if job.kind != COLLECT_JOB_KIND {
        violations.push(Violation::with_param("kind", "eq", COLLECT_JOB_KIND));
    }
    if job.metadata.name.trim().is_empty() {
        violations.push(Violation::new("metadata.name", "required"));
    }

    validate_collectors(job, &mut violations);
    validate_steps(job, &mut violations);
    validate_output(job, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

fn validate_collectors(job: &CollectJob, violations: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    for (i, collector) in job.spec.collectors.iter().enumerate() {
        let path = format!("spec.collectors[{i}]");

        if collector.id.trim().is_empty() {
            violations.push(Violation::new(format!("{path}.id"), "required"));
        } else if !seen.insert(collector.id.as_str()) {
            violations.push(Violation::with_param(
                format!("{path}.id"),
                "unique",
                &collector.id,
            ));
        }

        let variants = [
            collector.http.is_some(),
            collector.terraform.is_some(),
            collector.custom.is_some(),
        ];
        match variants.iter().filter(|set| **set).count() {
            0 => violations.push(Violation::new(&path, "oneof_required")),
            1 => {}
            _ => violations.push(Violation::new(&path, "mutually_exclusive")),
        }

        if let Some(http) = &collector.http {
            if http.base_url.trim().is_empty() {
                violations.push(Violation::new(format!("{path}.http.base_url"), "required"));
            }
        }
        if let Some(terraform) = &collector.terraform {
            if terraform.provider.trim().is_empty() {
                violations.push(Violation::new(
                    format!("{path}.terraform.provider"),
                    "required",
                ));
            }
        }
    }
}

fn validate_steps(job: &CollectJob, violations: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    for (i, step) in job.spec.steps.iter().enumerate() {
        let path = format!("spec.steps[{i}]");

        if step.id.trim().is_empty() {
            violations.push(Violation::new(format!("{path}.id"), "required"));
        } else if !seen.insert(step.id.as_str()) {
            violations.push(Violation::with_param(format!("{path}.id"), "unique", &step.id));
        }

        let variants = [
            step.static_.is_some(),
            step.exec.is_some(),
            step.http_get.is_some(),
            step.terraform_datasource.is_some(),
            step.custom.is_some(),
        ];
        match variants.iter().filter(|set| **set).count() {
            0 => violations.push(Violation::new(&path, "oneof_required")),
            1 => {}
            _ => violations.push(Violation::new(&path, "mutually_exclusive")),
        }

        validate_collector_ref(step, &path, violations);

        if let Some(static_) = &step.static_ {
            match (&static_.filepath, &static_.value) {
                (None, None) => violations.push(Violation::with_param(
                    format!("{path}.static"),
                    "required_without",
                    "filepath value",
                )),
                (Some(_), Some(_)) => violations.push(Violation::with_param(
                    format!("{path}.static"),
                    "excluded_with",
                    "filepath value",
                )),
                _ => {}
            }
            check_enum(
                static_.parse_as.as_deref(),
                PARSE_FORMATS,
                format!("{path}.static.parse_as"),
                violations,
            );
        }

        if let Some(exec) = &step.exec {
            if exec.program.is_empty() {
                violations.push(Violation::new(format!("{path}.exec.program"), "required"));
            }
            check_enum(
                exec.format.as_deref(),
                PARSE_FORMATS,
                format!("{path}.exec.format"),
                violations,
            );
        }

        if let Some(http_get) = &step.http_get {
            if http_get.path.trim().is_empty() {
                violations.push(Violation::new(format!("{path}.http_get.path"), "required"));
            }
            check_enum(
                http_get.response_type.as_deref(),
                PARSE_FORMATS,
                format!("{path}.http_get.response_type"),
                violations,
            );
        }

        if let Some(tf) = &step.terraform_datasource {
            if tf.name.trim().is_empty() {
                violations.push(Violation::new(
                    format!("{path}.terraform_datasource.name"),
                    "required",
                ));
            }
        }
    }
}

// A collector reference is required for step kinds that consume a collector
// and forbidden for standalone kinds. Whether the referenced collector exists
// and has a compatible kind is checked at pipeline-build time.
fn validate_collector_ref(step: &StepSpec, path: &str, violations: &mut Vec<Violation>) {
    let consumes_collector = step.http_get.is_some() || step.terraform_datasource.is_some();
    let standalone = step.static_.is_some() || step.exec.is_some();

    if consumes_collector && step.collector.is_none() {
        violations.push(Violation::with_param(
            format!("{path}.collector"),
            "required_with",
            "http_get terraform_datasource",
        ));
    }
    if standalone && step.collector.is_some() {
        violations.push(Violation::with_param(
            format!("{path}.collector"),
            "excluded_with",
            "static exec",
        ));
    }
}

fn validate_output(job: &CollectJob, violations: &mut Vec<Violation>) {
    let Some(output) = &job.spec.output else {
        return;
    };

    if let Some(archive) = &output.archive {
        if !ARCHIVE_FORMATS.contains(&archive.format.as_str()) {
            violations.push(Violation::with_param(
                "spec.output.archive.format",
                "oneof",
                ARCHIVE_FORMATS.join(" "),
            ));
        }
        check_enum(
            archive.compression.as_deref(),
            ARCHIVE_COMPRESSIONS,
            "spec.output.archive.compression".to_string(),
            violations,
        );
    }

    if let Some(sink) = &output.sink {
        let variants = [
            sink.stdout.is_some(),
            sink.filesystem.is_some(),
            sink.s3.is_some(),
        ];
        if variants.iter().filter(|set| **set).count() > 1 {
            violations.push(Violation::new("spec.output.sink", "mutually_exclusive"));
        }
        if let Some(s3) = &sink.s3 {
            if s3.bucket.trim().is_empty() {
                violations.push(Violation::new("spec.output.sink.s3.bucket", "required"));
            }
        }
    }
}

fn check_enum(
    value: Option<&str>,
    allowed: &[&str],
    path: String,
    violations: &mut Vec<Violation>,
) {
    if let Some(value) = value {
        if !allowed.contains(&value) {
            violations.push(Violation::with_param(path, "oneof", allowed.join(" ")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_collect_job;

    fn valid_yaml() -> &'static str {
        r#"
kind: CollectJob
metadata:
  name: demo
spec:
  collectors:
    - id: api
      http:
        base_url: https://api.example.com
  steps:
    - id: fetch
      collector: api
      http_get:
        path: /v1/data
    - id: greeting
      static:
        value: hi
"#
    }

    #[test]
    fn test_valid_job_passes() {
        let job = parse_collect_job(valid_yaml().as_bytes()).unwrap();
        assert!(validate(&job).is_ok());
    }

    #[test]
    fn test_wrong_kind_fails() {
        let yaml = valid_yaml().replace("CollectJob", "OtherJob");
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err.violations.iter().any(|v| v.path == "kind" && v.rule == "eq"));
    }

    #[test]
    fn test_empty_name_fails() {
        let yaml = valid_yaml().replace("name: demo", "name: \"\"");
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "metadata.name" && v.rule == "required"));
    }

    #[test]
    fn test_violations_aggregate() {
        let yaml = r#"
kind: OtherJob
metadata:
  name: ""
spec:
  steps:
    - id: s1
      static:
        value: a
        filepath: b.json
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err.violations.len() >= 3);
        let message = err.to_string();
        assert!(message.contains("validation error(s):"));
        assert!(message.contains("\u{2022} kind: failed 'eq' validation"));
        assert!(message.contains("spec.steps[0].static: failed 'excluded_with' validation"));
    }

    #[test]
    fn test_duplicate_step_ids_fail() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      static:
        value: a
    - id: s1
      static:
        value: b
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[1].id" && v.rule == "unique"));
    }

    #[test]
    fn test_step_without_variant_fails() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[0]" && v.rule == "oneof_required"));
    }

    #[test]
    fn test_static_step_with_collector_fails() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  collectors:
    - id: api
      http:
        base_url: https://api.example.com
  steps:
    - id: s1
      collector: api
      static:
        value: a
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[0].collector" && v.rule == "excluded_with"));
    }

    #[test]
    fn test_http_get_without_collector_fails() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      http_get:
        path: /v1/data
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[0].collector" && v.rule == "required_with"));
    }

    #[test]
    fn test_bad_response_type_fails() {
        let yaml = valid_yaml().replace("path: /v1/data", "path: /v1/data\n        response_type: xml");
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[0].http_get.response_type" && v.rule == "oneof"));
    }

    #[test]
    fn test_archive_rules() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      static:
        value: a
  output:
    archive:
      format: zip
      compression: bzip2
    sink:
      filesystem:
        path: ./out
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.output.archive.format" && v.rule == "oneof"));
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.output.archive.compression" && v.rule == "oneof"));
    }

    #[test]
    fn test_multiple_sinks_fail() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      static:
        value: a
  output:
    sink:
      stdout: {}
      filesystem:
        path: ./out
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.output.sink" && v.rule == "mutually_exclusive"));
    }

    #[test]
    fn test_s3_bucket_required() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      static:
        value: a
  output:
    sink:
      s3:
        bucket: ""
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.output.sink.s3.bucket" && v.rule == "required"));
    }

    #[test]
    fn test_exec_empty_program_fails() {
        let yaml = r#"
kind: CollectJob
metadata:
  name: demo
spec:
  steps:
    - id: s1
      exec:
        program: []
"#;
        let job = parse_collect_job(yaml.as_bytes()).unwrap();
        let err = validate(&job).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.path == "spec.steps[0].exec.program" && v.rule == "required"));
    }
}
