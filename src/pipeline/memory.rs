use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::pipeline::state::PipelineState;

pub const JOB_RECORD_SCHEMA: &str = "doc_translator.job.v1";

/// What a finished (or failed) job leaves behind on disk.
#[derive(Debug, Serialize)]
pub struct JobRecord<'a> {
    #[serde(rename = "schema")]
    pub schema_version: &'static str,
    pub job_id: &'a str,
    pub model: &'a str,
    pub source_path: Option<String>,
    pub degraded: bool,
    #[serde(flatten)]
    pub state: &'a PipelineState,
}

pub fn build_job_record<'a>(
    job_id: &'a str,
    model: &'a str,
    source_path: Option<&Path>,
    state: &'a PipelineState,
) -> JobRecord<'a> {
    JobRecord {
        schema_version: JOB_RECORD_SCHEMA,
        job_id,
        model,
        source_path: source_path.map(|p| p.display().to_string()),
        degraded: state.is_degraded(),
        state,
    }
}

pub fn write_job_record(path: &Path, record: &JobRecord<'_>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(record).context("serialize job record")?;
    let mut buf = String::new();
    buf.push('\u{FEFF}');
    buf.push_str(&json);
    std::fs::write(path, buf).with_context(|| format!("write job record: {}", path.display()))?;
    Ok(())
}
