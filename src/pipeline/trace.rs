use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

const JOB_ID_HEX_CHARS: usize = 12;

/// Short stable id for a job, derived from its source text.
#[must_use]
pub fn job_id_for(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(JOB_ID_HEX_CHARS);
    id
}

/// Writes prompts and raw stage output as `<job_id>.<stage>.<kind>.txt`.
#[derive(Clone, Debug)]
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
    prompts: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool, prompts: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self {
            dir,
            enabled,
            prompts,
        })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
            prompts: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(sanitize_filename(name));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    pub fn write_stage_text(
        &self,
        job_id: &str,
        stage: &str,
        kind: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if kind == "prompt" && !self.prompts {
            return Ok(());
        }
        self.write_named_text(&format!("{job_id}.{stage}.{kind}.txt"), text)
    }
}

fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => out.push(ch),
        }
    }
    out
}
