use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::textutil::find_file_upwards;

pub const DEFAULT_CONFIG_FILENAME: &str = "doc-translator.toml";
pub const CONFIG_ENV: &str = "DOC_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ApiSection {
    /// OpenAI-compatible base URL (".../v1"). `TRANSLATION_BASE_URL` overrides it.
    #[serde(default)]
    pub base_url: Option<String>,
    /// `TRANSLATION_MODEL` overrides it.
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,

    /// A single-paragraph source longer than this is split at sentence boundaries.
    #[serde(default)]
    pub max_segment_chars: Option<usize>,
    #[serde(default)]
    pub plan_excerpt_chars: Option<usize>,

    #[serde(default)]
    pub translate_delimiter: Option<String>,
    #[serde(default)]
    pub review_delimiter: Option<String>,
    /// "first" or "last" occurrence of a delimiter.
    #[serde(default)]
    pub delimiter_match: Option<String>,

    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    #[serde(default)]
    pub job_deadline_secs: Option<u64>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EvaluationSection {
    /// Merge overlapping issues of the same type instead of dropping the later one.
    #[serde(default)]
    pub merge_same_type: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub translate: Option<String>,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub evaluate: Option<String>,
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert!(cfg.api.base_url.is_none());
        assert!(cfg.pipeline.stream.is_none());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        std::fs::write(
            &path,
            "[api]\nmodel = \"m\"\ntimeout_secs = 30\n\n[pipeline]\ndelimiter_match = \"last\"\n\n[evaluation]\nmerge_same_type = false\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.api.model.as_deref(), Some("m"));
        assert_eq!(cfg.api.timeout_secs, Some(30));
        assert_eq!(cfg.pipeline.delimiter_match.as_deref(), Some("last"));
        assert_eq!(cfg.evaluation.merge_same_type, Some(false));

        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_file_upwards(&nested, DEFAULT_CONFIG_FILENAME, 4), Some(path));
    }

    #[test]
    fn bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[api\nmodel=").unwrap();
        assert!(load_config(&path).is_err());
    }
}
