use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV, DEFAULT_CONFIG_FILENAME};
use crate::models::HttpModelConfig;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::suggest::{MapOptions, OverlapPolicy};

pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";
pub const DEFAULT_API_KEY_ENV: &str = "TRANSLATION_API_KEY";
pub const BASE_URL_ENV: &str = "TRANSLATION_BASE_URL";
pub const MODEL_ENV: &str = "TRANSLATION_MODEL";

pub const TRANSLATE_DELIMITER: &str = "===TRANSLATION===";
pub const REVIEW_DELIMITER: &str = "===FINAL_TRANSLATION===";

/// Which occurrence of a delimiter splits a response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DelimiterMatch {
    #[default]
    First,
    Last,
}

impl DelimiterMatch {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("first").trim().to_ascii_lowercase().as_str() {
            "last" => Self::Last,
            _ => Self::First,
        }
    }

    /// Byte position of the chosen occurrence.
    pub fn find(self, text: &str, delimiter: &str) -> Option<usize> {
        if delimiter.is_empty() {
            return None;
        }
        match self {
            Self::First => text.find(delimiter),
            Self::Last => text.rfind(delimiter),
        }
    }
}

/// Knobs the orchestrator and the stage adapters read.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub target_lang: String,
    pub stream: bool,
    pub max_segment_chars: usize,
    pub plan_excerpt_chars: usize,
    pub translate_delimiter: String,
    pub review_delimiter: String,
    pub delimiter_match: DelimiterMatch,
    pub stage_timeout: Option<Duration>,
    pub job_deadline: Option<Duration>,
    pub temperature: Option<f32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            target_lang: "Simplified Chinese".to_string(),
            stream: true,
            max_segment_chars: 1500,
            plan_excerpt_chars: 1500,
            translate_delimiter: TRANSLATE_DELIMITER.to_string(),
            review_delimiter: REVIEW_DELIMITER.to_string(),
            delimiter_match: DelimiterMatch::First,
            stage_timeout: None,
            job_deadline: None,
            temperature: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EvaluationOptions {
    pub map: MapOptions,
    pub temperature: Option<f32>,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            map: MapOptions::default(),
            temperature: Some(0.2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub model: HttpModelConfig,
    pub options: PipelineOptions,
    pub evaluation: EvaluationOptions,

    pub trace_dir: PathBuf,
    pub trace_enabled: bool,
    pub trace_prompts: bool,

    pub prompts: PromptSet,
}

fn secs(v: Option<u64>) -> Option<Duration> {
    v.filter(|s| *s > 0).map(Duration::from_secs)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl PipelineConfig {
    pub fn from_paths_and_args(
        input: &Path,
        output: &Path,
        config_path: Option<PathBuf>,
        no_stream: bool,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, DEFAULT_CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else {
                warn!(path = %p.display(), "config file not found, using defaults");
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_FILENAME));

        let api = &file_cfg.api;
        let api_key_env = api
            .api_key_env
            .clone()
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
        let api_key = env_nonempty(&api_key_env);
        if api_key.is_none() {
            warn!(env = %api_key_env, "API key is not set; requests are sent without authorization");
        }
        let model = HttpModelConfig {
            base_url: env_nonempty(BASE_URL_ENV)
                .or_else(|| api.base_url.clone())
                .unwrap_or_default(),
            model: env_nonempty(MODEL_ENV)
                .or_else(|| api.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            temperature: api.temperature,
            timeout: Duration::from_secs(api.timeout_secs.filter(|s| *s > 0).unwrap_or(300)),
        };

        let p = &file_cfg.pipeline;
        let defaults = PipelineOptions::default();
        let stage_timeout = secs(p.stage_timeout_secs).or(Some(model.timeout));
        let options = PipelineOptions {
            target_lang: p.target_lang.clone().unwrap_or(defaults.target_lang),
            stream: !no_stream && p.stream.unwrap_or(true),
            max_segment_chars: p
                .max_segment_chars
                .unwrap_or(defaults.max_segment_chars)
                .max(1),
            plan_excerpt_chars: p
                .plan_excerpt_chars
                .unwrap_or(defaults.plan_excerpt_chars)
                .max(1),
            translate_delimiter: p
                .translate_delimiter
                .clone()
                .unwrap_or(defaults.translate_delimiter),
            review_delimiter: p
                .review_delimiter
                .clone()
                .unwrap_or(defaults.review_delimiter),
            delimiter_match: DelimiterMatch::parse(p.delimiter_match.as_deref()),
            stage_timeout,
            job_deadline: secs(p.job_deadline_secs),
            temperature: model.temperature,
        };

        let e = &file_cfg.evaluation;
        let evaluation = EvaluationOptions {
            map: MapOptions {
                overlap: if e.merge_same_type.unwrap_or(true) {
                    OverlapPolicy::MergeSameType
                } else {
                    OverlapPolicy::FirstSeen
                },
            },
            temperature: e.temperature.or(EvaluationOptions::default().temperature),
        };

        let output_dir = output
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| workdir.clone());
        let trace_enabled = p.trace_dir.is_some();
        let trace_dir = p.trace_dir.clone().unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            output_dir.join(trace_dir)
        };
        let trace_prompts = p.trace_prompts.unwrap_or(true);

        let prompts = PromptSet::load(&cfg_path, &file_cfg).context("load prompts")?;

        Ok(Self {
            workdir,
            config_path: cfg_path,
            model,
            options,
            evaluation,
            trace_dir,
            trace_enabled,
            trace_prompts,
            prompts,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[api]
# OpenAI-compatible endpoint, e.g. "https://<host>/v1". TRANSLATION_BASE_URL overrides it.
# base_url = ""
model = "deepseek-ai/DeepSeek-V3"
# The key itself is read from this environment variable.
api_key_env = "TRANSLATION_API_KEY"
# temperature = 0.3
timeout_secs = 300

[pipeline]
target_lang = "Simplified Chinese"
stream = true
max_segment_chars = 1500
plan_excerpt_chars = 1500
translate_delimiter = "===TRANSLATION==="
review_delimiter = "===FINAL_TRANSLATION==="
# "first" or "last"
delimiter_match = "first"
# stage_timeout_secs = 300
# job_deadline_secs = 3600

# Uncomment to keep prompts and raw model output per job.
# trace_dir = "_trace"
trace_prompts = true

[evaluation]
merge_same_type = true
temperature = 0.2

[prompts]
plan = "prompts/plan.json.txt"
translate = "prompts/translate.txt"
review = "prompts/review.txt"
evaluate = "prompts/evaluate.json.txt"
"#;
