use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{AppConfig, PromptsSection};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_PLAN: &str = "plan.json.txt";
pub const DEFAULT_TRANSLATE: &str = "translate.txt";
pub const DEFAULT_REVIEW: &str = "review.txt";
pub const DEFAULT_EVALUATE: &str = "evaluate.json.txt";

pub const TRANSLATE_SYSTEM: &str =
    "You are a professional translator. Follow the requested output format and do not add Markdown formatting.";
pub const REVIEW_SYSTEM: &str =
    "You are a professional translation reviewer. Follow the requested output format and do not add Markdown formatting.";
pub const EVALUATE_SYSTEM: &str =
    "You are a professional translation quality assessor. Reply with the requested JSON object only.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKey {
    Plan,
    Translate,
    Review,
    Evaluate,
}

impl PromptKey {
    fn name(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Translate => "translate",
            Self::Review => "review",
            Self::Evaluate => "evaluate",
        }
    }

    fn default_filename(self) -> &'static str {
        match self {
            Self::Plan => DEFAULT_PLAN,
            Self::Translate => DEFAULT_TRANSLATE,
            Self::Review => DEFAULT_REVIEW,
            Self::Evaluate => DEFAULT_EVALUATE,
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            Self::Plan => DEFAULT_PLAN_TEXT,
            Self::Translate => DEFAULT_TRANSLATE_TEXT,
            Self::Review => DEFAULT_REVIEW_TEXT,
            Self::Evaluate => DEFAULT_EVALUATE_TEXT,
        }
    }

    fn configured(self, p: &PromptsSection) -> Option<&String> {
        match self {
            Self::Plan => p.plan.as_ref(),
            Self::Translate => p.translate.as_ref(),
            Self::Review => p.review.as_ref(),
            Self::Evaluate => p.evaluate.as_ref(),
        }
    }
}

/// Prompt templates with `{{var}}` placeholders.
#[derive(Clone, Debug)]
pub struct PromptSet {
    pub plan: String,
    pub translate: String,
    pub review: String,
    pub evaluate: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            plan: DEFAULT_PLAN_TEXT.to_string(),
            translate: DEFAULT_TRANSLATE_TEXT.to_string(),
            review: DEFAULT_REVIEW_TEXT.to_string(),
            evaluate: DEFAULT_EVALUATE_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Explicitly configured files must exist. Unconfigured prompts use `prompts/<default>` next
    /// to the config when present and the built-in text otherwise.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        Ok(Self {
            plan: read_prompt(config_dir, p, PromptKey::Plan)?,
            translate: read_prompt(config_dir, p, PromptKey::Translate)?,
            review: read_prompt(config_dir, p, PromptKey::Review)?,
            evaluate: read_prompt(config_dir, p, PromptKey::Evaluate)?,
        })
    }
}

fn read_prompt(config_dir: &Path, p: &PromptsSection, key: PromptKey) -> anyhow::Result<String> {
    let (path, explicit) = match key.configured(p) {
        Some(configured) => (PathBuf::from(configured), true),
        None => (
            PathBuf::from(DEFAULT_PROMPTS_DIR).join(key.default_filename()),
            false,
        ),
    };
    let path = if path.is_relative() {
        config_dir.join(path)
    } else {
        path
    };
    if !path.exists() {
        if explicit {
            return Err(anyhow!(
                "prompt file not found for {}: {} (run: doc-translator --init-config)",
                key.name(),
                path.display()
            ));
        }
        return Ok(key.builtin().to_string());
    }
    std::fs::read_to_string(&path).with_context(|| format!("read prompt: {}", path.display()))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    [
        PromptKey::Plan,
        PromptKey::Translate,
        PromptKey::Review,
        PromptKey::Evaluate,
    ]
    .into_iter()
    .map(|k| (k.default_filename(), k.builtin()))
    .collect()
}

pub const DEFAULT_PLAN_TEXT: &str = r#"Analyse the text below: identify its type, style and areas of specialised knowledge, and build a dictionary of key terms for translating it into {{target_lang}}.

Reply with a JSON object with exactly these fields:
- contentType: the kind of text (academic paper, news report, technical document, ...)
- style: the register (formal, informal, technical, ...)
- specializedKnowledge: array of knowledge domains
- keyTerms: object mapping source-language terms to their {{target_lang}} translations

Return the JSON object directly, without Markdown code fences. Example:
{
  "contentType": "academic paper",
  "style": "formal",
  "specializedKnowledge": ["artificial intelligence", "machine learning"],
  "keyTerms": {
    "machine learning": "机器学习",
    "artificial intelligence": "人工智能"
  }
}

Source text:
{{source_excerpt}}
"#;

pub const DEFAULT_TRANSLATE_TEXT: &str = r#"Translate the text below into {{target_lang}}, keeping the style and professional tone of the original.
Content type: {{content_type}}
Style: {{style}}
Domains: {{specialized_knowledge}}
Key terms:
{{key_terms}}

Source:
{{segment}}

Keep the paragraph number at the start of the translation if there is one.
First analyse the meaning and structure of the source: its main point, the terms that need an exact rendering, its tone, and its logical structure.
Write that analysis first, then the separator line {{delimiter}}, then the final translation only.
"#;

pub const DEFAULT_REVIEW_TEXT: &str = r#"Review the {{target_lang}} translation below for accuracy, fluency and consistency, paying particular attention to specialised terms.
Content type: {{content_type}}
Style: {{style}}
Domains: {{specialized_knowledge}}

Translation:
{{translation}}

First analyse the translation: faithfulness to the source, fluency in {{target_lang}}, consistent terminology, and consistent style.
Write that analysis first, then the separator line {{delimiter}}, then the complete revised translation.
Keep the paragraph breaks of the translation.
"#;

pub const DEFAULT_EVALUATE_TEXT: &str = r#"Assess the quality of the translation below.

Source:
```
{{original}}
```

Read the source first and decide how to judge it, then compare it with the translation:

Translation:
```
{{translation}}
```

Judge accuracy, fluency in the target language, terminology, and consistency of style.
Paragraphs are separated by blank lines and numbered from 0 in reading order.

Reply with a JSON object in this shape:
{
  "score": 0-100,
  "comments": ["overall comment", "..."],
  "segmentScores": [score of paragraph 0, ...],
  "segmentFeedbacks": [
    {
      "segmentIndex": 0,
      "issues": [
        {
          "type": "terminology | fluency | omission | accuracy | style",
          "description": "what is wrong",
          "originalText": "the source-language fragment",
          "translatedText": "the fragment exactly as it appears in the translation",
          "suggestion": "the corrected fragment itself, with no instructions",
          "reason": "why the change is needed"
        }
      ]
    }
  ]
}
"#;
