use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::jsonparse::parse_final;

pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";
pub const DEFAULT_STYLE: &str = "neutral";

static CONTENT_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""contentType"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("contentType regex")
});
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""style"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("style regex"));

/// Translation guidance produced once per job by the plan stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPlan {
    pub content_type: String,
    pub style: String,
    pub specialized_knowledge: Vec<String>,
    /// Source term -> target term.
    pub key_terms: BTreeMap<String, String>,
}

impl TranslationPlan {
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            content_type: UNKNOWN_CONTENT_TYPE.to_string(),
            style: DEFAULT_STYLE.to_string(),
            specialized_knowledge: Vec::new(),
            key_terms: BTreeMap::new(),
        }
    }
}

/// The plan as seen while it is still streaming; every field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialPlan {
    #[serde(deserialize_with = "lenient_string")]
    pub content_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub style: Option<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub specialized_knowledge: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient_terms")]
    pub key_terms: Option<BTreeMap<String, String>>,
}

// Model output is loosely typed: a field of the wrong shape reads as missing, and non-string
// entries inside a list or map are skipped.

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    let items = match Option::<Value>::deserialize(d)? {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
        Some(Value::String(s)) => vec![Value::String(s)],
        _ => return Ok(None),
    };
    Ok(Some(
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
    ))
}

fn lenient_terms<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error> {
    let Some(Value::Object(map)) = Option::<Value>::deserialize(d)? else {
        return Ok(None);
    };
    Ok(Some(
        map.into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
    ))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl PartialPlan {
    #[must_use]
    pub fn present_fields(&self) -> usize {
        [
            self.content_type.is_some(),
            self.style.is_some(),
            self.specialized_knowledge.is_some(),
            self.key_terms.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Validates into a full plan. Missing or blank fields take fallback values and the
    /// returned flag is set.
    #[must_use]
    pub fn into_plan(self) -> (TranslationPlan, bool) {
        let fallback = TranslationPlan::fallback();
        let content_type = non_blank(self.content_type);
        let style = non_blank(self.style);
        let degraded = content_type.is_none()
            || style.is_none()
            || self.specialized_knowledge.is_none()
            || self.key_terms.is_none();
        let key_terms = self
            .key_terms
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        let plan = TranslationPlan {
            content_type: content_type.unwrap_or(fallback.content_type),
            style: style.unwrap_or(fallback.style),
            specialized_knowledge: self
                .specialized_knowledge
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            key_terms,
        };
        (plan, degraded)
    }
}

fn capture(re: &Regex, raw: &str) -> Option<String> {
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\\"", "\""))
}

/// Field-by-field recovery from text that is not valid JSON.
#[must_use]
pub fn salvage_partial_plan(raw: &str) -> PartialPlan {
    PartialPlan {
        content_type: capture(&CONTENT_TYPE_RE, raw),
        style: capture(&STYLE_RE, raw),
        specialized_knowledge: None,
        key_terms: None,
    }
}

/// Turns the complete plan-stage output into a plan; the flag reports whether it was degraded.
#[must_use]
pub fn resolve_plan(raw: &str) -> (TranslationPlan, bool) {
    match parse_final::<PartialPlan>(raw) {
        Ok(partial) => partial.into_plan(),
        Err(e) => {
            warn!(error = %e, "plan response is not valid JSON, salvaging fields");
            let (plan, _) = salvage_partial_plan(raw).into_plan();
            (plan, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{"contentType":"新闻报道","style":"正式","specializedKnowledge":["国际关系"],"keyTerms":{"Indo-Pacific":"印太"}}"#;

    #[test]
    fn complete_plan_is_not_degraded() {
        let (plan, degraded) = resolve_plan(&format!("```json\n{FULL}\n```"));
        assert!(!degraded);
        assert_eq!(plan.content_type, "新闻报道");
        assert_eq!(plan.key_terms.get("Indo-Pacific").map(String::as_str), Some("印太"));
    }

    #[test]
    fn missing_fields_fall_back_but_keep_what_parsed() {
        let (plan, degraded) = resolve_plan(r#"{"contentType":"技术文档","style":"  "}"#);
        assert!(degraded);
        assert_eq!(plan.content_type, "技术文档");
        assert_eq!(plan.style, DEFAULT_STYLE);
        assert!(plan.key_terms.is_empty());
    }

    #[test]
    fn garbage_is_salvaged() {
        let (plan, degraded) =
            resolve_plan(r#"Sure! "contentType": "学术论文", "style": "formal", keyTerms: oops"#);
        assert!(degraded);
        assert_eq!(plan.content_type, "学术论文");
        assert_eq!(plan.style, "formal");

        let (plan, degraded) = resolve_plan("");
        assert!(degraded);
        assert_eq!(plan, TranslationPlan::fallback());
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let raw = r#"{"contentType":"新闻报道","style":"正式","specializedKnowledge":["国际关系",3,null],"keyTerms":{"EU":"欧盟","count":2,"NATO":"北约"}}"#;
        let (plan, degraded) = resolve_plan(raw);
        assert!(!degraded);
        assert_eq!(plan.content_type, "新闻报道");
        assert_eq!(plan.specialized_knowledge, vec!["国际关系".to_string()]);
        assert_eq!(plan.key_terms.len(), 2);
        assert_eq!(plan.key_terms.get("NATO").map(String::as_str), Some("北约"));
        assert!(!plan.key_terms.contains_key("count"));
    }

    #[test]
    fn wrongly_shaped_field_reads_as_missing() {
        let raw = r#"{"contentType":"技术文档","style":42,"specializedKnowledge":["编译器"],"keyTerms":["EU"]}"#;
        let (plan, degraded) = resolve_plan(raw);
        assert!(degraded);
        assert_eq!(plan.content_type, "技术文档");
        assert_eq!(plan.style, DEFAULT_STYLE);
        assert_eq!(plan.specialized_knowledge, vec!["编译器".to_string()]);
        assert!(plan.key_terms.is_empty());
    }

    #[test]
    fn present_fields_counts_parsed_keys() {
        let p = PartialPlan {
            content_type: Some("news".to_string()),
            key_terms: Some(BTreeMap::new()),
            ..PartialPlan::default()
        };
        assert_eq!(p.present_fields(), 2);
    }
}
