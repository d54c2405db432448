use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermEntry {
    pub src: String,
    pub tgt: String,
}

/// Key-term dictionary taken from the translation plan.
#[derive(Clone, Debug, Default)]
pub struct Glossary {
    terms: Vec<TermEntry>,
}

impl Glossary {
    #[must_use]
    pub fn from_key_terms(key_terms: &BTreeMap<String, String>) -> Self {
        let terms = key_terms
            .iter()
            .map(|(src, tgt)| (src.trim(), tgt.trim()))
            .filter(|(src, tgt)| !src.is_empty() && !tgt.is_empty())
            .map(|(src, tgt)| TermEntry {
                src: src.to_string(),
                tgt: tgt.to_string(),
            })
            .collect();
        Self { terms }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms whose source form occurs in `text` (ASCII case-insensitive), longest first.
    #[must_use]
    pub fn relevant_for_text<'a>(&'a self, text: &str, max_items: usize) -> Vec<&'a TermEntry> {
        if self.terms.is_empty() || text.is_empty() || max_items == 0 {
            return Vec::new();
        }
        let haystack = text.to_ascii_lowercase();
        let mut items: Vec<&TermEntry> = self
            .terms
            .iter()
            .filter(|t| haystack.contains(&t.src.to_ascii_lowercase()))
            .collect();
        items.sort_by(|a, b| {
            b.src
                .chars()
                .count()
                .cmp(&a.src.chars().count())
                .then_with(|| a.src.cmp(&b.src))
        });
        items.truncate(max_items);
        items
    }

    #[must_use]
    pub fn render_for_prompt(terms: &[&TermEntry]) -> String {
        if terms.is_empty() {
            return "(none)".to_string();
        }
        let mut out = String::new();
        for t in terms {
            out.push_str("- ");
            out.push_str(&t.src);
            out.push_str(": ");
            out.push_str(&t.tgt);
            out.push('\n');
        }
        out.truncate(out.trim_end().len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> Glossary {
        let mut m = BTreeMap::new();
        m.insert("Indo-Pacific".to_string(), "印太".to_string());
        m.insert("Indo-Pacific strategy".to_string(), "印太战略".to_string());
        m.insert("EU".to_string(), "欧盟".to_string());
        m.insert(" ".to_string(), "blank".to_string());
        Glossary::from_key_terms(&m)
    }

    #[test]
    fn blank_terms_are_dropped() {
        assert_eq!(glossary().len(), 3);
    }

    #[test]
    fn relevant_terms_are_longest_first() {
        let g = glossary();
        let hits = g.relevant_for_text("The EU's indo-pacific strategy", 10);
        let srcs: Vec<&str> = hits.iter().map(|t| t.src.as_str()).collect();
        assert_eq!(srcs, vec!["Indo-Pacific strategy", "Indo-Pacific", "EU"]);
        assert_eq!(g.relevant_for_text("nothing here", 10).len(), 0);
        assert_eq!(g.relevant_for_text("EU", 0).len(), 0);
    }

    #[test]
    fn prompt_rendering() {
        let g = glossary();
        let hits = g.relevant_for_text("EU", 5);
        assert_eq!(Glossary::render_for_prompt(&hits), "- EU: 欧盟");
        assert_eq!(Glossary::render_for_prompt(&[]), "(none)");
    }
}
