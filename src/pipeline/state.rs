use std::fmt;

use serde::Serialize;

use crate::pipeline::error::PipelineError;
use crate::pipeline::plan::{PartialPlan, TranslationPlan};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Translating,
    Reviewing,
    Completed,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planning => "planning",
            Self::Translating => "translating",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub index: usize,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranslatedSegment {
    pub index: usize,
    pub content: String,
    /// The content is a placeholder for a failed translation.
    pub degraded: bool,
}

/// Everything a job has produced so far. Owned by a single job; only the orchestrator mutates it.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineState {
    pub phase: Phase,
    pub progress: u8,
    pub plan: Option<TranslationPlan>,
    pub partial_plan: Option<PartialPlan>,
    pub plan_degraded: bool,
    pub original_segments: Vec<Segment>,
    pub translated_segments: Vec<TranslatedSegment>,
    /// In-flight text of the call currently streaming.
    pub current_translation: String,
    pub review_notes: Option<String>,
    pub final_text: Option<String>,
    pub error: Option<PipelineError>,
    pub manually_edited: bool,
}

impl PipelineState {
    pub(crate) fn new(original_segments: Vec<Segment>) -> Self {
        Self {
            phase: Phase::Planning,
            progress: 0,
            plan: None,
            partial_plan: None,
            plan_degraded: false,
            original_segments,
            translated_segments: Vec::new(),
            current_translation: String::new(),
            review_notes: None,
            final_text: None,
            error: None,
            manually_edited: false,
        }
    }

    /// Progress never moves backwards.
    pub(crate) fn advance_progress(&mut self, pct: u8) {
        self.progress = self.progress.max(pct.min(100));
    }

    pub(crate) fn fail(&mut self, err: PipelineError) {
        self.phase = Phase::Failed;
        self.error = Some(err);
        self.current_translation.clear();
    }

    #[must_use]
    pub fn degraded_segments(&self) -> usize {
        self.translated_segments.iter().filter(|s| s.degraded).count()
    }

    /// Completed, but with a fallback plan or placeholder segments.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.plan_degraded || self.degraded_segments() > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKind {
    Partial,
    StageComplete,
}

/// A view of the state handed to the observer after each chunk and stage.
#[derive(Debug)]
pub struct Snapshot<'a> {
    pub kind: SnapshotKind,
    /// The stage that produced the snapshot.
    pub stage: Phase,
    pub state: &'a PipelineState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut st = PipelineState::new(Vec::new());
        st.advance_progress(20);
        st.advance_progress(12);
        assert_eq!(st.progress, 20);
        st.advance_progress(250);
        assert_eq!(st.progress, 100);
    }

    #[test]
    fn degraded_flags() {
        let mut st = PipelineState::new(Vec::new());
        assert!(!st.is_degraded());
        st.translated_segments.push(TranslatedSegment {
            index: 0,
            content: "[translation error: segment 0]".to_string(),
            degraded: true,
        });
        assert_eq!(st.degraded_segments(), 1);
        assert!(st.is_degraded());
        assert_eq!(Phase::Failed.to_string(), "failed");
        assert!(Phase::Completed.is_terminal());
    }
}
