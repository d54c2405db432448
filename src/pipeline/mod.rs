mod config;
mod error;
mod memory;
mod orchestrator;
mod plan;
mod prompts;
mod segment;
mod stages;
mod state;
mod trace;

pub use config::{
    init_default_config, DelimiterMatch, EvaluationOptions, PipelineConfig, PipelineOptions,
    REVIEW_DELIMITER, TRANSLATE_DELIMITER,
};
pub use error::PipelineError;
pub use memory::{build_job_record, write_job_record, JobRecord, JOB_RECORD_SCHEMA};
pub use orchestrator::{
    apply_manual_edit, clean_segment_output, split_review, CancelFlag, Observer, Orchestrator,
};
pub use plan::{resolve_plan, PartialPlan, TranslationPlan};
pub use prompts::{render_template, PromptSet, EVALUATE_SYSTEM};
pub use segment::{segment_source, split_paragraphs, split_sentences, SentenceSegment};
pub use stages::{LlmStages, StageContext, TranslationStages};
pub use state::{Phase, PipelineState, Segment, Snapshot, SnapshotKind, TranslatedSegment};
pub use trace::{job_id_for, TraceWriter};
