//! Stage adapters: one chat call per pipeline stage.

use crate::models::{once_stream, ChatBackend, ChatRequest, StageError, TextStream};
use crate::pipeline::config::PipelineOptions;
use crate::pipeline::plan::TranslationPlan;
use crate::pipeline::prompts::{render_template, PromptSet, REVIEW_SYSTEM, TRANSLATE_SYSTEM};
use crate::pipeline::state::Segment;
use crate::pipeline::trace::TraceWriter;
use crate::terminology::Glossary;
use crate::textutil::{segment_label, truncate_chars};

const MAX_PROMPT_TERMS: usize = 40;

/// Per-job data handed to every stage call.
#[derive(Clone, Debug)]
pub struct StageContext {
    pub job_id: String,
}

/// The three model-backed steps of a translation job. Implementations hold no per-job state.
pub trait TranslationStages: Send + Sync {
    fn create_plan(&self, ctx: &StageContext, source: &str) -> Result<TextStream<'_>, StageError>;

    fn translate_segment(
        &self,
        ctx: &StageContext,
        segment: &Segment,
        plan: &TranslationPlan,
    ) -> Result<TextStream<'_>, StageError>;

    fn review_translation(
        &self,
        ctx: &StageContext,
        translation: &str,
        plan: &TranslationPlan,
    ) -> Result<TextStream<'_>, StageError>;
}

/// Stages rendered from prompt templates and sent to a chat backend.
pub struct LlmStages<B> {
    backend: B,
    prompts: PromptSet,
    options: PipelineOptions,
    trace: TraceWriter,
}

fn knowledge_line(plan: &TranslationPlan) -> String {
    if plan.specialized_knowledge.is_empty() {
        "(none)".to_string()
    } else {
        plan.specialized_knowledge.join(", ")
    }
}

impl<B: ChatBackend> LlmStages<B> {
    pub fn new(backend: B, prompts: PromptSet, options: PipelineOptions) -> Self {
        Self {
            backend,
            prompts,
            options,
            trace: TraceWriter::disabled(),
        }
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn plan_prompt(&self, source: &str) -> String {
        let (mut excerpt, truncated) = truncate_chars(source.trim(), self.options.plan_excerpt_chars);
        if truncated {
            excerpt.push_str("...");
        }
        render_template(
            &self.prompts.plan,
            &[
                ("target_lang", &self.options.target_lang),
                ("source_excerpt", &excerpt),
            ],
        )
    }

    fn translate_prompt(&self, segment: &Segment, plan: &TranslationPlan) -> String {
        let glossary = Glossary::from_key_terms(&plan.key_terms);
        let terms = glossary.relevant_for_text(&segment.content, MAX_PROMPT_TERMS);
        let labelled = format!("{} {}", segment_label(segment.index), segment.content);
        render_template(
            &self.prompts.translate,
            &[
                ("target_lang", &self.options.target_lang),
                ("content_type", &plan.content_type),
                ("style", &plan.style),
                ("specialized_knowledge", &knowledge_line(plan)),
                ("key_terms", &Glossary::render_for_prompt(&terms)),
                ("segment", &labelled),
                ("delimiter", &self.options.translate_delimiter),
            ],
        )
    }

    fn review_prompt(&self, translation: &str, plan: &TranslationPlan) -> String {
        render_template(
            &self.prompts.review,
            &[
                ("target_lang", &self.options.target_lang),
                ("content_type", &plan.content_type),
                ("style", &plan.style),
                ("specialized_knowledge", &knowledge_line(plan)),
                ("translation", translation),
                ("delimiter", &self.options.review_delimiter),
            ],
        )
    }

    fn call(
        &self,
        ctx: &StageContext,
        stage: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<TextStream<'_>, StageError> {
        let _ = self.trace.write_stage_text(&ctx.job_id, stage, "prompt", prompt);
        let mut request = ChatRequest::new(system, prompt);
        if let Some(t) = self.options.temperature {
            request = request.with_temperature(t);
        }
        if self.options.stream {
            self.backend.stream(&request)
        } else {
            Ok(once_stream(self.backend.complete(&request)?))
        }
    }
}

impl<B: ChatBackend> TranslationStages for LlmStages<B> {
    fn create_plan(&self, ctx: &StageContext, source: &str) -> Result<TextStream<'_>, StageError> {
        let prompt = self.plan_prompt(source);
        self.call(ctx, "plan", None, &prompt)
    }

    fn translate_segment(
        &self,
        ctx: &StageContext,
        segment: &Segment,
        plan: &TranslationPlan,
    ) -> Result<TextStream<'_>, StageError> {
        let prompt = self.translate_prompt(segment, plan);
        self.call(
            ctx,
            &format!("translate.{:04}", segment.index),
            Some(TRANSLATE_SYSTEM),
            &prompt,
        )
    }

    fn review_translation(
        &self,
        ctx: &StageContext,
        translation: &str,
        plan: &TranslationPlan,
    ) -> Result<TextStream<'_>, StageError> {
        let prompt = self.review_prompt(translation, plan);
        self.call(ctx, "review", Some(REVIEW_SYSTEM), &prompt)
    }
}
