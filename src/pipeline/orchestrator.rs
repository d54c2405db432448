use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::jsonparse::StreamingJson;
use crate::models::TextStream;
use crate::pipeline::config::{DelimiterMatch, PipelineOptions};
use crate::pipeline::error::PipelineError;
use crate::pipeline::plan::{resolve_plan, PartialPlan, TranslationPlan};
use crate::pipeline::segment::segment_source;
use crate::pipeline::stages::{StageContext, TranslationStages};
use crate::pipeline::state::{Phase, PipelineState, Segment, Snapshot, SnapshotKind, TranslatedSegment};
use crate::pipeline::trace::{job_id_for, TraceWriter};
use crate::textutil::{cleanup_model_text, strip_segment_label};

const PLAN_DONE_PCT: u8 = 20;
const PLAN_PARTIAL_MAX_PCT: u8 = 16;
const TRANSLATE_SPAN_PCT: usize = 60;

/// Cooperative cancellation shared between a running job and its owner.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type Observer<'o> = dyn FnMut(&Snapshot<'_>) + 'o;

struct Job<'a, 'o> {
    ctx: StageContext,
    state: PipelineState,
    cancel: &'a CancelFlag,
    deadline: Option<Instant>,
    observer: &'a mut Observer<'o>,
}

impl Job<'_, '_> {
    fn publish(&mut self, kind: SnapshotKind, stage: Phase) {
        (self.observer)(&Snapshot {
            kind,
            stage,
            state: &self.state,
        });
    }

    /// Cancellation and the job deadline, checked between chunks, segments and stages.
    fn check(&self, stage: Phase) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PipelineError::Deadline { stage });
        }
        Ok(())
    }
}

/// Drives one job through Planning → Translating → Reviewing → Completed.
pub struct Orchestrator<S> {
    stages: S,
    options: PipelineOptions,
    trace: TraceWriter,
}

impl<S: TranslationStages> Orchestrator<S> {
    pub fn new(stages: S, options: PipelineOptions) -> Self {
        Self {
            stages,
            options,
            trace: TraceWriter::disabled(),
        }
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs a job to a terminal phase. Only input errors are returned as `Err`; stage failures
    /// come back as a state in `Phase::Failed`.
    pub fn run(
        &self,
        source: &str,
        cancel: &CancelFlag,
        observer: &mut Observer<'_>,
    ) -> Result<PipelineState, PipelineError> {
        if source.trim().is_empty() {
            return Err(PipelineError::input("source text is empty"));
        }
        let segments = segment_source(source, self.options.max_segment_chars);
        if segments.is_empty() {
            return Err(PipelineError::input("source text has no segments"));
        }

        let ctx = StageContext {
            job_id: job_id_for(source),
        };
        info!(job_id = %ctx.job_id, segments = segments.len(), "job started");
        let mut job = Job {
            ctx,
            state: PipelineState::new(segments),
            cancel,
            deadline: self.options.job_deadline.map(|d| Instant::now() + d),
            observer,
        };

        match self.run_stages(&mut job, source) {
            Ok(()) => {
                info!(
                    job_id = %job.ctx.job_id,
                    degraded_segments = job.state.degraded_segments(),
                    plan_degraded = job.state.plan_degraded,
                    "job completed"
                );
            }
            Err(err) => {
                let stage = job.state.phase;
                warn!(job_id = %job.ctx.job_id, %stage, error = %err, "job failed");
                job.state.fail(err);
                job.publish(SnapshotKind::Partial, stage);
            }
        }
        Ok(job.state)
    }

    fn run_stages(&self, job: &mut Job<'_, '_>, source: &str) -> Result<(), PipelineError> {
        self.plan_stage(job, source)?;
        job.state.phase = Phase::Translating;
        self.translate_stage(job)?;
        job.state.phase = Phase::Reviewing;
        self.review_stage(job)
    }

    /// Pulls a stream to its end, handing every chunk to `on_chunk`.
    fn drain(
        &self,
        job: &mut Job<'_, '_>,
        stage: Phase,
        stream: TextStream<'_>,
        mut on_chunk: impl FnMut(&mut Job<'_, '_>, &str),
    ) -> Result<String, PipelineError> {
        let started = Instant::now();
        let mut text = String::new();
        for chunk in stream {
            job.check(stage)?;
            check_stage_timeout(stage, started, self.options.stage_timeout)?;
            let chunk = chunk.map_err(|e| PipelineError::from_stage(stage, e))?;
            text.push_str(&chunk);
            on_chunk(job, &chunk);
        }
        job.check(stage)?;
        Ok(text)
    }

    fn plan_stage(&self, job: &mut Job<'_, '_>, source: &str) -> Result<(), PipelineError> {
        job.check(Phase::Planning)?;
        let stream = self
            .stages
            .create_plan(&job.ctx, source)
            .map_err(|e| PipelineError::from_stage(Phase::Planning, e))?;

        let mut parser = StreamingJson::<PartialPlan>::new();
        let raw = self.drain(job, Phase::Planning, stream, |job, chunk| {
            if let Some(partial) = parser.push(chunk) {
                let pct = (partial.present_fields() as u8 * 4).min(PLAN_PARTIAL_MAX_PCT);
                job.state.partial_plan = Some(partial.clone());
                job.state.advance_progress(pct);
            }
            job.publish(SnapshotKind::Partial, Phase::Planning);
        })?;
        let _ = self.trace.write_stage_text(&job.ctx.job_id, "plan", "response", &raw);

        let (plan, degraded) = resolve_plan(&raw);
        if degraded {
            warn!(job_id = %job.ctx.job_id, "plan is incomplete, using fallback values");
        }
        debug!(content_type = %plan.content_type, key_terms = plan.key_terms.len(), "plan ready");
        job.state.plan = Some(plan);
        job.state.plan_degraded = degraded;
        job.state.advance_progress(PLAN_DONE_PCT);
        job.publish(SnapshotKind::StageComplete, Phase::Planning);
        Ok(())
    }

    fn translate_stage(&self, job: &mut Job<'_, '_>) -> Result<(), PipelineError> {
        let plan = job
            .state
            .plan
            .clone()
            .ok_or_else(|| PipelineError::input("translation plan is missing"))?;
        let segments = job.state.original_segments.clone();
        let total = segments.len();

        for (done, segment) in segments.iter().enumerate() {
            job.check(Phase::Translating)?;
            job.state.current_translation.clear();
            let translated = match self.translate_one(job, segment, &plan) {
                Ok(content) => TranslatedSegment {
                    index: segment.index,
                    content,
                    degraded: false,
                },
                Err(err) if err.is_job_level() => return Err(err),
                Err(err) => {
                    warn!(job_id = %job.ctx.job_id, segment = segment.index, error = %err, "segment translation failed");
                    TranslatedSegment {
                        index: segment.index,
                        content: format!("[translation error: segment {}]", segment.index),
                        degraded: true,
                    }
                }
            };
            job.state.translated_segments.push(translated);
            job.state.current_translation.clear();
            let pct = PLAN_DONE_PCT as usize + TRANSLATE_SPAN_PCT * (done + 1) / total;
            job.state.advance_progress(pct as u8);
            job.publish(SnapshotKind::Partial, Phase::Translating);
        }
        job.publish(SnapshotKind::StageComplete, Phase::Translating);
        Ok(())
    }

    fn translate_one(
        &self,
        job: &mut Job<'_, '_>,
        segment: &Segment,
        plan: &TranslationPlan,
    ) -> Result<String, PipelineError> {
        let stream = self
            .stages
            .translate_segment(&job.ctx, segment, plan)
            .map_err(|e| PipelineError::from_stage(Phase::Translating, e))?;
        let raw = self.drain(job, Phase::Translating, stream, |job, chunk| {
            job.state.current_translation.push_str(chunk);
            job.publish(SnapshotKind::Partial, Phase::Translating);
        })?;
        let _ = self.trace.write_stage_text(
            &job.ctx.job_id,
            &format!("translate.{:04}", segment.index),
            "response",
            &raw,
        );
        let text = clean_segment_output(
            &raw,
            &self.options.translate_delimiter,
            self.options.delimiter_match,
        );
        if text.is_empty() {
            return Err(PipelineError::Stage {
                stage: Phase::Translating,
                message: "empty translation".to_string(),
            });
        }
        Ok(text)
    }

    fn review_stage(&self, job: &mut Job<'_, '_>) -> Result<(), PipelineError> {
        job.check(Phase::Reviewing)?;
        let plan = job
            .state
            .plan
            .clone()
            .ok_or_else(|| PipelineError::input("translation plan is missing"))?;
        let joined = job
            .state
            .translated_segments
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        job.state.current_translation.clear();
        let stream = self
            .stages
            .review_translation(&job.ctx, &joined, &plan)
            .map_err(|e| PipelineError::from_stage(Phase::Reviewing, e))?;
        let raw = self.drain(job, Phase::Reviewing, stream, |job, chunk| {
            job.state.current_translation.push_str(chunk);
            job.publish(SnapshotKind::Partial, Phase::Reviewing);
        })?;
        let _ = self.trace.write_stage_text(&job.ctx.job_id, "review", "response", &raw);

        let (notes, final_text) =
            split_review(&raw, &self.options.review_delimiter, self.options.delimiter_match);
        if final_text.is_empty() {
            return Err(PipelineError::Stage {
                stage: Phase::Reviewing,
                message: "empty review response".to_string(),
            });
        }
        job.state.review_notes = notes;
        job.state.final_text = Some(final_text);
        job.state.current_translation.clear();
        job.state.phase = Phase::Completed;
        job.state.advance_progress(100);
        job.publish(SnapshotKind::StageComplete, Phase::Reviewing);
        Ok(())
    }
}

fn check_stage_timeout(
    stage: Phase,
    started: Instant,
    limit: Option<Duration>,
) -> Result<(), PipelineError> {
    match limit {
        Some(limit) if started.elapsed() > limit => Err(PipelineError::Timeout {
            stage,
            message: format!("no complete response within {}s", limit.as_secs_f64()),
        }),
        _ => Ok(()),
    }
}

/// The translation part of a translate-stage response, without fences or the echoed label.
pub fn clean_segment_output(raw: &str, delimiter: &str, mode: DelimiterMatch) -> String {
    let body = match mode.find(raw, delimiter) {
        Some(pos) => &raw[pos + delimiter.len()..],
        None => raw,
    };
    let cleaned = cleanup_model_text(body);
    strip_segment_label(&cleaned).trim().to_string()
}

/// Splits a review response into (notes, final text). Without the delimiter the whole response
/// is the final text.
pub fn split_review(raw: &str, delimiter: &str, mode: DelimiterMatch) -> (Option<String>, String) {
    match mode.find(raw, delimiter) {
        Some(pos) => {
            let notes = raw[..pos].trim();
            let notes = (!notes.is_empty()).then(|| notes.to_string());
            (notes, raw[pos + delimiter.len()..].trim().to_string())
        }
        None => (None, raw.trim().to_string()),
    }
}

/// Replaces the final text of a completed job with user-edited segments.
pub fn apply_manual_edit(state: &mut PipelineState, segments: &[String]) -> Result<(), PipelineError> {
    if state.phase != Phase::Completed {
        return Err(PipelineError::input(format!(
            "manual edits need a completed job (phase: {})",
            state.phase
        )));
    }
    state.final_text = Some(segments.join("\n\n"));
    state.manually_edited = true;
    Ok(())
}
