use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use doc_translator::annotate::{annotate, render_markup};
use doc_translator::diff::describe_change;
use doc_translator::document::{read_document, PlainTextSource};
use doc_translator::evaluate::{Evaluation, Evaluator};
use doc_translator::models::HttpChatModel;
use doc_translator::pipeline::{
    build_job_record, init_default_config, job_id_for, write_job_record, CancelFlag, LlmStages,
    Orchestrator, Phase, PipelineConfig, Snapshot, SnapshotKind, TraceWriter,
};
use doc_translator::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "doc-translator")]
#[command(about = "Plan / translate / review documents with an OpenAI-compatible LLM, and evaluate translations", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input text file (UTF-8 or GB18030)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output text file (default: <input_stem>_translated.txt)
    #[arg(short, long, value_name = "OUT")]
    output: Option<PathBuf>,

    /// Config file path (default: search for doc-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target language name used in prompts (overrides config)
    #[arg(long)]
    target_lang: Option<String>,

    /// Request whole responses instead of streamed chunks
    #[arg(long)]
    no_stream: bool,

    /// Job record path (default: <output_stem>.job.json)
    #[arg(long, value_name = "PATH")]
    job_json: Option<PathBuf>,

    /// Evaluate a translation against its original instead of translating
    #[arg(long, num_args = 2, value_names = ["TRANSLATED", "ORIGINAL"])]
    evaluate: Option<Vec<PathBuf>>,

    /// Write the evaluation (scores, comments, positioned issues) as JSON
    #[arg(long, value_name = "PATH", requires = "evaluate")]
    feedback_json: Option<PathBuf>,

    /// Suppress progress lines on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(paths) = args.evaluate.as_deref() {
        let [translated, original] = paths else {
            return Err(anyhow!("--evaluate requires <TRANSLATED> <ORIGINAL>"));
        };
        return run_evaluation(&args, translated, original, &progress);
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  doc-translator <input.txt>\n  doc-translator --evaluate <translated.txt> <original.txt>\n\nTIPS:\n  - Set TRANSLATION_API_KEY and TRANSLATION_BASE_URL (or [api] in the config).\n  - Default config search: doc-translator.toml (upwards), or set DOC_TRANSLATOR_CONFIG.\n"
            );
            return Ok(());
        }
    };
    let output = match args.output.clone() {
        Some(p) => p,
        None => {
            let stem = file_stem(&input);
            input.with_file_name(format!("{stem}_translated.txt"))
        }
    };
    run_translation(&args, &input, &output, &progress)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

fn load_config(args: &Args, input: &Path, output: &Path) -> anyhow::Result<PipelineConfig> {
    let mut cfg = PipelineConfig::from_paths_and_args(input, output, args.config.clone(), args.no_stream)
        .context("build config")?;
    if let Some(lang) = args.target_lang.clone() {
        cfg.options.target_lang = lang;
    }
    Ok(cfg)
}

fn run_translation(
    args: &Args,
    input: &Path,
    output: &Path,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let cfg = load_config(args, input, output)?;
    let source = read_document(input, &PlainTextSource)?;
    progress.info(format!("Input: {}", input.display()));
    progress.info(format!("Model: {} @ {}", cfg.model.model, cfg.model.base_url));

    let model = HttpChatModel::connect(cfg.model.clone()).context("connect chat endpoint")?;
    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_enabled, cfg.trace_prompts)?;
    if cfg.trace_enabled {
        progress.info(format!("Trace: {}", trace.dir().display()));
    }
    let stages = LlmStages::new(model, cfg.prompts.clone(), cfg.options.clone()).with_trace(trace.clone());
    let orchestrator = Orchestrator::new(stages, cfg.options.clone()).with_trace(trace);

    let cancel = CancelFlag::new();
    let mut done_segments = 0usize;
    let mut observer = |snap: &Snapshot<'_>| {
        let st = snap.state;
        match (snap.kind, snap.stage) {
            (SnapshotKind::StageComplete, Phase::Planning) => {
                let degraded = if st.plan_degraded { " (fallback plan)" } else { "" };
                progress.info(format!(
                    "Plan ready{degraded}: {} segment(s)",
                    st.original_segments.len()
                ));
            }
            (SnapshotKind::Partial, Phase::Translating)
                if st.translated_segments.len() > done_segments =>
            {
                done_segments = st.translated_segments.len();
                progress.progress("Translate", done_segments, st.original_segments.len());
            }
            (SnapshotKind::StageComplete, Phase::Translating) => {
                progress.job("Reviewing", st.progress);
            }
            (SnapshotKind::StageComplete, Phase::Reviewing) => progress.job("Completed", st.progress),
            (SnapshotKind::Partial, _) if st.phase == Phase::Failed => {
                progress.job("Failed", st.progress);
            }
            _ => {}
        }
    };
    let state = orchestrator
        .run(&source, &cancel, &mut observer)
        .context("start translation job")?;

    let job_id = job_id_for(&source);
    let job_path = args
        .job_json
        .clone()
        .unwrap_or_else(|| output.with_file_name(format!("{}.job.json", file_stem(output))));
    let record = build_job_record(&job_id, &cfg.model.model, Some(input), &state);
    write_job_record(&job_path, &record)?;
    progress.info(format!("Job record: {}", job_path.display()));

    if let Some(err) = state.error.as_ref() {
        return Err(anyhow!("translation failed: {err}"));
    }
    let final_text = state
        .final_text
        .as_deref()
        .context("completed job has no final text")?;
    std::fs::write(output, final_text).with_context(|| format!("write output: {}", output.display()))?;
    if state.is_degraded() {
        progress.info(format!(
            "Completed with degradation: {} placeholder segment(s){}",
            state.degraded_segments(),
            if state.plan_degraded { ", fallback plan" } else { "" }
        ));
    }
    progress.info(format!("Output: {}", output.display()));
    Ok(())
}

fn run_evaluation(
    args: &Args,
    translated: &Path,
    original: &Path,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let cfg = load_config(args, translated, translated)?;
    let translated_text = read_document(translated, &PlainTextSource)?;
    let original_text = read_document(original, &PlainTextSource)?;

    let model = HttpChatModel::connect(cfg.model.clone()).context("connect chat endpoint")?;
    let evaluator = Evaluator::new(model, cfg.prompts.evaluate.clone(), cfg.evaluation.clone());
    progress.info("Evaluating translation...");
    let evaluation = evaluator
        .evaluate(&original_text, &translated_text)
        .context("evaluate translation")?;

    print_evaluation(&evaluation);

    if let Some(path) = args.feedback_json.as_ref() {
        let json = serde_json::to_string_pretty(&evaluation).context("serialize evaluation")?;
        std::fs::write(path, json).with_context(|| format!("write feedback: {}", path.display()))?;
        progress.info(format!("Feedback: {}", path.display()));
    }
    Ok(())
}

fn print_evaluation(evaluation: &Evaluation) {
    match evaluation.score {
        Some(score) => println!("Score: {score:.0}"),
        None => println!("Score: n/a (model report unusable, structural checks only)"),
    }
    for comment in &evaluation.comments {
        println!("- {comment}");
    }
    for (segment, feedback) in evaluation.translated_segments.iter().zip(&evaluation.feedback) {
        if feedback.issues.is_empty() {
            continue;
        }
        println!();
        println!("[{}] {}", feedback.segment_index + 1, render_markup(&annotate(segment, feedback)));
        for issue in &feedback.issues {
            let change = describe_change(&issue.original_text, &issue.replacement())
                .unwrap_or_else(|| "no change".to_string());
            if issue.reason.is_empty() {
                println!("    {}: {change}", issue.issue_type);
            } else {
                println!("    {}: {change} ({})", issue.issue_type, issue.reason);
            }
        }
    }
}
