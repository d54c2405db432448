//! LLM-driven document translation pipeline and translation-quality evaluator.

pub mod annotate;
pub mod checks;
pub mod config;
pub mod diff;
pub mod document;
pub mod evaluate;
pub mod jsonparse;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod suggest;
pub mod terminology;
pub mod textutil;
