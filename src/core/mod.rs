//! Core modules: selection, naming, extraction, orchestration

pub mod extractor;
pub mod format_selector;
pub mod namer;
pub mod orchestrator;
pub mod progress;
pub mod staging;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod testing;
