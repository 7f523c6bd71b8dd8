//! Storage modules: config, jobs

pub mod config;
pub mod jobs;
