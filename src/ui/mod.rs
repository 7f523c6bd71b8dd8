//! Terminal output

pub mod progress;
