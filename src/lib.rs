//! Batch image enrichment for the gallery tables: find rows without an
//! image, generate one, upload it, write the URL back.

pub mod config;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod store;
pub mod synth;
