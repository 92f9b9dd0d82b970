//! modscan: AI-assisted moderation scan pipeline.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod safety;
