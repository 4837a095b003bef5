//! Lead outreach: staged lead pipeline with rate-limited dispatch.

pub mod api;
pub mod config;
pub mod error;
pub mod leads;
pub mod llm;
pub mod outreach;
pub mod pipeline;
pub mod store;
