//! Leads: the contacts moving through the pipeline.

pub mod generator;
pub mod model;

pub use generator::{LeadGenerator, ValidationSummary};
pub use model::{Lead, LeadStatus, NewLead};
