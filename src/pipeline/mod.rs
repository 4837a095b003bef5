//! Lead processing pipeline.
//!
//! Every run moves leads through four stages in order:
//! 1. Intake: seeded bulk generation or one external lead
//! 2. `Enricher::enrich()`: company size, persona, pain points
//! 3. `MessageGenerator::generate_messages()`: two email and two LinkedIn variations
//! 4. `Dispatcher::dispatch()`: rate-limited delivery of variation A
//!
//! A lead only moves forward; each advance is one atomic store write.

pub mod enricher;
pub mod orchestrator;
pub mod personalizer;
pub mod rules;
pub mod run_state;
pub mod types;

pub use enricher::{AiEnricher, Enricher, RuleEnricher};
pub use orchestrator::{DefaultProcessors, Orchestrator, ProcessorProvider, StageProcessors};
pub use personalizer::{AiPersonalizer, MessageGenerator, TemplatePersonalizer};
pub use run_state::{RunSnapshot, RunState};
