//! Enrichment stage processors.
//!
//! `RuleEnricher` is offline and deterministic. `AiEnricher` asks the LLM for
//! a JSON record and degrades to the rules result when the call or the parse
//! fails, reporting the reason through `Generated::Fallback`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::{LlmError, ProcessorError};
use crate::leads::model::Lead;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json};
use crate::pipeline::rules::EnrichmentRules;
use crate::pipeline::types::{EnrichmentMode, EnrichmentRecord, Generated};

const SYSTEM_PROMPT: &str = "You are a B2B sales intelligence expert. Provide realistic, actionable enrichment data in valid JSON format only.";

const ENRICH_MAX_TOKENS: u32 = 500;

/// Produces an enrichment record for one lead.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, lead: &Lead) -> Result<Generated<EnrichmentRecord>, ProcessorError>;
}

/// Offline enrichment from rule tables.
#[derive(Debug, Default)]
pub struct RuleEnricher {
    rules: EnrichmentRules,
}

impl RuleEnricher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Enricher for RuleEnricher {
    async fn enrich(&self, lead: &Lead) -> Result<Generated<EnrichmentRecord>, ProcessorError> {
        Ok(Generated::Primary(self.rules.evaluate(lead)))
    }
}

/// LLM enrichment with rule fallback.
pub struct AiEnricher {
    llm: Arc<dyn LlmProvider>,
    rules: EnrichmentRules,
}

/// Shape the model is asked to return. Lenient on the score type.
#[derive(Deserialize)]
struct AiEnrichment {
    company_size: String,
    persona_tag: String,
    pain_points: Vec<String>,
    buying_triggers: Vec<String>,
    confidence_score: f64,
}

impl AiEnricher {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            rules: EnrichmentRules,
        }
    }

    fn build_prompt(lead: &Lead) -> String {
        let intake = &lead.intake;
        format!(
            r#"Analyze this business lead and provide enrichment data in JSON format.

Lead Information:
- Name: {name}
- Company: {company}
- Role: {role}
- Industry: {industry}
- Country: {country}

Provide enrichment in this exact JSON format:
{{
  "company_size": "small/medium/enterprise",
  "persona_tag": "descriptive persona like 'Tech Leader' or 'Operations Executive'",
  "pain_points": ["pain point 1", "pain point 2", "pain point 3"],
  "buying_triggers": ["trigger 1", "trigger 2"],
  "confidence_score": 85
}}

Focus on realistic, industry-specific insights. Be specific and actionable."#,
            name = intake.full_name,
            company = intake.company_name,
            role = intake.role_title,
            industry = intake.industry,
            country = intake.country,
        )
    }

    async fn ask(&self, lead: &Lead) -> Result<EnrichmentRecord, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::build_prompt(lead)),
        ])
        .with_max_tokens(ENRICH_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        parse_enrichment(&response.content)
    }
}

/// Parse model output into a record, tolerating a ```json fence.
fn parse_enrichment(content: &str) -> Result<EnrichmentRecord, LlmError> {
    let raw: AiEnrichment = serde_json::from_str(extract_json(content))?;
    if raw.company_size.trim().is_empty() || raw.persona_tag.trim().is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: "enrichment".to_string(),
            reason: "empty company_size or persona_tag".to_string(),
        });
    }

    Ok(EnrichmentRecord {
        company_size: raw.company_size,
        persona_tag: raw.persona_tag,
        pain_points: raw.pain_points,
        buying_triggers: raw.buying_triggers,
        confidence_score: raw.confidence_score.round().clamp(0.0, 100.0) as u8,
        mode: EnrichmentMode::Ai,
    })
}

#[async_trait]
impl Enricher for AiEnricher {
    async fn enrich(&self, lead: &Lead) -> Result<Generated<EnrichmentRecord>, ProcessorError> {
        match self.ask(lead).await {
            Ok(record) => Ok(Generated::Primary(record)),
            Err(e) => {
                warn!(lead_id = lead.id, error = %e, "AI enrichment failed, using rules");
                Ok(Generated::Fallback {
                    value: self.rules.evaluate(lead),
                    reason: e.to_string(),
                })
            }
        }
    }
}
