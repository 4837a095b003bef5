//! Message generation stage processors.
//!
//! Each lead gets two email and two LinkedIn variations (A/B). The template
//! generator is offline; the AI generator prompts the LLM per message and
//! substitutes the template for any message whose call fails.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{LlmError, ProcessorError};
use crate::leads::model::Lead;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{EmailDraft, EnrichmentRecord, Generated, LinkedInDraft, MessageSet};

const EMAIL_SYSTEM_PROMPT: &str = "You are an expert B2B sales copywriter. Write compelling, personalized emails that are concise and actionable. Always respect the word limit.";
const LINKEDIN_SYSTEM_PROMPT: &str = "You are an expert at LinkedIn outreach. Write concise, personalized messages that feel natural and conversational. Always respect the word limit.";

const EMAIL_MAX_TOKENS: u32 = 300;
const LINKEDIN_MAX_TOKENS: u32 = 150;
const MESSAGE_TEMPERATURE: f32 = 0.8;

/// A/B variation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    A,
    B,
}

/// Produces the outreach messages for one enriched lead.
#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate_messages(
        &self,
        lead: &Lead,
        enrichment: &EnrichmentRecord,
    ) -> Result<Generated<MessageSet>, ProcessorError>;
}

fn first_or<'a>(items: &'a [String], default: &'a str) -> &'a str {
    items.first().map(String::as_str).unwrap_or(default)
}

// ── Templates ───────────────────────────────────────────────────────

/// Offline template messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatePersonalizer;

impl TemplatePersonalizer {
    pub fn email(lead: &Lead, enrichment: &EnrichmentRecord, variation: Variation) -> EmailDraft {
        let intake = &lead.intake;
        let persona = enrichment.persona_tag.as_str();
        let pain = first_or(&enrichment.pain_points, "operational efficiency");

        match variation {
            Variation::A => EmailDraft {
                subject: format!("Improving {persona} at {}", intake.company_name),
                body: format!(
                    "Hi {first},\n\nI noticed {company} is in the {industry} space. Many {persona}s I work with face challenges with {pain}.\n\nWe've helped similar companies streamline these processes. Would you be open to a quick 15-minute call to explore if we could help?\n\nBest regards",
                    first = lead.first_name(),
                    company = intake.company_name,
                    industry = intake.industry,
                ),
            },
            Variation::B => {
                let trigger = first_or(&enrichment.buying_triggers, "business growth");
                EmailDraft {
                    subject: format!("Quick question about {} operations", intake.industry),
                    body: format!(
                        "Hi {first},\n\nAcross {industry}, teams going through a {trigger} often find {pain} becomes the bottleneck. As {role} at {company}, you are likely seeing the same.\n\nI'd be glad to share what has worked for peers. Do you have 15 minutes for a call next week?\n\nBest regards",
                        first = lead.first_name(),
                        industry = intake.industry,
                        trigger = trigger.to_lowercase(),
                        pain = pain.to_lowercase(),
                        role = intake.role_title,
                        company = intake.company_name,
                    ),
                }
            }
        }
    }

    pub fn linkedin(
        lead: &Lead,
        enrichment: &EnrichmentRecord,
        variation: Variation,
    ) -> LinkedInDraft {
        let intake = &lead.intake;
        let pain = first_or(&enrichment.pain_points, "operational challenges");

        let message = match variation {
            Variation::A => format!(
                "Hi {}, I work with {}s in {} on {}. Would you be open to a quick call?",
                lead.first_name(),
                enrichment.persona_tag,
                intake.industry,
                pain.to_lowercase(),
            ),
            Variation::B => format!(
                "Hi {}, as {} at {} you are probably close to {}. I help {} teams with exactly that. Worth a quick call?",
                lead.first_name(),
                intake.role_title,
                intake.company_name,
                pain.to_lowercase(),
                intake.industry,
            ),
        };
        LinkedInDraft { message }
    }

    pub fn message_set(lead: &Lead, enrichment: &EnrichmentRecord) -> MessageSet {
        MessageSet {
            email_a: Self::email(lead, enrichment, Variation::A),
            email_b: Self::email(lead, enrichment, Variation::B),
            linkedin_a: Self::linkedin(lead, enrichment, Variation::A),
            linkedin_b: Self::linkedin(lead, enrichment, Variation::B),
        }
    }
}

#[async_trait]
impl MessageGenerator for TemplatePersonalizer {
    async fn generate_messages(
        &self,
        lead: &Lead,
        enrichment: &EnrichmentRecord,
    ) -> Result<Generated<MessageSet>, ProcessorError> {
        Ok(Generated::Primary(Self::message_set(lead, enrichment)))
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// LLM message generation with per-message template fallback.
pub struct AiPersonalizer {
    llm: Arc<dyn LlmProvider>,
}

impl AiPersonalizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn email_prompt(lead: &Lead, enrichment: &EnrichmentRecord, variation: Variation) -> String {
        let intake = &lead.intake;
        let pain = if enrichment.pain_points.is_empty() {
            "operational challenges".to_string()
        } else {
            enrichment
                .pain_points
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        let trigger = first_or(&enrichment.buying_triggers, "business growth");
        let (style, approach) = match variation {
            Variation::A => (
                "direct and value-focused",
                "Start with a relevant pain point, then offer a solution",
            ),
            Variation::B => (
                "consultative and insight-driven",
                "Start with an industry insight, then connect to their challenges",
            ),
        };

        format!(
            r#"Write a personalized cold email (maximum 120 words) to {name}, {role} at {company}.

Context:
- Industry: {industry}
- Persona: {persona}
- Key Pain Point: {pain}
- Buying Trigger: {trigger}
- Company Size: {size}

Style: {style}
Approach: {approach}

Requirements:
- Maximum 120 words
- Reference the pain point or trigger naturally
- Include clear CTA: "15-minute call"
- Professional tone
- No hallucinated facts
- Subject line included

Format:
Subject: [subject line]

[Email body]"#,
            name = intake.full_name,
            role = intake.role_title,
            company = intake.company_name,
            industry = intake.industry,
            persona = enrichment.persona_tag,
            size = enrichment.company_size,
        )
    }

    fn linkedin_prompt(lead: &Lead, enrichment: &EnrichmentRecord, variation: Variation) -> String {
        let intake = &lead.intake;
        let style = match variation {
            Variation::A => "friendly and direct",
            Variation::B => "professional and value-driven",
        };

        format!(
            r#"Write a personalized LinkedIn DM (maximum 60 words) to {name}, {role} at {company}.

Context:
- Industry: {industry}
- Persona: {persona}
- Key Challenge: {challenge}

Style: {style}

Requirements:
- Maximum 60 words
- Reference their role or industry naturally
- Mention the challenge
- Clear CTA: "quick call"
- Conversational LinkedIn tone
- No hallucinated facts"#,
            name = intake.full_name,
            role = intake.role_title,
            company = intake.company_name,
            industry = intake.industry,
            persona = enrichment.persona_tag,
            challenge = first_or(&enrichment.pain_points, "operational efficiency"),
        )
    }

    async fn ask(&self, system: &str, prompt: String, max_tokens: u32) -> Result<String, LlmError> {
        let mut request =
            CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
                .with_max_tokens(max_tokens);
        request.temperature = MESSAGE_TEMPERATURE;

        let content = self.llm.complete(request).await?.content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty message".to_string(),
            });
        }
        Ok(content)
    }

    async fn email(
        &self,
        lead: &Lead,
        enrichment: &EnrichmentRecord,
        variation: Variation,
    ) -> Generated<EmailDraft> {
        let prompt = Self::email_prompt(lead, enrichment, variation);
        match self.ask(EMAIL_SYSTEM_PROMPT, prompt, EMAIL_MAX_TOKENS).await {
            Ok(content) => Generated::Primary(parse_email(&content, &lead.intake.industry)),
            Err(e) => {
                warn!(lead_id = lead.id, ?variation, error = %e, "Email generation failed, using template");
                Generated::Fallback {
                    value: TemplatePersonalizer::email(lead, enrichment, variation),
                    reason: format!("email {variation:?}: {e}"),
                }
            }
        }
    }

    async fn linkedin(
        &self,
        lead: &Lead,
        enrichment: &EnrichmentRecord,
        variation: Variation,
    ) -> Generated<LinkedInDraft> {
        let prompt = Self::linkedin_prompt(lead, enrichment, variation);
        match self.ask(LINKEDIN_SYSTEM_PROMPT, prompt, LINKEDIN_MAX_TOKENS).await {
            Ok(message) => Generated::Primary(LinkedInDraft { message }),
            Err(e) => {
                warn!(lead_id = lead.id, ?variation, error = %e, "LinkedIn DM generation failed, using template");
                Generated::Fallback {
                    value: TemplatePersonalizer::linkedin(lead, enrichment, variation),
                    reason: format!("linkedin {variation:?}: {e}"),
                }
            }
        }
    }
}

/// Split `Subject: ...` off the first paragraph of a generated email.
fn parse_email(content: &str, industry: &str) -> EmailDraft {
    if content.contains("Subject:") {
        if let Some((head, body)) = content.split_once("\n\n") {
            return EmailDraft {
                subject: head.replace("Subject:", "").trim().to_string(),
                body: body.trim().to_string(),
            };
        }
    }
    EmailDraft {
        subject: format!("Quick question about {industry} operations"),
        body: content.to_string(),
    }
}

#[async_trait]
impl MessageGenerator for AiPersonalizer {
    async fn generate_messages(
        &self,
        lead: &Lead,
        enrichment: &EnrichmentRecord,
    ) -> Result<Generated<MessageSet>, ProcessorError> {
        let email_a = self.email(lead, enrichment, Variation::A).await;
        let email_b = self.email(lead, enrichment, Variation::B).await;
        let linkedin_a = self.linkedin(lead, enrichment, Variation::A).await;
        let linkedin_b = self.linkedin(lead, enrichment, Variation::B).await;

        let reasons: Vec<String> = [
            email_a.fallback_reason(),
            email_b.fallback_reason(),
            linkedin_a.fallback_reason(),
            linkedin_b.fallback_reason(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();

        let set = MessageSet {
            email_a: email_a.into_value(),
            email_b: email_b.into_value(),
            linkedin_a: linkedin_a.into_value(),
            linkedin_b: linkedin_b.into_value(),
        };

        if reasons.is_empty() {
            Ok(Generated::Primary(set))
        } else {
            Ok(Generated::Fallback {
                value: set,
                reason: reasons.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::enricher::tests::{ScriptedLlm, sample_lead};
    use crate::pipeline::rules::EnrichmentRules;

    fn enrichment(lead: &Lead) -> EnrichmentRecord {
        EnrichmentRules.evaluate(lead)
    }

    #[tokio::test]
    async fn templates_mention_lead_and_pain_point() {
        let lead = sample_lead(1);
        let record = enrichment(&lead);
        let set = TemplatePersonalizer
            .generate_messages(&lead, &record)
            .await
            .unwrap()
            .into_value();

        assert_eq!(set.email_a.subject, "Improving Tech Leader at Summit CloudVentures");
        assert!(set.email_a.body.starts_with("Hi James,"));
        assert!(set.email_a.body.contains("Managing complex cloud infrastructure costs"));
        assert!(set.linkedin_a.message.contains("Technology"));
        assert_ne!(set.email_a.body, set.email_b.body);
        assert_ne!(set.linkedin_a.message, set.linkedin_b.message);
    }

    #[test]
    fn parse_email_splits_subject() {
        let draft = parse_email("Subject: Cutting cloud spend\n\nHi James,\nShort body.", "Technology");
        assert_eq!(draft.subject, "Cutting cloud spend");
        assert_eq!(draft.body, "Hi James,\nShort body.");

        let draft = parse_email("Hi James, no subject here.", "Technology");
        assert_eq!(draft.subject, "Quick question about Technology operations");
    }

    #[tokio::test]
    async fn ai_personalizer_primary_when_all_calls_succeed() {
        let llm = ScriptedLlm::new(vec![
            Ok("Subject: A\n\nBody A".into()),
            Ok("Subject: B\n\nBody B".into()),
            Ok("DM A".into()),
            Ok("DM B".into()),
        ]);
        let lead = sample_lead(1);
        let out = AiPersonalizer::new(Arc::new(llm))
            .generate_messages(&lead, &enrichment(&lead))
            .await
            .unwrap();

        assert!(!out.is_fallback());
        let set = out.into_value();
        assert_eq!(set.email_b.subject, "B");
        assert_eq!(set.linkedin_a.message, "DM A");
    }

    #[tokio::test]
    async fn ai_personalizer_falls_back_per_message() {
        let llm = ScriptedLlm::new(vec![
            Ok("Subject: A\n\nBody A".into()),
            Err("timeout".into()),
            Ok("DM A".into()),
            Ok("   ".into()),
        ]);
        let lead = sample_lead(1);
        let record = enrichment(&lead);
        let out = AiPersonalizer::new(Arc::new(llm))
            .generate_messages(&lead, &record)
            .await
            .unwrap();

        let reason = out.fallback_reason().unwrap().to_string();
        assert!(reason.contains("email B"));
        assert!(reason.contains("linkedin B"));
        let set = out.into_value();
        assert_eq!(set.email_a.subject, "A");
        assert_eq!(set.email_b, TemplatePersonalizer::email(&lead, &record, Variation::B));
        assert_eq!(set.linkedin_a.message, "DM A");
    }
}
