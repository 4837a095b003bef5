//! Simulated LinkedIn outreach. There is no real LinkedIn integration.

use async_trait::async_trait;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::leads::model::Lead;
use crate::outreach::ChannelSender;
use crate::pipeline::types::{Channel, MessageSet};

/// Fraction of simulated sends that succeed.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.95;

pub struct SimulatedLinkedInSender {
    success_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedLinkedInSender {
    pub fn new() -> Self {
        Self::with_rng(DEFAULT_SUCCESS_RATE, StdRng::from_entropy())
    }

    /// Deterministic sender for tests and reproducible runs.
    pub fn seeded(success_rate: f64, seed: u64) -> Self {
        Self::with_rng(success_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(success_rate: f64, rng: StdRng) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }
}

impl Default for SimulatedLinkedInSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for SimulatedLinkedInSender {
    fn channel(&self) -> Channel {
        Channel::Linkedin
    }

    async fn send(&self, lead: &Lead, messages: &MessageSet) -> Result<String, DispatchError> {
        let delivered = self.rng.lock().await.gen_bool(self.success_rate);
        if delivered {
            tracing::info!(lead_id = lead.id, profile = %lead.intake.linkedin_url, "LinkedIn DM simulated");
            Ok(format!(
                "LinkedIn DM to {} ({} chars)",
                lead.intake.linkedin_url,
                messages.linkedin_a.message.chars().count()
            ))
        } else {
            Err(DispatchError::SendFailed {
                channel: Channel::Linkedin.to_string(),
                reason: "LinkedIn API rate limit exceeded".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::enricher::tests::sample_lead;
    use crate::pipeline::personalizer::TemplatePersonalizer;
    use crate::pipeline::rules::EnrichmentRules;

    #[tokio::test]
    async fn success_rate_bounds() {
        let lead = sample_lead(1);
        let messages = TemplatePersonalizer::message_set(&lead, &EnrichmentRules.evaluate(&lead));

        let always = SimulatedLinkedInSender::seeded(1.0, 7);
        let never = SimulatedLinkedInSender::seeded(0.0, 7);
        for _ in 0..20 {
            assert!(always.send(&lead, &messages).await.is_ok());
            assert!(never.send(&lead, &messages).await.is_err());
        }
    }

    #[tokio::test]
    async fn default_rate_mostly_succeeds() {
        let lead = sample_lead(1);
        let messages = TemplatePersonalizer::message_set(&lead, &EnrichmentRules.evaluate(&lead));
        let sender = SimulatedLinkedInSender::seeded(DEFAULT_SUCCESS_RATE, 42);

        let mut ok = 0;
        for _ in 0..400 {
            if sender.send(&lead, &messages).await.is_ok() {
                ok += 1;
            }
        }
        assert!(ok > 340, "only {ok}/400 simulated sends succeeded");
    }
}
