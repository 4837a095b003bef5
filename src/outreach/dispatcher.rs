//! Outreach dispatcher.
//!
//! Sends a lead's messages on each requested channel under a shared rate
//! limit. Every attempt, retries included, passes through the limiter.
//! Send errors are retried with exponential backoff and end up in the
//! per-channel `DispatchResult`; they never escape as `Err`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::OutreachConfig;
use crate::error::DispatchError;
use crate::leads::model::{Lead, LeadStatus};
use crate::outreach::ChannelSender;
use crate::outreach::rate_limiter::{RateLimiter, SharedRateLimiter};
use crate::pipeline::types::{Channel, DispatchOutcome, DispatchResult, MessageSet};

pub struct Dispatcher {
    config: OutreachConfig,
    limiter: SharedRateLimiter,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl Dispatcher {
    /// Create a dispatcher with its own private rate budget.
    pub fn new(config: OutreachConfig, senders: Vec<Arc<dyn ChannelSender>>) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_per_minute,
            config.rate_window,
            config.min_spacing,
        )
        .shared();
        Self::with_limiter(config, limiter, senders)
    }

    /// Create a dispatcher that draws from an existing rate budget.
    pub fn with_limiter(
        config: OutreachConfig,
        limiter: SharedRateLimiter,
        senders: Vec<Arc<dyn ChannelSender>>,
    ) -> Self {
        let senders = senders.into_iter().map(|s| (s.channel(), s)).collect();
        Self {
            config,
            limiter,
            senders,
        }
    }

    pub fn limiter(&self) -> SharedRateLimiter {
        Arc::clone(&self.limiter)
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Dispatch on each channel in turn. One result per requested channel.
    pub async fn dispatch(
        &self,
        lead: &Lead,
        messages: &MessageSet,
        channels: &[Channel],
    ) -> BTreeMap<Channel, DispatchResult> {
        let mut results = BTreeMap::new();
        for &channel in channels {
            let result = self.dispatch_channel(lead, messages, channel).await;
            info!(
                lead_id = lead.id,
                %channel,
                outcome = result.outcome.as_str(),
                attempts = result.attempt_count,
                "Outreach attempted"
            );
            results.insert(channel, result);
        }
        results
    }

    async fn dispatch_channel(
        &self,
        lead: &Lead,
        messages: &MessageSet,
        channel: Channel,
    ) -> DispatchResult {
        if self.config.dry_run {
            self.limiter.lock().await.acquire().await;
            let recipient = match channel {
                Channel::Email => lead.intake.email.as_str(),
                Channel::Linkedin => lead.intake.linkedin_url.as_str(),
            };
            return result(
                channel,
                DispatchOutcome::Success,
                format!("[dry run] simulated {channel} send to {recipient}"),
                1,
            );
        }

        let Some(sender) = self.senders.get(&channel) else {
            let err = DispatchError::NoSender {
                channel: channel.to_string(),
            };
            warn!(lead_id = lead.id, %channel, "No sender configured");
            return result(channel, DispatchOutcome::Failed, err.to_string(), 0);
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.lock().await.acquire().await;

            match sender.send(lead, messages).await {
                Ok(detail) => return result(channel, DispatchOutcome::Success, detail, attempt),
                Err(e) if attempt > self.config.max_retries => {
                    warn!(lead_id = lead.id, %channel, attempts = attempt, error = %e, "Outreach retries exhausted");
                    return result(channel, DispatchOutcome::Failed, e.to_string(), attempt);
                }
                Err(e) => {
                    let delay = self.config.backoff_base * 2u32.saturating_pow(attempt - 1);
                    debug!(
                        lead_id = lead.id,
                        %channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn result(
    channel: Channel,
    outcome: DispatchOutcome,
    detail: String,
    attempt_count: u32,
) -> DispatchResult {
    DispatchResult {
        channel,
        outcome,
        detail,
        attempt_count,
        timestamp: Utc::now(),
    }
}

/// `SENT` only when every requested channel succeeded.
///
/// Partial success counts as `FAILED`, as does an empty result set.
pub fn aggregate_status(results: &BTreeMap<Channel, DispatchResult>) -> LeadStatus {
    if !results.is_empty() && results.values().all(DispatchResult::is_success) {
        LeadStatus::Sent
    } else {
        LeadStatus::Failed
    }
}
