//! Outreach delivery: rate-limited, retrying dispatch over channel senders.

pub mod dispatcher;
pub mod email;
pub mod linkedin;
pub mod rate_limiter;

pub use dispatcher::{Dispatcher, aggregate_status};
pub use email::SmtpEmailSender;
pub use linkedin::SimulatedLinkedInSender;
pub use rate_limiter::{RateLimiter, SharedRateLimiter};

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::leads::model::Lead;
use crate::pipeline::types::{Channel, MessageSet};

/// Delivers variation A of a lead's messages on one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Send once. Returns a delivery detail on success.
    async fn send(&self, lead: &Lead, messages: &MessageSet) -> Result<String, DispatchError>;
}
