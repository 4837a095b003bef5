//! Shared types for the lead pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::leads::generator::ValidationSummary;
use crate::leads::model::NewLead;

// ── Stages ──────────────────────────────────────────────────────────

/// One step of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Enrich,
    Personalize,
    Dispatch,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Self::Intake, Self::Enrich, Self::Personalize, Self::Dispatch];

    /// Position in the run, used for progress accounting.
    pub fn index(&self) -> u8 {
        match self {
            Self::Intake => 0,
            Self::Enrich => 1,
            Self::Personalize => 2,
            Self::Dispatch => 3,
        }
    }

    /// Operator-facing label shown while the stage is active.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Intake => "Generating leads",
            Self::Enrich => "Enriching leads",
            Self::Personalize => "Generating messages",
            Self::Dispatch => "Sending outreach",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Intake => "intake",
            Self::Enrich => "enrich",
            Self::Personalize => "personalize",
            Self::Dispatch => "dispatch",
        };
        f.write_str(s)
    }
}

// ── Processor output ────────────────────────────────────────────────

/// Output of a processor that may degrade to a simpler strategy.
///
/// `Fallback` carries the reason the primary strategy was abandoned, so
/// callers can tell "AI succeeded" apart from "AI failed, rules used".
#[derive(Debug, Clone, PartialEq)]
pub enum Generated<T> {
    Primary(T),
    Fallback { value: T, reason: String },
}

impl<T> Generated<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Primary(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Primary(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Primary(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// How enrichment and message generation are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    /// Rule tables and templates only.
    #[default]
    Offline,
    /// LLM first, rules as fallback.
    Ai,
}

impl fmt::Display for EnrichmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Ai => f.write_str("ai"),
        }
    }
}

impl FromStr for EnrichmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "ai" => Ok(Self::Ai),
            other => Err(format!("Invalid enrichment mode: {other}")),
        }
    }
}

/// Enrichment stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub company_size: String,
    pub persona_tag: String,
    pub pain_points: Vec<String>,
    pub buying_triggers: Vec<String>,
    /// 0–100.
    pub confidence_score: u8,
    #[serde(default, rename = "enrichment_mode")]
    pub mode: EnrichmentMode,
}

/// A generated email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// A generated LinkedIn direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInDraft {
    pub message: String,
}

/// Message generation stage output: two variations per channel.
/// Dispatch sends variation A.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSet {
    pub email_a: EmailDraft,
    pub email_b: EmailDraft,
    pub linkedin_a: LinkedInDraft,
    pub linkedin_b: LinkedInDraft,
}

// ── Channels & dispatch ─────────────────────────────────────────────

/// One outreach medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Linkedin,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Linkedin => "linkedin",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "linkedin" => Ok(Self::Linkedin),
            other => Err(format!("Invalid channel: {other}")),
        }
    }
}

/// Which channels a run sends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelection {
    Email,
    Linkedin,
    #[default]
    Both,
}

impl ChannelSelection {
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            Self::Email => vec![Channel::Email],
            Self::Linkedin => vec![Channel::Linkedin],
            Self::Both => vec![Channel::Email, Channel::Linkedin],
        }
    }
}

/// Outcome of one channel's outreach attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Success,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Per-channel result of dispatching one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub channel: Channel,
    pub outcome: DispatchOutcome,
    pub detail: String,
    pub attempt_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome == DispatchOutcome::Success
    }
}

// ── Runs ────────────────────────────────────────────────────────────

/// Where a run's leads come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMode {
    /// One externally supplied lead.
    Single { lead: NewLead },
    /// A synthetic batch from the seeded generator.
    Bulk { count: usize, seed: u64 },
    /// Leads already in the store. Nothing is intaken.
    Stored,
}

/// Parameters of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: RunMode,
    pub enrichment_mode: EnrichmentMode,
    pub dry_run: bool,
    pub channels: ChannelSelection,
    /// Bulk mode only: wipe the store before intake.
    pub reset_store: bool,
}

impl RunConfig {
    pub fn bulk(count: usize) -> Self {
        Self {
            mode: RunMode::Bulk { count, seed: 42 },
            enrichment_mode: EnrichmentMode::Offline,
            dry_run: true,
            channels: ChannelSelection::Both,
            reset_store: true,
        }
    }

    pub fn single(lead: NewLead) -> Self {
        Self {
            mode: RunMode::Single { lead },
            enrichment_mode: EnrichmentMode::Offline,
            dry_run: true,
            channels: ChannelSelection::Both,
            reset_store: false,
        }
    }

    pub fn stored() -> Self {
        Self {
            mode: RunMode::Stored,
            enrichment_mode: EnrichmentMode::Offline,
            dry_run: true,
            channels: ChannelSelection::Both,
            reset_store: false,
        }
    }
}

/// Returned by `start_run` once a run has been accepted.
#[derive(Debug, Clone, Serialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub config: RunConfig,
}

/// A per-lead failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadFailure {
    pub lead_id: i64,
    pub stage: Stage,
    pub reason: String,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub intaken: usize,
    pub enriched: usize,
    pub messaged: usize,
    pub sent: usize,
    pub failed: usize,
    pub fallbacks: usize,
    pub failures: Vec<LeadFailure>,
    /// The run observed `stop()` before finishing.
    pub stopped: bool,
    /// Bulk intake only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_indices_follow_run_order() {
        let indices: Vec<u8> = Stage::ALL.iter().map(Stage::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn generated_exposes_fallback_reason() {
        let primary = Generated::Primary(1);
        let fallback = Generated::Fallback {
            value: 2,
            reason: "llm timeout".into(),
        };
        assert!(!primary.is_fallback());
        assert_eq!(primary.fallback_reason(), None);
        assert_eq!(fallback.fallback_reason(), Some("llm timeout"));
        assert_eq!(*fallback.value(), 2);
        assert_eq!(fallback.into_value(), 2);
    }

    #[test]
    fn channel_selection_expands() {
        assert_eq!(
            ChannelSelection::Both.channels(),
            vec![Channel::Email, Channel::Linkedin]
        );
        assert_eq!(ChannelSelection::Linkedin.channels(), vec![Channel::Linkedin]);
    }

    #[test]
    fn enrichment_record_accepts_llm_json() {
        let record: EnrichmentRecord = serde_json::from_str(
            r#"{
                "company_size": "enterprise",
                "persona_tag": "Tech Leader",
                "pain_points": ["a", "b", "c"],
                "buying_triggers": ["x"],
                "confidence_score": 85
            }"#,
        )
        .unwrap();
        assert_eq!(record.mode, EnrichmentMode::Offline);
        assert_eq!(record.confidence_score, 85);
    }

    #[test]
    fn run_mode_is_tagged() {
        let json = serde_json::to_value(RunMode::Bulk { count: 3, seed: 42 }).unwrap();
        assert_eq!(json["kind"], "bulk");
        assert_eq!(json["count"], 3);

        let json = serde_json::to_value(RunMode::Stored).unwrap();
        assert_eq!(json["kind"], "stored");
    }
}
