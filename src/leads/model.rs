//! Lead types and the lead status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a lead.
///
/// `NEW → ENRICHED → MESSAGED → (SENT | FAILED)`. There is no edge back to an
/// earlier state; `SENT` and `FAILED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeadStatus {
    /// Freshly intaken.
    New,
    /// Enrichment record stored.
    Enriched,
    /// Outreach messages generated.
    Messaged,
    /// Every requested channel succeeded.
    Sent,
    /// At least one requested channel failed.
    Failed,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        Self::New,
        Self::Enriched,
        Self::Messaged,
        Self::Sent,
        Self::Failed,
    ];

    /// Check if this status allows transitioning to `target`.
    pub fn can_transition_to(&self, target: LeadStatus) -> bool {
        use LeadStatus::*;

        matches!(
            (self, target),
            (New, Enriched) | (Enriched, Messaged) | (Messaged, Sent) | (Messaged, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Enriched => "ENRICHED",
            Self::Messaged => "MESSAGED",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "ENRICHED" => Ok(Self::Enriched),
            "MESSAGED" => Ok(Self::Messaged),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Invalid status: {other}")),
        }
    }
}

/// Intake fields for a lead that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub full_name: String,
    pub company_name: String,
    pub role_title: String,
    pub industry: String,
    pub company_website: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub linkedin_url: String,
    pub country: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "external".to_string()
}

impl NewLead {
    /// First token of the full name, used in greetings.
    pub fn first_name(&self) -> &str {
        first_token(&self.full_name)
    }
}

/// A stored lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    #[serde(flatten)]
    pub intake: NewLead,
    pub status: LeadStatus,
    /// Most recent per-lead processing error, cleared on the next advance.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn first_name(&self) -> &str {
        self.intake.first_name()
    }
}

fn first_token(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}
