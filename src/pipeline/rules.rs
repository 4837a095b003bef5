//! Offline enrichment rules engine.
//!
//! Derives an enrichment record from role title and industry alone:
//! - company size from the first matching role keyword
//! - persona tag from an (industry, role) table
//! - pain points and buying triggers per industry
//! - confidence from seniority and whether the industry is known
//!
//! Used directly in offline mode and as the fallback in AI mode.

use tracing::debug;

use crate::leads::model::Lead;
use crate::pipeline::types::{EnrichmentMode, EnrichmentRecord};

/// Base confidence for a rule-derived record.
const BASE_CONFIDENCE: u8 = 75;
/// Bonus for C-level and VP roles.
const SENIORITY_BONUS: u8 = 10;
/// Bonus when the industry has its own tables.
const KNOWN_INDUSTRY_BONUS: u8 = 15;

/// Role keyword → company size. Checked in order; first match wins.
const COMPANY_SIZE_RULES: &[(&str, &str)] = &[
    ("VP", "medium"),
    ("Director", "medium"),
    ("Chief", "enterprise"),
    ("CTO", "enterprise"),
    ("CFO", "enterprise"),
    ("COO", "enterprise"),
    ("Manager", "small"),
    ("Head", "medium"),
];

const DEFAULT_COMPANY_SIZE: &str = "medium";
const DEFAULT_PERSONA: &str = "Business Leader";

/// Vocabulary for one industry.
struct IndustryRules {
    industry: &'static str,
    personas: &'static [(&'static str, &'static str)],
    pain_points: &'static [&'static str],
    buying_triggers: &'static [&'static str],
}

const INDUSTRY_RULES: &[IndustryRules] = &[
    IndustryRules {
        industry: "Technology",
        personas: &[
            ("VP of Engineering", "Tech Leader"),
            ("CTO", "Technology Executive"),
            ("Head of IT", "IT Decision Maker"),
            ("Director of Technology", "Tech Leader"),
            ("Chief Data Officer", "Data Leader"),
        ],
        pain_points: &[
            "Managing complex cloud infrastructure costs",
            "Scaling development teams efficiently",
            "Ensuring data security and compliance",
        ],
        buying_triggers: &["Digital transformation initiative", "Cloud migration project"],
    },
    IndustryRules {
        industry: "Manufacturing",
        personas: &[
            ("VP of Operations", "Operations Executive"),
            ("COO", "C-Suite Operations"),
            ("Plant Manager", "Operations Manager"),
            ("Supply Chain Director", "Supply Chain Leader"),
            ("Operations Manager", "Operations Manager"),
        ],
        pain_points: &[
            "Optimizing production line efficiency",
            "Managing supply chain disruptions",
            "Reducing operational downtime",
        ],
        buying_triggers: &["Expansion or new facility opening", "Automation initiative"],
    },
    IndustryRules {
        industry: "Healthcare",
        personas: &[
            ("Chief Medical Officer", "Healthcare Executive"),
            ("VP of Operations", "Healthcare Operations"),
            ("Hospital Administrator", "Healthcare Admin"),
            ("Director of IT", "Healthcare IT Leader"),
            ("Head of Procurement", "Procurement Head"),
        ],
        pain_points: &[
            "Improving patient care coordination",
            "Managing regulatory compliance",
            "Reducing operational costs while maintaining quality",
        ],
        buying_triggers: &["New facility or expansion", "Regulatory compliance deadline"],
    },
    IndustryRules {
        industry: "Retail",
        personas: &[
            ("VP of Sales", "Sales Executive"),
            ("Retail Operations Director", "Retail Ops Leader"),
            ("Merchandising Manager", "Merchandising Head"),
            ("Store Operations VP", "Retail Executive"),
            ("Chief Retail Officer", "C-Suite Retail"),
        ],
        pain_points: &[
            "Managing inventory across multiple locations",
            "Improving customer experience",
            "Optimizing supply chain and logistics",
        ],
        buying_triggers: &["Omnichannel expansion", "Peak season preparation"],
    },
    IndustryRules {
        industry: "Finance",
        personas: &[
            ("CFO", "Finance Executive"),
            ("VP of Finance", "Finance Leader"),
            ("Treasury Director", "Treasury Leader"),
            ("Risk Management Director", "Risk Leader"),
            ("Chief Investment Officer", "Investment Executive"),
        ],
        pain_points: &[
            "Managing financial risk and compliance",
            "Improving operational efficiency",
            "Modernizing legacy systems",
        ],
        buying_triggers: &["Regulatory compliance requirement", "System modernization project"],
    },
    IndustryRules {
        industry: "Logistics",
        personas: &[
            ("VP of Logistics", "Logistics Executive"),
            ("Supply Chain Director", "Supply Chain Leader"),
            ("Operations Manager", "Logistics Manager"),
            ("Distribution VP", "Distribution Leader"),
            ("Fleet Manager", "Fleet Operations"),
        ],
        pain_points: &[
            "Optimizing route planning and fuel costs",
            "Managing fleet maintenance and downtime",
            "Improving delivery speed and reliability",
        ],
        buying_triggers: &["Fleet expansion", "Route optimization initiative"],
    },
];

const DEFAULT_PAIN_POINTS: &[&str] = &[
    "Improving operational efficiency",
    "Managing costs",
    "Scaling operations",
];

const DEFAULT_BUYING_TRIGGERS: &[&str] = &["Business expansion", "Cost optimization initiative"];

/// Rule-based enrichment. Pure and infallible.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichmentRules;

impl EnrichmentRules {
    pub fn evaluate(&self, lead: &Lead) -> EnrichmentRecord {
        let role = lead.intake.role_title.as_str();
        let industry = lead.intake.industry.as_str();
        let rules = INDUSTRY_RULES.iter().find(|r| r.industry == industry);

        let company_size = COMPANY_SIZE_RULES
            .iter()
            .find(|(keyword, _)| role.contains(*keyword))
            .map_or(DEFAULT_COMPANY_SIZE, |&(_, size)| size);

        let persona_tag = rules
            .and_then(|r| r.personas.iter().find(|(title, _)| *title == role))
            .map_or(DEFAULT_PERSONA, |&(_, persona)| persona);

        let pain_points = rules.map_or(DEFAULT_PAIN_POINTS, |r| r.pain_points);
        let buying_triggers = rules.map_or(DEFAULT_BUYING_TRIGGERS, |r| r.buying_triggers);

        let mut confidence = BASE_CONFIDENCE;
        if role.contains("Chief") || role.contains("VP") {
            confidence += SENIORITY_BONUS;
        }
        if rules.is_some() {
            confidence += KNOWN_INDUSTRY_BONUS;
        }

        debug!(lead_id = lead.id, company_size, persona_tag, confidence, "Rules enrichment");

        EnrichmentRecord {
            company_size: company_size.to_string(),
            persona_tag: persona_tag.to_string(),
            pain_points: pain_points.iter().take(3).map(|s| s.to_string()).collect(),
            buying_triggers: buying_triggers.iter().take(2).map(|s| s.to_string()).collect(),
            confidence_score: confidence.min(100),
            mode: EnrichmentMode::Offline,
        }
    }
}
