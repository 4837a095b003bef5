//! Synthetic lead generator for bulk runs.
//!
//! Seeded, so the same seed always yields the same batch. Every generated
//! lead is validated (email, website and LinkedIn URL formats) before it is
//! handed to the pipeline.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;

use crate::error::ProcessorError;
use crate::leads::model::NewLead;
use crate::pipeline::types::Stage;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid url regex")
});

/// Per-industry vocabulary.
struct IndustryProfile {
    name: &'static str,
    companies: &'static [&'static str],
    roles: &'static [&'static str],
}

const INDUSTRIES: &[IndustryProfile] = &[
    IndustryProfile {
        name: "Technology",
        companies: &["TechCorp", "DataSystems", "CloudVentures", "AIInnovate", "CyberSolutions"],
        roles: &["VP of Engineering", "CTO", "Head of IT", "Director of Technology", "Chief Data Officer"],
    },
    IndustryProfile {
        name: "Manufacturing",
        companies: &["IndustrialWorks", "ManufactureHub", "PrecisionParts", "AutoAssembly", "ProduceMakers"],
        roles: &["VP of Operations", "COO", "Plant Manager", "Supply Chain Director", "Operations Manager"],
    },
    IndustryProfile {
        name: "Healthcare",
        companies: &["MedicalCare", "HealthSystems", "WellnessGroup", "CareProviders", "HealthTech"],
        roles: &["Chief Medical Officer", "VP of Operations", "Hospital Administrator", "Director of IT", "Head of Procurement"],
    },
    IndustryProfile {
        name: "Retail",
        companies: &["RetailCo", "ShopSmart", "MarketPlace", "ConsumerGoods", "TradeCenter"],
        roles: &["VP of Sales", "Retail Operations Director", "Merchandising Manager", "Store Operations VP", "Chief Retail Officer"],
    },
    IndustryProfile {
        name: "Finance",
        companies: &["FinanceHub", "BankingGroup", "InvestCorp", "CapitalSolutions", "WealthManagement"],
        roles: &["CFO", "VP of Finance", "Treasury Director", "Risk Management Director", "Chief Investment Officer"],
    },
    IndustryProfile {
        name: "Logistics",
        companies: &["LogiTrans", "ShipFast", "SupplyChainPro", "FreightMasters", "DeliveryHub"],
        roles: &["VP of Logistics", "Supply Chain Director", "Operations Manager", "Distribution VP", "Fleet Manager"],
    },
];

const FIRST_NAMES: &[&str] = &[
    "James", "Maria", "Robert", "Linda", "Michael", "Sarah", "David", "Emma", "Daniel", "Olivia",
    "Thomas", "Sophie", "Andrew", "Grace", "Lucas", "Hannah", "Noah", "Chloe", "Ethan", "Priya",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Garcia", "Miller", "Davis", "Martinez", "Wilson",
    "Anderson", "Taylor", "Thomas", "Moore", "Martin", "Lee", "Walker", "Hall", "Young", "King",
    "Patel",
];

const COMPANY_PREFIXES: &[&str] = &[
    "Apex", "Blue", "Summit", "Northwind", "Vertex", "Harbor", "Pioneer", "Silver", "Granite",
    "Evergreen", "Bright", "Atlas",
];

const COUNTRIES: &[&str] = &[
    "United States", "United Kingdom", "Canada", "Germany", "France",
    "Australia", "Netherlands", "Singapore", "Sweden", "Switzerland",
];

const WEBSITE_EXTENSIONS: &[&str] = &[".com", ".io", ".co", ".net"];

/// Contact-field validity counts over a batch of leads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total_leads: usize,
    pub valid_emails: usize,
    pub valid_websites: usize,
    pub valid_linkedin: usize,
    /// Leads per industry.
    pub industry_distribution: BTreeMap<String, usize>,
}

impl ValidationSummary {
    /// Share of valid emails as a percentage, 0.0 for an empty batch.
    pub fn validation_rate(&self) -> f64 {
        if self.total_leads == 0 {
            return 0.0;
        }
        self.valid_emails as f64 * 100.0 / self.total_leads as f64
    }
}

/// Deterministic synthetic lead source.
pub struct LeadGenerator {
    rng: StdRng,
}

impl LeadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate `count` validated leads.
    pub fn generate_leads(&mut self, count: usize) -> Result<Vec<NewLead>, ProcessorError> {
        (0..count).map(|_| self.generate_lead()).collect()
    }

    /// Generate a single validated lead.
    pub fn generate_lead(&mut self) -> Result<NewLead, ProcessorError> {
        let profile = &INDUSTRIES[self.rng.gen_range(0..INDUSTRIES.len())];

        let first_name = self.pick(FIRST_NAMES);
        let last_name = self.pick(LAST_NAMES);
        let company_name = format!("{} {}", self.pick(COMPANY_PREFIXES), self.pick(profile.companies));
        let role_title = self.pick(profile.roles);
        let clean_company = clean_for_domain(&company_name);

        let email = match self.rng.gen_range(0..3) {
            0 => format!(
                "{}.{}@{clean_company}.com",
                first_name.to_lowercase(),
                last_name.to_lowercase()
            ),
            1 => format!(
                "{}{}@{clean_company}.com",
                first_name[..1].to_lowercase(),
                last_name.to_lowercase()
            ),
            _ => format!("{}@{clean_company}.com", first_name.to_lowercase()),
        };

        let mut profile_slug = format!("{}-{}", first_name.to_lowercase(), last_name.to_lowercase());
        if self.rng.gen_bool(0.3) {
            profile_slug.push_str(&format!("-{}", self.rng.gen_range(100..1000)));
        }
        let linkedin_url = format!("https://www.linkedin.com/in/{profile_slug}");
        let company_website = format!(
            "https://www.{clean_company}{}",
            self.pick(WEBSITE_EXTENSIONS)
        );

        let lead = NewLead {
            full_name: format!("{first_name} {last_name}"),
            company_name,
            role_title: role_title.to_string(),
            industry: profile.name.to_string(),
            company_website,
            email,
            phone: None,
            linkedin_url,
            country: self.pick(COUNTRIES).to_string(),
            comments: None,
            source: "generated".to_string(),
        };

        validate(&lead)?;
        Ok(lead)
    }

    fn pick(&mut self, items: &[&'static str]) -> &'static str {
        items[self.rng.gen_range(0..items.len())]
    }

    /// Count well-formed contact fields and tally industries across `leads`.
    pub fn validation_summary(leads: &[NewLead]) -> ValidationSummary {
        leads.iter().fold(
            ValidationSummary {
                total_leads: leads.len(),
                ..ValidationSummary::default()
            },
            |mut summary, lead| {
                summary.valid_emails += usize::from(EMAIL_RE.is_match(&lead.email));
                summary.valid_websites += usize::from(URL_RE.is_match(&lead.company_website));
                summary.valid_linkedin += usize::from(URL_RE.is_match(&lead.linkedin_url));
                *summary
                    .industry_distribution
                    .entry(lead.industry.clone())
                    .or_default() += 1;
                summary
            },
        )
    }
}

/// Check the contact fields of a lead for well-formedness.
pub fn validate(lead: &NewLead) -> Result<(), ProcessorError> {
    let invalid = |field: &str, value: &str| ProcessorError::InvalidOutput {
        stage: Stage::Intake,
        reason: format!("invalid {field}: {value}"),
    };

    if !EMAIL_RE.is_match(&lead.email) {
        return Err(invalid("email", &lead.email));
    }
    if !URL_RE.is_match(&lead.company_website) {
        return Err(invalid("website", &lead.company_website));
    }
    if !URL_RE.is_match(&lead.linkedin_url) {
        return Err(invalid("LinkedIn URL", &lead.linkedin_url));
    }
    Ok(())
}

fn clean_for_domain(company: &str) -> String {
    company
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_batch() {
        let a = LeadGenerator::new(42).generate_leads(20).unwrap();
        let b = LeadGenerator::new(42).generate_leads(20).unwrap();
        assert_eq!(a, b);

        let c = LeadGenerator::new(7).generate_leads(20).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn generated_leads_are_valid_and_consistent() {
        let leads = LeadGenerator::new(42).generate_leads(200).unwrap();
        assert_eq!(leads.len(), 200);

        for lead in &leads {
            assert!(validate(lead).is_ok(), "invalid lead: {lead:?}");
            let profile = INDUSTRIES
                .iter()
                .find(|p| p.name == lead.industry)
                .expect("known industry");
            assert!(profile.roles.contains(&lead.role_title.as_str()));
            assert!(lead.linkedin_url.starts_with("https://www.linkedin.com/in/"));
            assert_eq!(lead.source, "generated");
        }
    }

    #[test]
    fn validate_rejects_bad_email() {
        let mut lead = LeadGenerator::new(1).generate_lead().unwrap();
        lead.email = "not-an-email".into();
        let err = validate(&lead).unwrap_err();
        assert!(err.to_string().contains("invalid email"));
    }

    #[test]
    fn validation_summary_counts_each_field() {
        let mut leads = LeadGenerator::new(42).generate_leads(10).unwrap();
        leads[0].email = "broken".into();
        leads[1].company_website = "www.no-scheme.com".into();
        leads[2].linkedin_url = "linkedin/in/someone".into();
        leads[3].linkedin_url = "ftp://x".into();

        let summary = LeadGenerator::validation_summary(&leads);
        assert_eq!(summary.total_leads, 10);
        assert_eq!(summary.valid_emails, 9);
        assert_eq!(summary.valid_websites, 9);
        assert_eq!(summary.valid_linkedin, 8);
        assert!((summary.validation_rate() - 90.0).abs() < f64::EPSILON);

        let tallied: usize = summary.industry_distribution.values().sum();
        assert_eq!(tallied, 10);
        for (industry, count) in &summary.industry_distribution {
            let expected = leads.iter().filter(|l| &l.industry == industry).count();
            assert_eq!(*count, expected, "{industry}");
        }
    }

    #[test]
    fn validation_summary_of_empty_batch() {
        let summary = LeadGenerator::validation_summary(&[]);
        assert_eq!(summary, ValidationSummary::default());
        assert_eq!(summary.validation_rate(), 0.0);
    }

    #[test]
    fn clean_for_domain_strips_punctuation() {
        assert_eq!(clean_for_domain("Apex Tech-Corp!"), "apextechcorp");
    }
}
