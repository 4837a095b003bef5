//! `LeadStore` trait: single async interface for lead persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DatabaseError;
use crate::leads::model::{Lead, LeadStatus, NewLead};
use crate::pipeline::types::{DispatchResult, EnrichmentRecord, MessageSet, Stage};

/// A lead joined with its enrichment record (if any).
#[derive(Debug, Clone, Serialize)]
pub struct LeadWithEnrichment {
    #[serde(flatten)]
    pub lead: Lead,
    pub enrichment: Option<EnrichmentRecord>,
}

/// Aggregate counters for the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    pub total_leads: i64,
    /// Leads that made it past `NEW`.
    pub leads_enriched: i64,
    pub messages_generated: i64,
    pub messages_sent: i64,
    pub messages_failed: i64,
    pub status_breakdown: BTreeMap<String, i64>,
}

/// Backend-agnostic lead store.
///
/// Every `complete_*` method is one atomic write scoped to one lead: the
/// status compare-and-set and the stage payload commit together or not at
/// all. They return `Ok(false)` when the lead was not in the expected status.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Insert a new lead at `NEW`. Returns its id.
    async fn insert_lead(&self, lead: &NewLead) -> Result<i64, DatabaseError>;

    /// Get a lead by id.
    async fn get_lead(&self, id: i64) -> Result<Option<Lead>, DatabaseError>;

    /// List leads with the given status (all leads for `None`), newest first.
    async fn list_by_status(&self, status: Option<LeadStatus>)
    -> Result<Vec<Lead>, DatabaseError>;

    /// Move a lead from `from` to `to`. Rejects edges outside the state machine.
    async fn transition_status(
        &self,
        id: i64,
        from: LeadStatus,
        to: LeadStatus,
    ) -> Result<bool, DatabaseError>;

    /// Store the enrichment record and move `NEW → ENRICHED`.
    async fn complete_enrichment(
        &self,
        id: i64,
        record: &EnrichmentRecord,
    ) -> Result<bool, DatabaseError>;

    /// Get a lead together with its enrichment record.
    async fn get_with_enrichment(&self, id: i64)
    -> Result<Option<LeadWithEnrichment>, DatabaseError>;

    /// Store generated messages and move `ENRICHED → MESSAGED`.
    async fn complete_messages(&self, id: i64, messages: &MessageSet)
    -> Result<bool, DatabaseError>;

    /// Get the generated messages for a lead.
    async fn get_lead_messages(&self, id: i64) -> Result<Option<MessageSet>, DatabaseError>;

    /// Store per-channel results and move `MESSAGED → SENT | FAILED`.
    async fn complete_dispatch(
        &self,
        id: i64,
        results: &[DispatchResult],
        status: LeadStatus,
    ) -> Result<bool, DatabaseError>;

    /// Get recorded dispatch results for a lead, oldest first.
    async fn list_dispatch_results(&self, id: i64) -> Result<Vec<DispatchResult>, DatabaseError>;

    /// Record a per-lead processing error without changing status.
    async fn record_lead_error(
        &self,
        id: i64,
        stage: Stage,
        detail: &str,
    ) -> Result<(), DatabaseError>;

    /// Aggregate counters.
    async fn metrics(&self) -> Result<StoreMetrics, DatabaseError>;

    /// Delete all leads and their stage data.
    async fn clear_all(&self) -> Result<(), DatabaseError>;
}
