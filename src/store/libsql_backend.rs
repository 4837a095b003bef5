//! libSQL backend: async `LeadStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::leads::model::{Lead, LeadStatus, NewLead};
use crate::pipeline::types::{
    Channel, DispatchOutcome, DispatchResult, EmailDraft, EnrichmentMode, EnrichmentRecord,
    LinkedInDraft, MessageSet, Stage,
};
use crate::store::migrations;
use crate::store::traits::{LeadStore, LeadWithEnrichment, StoreMetrics};

/// libSQL database backend.
///
/// One connection, held behind a lock for the whole of each operation. A
/// `complete_*` transaction therefore runs alone: readers never see its
/// partial writes and no second `BEGIN` can land on the same connection.
/// (In-memory databases are per connection, so pooling is not an option.)
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

async fn count(conn: &Connection, sql: &str) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("count row parse: {e}"))),
        None => Ok(0),
    }
}

async fn begin(conn: &Connection, op: &str) -> Result<Transaction, DatabaseError> {
    conn.transaction()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: begin: {e}")))
}

async fn select_lead(conn: &Connection, id: i64) -> Result<Option<Lead>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?
    {
        Some(row) => Ok(Some(row_to_lead(&row)?)),
        None => Ok(None),
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json(values: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(values).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

const LEAD_COLUMNS: &str = "id, full_name, company_name, role_title, industry, company_website, email, phone, linkedin_url, country, comments, source, status, last_error, created_at, updated_at";

const ENRICHMENT_COLUMNS: &str =
    "company_size, persona_tag, pain_points, buying_triggers, confidence_score, enrichment_mode";

/// Map a libsql Row to a Lead. Column order matches LEAD_COLUMNS.
fn row_to_lead(row: &libsql::Row) -> Result<Lead, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("lead row parse: {e}"));

    let status_str: String = row.get(12).map_err(parse)?;
    let status = status_str
        .parse::<LeadStatus>()
        .map_err(DatabaseError::Serialization)?;
    let created_str: String = row.get(14).map_err(parse)?;
    let updated_str: String = row.get(15).map_err(parse)?;

    Ok(Lead {
        id: row.get(0).map_err(parse)?,
        intake: NewLead {
            full_name: row.get(1).map_err(parse)?,
            company_name: row.get(2).map_err(parse)?,
            role_title: row.get(3).map_err(parse)?,
            industry: row.get(4).map_err(parse)?,
            company_website: row.get(5).map_err(parse)?,
            email: row.get(6).map_err(parse)?,
            phone: row.get::<String>(7).ok(),
            linkedin_url: row.get(8).map_err(parse)?,
            country: row.get(9).map_err(parse)?,
            comments: row.get::<String>(10).ok(),
            source: row.get(11).map_err(parse)?,
        },
        status,
        last_error: row.get::<String>(13).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to an EnrichmentRecord. Column order matches ENRICHMENT_COLUMNS.
fn row_to_enrichment(row: &libsql::Row) -> Result<EnrichmentRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("enrichment row parse: {e}"));

    let pain_points: String = row.get(2).map_err(parse)?;
    let buying_triggers: String = row.get(3).map_err(parse)?;
    let confidence: i64 = row.get(4).map_err(parse)?;
    let mode: String = row.get(5).map_err(parse)?;

    Ok(EnrichmentRecord {
        company_size: row.get(0).map_err(parse)?,
        persona_tag: row.get(1).map_err(parse)?,
        pain_points: from_json(&pain_points),
        buying_triggers: from_json(&buying_triggers),
        confidence_score: confidence.clamp(0, 100) as u8,
        mode: mode.parse().unwrap_or(EnrichmentMode::Offline),
    })
}

/// Compare-and-set the lead status inside an open transaction.
async fn advance(
    tx: &Transaction,
    id: i64,
    from: LeadStatus,
    to: LeadStatus,
    now: &str,
) -> Result<bool, DatabaseError> {
    if !from.can_transition_to(to) {
        return Err(DatabaseError::IllegalTransition { id, from, to });
    }
    let changed = tx
        .execute(
            "UPDATE leads SET status = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), now, id, from.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("advance status: {e}")))?;
    Ok(changed == 1)
}

async fn rollback(tx: Transaction, op: &str) -> Result<bool, DatabaseError> {
    tx.rollback()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: rollback: {e}")))?;
    Ok(false)
}

async fn commit(tx: Transaction, op: &str) -> Result<bool, DatabaseError> {
    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: commit: {e}")))?;
    Ok(true)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl LeadStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&*self.conn().await).await
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "INSERT INTO leads (full_name, company_name, role_title, industry, company_website,
                    email, phone, linkedin_url, country, comments, source, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'NEW', ?12, ?12)
                 RETURNING id",
                params![
                    lead.full_name.as_str(),
                    lead.company_name.as_str(),
                    lead.role_title.as_str(),
                    lead.industry.as_str(),
                    lead.company_website.as_str(),
                    lead.email.as_str(),
                    opt_text(lead.phone.as_deref()),
                    lead.linkedin_url.as_str(),
                    lead.country.as_str(),
                    opt_text(lead.comments.as_deref()),
                    lead.source.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_lead: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_lead: {e}")))?
            .ok_or_else(|| DatabaseError::Query("insert_lead: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("insert_lead id parse: {e}")))?;

        debug!(lead_id = id, email = %lead.email, "Lead inserted into DB");
        Ok(id)
    }

    async fn get_lead(&self, id: i64) -> Result<Option<Lead>, DatabaseError> {
        select_lead(&*self.conn().await, id).await
    }

    async fn list_by_status(
        &self,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = match status {
            Some(status) => {
                conn.query(
                    &format!(
                        "SELECT {LEAD_COLUMNS} FROM leads WHERE status = ?1 ORDER BY created_at DESC, id DESC"
                    ),
                    params![status.as_str()],
                )
                .await
            }
            None => {
                conn.query(
                    &format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC, id DESC"),
                    (),
                )
                .await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?;

        let mut leads = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?
        {
            leads.push(row_to_lead(&row)?);
        }
        Ok(leads)
    }

    async fn transition_status(
        &self,
        id: i64,
        from: LeadStatus,
        to: LeadStatus,
    ) -> Result<bool, DatabaseError> {
        if !from.can_transition_to(to) {
            return Err(DatabaseError::IllegalTransition { id, from, to });
        }
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .await
            .execute(
                "UPDATE leads SET status = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now, id, from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_status: {e}")))?;

        debug!(lead_id = id, %from, %to, applied = changed == 1, "Lead status transition");
        Ok(changed == 1)
    }

    async fn complete_enrichment(
        &self,
        id: i64,
        record: &EnrichmentRecord,
    ) -> Result<bool, DatabaseError> {
        const OP: &str = "complete_enrichment";
        let now = Utc::now().to_rfc3339();
        let pain_points = to_json(&record.pain_points)?;
        let buying_triggers = to_json(&record.buying_triggers)?;

        let conn = self.conn().await;
        let tx = begin(&conn, OP).await?;
        if !advance(&tx, id, LeadStatus::New, LeadStatus::Enriched, &now).await? {
            return rollback(tx, OP).await;
        }
        tx.execute("DELETE FROM enrichment WHERE lead_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("{OP}: {e}")))?;
        tx.execute(
            "INSERT INTO enrichment (lead_id, company_size, persona_tag, pain_points,
                buying_triggers, confidence_score, enrichment_mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                record.company_size.as_str(),
                record.persona_tag.as_str(),
                pain_points,
                buying_triggers,
                i64::from(record.confidence_score),
                record.mode.to_string(),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("{OP}: {e}")))?;

        commit(tx, OP).await
    }

    async fn get_with_enrichment(
        &self,
        id: i64,
    ) -> Result<Option<LeadWithEnrichment>, DatabaseError> {
        let conn = self.conn().await;
        let Some(lead) = select_lead(&conn, id).await? else {
            return Ok(None);
        };

        let mut rows = conn
            .query(
                &format!("SELECT {ENRICHMENT_COLUMNS} FROM enrichment WHERE lead_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_with_enrichment: {e}")))?;

        let enrichment = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_with_enrichment: {e}")))?
        {
            Some(row) => Some(row_to_enrichment(&row)?),
            None => None,
        };

        Ok(Some(LeadWithEnrichment { lead, enrichment }))
    }

    async fn complete_messages(
        &self,
        id: i64,
        messages: &MessageSet,
    ) -> Result<bool, DatabaseError> {
        const OP: &str = "complete_messages";
        let now = Utc::now().to_rfc3339();

        let conn = self.conn().await;
        let tx = begin(&conn, OP).await?;
        if !advance(&tx, id, LeadStatus::Enriched, LeadStatus::Messaged, &now).await? {
            return rollback(tx, OP).await;
        }
        tx.execute("DELETE FROM messages WHERE lead_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("{OP}: {e}")))?;

        let rows: [(&str, &str, Option<&str>, &str); 4] = [
            (
                "email",
                "A",
                Some(messages.email_a.subject.as_str()),
                messages.email_a.body.as_str(),
            ),
            (
                "email",
                "B",
                Some(messages.email_b.subject.as_str()),
                messages.email_b.body.as_str(),
            ),
            ("linkedin", "A", None, messages.linkedin_a.message.as_str()),
            ("linkedin", "B", None, messages.linkedin_b.message.as_str()),
        ];
        for (channel, variation, subject, content) in rows {
            tx.execute(
                "INSERT INTO messages (lead_id, channel, variation, subject, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, channel, variation, opt_text(subject), content, now.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{OP}: {e}")))?;
        }

        commit(tx, OP).await
    }

    async fn get_lead_messages(&self, id: i64) -> Result<Option<MessageSet>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT channel, variation, subject, content FROM messages WHERE lead_id = ?1 ORDER BY id ASC",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead_messages: {e}")))?;

        let (mut email_a, mut email_b, mut linkedin_a, mut linkedin_b) = (None, None, None, None);
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead_messages: {e}")))?
        {
            let parse = |e: libsql::Error| DatabaseError::Query(format!("message row parse: {e}"));
            let channel: String = row.get(0).map_err(parse)?;
            let variation: String = row.get(1).map_err(parse)?;
            let subject: Option<String> = row.get::<String>(2).ok();
            let content: String = row.get(3).map_err(parse)?;

            match (channel.as_str(), variation.as_str()) {
                ("email", "A") => {
                    email_a = Some(EmailDraft {
                        subject: subject.unwrap_or_default(),
                        body: content,
                    })
                }
                ("email", "B") => {
                    email_b = Some(EmailDraft {
                        subject: subject.unwrap_or_default(),
                        body: content,
                    })
                }
                ("linkedin", "A") => linkedin_a = Some(LinkedInDraft { message: content }),
                ("linkedin", "B") => linkedin_b = Some(LinkedInDraft { message: content }),
                _ => {}
            }
        }

        Ok(match (email_a, email_b, linkedin_a, linkedin_b) {
            (Some(email_a), Some(email_b), Some(linkedin_a), Some(linkedin_b)) => Some(MessageSet {
                email_a,
                email_b,
                linkedin_a,
                linkedin_b,
            }),
            _ => None,
        })
    }

    async fn complete_dispatch(
        &self,
        id: i64,
        results: &[DispatchResult],
        status: LeadStatus,
    ) -> Result<bool, DatabaseError> {
        const OP: &str = "complete_dispatch";
        let now = Utc::now().to_rfc3339();

        let conn = self.conn().await;
        let tx = begin(&conn, OP).await?;
        if !advance(&tx, id, LeadStatus::Messaged, status, &now).await? {
            return rollback(tx, OP).await;
        }
        for result in results {
            tx.execute(
                "INSERT INTO outreach (lead_id, channel, status, detail, attempt_count, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    result.channel.as_str(),
                    result.outcome.as_str(),
                    result.detail.as_str(),
                    i64::from(result.attempt_count),
                    result.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{OP}: {e}")))?;
        }

        debug!(lead_id = id, %status, channels = results.len(), "Dispatch results stored");
        commit(tx, OP).await
    }

    async fn list_dispatch_results(&self, id: i64) -> Result<Vec<DispatchResult>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT channel, status, detail, attempt_count, attempted_at FROM outreach WHERE lead_id = ?1 ORDER BY id ASC",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dispatch_results: {e}")))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dispatch_results: {e}")))?
        {
            let parse = |e: libsql::Error| DatabaseError::Query(format!("outreach row parse: {e}"));
            let channel: String = row.get(0).map_err(parse)?;
            let status: String = row.get(1).map_err(parse)?;
            let attempts: i64 = row.get(3).map_err(parse)?;
            let attempted_at: String = row.get(4).map_err(parse)?;

            results.push(DispatchResult {
                channel: channel
                    .parse::<Channel>()
                    .map_err(DatabaseError::Serialization)?,
                outcome: if status == "success" {
                    DispatchOutcome::Success
                } else {
                    DispatchOutcome::Failed
                },
                detail: row.get(2).map_err(parse)?,
                attempt_count: attempts.max(0) as u32,
                timestamp: parse_datetime(&attempted_at),
            });
        }
        Ok(results)
    }

    async fn record_lead_error(
        &self,
        id: i64,
        stage: Stage,
        detail: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .await
            .execute(
                "UPDATE leads SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![format!("{stage}: {detail}"), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_lead_error: {e}")))?;

        debug!(lead_id = id, %stage, "Lead error recorded");
        Ok(())
    }

    async fn metrics(&self) -> Result<StoreMetrics, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM leads GROUP BY status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("metrics: {e}")))?;

        let mut status_breakdown = std::collections::BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("metrics: {e}")))?
        {
            let status: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("metrics row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("metrics row parse: {e}")))?;
            status_breakdown.insert(status, count);
        }

        let total_leads = status_breakdown.values().sum();
        let leads_enriched = ["ENRICHED", "MESSAGED", "SENT", "FAILED"]
            .iter()
            .filter_map(|s| status_breakdown.get(*s))
            .sum();

        Ok(StoreMetrics {
            total_leads,
            leads_enriched,
            messages_generated: count(&conn, "SELECT COUNT(*) FROM messages").await?,
            messages_sent: count(&conn, "SELECT COUNT(*) FROM outreach WHERE status = 'success'")
                .await?,
            messages_failed: count(&conn, "SELECT COUNT(*) FROM outreach WHERE status = 'failed'")
                .await?,
            status_breakdown,
        })
    }

    async fn clear_all(&self) -> Result<(), DatabaseError> {
        self.conn()
            .await
            .execute_batch(
                "DELETE FROM outreach;
                 DELETE FROM messages;
                 DELETE FROM enrichment;
                 DELETE FROM leads;",
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_all: {e}")))?;

        info!("All lead data cleared");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::LeadGenerator;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_lead() -> NewLead {
        LeadGenerator::new(42).generate_lead().unwrap()
    }

    fn make_enrichment() -> EnrichmentRecord {
        EnrichmentRecord {
            company_size: "medium".into(),
            persona_tag: "Tech Leader".into(),
            pain_points: vec!["cloud costs".into(), "hiring".into()],
            buying_triggers: vec!["migration".into()],
            confidence_score: 90,
            mode: EnrichmentMode::Offline,
        }
    }

    fn make_messages() -> MessageSet {
        MessageSet {
            email_a: EmailDraft {
                subject: "Subject A".into(),
                body: "Body A".into(),
            },
            email_b: EmailDraft {
                subject: "Subject B".into(),
                body: "Body B".into(),
            },
            linkedin_a: LinkedInDraft {
                message: "DM A".into(),
            },
            linkedin_b: LinkedInDraft {
                message: "DM B".into(),
            },
        }
    }

    fn result(channel: Channel, outcome: DispatchOutcome) -> DispatchResult {
        DispatchResult {
            channel,
            outcome,
            detail: "detail".into(),
            attempt_count: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_lead() {
        let db = test_db().await;
        let new_lead = make_lead();
        let id = db.insert_lead(&new_lead).await.unwrap();

        let lead = db.get_lead(id).await.unwrap().unwrap();
        assert_eq!(lead.id, id);
        assert_eq!(lead.intake, new_lead);
        assert_eq!(lead.status, LeadStatus::New);
        assert!(lead.last_error.is_none());
    }

    #[tokio::test]
    async fn get_lead_not_found() {
        let db = test_db().await;
        assert!(db.get_lead(999).await.unwrap().is_none());
        assert!(db.get_with_enrichment(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let db = test_db().await;
        let a = db.insert_lead(&make_lead()).await.unwrap();
        let _b = db.insert_lead(&make_lead()).await.unwrap();
        db.complete_enrichment(a, &make_enrichment()).await.unwrap();

        assert_eq!(db.list_by_status(None).await.unwrap().len(), 2);
        assert_eq!(db.list_by_status(Some(LeadStatus::New)).await.unwrap().len(), 1);
        let enriched = db.list_by_status(Some(LeadStatus::Enriched)).await.unwrap();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].id, a);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();

        assert!(db
            .transition_status(id, LeadStatus::New, LeadStatus::Enriched)
            .await
            .unwrap());
        // Second attempt sees ENRICHED, not NEW
        assert!(!db
            .transition_status(id, LeadStatus::New, LeadStatus::Enriched)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn transition_rejects_illegal_edges() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();

        let err = db
            .transition_status(id, LeadStatus::New, LeadStatus::Sent)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::IllegalTransition { .. }));

        let err = db
            .complete_dispatch(id, &[], LeadStatus::New)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::IllegalTransition { .. }));
        assert_eq!(db.get_lead(id).await.unwrap().unwrap().status, LeadStatus::New);
    }

    #[tokio::test]
    async fn enrichment_round_trip() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();
        let record = make_enrichment();

        assert!(db.complete_enrichment(id, &record).await.unwrap());

        let detail = db.get_with_enrichment(id).await.unwrap().unwrap();
        assert_eq!(detail.lead.status, LeadStatus::Enriched);
        assert_eq!(detail.enrichment, Some(record));
    }

    #[tokio::test]
    async fn enrichment_rolls_back_when_status_moved() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();
        db.transition_status(id, LeadStatus::New, LeadStatus::Enriched)
            .await
            .unwrap();

        assert!(!db.complete_enrichment(id, &make_enrichment()).await.unwrap());
        let detail = db.get_with_enrichment(id).await.unwrap().unwrap();
        assert!(detail.enrichment.is_none());
    }

    #[tokio::test]
    async fn messages_round_trip() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();
        db.complete_enrichment(id, &make_enrichment()).await.unwrap();

        assert!(db.get_lead_messages(id).await.unwrap().is_none());
        assert!(db.complete_messages(id, &make_messages()).await.unwrap());

        let stored = db.get_lead_messages(id).await.unwrap().unwrap();
        assert_eq!(stored, make_messages());
        assert_eq!(db.get_lead(id).await.unwrap().unwrap().status, LeadStatus::Messaged);
    }

    #[tokio::test]
    async fn dispatch_results_recorded() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();
        db.complete_enrichment(id, &make_enrichment()).await.unwrap();
        db.complete_messages(id, &make_messages()).await.unwrap();

        let results = vec![
            result(Channel::Email, DispatchOutcome::Success),
            result(Channel::Linkedin, DispatchOutcome::Failed),
        ];
        assert!(db
            .complete_dispatch(id, &results, LeadStatus::Failed)
            .await
            .unwrap());

        let lead = db.get_lead(id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Failed);

        let stored = db.list_dispatch_results(id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].channel, Channel::Email);
        assert!(stored[0].is_success());
        assert_eq!(stored[1].outcome, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn lead_error_recorded_and_cleared_on_advance() {
        let db = test_db().await;
        let id = db.insert_lead(&make_lead()).await.unwrap();

        db.record_lead_error(id, Stage::Enrich, "boom").await.unwrap();
        let lead = db.get_lead(id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.last_error.as_deref(), Some("enrich: boom"));

        db.complete_enrichment(id, &make_enrichment()).await.unwrap();
        let lead = db.get_lead(id).await.unwrap().unwrap();
        assert!(lead.last_error.is_none());
    }

    #[tokio::test]
    async fn metrics_and_clear() {
        let db = test_db().await;
        let a = db.insert_lead(&make_lead()).await.unwrap();
        db.insert_lead(&make_lead()).await.unwrap();
        db.complete_enrichment(a, &make_enrichment()).await.unwrap();
        db.complete_messages(a, &make_messages()).await.unwrap();
        db.complete_dispatch(
            a,
            &[result(Channel::Email, DispatchOutcome::Success)],
            LeadStatus::Sent,
        )
        .await
        .unwrap();

        let metrics = db.metrics().await.unwrap();
        assert_eq!(metrics.total_leads, 2);
        assert_eq!(metrics.leads_enriched, 1);
        assert_eq!(metrics.messages_generated, 4);
        assert_eq!(metrics.messages_sent, 1);
        assert_eq!(metrics.messages_failed, 0);
        assert_eq!(metrics.status_breakdown.get("NEW"), Some(&1));
        assert_eq!(metrics.status_breakdown.get("SENT"), Some(&1));

        db.clear_all().await.unwrap();
        assert_eq!(db.metrics().await.unwrap(), StoreMetrics::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_half_written_stage() {
        let db = Arc::new(test_db().await);
        let mut generator = LeadGenerator::new(7);
        let mut ids = Vec::new();
        for _ in 0..20 {
            let lead = generator.generate_lead().unwrap();
            ids.push(db.insert_lead(&lead).await.unwrap());
        }

        let writer = {
            let db = Arc::clone(&db);
            let ids = ids.clone();
            tokio::spawn(async move {
                for id in ids {
                    assert!(db.complete_enrichment(id, &make_enrichment()).await.unwrap());
                }
            })
        };
        let reader = {
            let db = Arc::clone(&db);
            let ids = ids.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    for &id in &ids {
                        let detail = db.get_with_enrichment(id).await.unwrap().unwrap();
                        if detail.lead.status == LeadStatus::Enriched {
                            assert!(detail.enrichment.is_some(), "lead {id} enriched without record");
                        }
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_transactions_and_clear_do_not_collide() {
        let db = Arc::new(test_db().await);
        let mut generator = LeadGenerator::new(11);
        let mut ids = Vec::new();
        for _ in 0..10 {
            let lead = generator.generate_lead().unwrap();
            let id = db.insert_lead(&lead).await.unwrap();
            db.complete_enrichment(id, &make_enrichment()).await.unwrap();
            ids.push(id);
        }

        let mut tasks = Vec::new();
        for id in ids {
            let db = Arc::clone(&db);
            tasks.push(tokio::spawn(async move {
                // a lead may already be gone if the clear ran first
                db.complete_messages(id, &make_messages()).await.map(|_| ())
            }));
        }
        let clear = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.clear_all().await })
        };

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        clear.await.unwrap().unwrap();

        // writes that beat the clear were wiped, later ones found no lead
        assert_eq!(db.metrics().await.unwrap(), StoreMetrics::default());
    }

    #[tokio::test]
    async fn open_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("leads.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        db.insert_lead(&make_lead()).await.unwrap();
        assert!(db_path.exists());
    }
}
