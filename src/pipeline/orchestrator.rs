//! Pipeline orchestrator: drives leads through the stage sequence.
//!
//! Flow per run:
//! 1. Intake: generate a seeded batch (bulk) or insert one lead (single)
//! 2. Enrich every `NEW` lead
//! 3. Generate messages for every `ENRICHED` lead
//! 4. Dispatch every `MESSAGED` lead and record `SENT` / `FAILED`
//!
//! Stages run breadth-first. A processor error or panic only costs the lead
//! it happened on; storage errors and unavailable processors abort the run.
//! A single stage can also be run alone over the leads already waiting at it.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, OutreachConfig};
use crate::error::{DatabaseError, Error, PipelineError, ProcessorError};
use crate::leads::generator::{self, LeadGenerator};
use crate::leads::model::{Lead, LeadStatus};
use crate::llm::{self, LlmProvider};
use crate::outreach::{
    ChannelSender, Dispatcher, RateLimiter, SharedRateLimiter, SimulatedLinkedInSender,
    SmtpEmailSender, aggregate_status,
};
use crate::pipeline::enricher::{AiEnricher, Enricher, RuleEnricher};
use crate::pipeline::personalizer::{AiPersonalizer, MessageGenerator, TemplatePersonalizer};
use crate::pipeline::run_state::{RunSnapshot, RunState, stage_progress};
use crate::pipeline::types::{
    Channel, ChannelSelection, EnrichmentMode, LeadFailure, RunConfig, RunMode, RunReport,
    RunTicket, Stage,
};
use crate::store::{LeadStore, StoreMetrics};

/// Upper bound on a bulk batch.
pub const MAX_BULK_LEADS: usize = 1000;

/// The processors one run uses.
pub struct StageProcessors {
    pub enricher: Arc<dyn Enricher>,
    pub personalizer: Arc<dyn MessageGenerator>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Builds the processors for a run. Failing here aborts the run.
pub trait ProcessorProvider: Send + Sync {
    fn processors(&self, config: &RunConfig) -> Result<StageProcessors, ProcessorError>;
}

/// Production processor factory.
///
/// Every dispatcher it builds draws from the same rate budget, so the limit
/// holds across consecutive runs.
pub struct DefaultProcessors {
    outreach: OutreachConfig,
    limiter: SharedRateLimiter,
    llm: Option<Arc<dyn LlmProvider>>,
    email: Option<Arc<dyn ChannelSender>>,
    linkedin: Arc<dyn ChannelSender>,
}

impl DefaultProcessors {
    /// Offline processors, simulated LinkedIn, no live email.
    pub fn new(outreach: OutreachConfig) -> Self {
        let limiter = RateLimiter::new(
            outreach.rate_limit_per_minute,
            outreach.rate_window,
            outreach.min_spacing,
        )
        .shared();
        Self {
            outreach,
            limiter,
            llm: None,
            email: None,
            linkedin: Arc::new(SimulatedLinkedInSender::new()),
        }
    }

    /// Wire up LLM and SMTP from application config when present.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let mut processors = Self::new(config.outreach.clone());
        if let Some(llm_config) = &config.llm {
            processors = processors.with_llm(llm::create_provider(llm_config)?);
        }
        if let Some(smtp) = &config.smtp {
            processors = processors.with_email_sender(Arc::new(SmtpEmailSender::new(smtp)?));
        }
        Ok(processors)
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_email_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn with_linkedin_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.linkedin = sender;
        self
    }
}

impl ProcessorProvider for DefaultProcessors {
    fn processors(&self, config: &RunConfig) -> Result<StageProcessors, ProcessorError> {
        let (enricher, personalizer): (Arc<dyn Enricher>, Arc<dyn MessageGenerator>) =
            match (config.enrichment_mode, &self.llm) {
                (EnrichmentMode::Offline, _) => {
                    (Arc::new(RuleEnricher::new()), Arc::new(TemplatePersonalizer))
                }
                (EnrichmentMode::Ai, Some(llm)) => (
                    Arc::new(AiEnricher::new(Arc::clone(llm))),
                    Arc::new(AiPersonalizer::new(Arc::clone(llm))),
                ),
                (EnrichmentMode::Ai, None) => {
                    return Err(ProcessorError::Unavailable {
                        stage: Stage::Enrich,
                        reason: "AI mode requested but GROQ_API_KEY is not configured".into(),
                    });
                }
            };

        let mut senders = vec![Arc::clone(&self.linkedin)];
        if let Some(email) = &self.email {
            senders.push(Arc::clone(email));
        }
        let outreach = OutreachConfig {
            dry_run: config.dry_run,
            ..self.outreach.clone()
        };

        Ok(StageProcessors {
            enricher,
            personalizer,
            dispatcher: Arc::new(Dispatcher::with_limiter(
                outreach,
                Arc::clone(&self.limiter),
                senders,
            )),
        })
    }
}

/// Which leads a run's later stages may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    All,
    Only(HashSet<i64>),
}

/// What one run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Every stage in order.
    Full,
    /// One stage over at most `limit` leads.
    Only { stage: Stage, limit: Option<usize> },
}

impl Plan {
    fn includes(&self, stage: Stage) -> bool {
        match self {
            Self::Full => true,
            Self::Only { stage: only, .. } => *only == stage,
        }
    }

    fn limit(&self) -> Option<usize> {
        match self {
            Self::Full => None,
            Self::Only { limit, .. } => *limit,
        }
    }
}

/// Runs the pipeline. At most one run is active at a time.
///
/// Besides full runs, each stage can be driven on its own over the leads
/// already waiting for it (`generate_leads`, `enrich_leads`,
/// `generate_messages`, `send_outreach`). Those calls share the running
/// flag with full runs, so they conflict with one another and honor `stop()`.
pub struct Orchestrator {
    store: Arc<dyn LeadStore>,
    processors: Arc<dyn ProcessorProvider>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn LeadStore>, processors: Arc<dyn ProcessorProvider>) -> Self {
        Self {
            store,
            processors,
            state: RunState::new(),
        }
    }

    pub async fn status(&self) -> RunSnapshot {
        self.state.snapshot().await
    }

    pub async fn is_running(&self) -> bool {
        self.state.snapshot().await.running
    }

    /// Store-wide counters.
    pub async fn metrics(&self) -> Result<StoreMetrics, DatabaseError> {
        self.store.metrics().await
    }

    /// Request the active run to stop at the next stage or lead boundary.
    pub async fn stop(&self) -> bool {
        let stopped = self.state.stop().await;
        if stopped {
            info!("Pipeline stop requested");
        } else {
            debug!("Stop requested with no active run");
        }
        stopped
    }

    /// Accept a run and execute it on a background task.
    pub async fn start_run(
        self: &Arc<Self>,
        config: RunConfig,
    ) -> Result<RunTicket, PipelineError> {
        let config = validate(config)?;
        let run_id = self.state.try_begin().await?;

        let this = Arc::clone(self);
        let task_config = config.clone();
        tokio::spawn(async move {
            // outcome is recorded in the run state
            let _ = this.execute(run_id, task_config, Plan::Full).await;
        });

        Ok(RunTicket { run_id, config })
    }

    /// Accept a run and execute it inline.
    pub async fn run(&self, config: RunConfig) -> Result<RunReport, PipelineError> {
        let config = validate(config)?;
        let run_id = self.state.try_begin().await?;
        self.execute(run_id, config, Plan::Full).await
    }

    /// Generate a seeded batch and store it as `NEW`. Existing leads stay.
    pub async fn generate_leads(
        &self,
        count: usize,
        seed: u64,
    ) -> Result<RunReport, PipelineError> {
        let config = RunConfig {
            mode: RunMode::Bulk { count, seed },
            reset_store: false,
            ..RunConfig::bulk(count)
        };
        self.run_stage(config, Stage::Intake, None).await
    }

    /// Enrich up to `limit` of the oldest `NEW` leads.
    pub async fn enrich_leads(
        &self,
        mode: EnrichmentMode,
        limit: Option<usize>,
    ) -> Result<RunReport, PipelineError> {
        let config = RunConfig {
            enrichment_mode: mode,
            ..RunConfig::stored()
        };
        self.run_stage(config, Stage::Enrich, limit).await
    }

    /// Generate template messages for up to `limit` of the oldest `ENRICHED` leads.
    pub async fn generate_messages(&self, limit: Option<usize>) -> Result<RunReport, PipelineError> {
        self.run_stage(RunConfig::stored(), Stage::Personalize, limit)
            .await
    }

    /// Dispatch up to `limit` of the oldest `MESSAGED` leads on `channels`.
    pub async fn send_outreach(
        &self,
        channels: ChannelSelection,
        dry_run: bool,
        limit: Option<usize>,
    ) -> Result<RunReport, PipelineError> {
        let config = RunConfig {
            channels,
            dry_run,
            ..RunConfig::stored()
        };
        self.run_stage(config, Stage::Dispatch, limit).await
    }

    async fn run_stage(
        &self,
        config: RunConfig,
        stage: Stage,
        limit: Option<usize>,
    ) -> Result<RunReport, PipelineError> {
        if limit == Some(0) {
            return Err(PipelineError::InvalidConfig("limit must be at least 1".into()));
        }
        let config = validate(config)?;
        let run_id = self.state.try_begin().await?;
        self.execute(run_id, config, Plan::Only { stage, limit }).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        config: RunConfig,
        plan: Plan,
    ) -> Result<RunReport, PipelineError> {
        info!(
            %run_id,
            ?plan,
            mode = ?config.mode,
            enrichment_mode = %config.enrichment_mode,
            dry_run = config.dry_run,
            "Pipeline run started"
        );

        match self.run_stages(run_id, &config, plan).await {
            Ok(report) => {
                if !report.stopped {
                    self.state.finish_ok(run_id).await;
                }
                info!(
                    %run_id,
                    intaken = report.intaken,
                    enriched = report.enriched,
                    messaged = report.messaged,
                    sent = report.sent,
                    failed = report.failed,
                    lead_errors = report.failures.len(),
                    stopped = report.stopped,
                    "Pipeline run finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(%run_id, error = %e, "Pipeline run aborted");
                self.state.finish_err(run_id, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        config: &RunConfig,
        plan: Plan,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport {
            run_id,
            ..RunReport::default()
        };

        let processors = self
            .processors
            .processors(config)
            .map_err(|e| PipelineError::Fatal(e.to_string()))?;
        let limit = plan.limit();

        let scope = if plan.includes(Stage::Intake) {
            let scope = self.intake(run_id, config, &mut report).await?;
            if report.stopped {
                return Ok(report);
            }
            scope
        } else {
            Scope::All
        };
        if plan.includes(Stage::Enrich) {
            self.enrich(run_id, &processors, &scope, limit, &mut report)
                .await?;
            if report.stopped {
                return Ok(report);
            }
        }
        if plan.includes(Stage::Personalize) {
            self.personalize(run_id, &processors, &scope, limit, &mut report)
                .await?;
            if report.stopped {
                return Ok(report);
            }
        }
        if plan.includes(Stage::Dispatch) {
            let channels = config.channels.channels();
            self.dispatch(run_id, &processors, &channels, &scope, limit, &mut report)
                .await?;
        }

        Ok(report)
    }

    /// Insert the run's leads and return the scope for later stages.
    /// Sets `report.stopped` if the run was stopped part way.
    async fn intake(
        &self,
        run_id: Uuid,
        config: &RunConfig,
        report: &mut RunReport,
    ) -> Result<Scope, PipelineError> {
        if !self.enter_stage(run_id, Stage::Intake, report).await {
            return Ok(Scope::All);
        }
        match &config.mode {
            RunMode::Single { lead } => {
                let id = self.store.insert_lead(lead).await?;
                report.intaken = 1;
                info!(lead_id = id, email = %lead.email, "Lead intaken");
                self.stage_done(run_id, Stage::Intake, 1).await;
                Ok(Scope::Only(HashSet::from([id])))
            }
            RunMode::Bulk { count, seed } => {
                if config.reset_store {
                    self.store.clear_all().await?;
                }
                let leads = LeadGenerator::new(*seed)
                    .generate_leads(*count)
                    .map_err(|e| PipelineError::Fatal(e.to_string()))?;
                let summary = LeadGenerator::validation_summary(&leads);

                let total = leads.len();
                for (i, lead) in leads.iter().enumerate() {
                    if self.halted(run_id, report).await {
                        return Ok(Scope::All);
                    }
                    self.store.insert_lead(lead).await?;
                    report.intaken += 1;
                    self.state
                        .set_progress(run_id, stage_progress(Stage::Intake, i + 1, total))
                        .await;
                }
                info!(
                    count = total,
                    seed,
                    valid_emails = summary.valid_emails,
                    industries = summary.industry_distribution.len(),
                    "Bulk leads generated"
                );
                report.validation = Some(summary);
                self.stage_done(run_id, Stage::Intake, total).await;
                Ok(Scope::All)
            }
            RunMode::Stored => {
                self.stage_done(run_id, Stage::Intake, 0).await;
                Ok(Scope::All)
            }
        }
    }

    async fn enrich(
        &self,
        run_id: Uuid,
        processors: &StageProcessors,
        scope: &Scope,
        limit: Option<usize>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        if !self.enter_stage(run_id, Stage::Enrich, report).await {
            return Ok(());
        }
        let leads = self.select(LeadStatus::New, scope, limit).await?;
        let total = leads.len();
        for (i, lead) in leads.iter().enumerate() {
            if self.halted(run_id, report).await {
                return Ok(());
            }
            match isolate(Stage::Enrich, processors.enricher.enrich(lead)).await {
                Ok(generated) => {
                    if let Some(reason) = generated.fallback_reason() {
                        report.fallbacks += 1;
                        debug!(lead_id = lead.id, reason, "Enrichment fell back to rules");
                    }
                    let record = generated.into_value();
                    if self.store.complete_enrichment(lead.id, &record).await? {
                        report.enriched += 1;
                    } else {
                        warn!(lead_id = lead.id, "Lead left NEW during enrichment, skipped");
                    }
                }
                Err(e) => self.lead_failed(report, lead.id, e).await?,
            }
            self.state
                .set_progress(run_id, stage_progress(Stage::Enrich, i + 1, total))
                .await;
        }
        self.stage_done(run_id, Stage::Enrich, total).await;
        Ok(())
    }

    async fn personalize(
        &self,
        run_id: Uuid,
        processors: &StageProcessors,
        scope: &Scope,
        limit: Option<usize>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        if !self.enter_stage(run_id, Stage::Personalize, report).await {
            return Ok(());
        }
        let leads = self.select(LeadStatus::Enriched, scope, limit).await?;
        let total = leads.len();
        for (i, lead) in leads.iter().enumerate() {
            if self.halted(run_id, report).await {
                return Ok(());
            }
            let enrichment = self
                .store
                .get_with_enrichment(lead.id)
                .await?
                .and_then(|detail| detail.enrichment);
            let outcome = match enrichment {
                Some(record) => {
                    isolate(
                        Stage::Personalize,
                        processors.personalizer.generate_messages(lead, &record),
                    )
                    .await
                }
                None => Err(ProcessorError::Failed {
                    stage: Stage::Personalize,
                    reason: "no enrichment record stored".into(),
                }),
            };
            match outcome {
                Ok(generated) => {
                    if let Some(reason) = generated.fallback_reason() {
                        report.fallbacks += 1;
                        debug!(lead_id = lead.id, reason, "Message generation fell back to templates");
                    }
                    let messages = generated.into_value();
                    if self.store.complete_messages(lead.id, &messages).await? {
                        report.messaged += 1;
                    } else {
                        warn!(lead_id = lead.id, "Lead left ENRICHED during message generation, skipped");
                    }
                }
                Err(e) => self.lead_failed(report, lead.id, e).await?,
            }
            self.state
                .set_progress(run_id, stage_progress(Stage::Personalize, i + 1, total))
                .await;
        }
        self.stage_done(run_id, Stage::Personalize, total).await;
        Ok(())
    }

    async fn dispatch(
        &self,
        run_id: Uuid,
        processors: &StageProcessors,
        channels: &[Channel],
        scope: &Scope,
        limit: Option<usize>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        if !self.enter_stage(run_id, Stage::Dispatch, report).await {
            return Ok(());
        }
        let leads = self.select(LeadStatus::Messaged, scope, limit).await?;
        let total = leads.len();
        for (i, lead) in leads.iter().enumerate() {
            if self.halted(run_id, report).await {
                return Ok(());
            }
            let Some(messages) = self.store.get_lead_messages(lead.id).await? else {
                let e = ProcessorError::Failed {
                    stage: Stage::Dispatch,
                    reason: "no generated messages stored".into(),
                };
                self.lead_failed(report, lead.id, e).await?;
                continue;
            };

            let dispatched = isolate(Stage::Dispatch, async {
                Ok(processors.dispatcher.dispatch(lead, &messages, channels).await)
            })
            .await;
            match dispatched {
                Ok(results) => {
                    let status = aggregate_status(&results);
                    let results: Vec<_> = results.into_values().collect();
                    if self.store.complete_dispatch(lead.id, &results, status).await? {
                        match status {
                            LeadStatus::Sent => report.sent += 1,
                            _ => report.failed += 1,
                        }
                    } else {
                        warn!(lead_id = lead.id, "Lead left MESSAGED during dispatch, skipped");
                    }
                }
                Err(e) => self.lead_failed(report, lead.id, e).await?,
            }
            self.state
                .set_progress(run_id, stage_progress(Stage::Dispatch, i + 1, total))
                .await;
        }
        self.stage_done(run_id, Stage::Dispatch, total).await;
        Ok(())
    }

    /// Leads at `status` within `scope`, oldest first, at most `limit`.
    async fn select(
        &self,
        status: LeadStatus,
        scope: &Scope,
        limit: Option<usize>,
    ) -> Result<Vec<Lead>, DatabaseError> {
        let mut leads = self.store.list_by_status(Some(status)).await?;
        if let Scope::Only(ids) = scope {
            leads.retain(|lead| ids.contains(&lead.id));
        }
        leads.sort_by_key(|lead| lead.id);
        if let Some(limit) = limit {
            leads.truncate(limit);
        }
        Ok(leads)
    }

    async fn enter_stage(&self, run_id: Uuid, stage: Stage, report: &mut RunReport) -> bool {
        if self.halted(run_id, report).await {
            return false;
        }
        self.state.set_stage(run_id, stage).await;
        debug!(%run_id, %stage, "Stage started");
        true
    }

    async fn stage_done(&self, run_id: Uuid, stage: Stage, total: usize) {
        self.state
            .set_progress(run_id, stage_progress(stage, total, total))
            .await;
    }

    /// True once the run has been stopped; marks the report.
    async fn halted(&self, run_id: Uuid, report: &mut RunReport) -> bool {
        if self.state.is_active(run_id).await {
            return false;
        }
        if !report.stopped {
            info!(%run_id, "Pipeline run observed stop");
        }
        report.stopped = true;
        true
    }

    async fn lead_failed(
        &self,
        report: &mut RunReport,
        lead_id: i64,
        err: ProcessorError,
    ) -> Result<(), PipelineError> {
        if err.is_fatal() {
            return Err(PipelineError::Fatal(err.to_string()));
        }
        let stage = match &err {
            ProcessorError::Failed { stage, .. }
            | ProcessorError::InvalidOutput { stage, .. }
            | ProcessorError::Panicked { stage, .. }
            | ProcessorError::Unavailable { stage, .. } => *stage,
        };
        warn!(lead_id, %stage, error = %err, "Lead failed stage");
        self.store
            .record_lead_error(lead_id, stage, &err.reason())
            .await?;
        report.failures.push(LeadFailure {
            lead_id,
            stage,
            reason: err.to_string(),
        });
        Ok(())
    }
}

/// Check a run config before claiming the running flag.
fn validate(mut config: RunConfig) -> Result<RunConfig, PipelineError> {
    match &mut config.mode {
        RunMode::Bulk { count, .. } => {
            if *count == 0 {
                return Err(PipelineError::InvalidConfig(
                    "lead_count must be at least 1".into(),
                ));
            }
            if *count > MAX_BULK_LEADS {
                warn!(requested = *count, max = MAX_BULK_LEADS, "Bulk lead count capped");
                *count = MAX_BULK_LEADS;
            }
        }
        RunMode::Single { lead } => {
            generator::validate(lead).map_err(|e| PipelineError::InvalidConfig(e.reason()))?;
        }
        RunMode::Stored => {}
    }
    Ok(config)
}

/// Run one processor call, turning a panic into a per-lead error.
async fn isolate<T, F>(stage: Stage, fut: F) -> Result<T, ProcessorError>
where
    F: Future<Output = Result<T, ProcessorError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ProcessorError::Panicked {
            stage,
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
