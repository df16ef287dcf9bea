use crate::app::ports::{DecisionProvider, DuplicateDecision, DuplicateReview, SourceClient};
use crate::error::{EnrichError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::duplicates::{DuplicateIndex, DuplicateMatch};
use crate::pipeline::processing::merge::Merger;
use crate::pipeline::processing::validate::Validator;
use crate::pipeline::state::{CompanyRun, CompanyState, IllegalTransition};
use crate::pipeline::storage::output::OutputStore;
use crate::pipeline::storage::progress::ProgressStore;
use crate::types::{
    fields, CandidateValue, CompanyIdentity, ConflictFlag, FirmographicRecord, FlagReason,
    SourceTag,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub persisted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dropped: usize,
    /// Companies still waiting for an operator when the run stopped
    pub awaiting_decision: usize,
    pub interrupted: bool,
}

enum CompanyOutcome {
    Persisted,
    Failed(String),
    Parked(ParkedCompany),
}

/// A company in `AwaitingHumanInput`, held until its decision arrives.
struct ParkedCompany {
    run: CompanyRun,
    review: DuplicateReview,
}

/// Per-company failures are recorded; fatal ones end the run.
enum StepError {
    Fatal(EnrichError),
    Company(String),
}

impl From<EnrichError> for StepError {
    fn from(err: EnrichError) -> Self {
        StepError::Fatal(err)
    }
}

impl From<IllegalTransition> for StepError {
    fn from(err: IllegalTransition) -> Self {
        StepError::Company(err.to_string())
    }
}

/// Drives every input company through fetch, merge, validation and persistence.
pub struct Orchestrator {
    sources: Vec<Arc<dyn SourceClient>>,
    news: Option<Arc<dyn SourceClient>>,
    merger: Merger,
    validator: Option<Validator>,
    decisions: Option<Arc<dyn DecisionProvider>>,
    progress: ProgressStore,
    output: OutputStore,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(merger: Merger, progress: ProgressStore, output: OutputStore) -> Self {
        Self {
            sources: Vec::new(),
            news: None,
            merger,
            validator: None,
            decisions: None,
            progress,
            output,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Firmographic source, queried in the order added
    pub fn with_source(mut self, source: Arc<dyn SourceClient>) -> Self {
        self.sources.push(source);
        self
    }

    /// Additive source whose failures never fail a company
    pub fn with_news_source(mut self, source: Arc<dyn SourceClient>) -> Self {
        self.news = Some(source);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Enables human validation: suspected duplicates wait for a decision and
    /// validation corrections need approval.
    pub fn with_decisions(mut self, decisions: Arc<dyn DecisionProvider>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn output(&self) -> &OutputStore {
        &self.output
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Process `companies` in order. With `resume`, companies already marked
    /// done are skipped; otherwise the checkpoint is reset first.
    pub async fn run(&mut self, companies: &[CompanyIdentity], resume: bool) -> Result<RunSummary> {
        if !resume {
            self.progress.reset()?;
        }
        let done = self.progress.done_keys();
        self.output
            .set_input_order(companies.iter().map(CompanyIdentity::key));
        let duplicates = DuplicateIndex::build(companies);

        let mut summary = RunSummary {
            total: companies.len(),
            ..Default::default()
        };
        let mut parked: Vec<ParkedCompany> = Vec::new();

        info!("🚀 Enriching {} companies ({} already done)", companies.len(), done.len());

        for (index, identity) in companies.iter().enumerate() {
            if self.cancelled() {
                warn!("⏹️ Interrupt received, stopping before {}", identity.display_name());
                summary.interrupted = true;
                break;
            }

            let key = identity.key();
            if resume && done.contains(&key) {
                summary.skipped += 1;
                continue;
            }

            let span = info_span!("company", company_key = %key, index = index + 1);
            let outcome = self
                .process_company(identity, &duplicates)
                .instrument(span)
                .await;

            match outcome {
                Ok(CompanyOutcome::Persisted) => {
                    summary.persisted += 1;
                    metrics::pipeline::company_outcome("persisted");
                }
                Ok(CompanyOutcome::Failed(reason)) => {
                    summary.failed += 1;
                    metrics::pipeline::company_outcome("failed");
                    warn!(company_key = %key, "❌ Company failed: {}", reason);
                }
                Ok(CompanyOutcome::Parked(company)) => {
                    info!(company_key = %key, "⏸️ Possible duplicate, awaiting decision");
                    parked.push(company);
                }
                Err(StepError::Company(reason)) => {
                    error!(company_key = %key, "Company aborted: {}", reason);
                    self.progress.mark_failed(&key, &reason)?;
                    summary.failed += 1;
                    metrics::pipeline::company_outcome("failed");
                }
                Err(StepError::Fatal(err)) => {
                    error!(company_key = %key, "💥 Fatal error, aborting run: {}", err);
                    return Err(err);
                }
            }
        }

        self.resolve_parked(parked, &mut summary).await?;

        info!(
            "🎉 Run finished: {} persisted, {} failed, {} skipped, {} dropped",
            summary.persisted, summary.failed, summary.skipped, summary.dropped
        );
        Ok(summary)
    }

    async fn process_company(
        &mut self,
        identity: &CompanyIdentity,
        duplicates: &DuplicateIndex,
    ) -> std::result::Result<CompanyOutcome, StepError> {
        let key = identity.key();
        let mut run = CompanyRun::new(&key);
        run.advance(CompanyState::Fetching)?;

        let mut records = vec![identity.as_input_record()];
        let mut failures = Vec::new();
        let sources = self.sources.clone();

        for client in &sources {
            let source = client.source();
            match client.fetch(identity).await {
                Ok(record) => {
                    self.output.record_raw(&record);
                    records.push(record);
                }
                Err(err) if err.is_fatal() => {
                    return Err(StepError::Fatal(EnrichError::Authentication {
                        source_tag: source,
                        message: err.to_string(),
                    }));
                }
                Err(err) => {
                    warn!(
                        company_key = %key,
                        source = %source,
                        error_kind = err.kind(),
                        "source failed: {}",
                        err
                    );
                    failures.push(format!("{}: {}", source, err));
                }
            }
        }

        if !sources.is_empty() && failures.len() == sources.len() {
            run.advance(CompanyState::Failed)?;
            let reason = failures.join("; ");
            self.progress.mark_failed(&key, &reason)?;
            return Ok(CompanyOutcome::Failed(reason));
        }

        if let Some(news) = self.news.clone() {
            match news.fetch(identity).await {
                Ok(record) => {
                    self.output.record_raw(&record);
                    records.push(record);
                }
                Err(err) if err.is_fatal() => {
                    return Err(StepError::Fatal(EnrichError::Authentication {
                        source_tag: news.source(),
                        message: err.to_string(),
                    }));
                }
                Err(err) => {
                    warn!(company_key = %key, source = %news.source(), error_kind = err.kind(), "news lookup failed: {}", err);
                }
            }
        }

        run.advance(CompanyState::Merging)?;
        let mut record = self.merger.merge(&key, identity.display_name(), &records);

        let matches = duplicates.find(identity);
        let needs_decision = !matches.is_empty() && self.decisions.is_some();
        if !matches.is_empty() && !needs_decision {
            flag_duplicates(&mut record, &matches);
        }

        if let Some(validator) = &self.validator {
            run.advance(CompanyState::Validating)?;
            record = validator
                .validate(identity, record, self.decisions.as_deref())
                .await?;
        }
        metrics::pipeline::conflicts_flagged(record.conflicts.len());

        if needs_decision {
            run.advance(CompanyState::AwaitingHumanInput)?;
            return Ok(CompanyOutcome::Parked(ParkedCompany {
                run,
                review: DuplicateReview {
                    identity: identity.clone(),
                    record,
                    matches,
                },
            }));
        }

        self.persist(&mut run, record)?;
        Ok(CompanyOutcome::Persisted)
    }

    fn persist(&mut self, run: &mut CompanyRun, record: FirmographicRecord) -> std::result::Result<(), StepError> {
        run.advance(CompanyState::Persisted)?;
        let key = record.company_key.clone();
        self.output.upsert(record);
        self.output.persist()?;
        self.progress.mark_done(&key)?;
        info!(company_key = %key, "✅ Persisted");
        Ok(())
    }

    /// Checkpointed as done, but no firmographic record is kept.
    fn drop_duplicate(&mut self, run: &mut CompanyRun, key: &str) -> std::result::Result<(), StepError> {
        run.advance(CompanyState::Persisted)?;
        self.output.remove(key);
        self.output.persist()?;
        self.progress.mark_done_with_reason(key, "dropped as duplicate")?;
        info!(company_key = %key, "🗑️ Dropped as duplicate");
        Ok(())
    }

    async fn resolve_parked(&mut self, parked: Vec<ParkedCompany>, summary: &mut RunSummary) -> Result<()> {
        let Some(decisions) = self.decisions.clone() else {
            return Ok(());
        };
        let mut remaining = parked.into_iter();

        for ParkedCompany { mut run, review } in remaining.by_ref() {
            if self.cancelled() {
                summary.interrupted = true;
                summary.awaiting_decision += 1;
                break;
            }
            let key = review.identity.key();
            let decision = decisions.decide(&review).await?;
            metrics::pipeline::duplicate_decision(decision == DuplicateDecision::Keep);

            let result = match decision {
                DuplicateDecision::Keep => self.persist(&mut run, review.record),
                DuplicateDecision::Drop => self.drop_duplicate(&mut run, &key),
            };
            match result {
                Ok(()) if decision == DuplicateDecision::Keep => summary.persisted += 1,
                Ok(()) => summary.dropped += 1,
                Err(StepError::Fatal(err)) => return Err(err),
                Err(StepError::Company(reason)) => {
                    self.progress.mark_failed(&key, &reason)?;
                    summary.failed += 1;
                }
            }
        }
        summary.awaiting_decision += remaining.count();
        Ok(())
    }
}

fn flag_duplicates(record: &mut FirmographicRecord, matches: &[DuplicateMatch]) {
    record.conflicts.push(ConflictFlag {
        field: fields::COMPANY_NAME.to_string(),
        reason: FlagReason::PossibleDuplicate,
        candidates: matches
            .iter()
            .map(|m| CandidateValue {
                source: SourceTag::Input,
                value: json!({
                    "company_name": m.other.company_name,
                    "company_url": m.other.company_url,
                    "li_company_id": m.other.li_company_id,
                    "basis": m.basis,
                }),
            })
            .collect(),
    });
}
