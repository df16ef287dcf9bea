#![allow(dead_code)]

use async_trait::async_trait;
use company_enricher::app::ports::{
    AiQuery, DecisionProvider, DuplicateDecision, DuplicateReview, FieldDecision, FieldReview,
    SourceClient,
};
use company_enricher::config::EnrichConfig;
use company_enricher::constants::PROGRESS_FILE;
use company_enricher::error::{Result, SourceError};
use company_enricher::pipeline::ingestion::governor::RequestGovernor;
use company_enricher::pipeline::processing::currency::CurrencyConverter;
use company_enricher::pipeline::processing::merge::Merger;
use company_enricher::pipeline::storage::output::OutputStore;
use company_enricher::pipeline::storage::progress::ProgressStore;
use company_enricher::pipeline::Orchestrator;
use company_enricher::types::{fields, CompanyIdentity, FieldMap, RawSourceRecord, SourceTag};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WORDS: &[&str] = &[
    "Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel",
];

/// Distinct companies: no shared names or domains.
pub fn companies(n: usize) -> Vec<CompanyIdentity> {
    WORDS
        .iter()
        .take(n)
        .map(|w| {
            let lower = w.to_lowercase();
            CompanyIdentity::new(
                &format!("{} Analytics", w),
                &format!("https://{}.example", lower),
                "",
                &format!("https://www.linkedin.com/company/{}", lower),
            )
        })
        .collect()
}

/// What a fake source answers for one company.
#[derive(Debug, Clone)]
pub enum Reply {
    Data(FieldMap),
    Error(SourceError),
    /// Never answers; only useful behind a governor deadline
    Hang,
}

pub fn payload(pairs: &[(&str, Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// In-process stand-in for a provider client.
pub struct FakeSource {
    tag: SourceTag,
    script: HashMap<String, Reply>,
    fallback: Option<Reply>,
    governor: Option<RequestGovernor>,
    calls: AtomicUsize,
    attempts: Mutex<Vec<tokio::time::Instant>>,
    cancel_at: Option<(usize, Arc<AtomicBool>)>,
}

impl FakeSource {
    pub fn new(tag: SourceTag) -> Self {
        Self {
            tag,
            script: HashMap::new(),
            fallback: None,
            governor: None,
            calls: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            cancel_at: None,
        }
    }

    /// Reply for the company with this checkpoint key.
    pub fn reply(mut self, company_key: &str, reply: Reply) -> Self {
        self.script.insert(company_key.to_string(), reply);
        self
    }

    /// Reply for every company without a scripted one.
    pub fn fallback(mut self, reply: Reply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn governed(mut self, governor: RequestGovernor) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Raise `flag` while serving the `call`-th fetch (1-based).
    pub fn cancel_at(mut self, call: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_at = Some((call, flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().unwrap().clone()
    }

    fn default_reply(&self, identity: &CompanyIdentity) -> Reply {
        Reply::Data(payload(&[
            (fields::COMPANY_NAME, json!(identity.company_name)),
            (fields::EMPLOYEE_COUNT, json!(250)),
        ]))
    }

    async fn answer(&self, reply: Reply) -> std::result::Result<FieldMap, SourceError> {
        self.attempts.lock().unwrap().push(tokio::time::Instant::now());
        match reply {
            Reply::Data(payload) => Ok(payload),
            Reply::Error(err) => Err(err),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(SourceError::Transient("woke up".into()))
            }
        }
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    fn source(&self) -> SourceTag {
        self.tag
    }

    async fn fetch(&self, identity: &CompanyIdentity) -> std::result::Result<RawSourceRecord, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, flag)) = &self.cancel_at {
            if *at == call {
                flag.store(true, Ordering::SeqCst);
            }
        }

        let reply = self
            .script
            .get(&identity.key())
            .cloned()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| self.default_reply(identity));

        let payload = match &self.governor {
            Some(governor) => {
                let this = self;
                governor.call("fake", move || this.answer(reply.clone())).await?
            }
            None => self.answer(reply).await?,
        };
        Ok(RawSourceRecord::new(self.tag, identity.display_name(), payload))
    }
}

/// Answers every question with the same result.
pub struct FixedAi(pub std::result::Result<Value, SourceError>);

#[async_trait]
impl AiQuery for FixedAi {
    async fn query_json(&self, _prompt: &str) -> std::result::Result<Value, SourceError> {
        self.0.clone()
    }
}

/// Operator stand-in: duplicate decisions by company key, `Keep` otherwise.
/// Field corrections are taken unless scripted by `(company key, field)`.
#[derive(Default)]
pub struct ScriptedDecisions {
    decisions: HashMap<String, DuplicateDecision>,
    fields: HashMap<(String, String), FieldDecision>,
    pub asked: Mutex<Vec<String>>,
    pub reviewed: Mutex<Vec<FieldReview>>,
}

impl ScriptedDecisions {
    pub fn decide(mut self, company_key: &str, decision: DuplicateDecision) -> Self {
        self.decisions.insert(company_key.to_string(), decision);
        self
    }

    pub fn field(mut self, company_key: &str, field: &str, decision: FieldDecision) -> Self {
        self.fields
            .insert((company_key.to_string(), field.to_string()), decision);
        self
    }
}

#[async_trait]
impl DecisionProvider for ScriptedDecisions {
    async fn decide(&self, review: &DuplicateReview) -> Result<DuplicateDecision> {
        let key = review.identity.key();
        self.asked.lock().unwrap().push(key.clone());
        Ok(self
            .decisions
            .get(&key)
            .copied()
            .unwrap_or(DuplicateDecision::Keep))
    }

    async fn review_field(&self, review: &FieldReview) -> Result<FieldDecision> {
        self.reviewed.lock().unwrap().push(review.clone());
        Ok(self
            .fields
            .get(&(review.identity.key(), review.field.clone()))
            .copied()
            .unwrap_or(FieldDecision::TakeProposed))
    }
}

/// Orchestrator over `dir` with default configuration and the given sources.
pub fn orchestrator(dir: &Path, sources: &[Arc<dyn SourceClient>], resume: bool) -> Orchestrator {
    orchestrator_with_output(dir, dir, sources, resume)
}

/// Checkpoint under `progress_dir`, output files under `output_dir`.
pub fn orchestrator_with_output(
    progress_dir: &Path,
    output_dir: &Path,
    sources: &[Arc<dyn SourceClient>],
    resume: bool,
) -> Orchestrator {
    let config = EnrichConfig::default();
    let converter = CurrencyConverter::new(&config.currency);
    let merger = Merger::new(config.precedence_table(), converter);
    let progress = ProgressStore::open(progress_dir.join(PROGRESS_FILE)).unwrap();
    let tags: Vec<SourceTag> = sources.iter().map(|s| s.source()).collect();
    let output = OutputStore::open(output_dir, &tags, resume).unwrap();

    sources
        .iter()
        .fold(Orchestrator::new(merger, progress, output), |o, s| o.with_source(s.clone()))
}

pub fn read_firmographics(dir: &Path) -> Vec<Value> {
    let content = std::fs::read_to_string(OutputStore::firmographics_path(dir)).unwrap();
    serde_json::from_str(&content).unwrap()
}

pub fn as_source(fake: &Arc<FakeSource>) -> Arc<dyn SourceClient> {
    fake.clone()
}
