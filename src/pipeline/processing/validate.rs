use crate::app::ports::{AiQuery, DecisionProvider, FieldDecision, FieldReview};
use crate::config::ValidationConfig;
use crate::error::{EnrichError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::currency::{revenue_amount, CurrencyConverter};
use crate::pipeline::processing::merge::{matching_location_parts, numeric_value, relative_difference};
use crate::types::{
    fields, is_empty_value, CandidateValue, CompanyIdentity, ConflictFlag, FirmographicRecord,
    FlagReason, SourceTag,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOCATION_PARTS: [&str; 5] = ["country", "city", "state", "postal_code", "full_address"];
const REVENUE_PARTS: [&str; 3] = ["amount", "currency", "range"];

/// Fields the AI source can be asked to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidatedField {
    EmployeeCount,
    HeadquartersLocation,
    Revenue,
}

impl ValidatedField {
    pub fn field_name(&self) -> &'static str {
        match self {
            ValidatedField::EmployeeCount => fields::EMPLOYEE_COUNT,
            ValidatedField::HeadquartersLocation => fields::HQ_ADDRESS,
            ValidatedField::Revenue => fields::REVENUE,
        }
    }

    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            fields::EMPLOYEE_COUNT => Some(ValidatedField::EmployeeCount),
            fields::HQ_ADDRESS => Some(ValidatedField::HeadquartersLocation),
            fields::REVENUE => Some(ValidatedField::Revenue),
            _ => None,
        }
    }

    fn prompt(&self, company: &str, current: &Value) -> String {
        let ask = match self {
            ValidatedField::EmployeeCount => {
                "the current total employee count as a number (not a string). \
                 Format: ```{\"total\": number, \"confidence\": number}```"
                    .to_string()
            }
            ValidatedField::HeadquartersLocation => {
                "the headquarters location STRICTLY with these exact keys: country, city, state, \
                 postal_code, full_address, confidence. Format: ```{\"country\": \"value\", \
                 \"city\": \"value\", \"state\": \"value\", \"postal_code\": \"value\", \
                 \"full_address\": \"value\", \"confidence\": number}```"
                    .to_string()
            }
            ValidatedField::Revenue => {
                "revenue data no older than 12 months STRICTLY with these exact keys: amount, \
                 currency, range, confidence. Use a number for amount and an ISO 4217 code for \
                 currency. Format: ```{\"amount\": number, \"currency\": \"value\", \
                 \"range\": \"value\", \"confidence\": number}```"
                    .to_string()
            }
        };
        format!(
            "For {company}, return ONLY a JSON object within a code block containing {ask} \
             Our current value is {current}. Set confidence between 0 and 1 to reflect how \
             certain you are of your answer."
        )
    }
}

/// Replacement value plus the flag it still carries, if any.
struct Proposal {
    value: Value,
    flag: Option<FlagReason>,
}

impl Proposal {
    fn clean(value: Value) -> Self {
        Self { value, flag: None }
    }
}

/// Second pass that asks the AI source to confirm or correct selected fields.
pub struct Validator {
    ai: Arc<dyn AiQuery>,
    requested: BTreeSet<ValidatedField>,
    config: ValidationConfig,
    converter: CurrencyConverter,
}

impl Validator {
    pub fn new(
        ai: Arc<dyn AiQuery>,
        requested: BTreeSet<ValidatedField>,
        config: ValidationConfig,
        converter: CurrencyConverter,
    ) -> Self {
        Self {
            ai,
            requested,
            config,
            converter,
        }
    }

    /// Requested fields plus, when enabled, validatable fields carrying a flag.
    /// Only fields with a current value are checked.
    pub fn fields_to_check(&self, record: &FirmographicRecord) -> Vec<ValidatedField> {
        let mut selected = self.requested.clone();
        if self.config.resolve_conflicts {
            selected.extend(record.flagged_fields().filter_map(ValidatedField::from_field));
        }
        selected
            .into_iter()
            .filter(|f| {
                record
                    .data
                    .get(f.field_name())
                    .map(|v| !is_empty_value(v))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Errors other than authentication leave the field as merged. With a
    /// `reviewer`, every correction needs operator approval before it is applied.
    pub async fn validate(
        &self,
        identity: &CompanyIdentity,
        mut record: FirmographicRecord,
        reviewer: Option<&dyn DecisionProvider>,
    ) -> Result<FirmographicRecord> {
        let company = identity.display_name().to_string();

        for field in self.fields_to_check(&record) {
            let name = field.field_name();
            let Some(current) = record.data.get(name).cloned() else {
                continue;
            };

            let answer = match self.ai.query_json(&field.prompt(&company, &current)).await {
                Ok(answer) => answer,
                Err(err) if err.is_fatal() => {
                    return Err(EnrichError::Authentication {
                        source_tag: SourceTag::Perplexity,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        company_key = %record.company_key,
                        field = name,
                        error_kind = err.kind(),
                        "validation query failed, keeping merged value: {}",
                        err
                    );
                    metrics::validation::outcome(name, "error");
                    continue;
                }
            };

            let confidence = answer.get("confidence").and_then(numeric_value);
            match confidence {
                Some(c) if c >= self.config.confidence_threshold => {}
                other => {
                    debug!(field = name, confidence = ?other, "answer below confidence threshold");
                    metrics::validation::outcome(name, "low_confidence");
                    continue;
                }
            }

            let confidence = confidence.unwrap_or_default();
            let proposed = match field {
                ValidatedField::EmployeeCount => self.employee_update(&current, &answer),
                ValidatedField::HeadquartersLocation => location_update(&current, &answer),
                ValidatedField::Revenue => self.revenue_update(&current, &answer),
            };
            let Some(Proposal { value, flag }) = proposed else {
                metrics::validation::outcome(name, "confirmed");
                continue;
            };

            if let Some(reviewer) = reviewer {
                let review = FieldReview {
                    identity: identity.clone(),
                    field: name.to_string(),
                    current: current.clone(),
                    proposed: value.clone(),
                    confidence,
                };
                if reviewer.review_field(&review).await? == FieldDecision::KeepCurrent {
                    info!(company_key = %record.company_key, field = name, "operator kept current value");
                    metrics::validation::outcome(name, "kept_by_operator");
                    continue;
                }
            }

            info!(
                company_key = %record.company_key,
                field = name,
                "validation corrected value"
            );
            let reason = format!("ai validation (confidence {:.2})", confidence);
            record.overwrite(name, value.clone(), SourceTag::Perplexity, &reason);
            record.conflicts.retain(|c| c.field != name);
            if let Some(reason) = flag {
                // unconverted values stay flagged
                record.conflicts.push(ConflictFlag {
                    field: name.to_string(),
                    reason,
                    candidates: vec![CandidateValue {
                        source: SourceTag::Perplexity,
                        value,
                    }],
                });
            }
            metrics::validation::outcome(name, "updated");
        }

        Ok(record)
    }

    fn employee_update(&self, current: &Value, answer: &Value) -> Option<Proposal> {
        let proposed = answer.get("total").and_then(numeric_value)?.round();
        if proposed <= 0.0 {
            return None;
        }
        let current = numeric_value(current).unwrap_or(0.0);
        let update = current == 0.0
            || relative_change(current, proposed) > self.config.change_tolerance;
        update.then(|| Proposal::clean(json!(proposed as u64)))
    }

    fn revenue_update(&self, current: &Value, answer: &Value) -> Option<Proposal> {
        let mut proposed = Map::new();
        for key in REVENUE_PARTS {
            if let Some(v) = answer.get(key).filter(|v| !is_empty_value(v)) {
                proposed.insert(key.to_string(), v.clone());
            }
        }
        let proposed = Value::Object(proposed);
        let proposed_amount = self.comparable_amount(&proposed)?;

        let update = match self.comparable_amount(current) {
            None => true,
            Some(current_amount) => {
                relative_change(current_amount, proposed_amount) > self.config.change_tolerance
                    && count_parts(&proposed, &REVENUE_PARTS) >= count_parts(current, &REVENUE_PARTS)
            }
        };
        update.then(|| {
            let normalized = self.converter.normalize_revenue(&proposed);
            Proposal {
                value: normalized.value,
                flag: normalized.flag,
            }
        })
    }

    fn comparable_amount(&self, value: &Value) -> Option<f64> {
        self.converter
            .amount_in_target(value)
            .or_else(|| revenue_amount(value))
    }
}

fn location_update(current: &Value, answer: &Value) -> Option<Proposal> {
    let mut proposed = Map::new();
    for key in LOCATION_PARTS {
        if let Some(s) = answer.get(key).and_then(Value::as_str).map(str::trim) {
            if !s.is_empty() {
                proposed.insert(key.to_string(), Value::String(s.to_string()));
            }
        }
    }
    let proposed = Value::Object(proposed);
    let current_parts = count_parts(current, &LOCATION_PARTS);
    let proposed_parts = count_parts(&proposed, &LOCATION_PARTS);
    if proposed_parts == 0 {
        return None;
    }

    let update = proposed_parts > current_parts
        || (matching_location_parts(current, &proposed) < 2 && proposed_parts >= current_parts);
    update.then(|| Proposal::clean(proposed))
}

/// Change relative to the current value.
fn relative_change(current: f64, proposed: f64) -> f64 {
    if current == 0.0 {
        relative_difference(current, proposed)
    } else {
        (current - proposed).abs() / current.abs()
    }
}

fn count_parts(value: &Value, keys: &[&str]) -> usize {
    keys.iter()
        .filter(|k| value.get(**k).map(|v| !is_empty_value(v)).unwrap_or(false))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{DuplicateDecision, DuplicateReview};
    use crate::error::SourceError;
    use crate::pipeline::processing::currency::CurrencyConfig;
    use crate::types::{ConflictFlag, FieldProvenance, FlagReason};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedAi {
        answers: Mutex<Vec<std::result::Result<Value, SourceError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAi {
        fn new(answers: Vec<std::result::Result<Value, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AiQuery for ScriptedAi {
        async fn query_json(&self, prompt: &str) -> std::result::Result<Value, SourceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Err(SourceError::NotFound("no scripted answer".into()))
            } else {
                answers.remove(0)
            }
        }
    }

    /// Gives the same answer to every field review.
    struct FixedReviewer {
        decision: FieldDecision,
        reviews: Mutex<Vec<FieldReview>>,
    }

    impl FixedReviewer {
        fn new(decision: FieldDecision) -> Self {
            Self {
                decision,
                reviews: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DecisionProvider for FixedReviewer {
        async fn decide(&self, _review: &DuplicateReview) -> Result<DuplicateDecision> {
            Ok(DuplicateDecision::Keep)
        }

        async fn review_field(&self, review: &FieldReview) -> Result<FieldDecision> {
            self.reviews.lock().unwrap().push(review.clone());
            Ok(self.decision)
        }
    }

    fn validator(ai: Arc<ScriptedAi>, requested: &[ValidatedField]) -> Validator {
        Validator::new(
            ai,
            requested.iter().copied().collect(),
            ValidationConfig::default(),
            CurrencyConverter::new(&CurrencyConfig::default()),
        )
    }

    fn record_with(field: &str, value: Value) -> FirmographicRecord {
        let mut record = FirmographicRecord::new("acme", "Acme");
        record.data.insert(field.into(), value);
        record
            .provenance
            .insert(field.into(), FieldProvenance::from_source(SourceTag::Linkedin));
        record
    }

    fn identity() -> CompanyIdentity {
        CompanyIdentity::new("Acme", "acme.com", "", "")
    }

    #[tokio::test]
    async fn confident_correction_overwrites_and_keeps_provenance() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": "1,250", "confidence": 0.9}))]);
        let v = validator(ai.clone(), &[ValidatedField::EmployeeCount]);

        let out = v
            .validate(&identity(), record_with(fields::EMPLOYEE_COUNT, json!(500)), None)
            .await
            .unwrap();

        assert_eq!(out.data[fields::EMPLOYEE_COUNT], json!(1250));
        let prov = &out.provenance[fields::EMPLOYEE_COUNT];
        assert_eq!(prov.primary(), Some(SourceTag::Perplexity));
        assert_eq!(prov.superseded[0].value, json!(500));
        assert_eq!(prov.superseded[0].source, SourceTag::Linkedin);
        assert!(ai.prompts.lock().unwrap()[0].contains("500"));
    }

    #[tokio::test]
    async fn low_confidence_answer_is_ignored() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": 9000, "confidence": 0.3}))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let out = v
            .validate(&identity(), record_with(fields::EMPLOYEE_COUNT, json!(500)), None)
            .await
            .unwrap();
        assert_eq!(out.data[fields::EMPLOYEE_COUNT], json!(500));
    }

    #[tokio::test]
    async fn small_change_keeps_current_count() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": 520, "confidence": 0.95}))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let out = v
            .validate(&identity(), record_with(fields::EMPLOYEE_COUNT, json!(500)), None)
            .await
            .unwrap();
        assert_eq!(out.data[fields::EMPLOYEE_COUNT], json!(500));
        assert!(out.provenance[fields::EMPLOYEE_COUNT].superseded.is_empty());
    }

    #[tokio::test]
    async fn flagged_field_is_checked_without_being_requested() {
        let ai = ScriptedAi::new(vec![Ok(json!({
            "amount": 2000000, "currency": "EUR", "range": "$1M-$5M", "confidence": 0.8
        }))]);
        let v = validator(ai, &[]);
        let mut record = record_with(fields::REVENUE, json!({"amount": 1000000}));
        record.conflicts.push(ConflictFlag {
            field: fields::REVENUE.into(),
            reason: FlagReason::MissingCurrency,
            candidates: vec![],
        });

        let out = v.validate(&identity(), record, None).await.unwrap();

        assert_eq!(out.data[fields::REVENUE]["currency"], "USD");
        assert_eq!(out.data[fields::REVENUE]["original_currency"], "EUR");
        assert!(out.conflicts.is_empty());
    }

    #[tokio::test]
    async fn more_complete_location_replaces_current() {
        let ai = ScriptedAi::new(vec![Ok(json!({
            "country": "US", "city": "Austin", "state": "TX", "postal_code": "78701",
            "full_address": "1 Main St, Austin, TX", "confidence": 0.85
        }))]);
        let v = validator(ai, &[ValidatedField::HeadquartersLocation]);
        let out = v
            .validate(
                &identity(),
                record_with(fields::HQ_ADDRESS, json!({"country": "US", "city": "Austin"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.data[fields::HQ_ADDRESS]["postal_code"], "78701");
        assert!(out.data[fields::HQ_ADDRESS].get("confidence").is_none());
    }

    #[tokio::test]
    async fn authentication_failure_aborts_validation() {
        let ai = ScriptedAi::new(vec![Err(SourceError::Authentication("401".into()))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let err = v
            .validate(&identity(), record_with(fields::EMPLOYEE_COUNT, json!(500)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Authentication { .. }));
    }

    #[tokio::test]
    async fn absent_fields_are_not_queried() {
        let ai = ScriptedAi::new(vec![]);
        let v = validator(ai.clone(), &[ValidatedField::Revenue]);
        let out = v
            .validate(&identity(), record_with(fields::EMPLOYEE_COUNT, json!(10)), None)
            .await
            .unwrap();
        assert_eq!(out.data.len(), 1);
        assert!(ai.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn untagged_revenue_answer_stays_flagged() {
        let ai = ScriptedAi::new(vec![Ok(json!({"amount": 2000000, "confidence": 0.9}))]);
        let v = validator(ai, &[ValidatedField::Revenue]);
        let mut record = record_with(fields::REVENUE, json!({"amount": 1000000}));
        record.conflicts.push(ConflictFlag {
            field: fields::REVENUE.into(),
            reason: FlagReason::MissingCurrency,
            candidates: vec![],
        });

        let out = v.validate(&identity(), record, None).await.unwrap();

        assert_eq!(out.data[fields::REVENUE], json!({"amount": 2000000}));
        assert!(out.has_flag(fields::REVENUE, &FlagReason::MissingCurrency));
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].candidates[0].source, SourceTag::Perplexity);
    }

    #[tokio::test]
    async fn unknown_currency_answer_is_flagged() {
        let ai = ScriptedAi::new(vec![Ok(json!({
            "amount": 3000000, "currency": "XYZ", "confidence": 0.9
        }))]);
        let v = validator(ai, &[ValidatedField::Revenue]);
        let record = record_with(fields::REVENUE, json!({"amount": 1000000, "currency": "USD"}));

        let out = v.validate(&identity(), record, None).await.unwrap();

        assert_eq!(out.data[fields::REVENUE]["currency"], "XYZ");
        assert!(out.has_flag(fields::REVENUE, &FlagReason::UnknownCurrency));
    }

    #[tokio::test]
    async fn operator_can_keep_current_value() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": 4800, "confidence": 0.9}))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let reviewer = FixedReviewer::new(FieldDecision::KeepCurrent);

        let out = v
            .validate(
                &identity(),
                record_with(fields::EMPLOYEE_COUNT, json!(500)),
                Some(&reviewer),
            )
            .await
            .unwrap();

        assert_eq!(out.data[fields::EMPLOYEE_COUNT], json!(500));
        assert!(out.provenance[fields::EMPLOYEE_COUNT].superseded.is_empty());
        let reviews = reviewer.reviews.lock().unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].current, json!(500));
        assert_eq!(reviews[0].proposed, json!(4800));
    }

    #[tokio::test]
    async fn operator_approved_value_is_applied() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": 4800, "confidence": 0.9}))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let reviewer = FixedReviewer::new(FieldDecision::TakeProposed);

        let out = v
            .validate(
                &identity(),
                record_with(fields::EMPLOYEE_COUNT, json!(500)),
                Some(&reviewer),
            )
            .await
            .unwrap();

        assert_eq!(out.data[fields::EMPLOYEE_COUNT], json!(4800));
    }

    #[tokio::test]
    async fn confirmed_values_are_not_reviewed() {
        let ai = ScriptedAi::new(vec![Ok(json!({"total": 510, "confidence": 0.9}))]);
        let v = validator(ai, &[ValidatedField::EmployeeCount]);
        let reviewer = FixedReviewer::new(FieldDecision::TakeProposed);

        v.validate(
            &identity(),
            record_with(fields::EMPLOYEE_COUNT, json!(500)),
            Some(&reviewer),
        )
        .await
        .unwrap();

        assert!(reviewer.reviews.lock().unwrap().is_empty());
    }
}
