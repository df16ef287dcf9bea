use crate::pipeline::processing::currency::CurrencyConverter;
use crate::pipeline::processing::precedence::{Comparison, FieldRule, MergeStrategy, PrecedenceTable};
use crate::types::{
    fields, CandidateValue, ConflictFlag, FieldProvenance, FirmographicRecord, FlagReason,
    RawSourceRecord, SourceTag,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Location parts compared when deciding whether two addresses agree
pub const LOCATION_KEYS: [&str; 3] = ["country", "city", "state"];

/// Combines per-source records into one firmographic record.
///
/// `merge` only reads its arguments and the table, so identical inputs always
/// produce identical output.
#[derive(Debug, Clone)]
pub struct Merger {
    table: PrecedenceTable,
    converter: CurrencyConverter,
}

impl Merger {
    pub fn new(table: PrecedenceTable, converter: CurrencyConverter) -> Self {
        Self { table, converter }
    }

    pub fn table(&self) -> &PrecedenceTable {
        &self.table
    }

    pub fn converter(&self) -> &CurrencyConverter {
        &self.converter
    }

    pub fn merge(
        &self,
        company_key: &str,
        entity_name: &str,
        records: &[RawSourceRecord],
    ) -> FirmographicRecord {
        let mut by_source: BTreeMap<SourceTag, &RawSourceRecord> = BTreeMap::new();
        for record in records {
            by_source.entry(record.source_tag).or_insert(record);
        }

        let mut merged = FirmographicRecord::new(company_key, entity_name);
        for (field, rule) in self.table.iter() {
            match rule.strategy {
                MergeStrategy::First => self.merge_first(&mut merged, field, rule, &by_source),
                MergeStrategy::Union => merge_union(&mut merged, field, rule, &by_source),
            }
        }
        merged
    }

    fn merge_first(
        &self,
        merged: &mut FirmographicRecord,
        field: &str,
        rule: &FieldRule,
        by_source: &BTreeMap<SourceTag, &RawSourceRecord>,
    ) {
        let mut candidates: Vec<CandidateValue> = rule
            .sources
            .iter()
            .filter_map(|source| {
                let value = by_source.get(source)?.value(field)?;
                Some(CandidateValue {
                    source: *source,
                    value: value.clone(),
                })
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        if rule.comparison == Comparison::Revenue || field == fields::REVENUE {
            let mut winner_flag = None;
            for (i, candidate) in candidates.iter_mut().enumerate() {
                let normalized = self.converter.normalize_revenue(&candidate.value);
                if i == 0 {
                    winner_flag = normalized.flag;
                }
                candidate.value = normalized.value;
            }
            if let Some(reason) = winner_flag {
                merged.conflicts.push(ConflictFlag {
                    field: field.to_string(),
                    reason,
                    candidates: vec![candidates[0].clone()],
                });
            }
        }

        if let Some(runner_up) = candidates.get(1) {
            let winner = &candidates[0];
            if self.disagree(rule, &winner.value, &runner_up.value) {
                debug!(
                    field,
                    winner = %winner.source,
                    runner_up = %runner_up.source,
                    "sources disagree"
                );
                merged.conflicts.push(ConflictFlag {
                    field: field.to_string(),
                    reason: FlagReason::SourceDisagreement,
                    candidates: vec![winner.clone(), runner_up.clone()],
                });
            }
        }

        let winner = candidates.swap_remove(0);
        merged.data.insert(field.to_string(), winner.value);
        merged
            .provenance
            .insert(field.to_string(), FieldProvenance::from_source(winner.source));
    }

    fn disagree(&self, rule: &FieldRule, a: &Value, b: &Value) -> bool {
        match rule.comparison {
            Comparison::None => false,
            Comparison::Exact => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => !x.trim().eq_ignore_ascii_case(y.trim()),
                _ => a != b,
            },
            Comparison::Numeric => match (numeric_value(a), numeric_value(b)) {
                (Some(x), Some(y)) => relative_difference(x, y) > rule.tolerance,
                _ => false,
            },
            Comparison::Location => location_mismatch(a, b),
            Comparison::Revenue => {
                match (self.converter.amount_in_target(a), self.converter.amount_in_target(b)) {
                    (Some(x), Some(y)) => relative_difference(x, y) > rule.tolerance,
                    // Unconvertible values are already flagged on their own
                    _ => false,
                }
            }
        }
    }
}

fn merge_union(
    merged: &mut FirmographicRecord,
    field: &str,
    rule: &FieldRule,
    by_source: &BTreeMap<SourceTag, &RawSourceRecord>,
) {
    let mut items = Vec::new();
    let mut contributors = Vec::new();
    for source in &rule.sources {
        let Some(value) = by_source.get(source).and_then(|r| r.value(field)) else {
            continue;
        };
        match value {
            Value::Array(list) => items.extend(list.iter().cloned()),
            other => items.push(other.clone()),
        }
        contributors.push(*source);
    }
    if items.is_empty() {
        return;
    }

    merged.data.insert(field.to_string(), Value::Array(dedupe_items(items)));
    merged.provenance.insert(
        field.to_string(),
        FieldProvenance {
            sources: contributors,
            superseded: Vec::new(),
        },
    );
}

/// String lists come back sorted and case-insensitively unique; anything else
/// keeps source order and drops repeats by url, title or name.
fn dedupe_items(items: Vec<Value>) -> Vec<Value> {
    if items.iter().all(Value::is_string) {
        let mut unique: BTreeMap<String, Value> = BTreeMap::new();
        for item in items {
            let text = item.as_str().unwrap_or_default().trim().to_string();
            if text.is_empty() {
                continue;
            }
            unique.entry(text.to_lowercase()).or_insert(Value::String(text));
        }
        return unique.into_values().collect();
    }

    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item_identity(item)))
        .collect()
}

fn item_identity(item: &Value) -> String {
    for key in ["url", "title", "name"] {
        if let Some(s) = item.get(key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return format!("{}:{}", key, s.trim().to_lowercase());
            }
        }
    }
    item.to_string()
}

/// Numbers, or numeric strings with thousands separators ("1,250").
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

/// |a - b| relative to the larger magnitude; 0 when both are 0.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

/// Number of location parts that both sides have and that match.
pub fn matching_location_parts(a: &Value, b: &Value) -> usize {
    LOCATION_KEYS
        .iter()
        .filter(|key| match (location_part(a, key), location_part(b, key)) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(&y),
            _ => false,
        })
        .count()
}

fn location_mismatch(a: &Value, b: &Value) -> bool {
    LOCATION_KEYS.iter().any(|key| match (location_part(a, key), location_part(b, key)) {
        (Some(x), Some(y)) => !x.eq_ignore_ascii_case(&y),
        _ => false,
    })
}

fn location_part(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
