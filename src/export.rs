use crate::error::{EnrichError, Result};
use crate::types::{fields, FirmographicRecord};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct CompanyRow<'a> {
    company_name: &'a str,
    company_url: String,
    linkedin_uri: String,
    revenue_amount: String,
    revenue_currency: String,
}

#[derive(Serialize)]
struct EmployeeRow<'a> {
    company_name: &'a str,
    total: String,
    it_staff: String,
}

#[derive(Serialize)]
struct AddressRow<'a> {
    company_name: &'a str,
    country: String,
    city: String,
    state: String,
    postal_code: String,
    full_address: String,
}

#[derive(Serialize)]
struct IndustryRow<'a> {
    company_name: &'a str,
    verticals: String,
}

#[derive(Serialize)]
struct SimilarCompanyRow<'a> {
    company_name: &'a str,
    similar_company: String,
    description: String,
    url: String,
}

#[derive(Serialize)]
struct TechnologyRow<'a> {
    company_name: &'a str,
    technologies: String,
}

#[derive(Serialize)]
struct NewsRow<'a> {
    company_name: &'a str,
    source: String,
    date: String,
    title: String,
    url: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Write one CSV sheet per topic from a `firmographics.json` file.
/// Returns the written paths.
pub fn export(firmographics: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(firmographics).map_err(|e| {
        EnrichError::Input(format!("cannot read {}: {}", firmographics.display(), e))
    })?;
    let records: Vec<FirmographicRecord> = serde_json::from_str(&content)?;
    fs::create_dir_all(out_dir)?;

    let mut written = Vec::new();

    written.push(write_sheet(
        out_dir,
        "companies.csv",
        records.iter().map(|r| CompanyRow {
            company_name: &r.entity_name,
            company_url: text(r.data.get(fields::COMPANY_URL)),
            linkedin_uri: text(r.data.get(fields::LINKEDIN_URI)),
            revenue_amount: text(nested(r, fields::REVENUE, "amount")),
            revenue_currency: text(nested(r, fields::REVENUE, "currency")),
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "employees.csv",
        records.iter().map(|r| EmployeeRow {
            company_name: &r.entity_name,
            total: text(r.data.get(fields::EMPLOYEE_COUNT)),
            it_staff: text(r.data.get(fields::IT_STAFF)),
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "addresses.csv",
        records.iter().map(|r| AddressRow {
            company_name: &r.entity_name,
            country: text(nested(r, fields::HQ_ADDRESS, "country")),
            city: text(nested(r, fields::HQ_ADDRESS, "city")),
            state: text(nested(r, fields::HQ_ADDRESS, "state")),
            postal_code: text(nested(r, fields::HQ_ADDRESS, "postal_code")),
            full_address: text(nested(r, fields::HQ_ADDRESS, "full_address")),
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "industries.csv",
        records.iter().map(|r| IndustryRow {
            company_name: &r.entity_name,
            verticals: joined(r.data.get(fields::INDUSTRY_VERTICALS)),
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "similar_companies.csv",
        records.iter().flat_map(|r| {
            items(r, fields::SIMILAR_COMPANIES).map(move |s| SimilarCompanyRow {
                company_name: &r.entity_name,
                similar_company: text(s.get("name")),
                description: text(s.get("description")),
                url: text(s.get("url")),
            })
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "technologies.csv",
        records.iter().map(|r| TechnologyRow {
            company_name: &r.entity_name,
            technologies: joined(r.data.get(fields::TECHNOLOGIES)),
        }),
    )?);

    written.push(write_sheet(
        out_dir,
        "news_updates.csv",
        records.iter().flat_map(|r| {
            items(r, fields::NEWS_UPDATES).map(move |n| NewsRow {
                company_name: &r.entity_name,
                source: text(n.get("source")),
                date: text(n.get("date")),
                title: text(n.get("title")),
                url: text(n.get("url")),
                kind: text(n.get("type")),
            })
        }),
    )?);

    info!(companies = records.len(), sheets = written.len(), "export finished");
    Ok(written)
}

fn write_sheet<S, I>(out_dir: &Path, name: &str, rows: I) -> Result<PathBuf>
where
    S: Serialize,
    I: IntoIterator<Item = S>,
{
    let path = out_dir.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(path)
}

fn nested<'a>(record: &'a FirmographicRecord, field: &str, key: &str) -> Option<&'a Value> {
    record.data.get(field).and_then(|v| v.get(key))
}

fn items<'a>(record: &'a FirmographicRecord, field: &str) -> impl Iterator<Item = &'a Value> + 'a {
    record
        .data
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn joined(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|v| text(Some(v)))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}
