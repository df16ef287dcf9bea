use crate::app::ports::SourceClient;
use crate::constants::LINKEDIN_COMPANY_URL;
use crate::error::SourceError;
use crate::infra::http_client::json_body;
use crate::pipeline::ingestion::governor::RequestGovernor;
use crate::types::{fields, CompanyIdentity, FieldMap, RawSourceRecord, SourceTag};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

const DECORATION_ID: &str = "com.linkedin.voyager.deco.organization.web.WebFullCompanyMain-12";

/// Company pages from the LinkedIn Voyager API, authenticated with a browser session.
pub struct LinkedinClient {
    http: reqwest::Client,
    li_at: String,
    jsessionid: String,
    governor: RequestGovernor,
    endpoint: String,
}

impl LinkedinClient {
    pub fn new(http: reqwest::Client, li_at: String, jsessionid: String, governor: RequestGovernor) -> Self {
        Self {
            http,
            li_at,
            jsessionid,
            governor,
            endpoint: LINKEDIN_COMPANY_URL.to_string(),
        }
    }

    async fn lookup(&self, company: &CompanyRef) -> Result<Value, SourceError> {
        let csrf = self.jsessionid.trim_matches('"');
        let request = match company {
            CompanyRef::Numeric(id) => self
                .http
                .get(format!("{}/{}", self.endpoint, id))
                .query(&[("decorationId", DECORATION_ID)]),
            CompanyRef::UniversalName(name) => self.http.get(&self.endpoint).query(&[
                ("decorationId", DECORATION_ID),
                ("q", "universalName"),
                ("universalName", name.as_str()),
            ]),
        };
        let response = request
            .header("csrf-token", csrf)
            .header("cookie", format!("li_at={}; JSESSIONID=\"{}\"", self.li_at, csrf))
            .header("x-restli-protocol-version", "2.0.0")
            .header("accept", "application/json")
            .send()
            .await?;
        json_body(response, "linkedin").await
    }
}

#[async_trait]
impl SourceClient for LinkedinClient {
    fn source(&self) -> SourceTag {
        SourceTag::Linkedin
    }

    #[instrument(skip(self, identity), fields(company = %identity.display_name()))]
    async fn fetch(&self, identity: &CompanyIdentity) -> Result<RawSourceRecord, SourceError> {
        let company = CompanyRef::from_identity(identity)
            .ok_or_else(|| SourceError::NotFound("no LinkedIn id or company URI".into()))?;
        let this = self;
        let company_ref = &company;
        let body = self
            .governor
            .call("company_lookup", move || this.lookup(company_ref))
            .await?;
        structure_response(identity.display_name(), &body)
    }
}

/// How a company is addressed on the Voyager API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanyRef {
    Numeric(String),
    UniversalName(String),
}

impl CompanyRef {
    /// Explicit id first, then the last path segment of `/company/<name>/`.
    pub fn from_identity(identity: &CompanyIdentity) -> Option<Self> {
        let id = if !identity.li_company_id.is_empty() {
            identity.li_company_id.clone()
        } else {
            universal_name_from_uri(&identity.li_company_uri)?
        };
        if id.chars().all(|c| c.is_ascii_digit()) {
            Some(CompanyRef::Numeric(id))
        } else {
            Some(CompanyRef::UniversalName(id))
        }
    }
}

fn universal_name_from_uri(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "company")?;
    segments.next().map(str::to_string)
}

/// Reduce a Voyager company response to the firmographic field vocabulary.
pub fn structure_response(entity_name: &str, body: &Value) -> Result<RawSourceRecord, SourceError> {
    let company = match body.get("elements") {
        Some(elements) => elements.as_array().and_then(|list| list.first()),
        None => body.get("name").map(|_| body),
    }
    .ok_or_else(|| SourceError::NotFound(format!("no LinkedIn company page for {}", entity_name)))?;

    let mut payload = FieldMap::new();
    if let Some(name) = text(company, "name") {
        payload.insert(fields::COMPANY_NAME.into(), Value::String(name));
    }
    if let Some(url) = text(company, "companyPageUrl") {
        payload.insert(fields::COMPANY_URL.into(), Value::String(url));
    }
    if let Some(uri) = text(company, "url") {
        payload.insert(fields::LINKEDIN_URI.into(), Value::String(uri));
    }
    if let Some(count) = company.get("staffCount").and_then(Value::as_u64).filter(|n| *n > 0) {
        payload.insert(fields::EMPLOYEE_COUNT.into(), Value::from(count));
    }
    if let Some(hq) = company.get("headquarter").and_then(headquarters) {
        payload.insert(fields::HQ_ADDRESS.into(), hq);
    }

    let industries: Vec<Value> = company
        .get("companyIndustries")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|i| text(i, "localizedName"))
                .map(Value::String)
                .collect()
        })
        .unwrap_or_default();
    if !industries.is_empty() {
        payload.insert(fields::INDUSTRY_VERTICALS.into(), Value::Array(industries));
    }

    // Voyager spells it "specialities"
    let specialties = company
        .get("specialities")
        .or_else(|| company.get("specialties"))
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty());
    if let Some(list) = specialties {
        payload.insert(fields::SPECIALTIES.into(), Value::Array(list.clone()));
    }

    debug!(entity_name, fields = payload.len(), "structured linkedin company");
    Ok(RawSourceRecord::new(SourceTag::Linkedin, entity_name, payload))
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn headquarters(hq: &Value) -> Option<Value> {
    let city = text(hq, "city");
    let state = text(hq, "geographicArea");
    let postal_code = text(hq, "postalCode");
    let country = text(hq, "country");

    let full_address: Vec<String> = [
        text(hq, "line1"),
        text(hq, "line2"),
        city.clone(),
        state.clone(),
        postal_code.clone(),
        country.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut address = Map::new();
    for (key, value) in [
        ("country", country),
        ("city", city),
        ("state", state),
        ("postal_code", postal_code),
    ] {
        if let Some(v) = value {
            address.insert(key.into(), Value::String(v));
        }
    }
    if !full_address.is_empty() {
        address.insert("full_address".into(), Value::String(full_address.join(", ")));
    }
    (!address.is_empty()).then_some(Value::Object(address))
}
