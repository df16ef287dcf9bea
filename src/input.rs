use crate::error::{EnrichError, Result};
use crate::types::CompanyIdentity;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(default)]
    company_name: String,
    #[serde(default)]
    company_url: String,
    #[serde(default)]
    li_company_id: String,
    #[serde(default)]
    li_company_uri: String,
}

/// Read the company list. Rows without a name or URL are skipped and repeated
/// checkpoint keys keep only their first row.
pub fn load_companies(path: &Path) -> Result<Vec<CompanyIdentity>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EnrichError::Input(format!("cannot open {}: {}", path.display(), e)))?;

    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == "company_name" || h == "company_url") {
        return Err(EnrichError::Input(format!(
            "{} needs a header row with company_name or company_url",
            path.display()
        )));
    }

    let mut companies = Vec::new();
    let mut seen = HashSet::new();
    for (index, row) in reader.deserialize::<InputRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = row?;
        let identity = CompanyIdentity::new(
            &row.company_name,
            &row.company_url,
            &row.li_company_id,
            &row.li_company_uri,
        );
        if identity.company_name.is_empty() && identity.company_url.is_empty() {
            warn!(line, "skipping row without company name or URL");
            continue;
        }
        if !seen.insert(identity.key()) {
            warn!(line, company_key = %identity.key(), "skipping repeated company");
            continue;
        }
        companies.push(identity);
    }

    info!(count = companies.len(), path = %path.display(), "loaded input companies");
    Ok(companies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("companies.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_trimmed_rows_and_drops_repeats() {
        let dir = TempDir::new().unwrap();
        let path = write_input(
            &dir,
            "company_name,company_url,li_company_id,li_company_uri\n\
             Acme , acme.com ,acme-corp,https://www.linkedin.com/company/acme-corp\n\
             ,,,\n\
             Acme Again,acme.com,acme-corp,\n\
             Globex,globex.com,,\n",
        );

        let companies = load_companies(&path).unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].company_name, "Acme");
        assert_eq!(companies[0].company_url, "acme.com");
        assert_eq!(companies[1].key(), "globex.com");
    }

    #[test]
    fn missing_columns_default_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "company_url\nhttps://initech.com\n");
        let companies = load_companies(&path).unwrap();
        assert_eq!(companies[0].company_name, "");
        assert_eq!(companies[0].display_name(), "https://initech.com");
    }

    #[test]
    fn headerless_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "Acme,acme.com\n");
        assert!(matches!(load_companies(&path), Err(EnrichError::Input(_))));
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let dir = TempDir::new().unwrap();
        let err = load_companies(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, EnrichError::Input(_)));
    }
}
