/// File and environment names shared across the crate

// Output state tree
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_INPUT_FILE: &str = "input/companies.csv";
pub const FIRMOGRAPHICS_FILE: &str = "firmographics.json";
pub const PROGRESS_FILE: &str = "enrichment_progress.json";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "company_enricher.log";

/// `raw_<source>_company_data.json`
pub fn raw_output_file(source_stem: &str) -> String {
    format!("raw_{}_company_data.json", source_stem)
}

// Credentials
pub const ENV_LINKEDIN_LI_AT: &str = "LINKEDIN_LI_AT";
pub const ENV_LINKEDIN_JSESSIONID: &str = "LINKEDIN_JSESSIONID";
pub const ENV_DIFFBOT_TOKEN: &str = "DIFFBOT_TOKEN";
pub const ENV_PERPLEXITY_TOKEN: &str = "PERPLEXITY_TOKEN";

// Provider endpoints
pub const LINKEDIN_COMPANY_URL: &str = "https://www.linkedin.com/voyager/api/organization/companies";
pub const DIFFBOT_DQL_URL: &str = "https://kg.diffbot.com/kg/v3/dql";
pub const PERPLEXITY_CHAT_URL: &str = "https://api.perplexity.ai/chat/completions";
pub const PERPLEXITY_MODEL: &str = "sonar-pro";

/// Cap applied to similar companies and other long provider lists
pub const MAX_LIST_ITEMS: usize = 10;
