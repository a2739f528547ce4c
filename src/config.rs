use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "brand_align.toml";
const ENV_PREFIX: &str = "BRANDALIGN";

/// Everything the workflows need, resolved once at startup.
///
/// Blank values are not rejected here; a missing developer token or project
/// id shows up as a request error once the API is called.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub developer_token: String,
    #[serde(default)]
    pub ads_account_id: String,
    #[serde(default)]
    pub campaign_ids: String,
    #[serde(default)]
    pub ads_limit: Option<u32>,
    #[serde(default = "default_ads_api_version")]
    pub ads_api_version: String,
    #[serde(default)]
    pub gcp_project: String,
    #[serde(default = "default_gcp_location")]
    pub gcp_location: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default)]
    pub drive_folder_id: Option<String>,
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_ads_api_version() -> String {
    "v17".to_string()
}

fn default_gcp_location() -> String {
    "us-central1".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/brand_align.sqlite")
}

fn default_http_timeout_secs() -> u64 {
    120
}

impl Settings {
    /// Layer the optional TOML file under `BRANDALIGN_*` environment variables.
    /// An explicitly passed file must exist; the default one may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", file.display()))?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn customer_id(&self) -> String {
        normalize_customer_id(&self.ads_account_id)
    }

    pub fn campaigns(&self) -> Vec<String> {
        split_campaign_ids(&self.campaign_ids)
    }

    /// A zero limit means "no limit", same as leaving it out.
    pub fn limit(&self) -> Option<u32> {
        self.ads_limit.filter(|n| *n > 0)
    }

    /// Loggable view with secrets masked.
    pub fn redacted(&self) -> String {
        format!(
            "customer_id={} campaigns={:?} limit={:?} project={} location={} model={} \
             drive_folder={:?} image_dir={:?} db={} developer_token={} access_token={}",
            self.customer_id(),
            self.campaigns(),
            self.limit(),
            self.gcp_project,
            self.gcp_location,
            self.gemini_model,
            self.drive_folder_id,
            self.image_dir,
            self.db_path.display(),
            mask(&self.developer_token),
            self.access_token.as_deref().map(mask).unwrap_or_else(|| "-".into()),
        )
    }
}

pub fn normalize_customer_id(raw: &str) -> String {
    raw.replace('-', "").trim().to_string()
}

pub fn split_campaign_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

fn mask(secret: &str) -> String {
    if secret.trim().is_empty() {
        "-".to_string()
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_id_drops_dashes() {
        assert_eq!(normalize_customer_id(" 123-456-7890 "), "1234567890");
        assert_eq!(normalize_customer_id(""), "");
    }

    #[test]
    fn campaign_ids_skip_blanks() {
        assert_eq!(split_campaign_ids("111, 222,,  ,333"), vec!["111", "222", "333"]);
        assert!(split_campaign_ids("").is_empty());
        assert!(split_campaign_ids(" , ").is_empty());
    }

    #[test]
    fn loads_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "ads_account_id = \"123-456-7890\"\ncampaign_ids = \"1,2\"\nads_limit = 0\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.customer_id(), "1234567890");
        assert_eq!(s.campaigns(), vec!["1", "2"]);
        assert_eq!(s.limit(), None);
        assert_eq!(s.gemini_model, "gemini-2.0-flash");
        assert_eq!(s.gcp_location, "us-central1");
        assert_eq!(s.ads_api_version, "v17");
        assert_eq!(s.http_timeout_secs, 120);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn redacted_hides_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "developer_token = \"sekrit\"\naccess_token = \"ya29\"\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        let line = s.redacted();
        assert!(!line.contains("sekrit"));
        assert!(!line.contains("ya29"));
    }
}
