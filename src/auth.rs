use std::process::Command;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Supplies the OAuth bearer token sent to Google APIs.
pub trait TokenProvider {
    fn bearer_token(&self) -> Result<String>;
}

pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Result<String> {
        Ok(self.0.trim().to_string())
    }
}

/// Asks the gcloud CLI once and reuses the token for the rest of the run.
#[derive(Default)]
pub struct GcloudToken {
    cached: OnceLock<String>,
}

impl TokenProvider for GcloudToken {
    fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.cached.get() {
            return Ok(token.clone());
        }

        debug!("Requesting access token from gcloud");
        let output = Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .context("Failed to run `gcloud auth print-access-token`")?;
        if !output.status.success() {
            bail!(
                "gcloud auth print-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let token = String::from_utf8(output.stdout)
            .context("gcloud returned a non-UTF-8 token")?
            .trim()
            .to_string();
        Ok(self.cached.get_or_init(|| token).clone())
    }
}

pub enum Credentials {
    Static(StaticToken),
    Gcloud(GcloudToken),
}

impl Credentials {
    /// A configured token wins; otherwise fall back to gcloud.
    pub fn from_settings(access_token: Option<&str>) -> Self {
        match access_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Credentials::Static(StaticToken(token.to_string())),
            None => Credentials::Gcloud(GcloudToken::default()),
        }
    }
}

impl TokenProvider for Credentials {
    fn bearer_token(&self) -> Result<String> {
        match self {
            Credentials::Static(t) => t.bearer_token(),
            Credentials::Gcloud(t) => t.bearer_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_token_is_used_verbatim() {
        let creds = Credentials::from_settings(Some("  ya29.token \n"));
        assert!(matches!(creds, Credentials::Static(_)));
        assert_eq!(creds.bearer_token().unwrap(), "ya29.token");
    }

    #[test]
    fn blank_token_falls_back_to_gcloud() {
        assert!(matches!(Credentials::from_settings(Some("   ")), Credentials::Gcloud(_)));
        assert!(matches!(Credentials::from_settings(None), Credentials::Gcloud(_)));
    }
}
