//! Access-token resolution for Google Cloud REST calls.
//!
//! Sources are tried in order and the first non-empty token wins:
//! explicit token, `CLOUDSDK_AUTH_ACCESS_TOKEN`, `GOOGLE_OAUTH_ACCESS_TOKEN`,
//! `gcloud auth print-access-token`, then the GCE metadata server.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::process::Command;

use crate::error::{Error, Result};

pub const TOKEN_ENV_VARS: [&str; 2] = ["CLOUDSDK_AUTH_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Where the token came from, reported in status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Explicit,
    Environment(&'static str),
    Gcloud,
    MetadataServer,
}

pub fn resolve_access_token(explicit: Option<&str>, client: &Client) -> Result<(String, TokenSource)> {
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok((token.to_string(), TokenSource::Explicit));
    }

    if let Some((token, var)) = token_from_env(|name| std::env::var(name).ok()) {
        return Ok((token, TokenSource::Environment(var)));
    }

    if let Some(token) = token_from_gcloud() {
        return Ok((token, TokenSource::Gcloud));
    }

    if let Some(token) = token_from_metadata_server(client) {
        return Ok((token, TokenSource::MetadataServer));
    }

    Err(Error::provider_auth_failed(
        "No Google Cloud access token available",
    ))
}

fn token_from_env<F>(lookup: F) -> Option<(String, &'static str)>
where
    F: Fn(&str) -> Option<String>,
{
    TOKEN_ENV_VARS.iter().find_map(|var| {
        lookup(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (v, *var))
    })
}

fn token_from_gcloud() -> Option<String> {
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn token_from_metadata_server(client: &Client) -> Option<String> {
    let response = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(std::time::Duration::from_secs(2))
        .send()
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    response
        .json::<MetadataToken>()
        .ok()
        .map(|t| t.access_token)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_lookup_prefers_cloudsdk_variable() {
        let found = token_from_env(|name| match name {
            "CLOUDSDK_AUTH_ACCESS_TOKEN" => Some("first".to_string()),
            "GOOGLE_OAUTH_ACCESS_TOKEN" => Some("second".to_string()),
            _ => None,
        });
        assert_eq!(found, Some(("first".to_string(), "CLOUDSDK_AUTH_ACCESS_TOKEN")));
    }

    #[test]
    fn env_lookup_skips_blank_values() {
        let found = token_from_env(|name| match name {
            "CLOUDSDK_AUTH_ACCESS_TOKEN" => Some("  ".to_string()),
            "GOOGLE_OAUTH_ACCESS_TOKEN" => Some("second".to_string()),
            _ => None,
        });
        assert_eq!(found, Some(("second".to_string(), "GOOGLE_OAUTH_ACCESS_TOKEN")));
    }

    #[test]
    fn explicit_token_short_circuits() {
        let client = Client::new();
        let (token, source) = resolve_access_token(Some(" abc "), &client).unwrap();
        assert_eq!(token, "abc");
        assert_eq!(source, TokenSource::Explicit);
    }
}
